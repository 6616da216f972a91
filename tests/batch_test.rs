//! Tests for [`Memo::resolve_batch`]: ordering, miss grouping, dedup and
//! failure handling.

mod common;

use std::sync::{Arc, Mutex};

use common::{FlakyStore, batch_inputs, flaky_memo, make_length, make_square};
use memokv::store::MemoryStore;
use memokv::{CachedFn, CallArgs, Memo, MemoError, Result};
use serde_json::{Value, json};

fn make_memo() -> (Memo, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (Memo::new(store.clone()), store)
}

/// Scalar `s -> s.len()` recording each argument it is called with.
fn make_scalar_length(memo: &Memo, namespace: &str) -> (CachedFn<u64>, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    let length = memo
        .wrap(move |args: CallArgs| {
            let recorded = recorded.clone();
            async move {
                let text: String = args.get(0)?;
                recorded.lock().unwrap().push(text.clone());
                Ok::<_, MemoError>(text.len() as u64)
            }
        })
        .namespace(namespace)
        .build()
        .unwrap();
    (length, seen)
}

// =========================================================================
// Ordering and grouping
// =========================================================================

#[tokio::test]
async fn mixed_functions_keep_request_order() {
    let (memo, _store) = make_memo();
    let (fn1, fn1_batches) = make_length(&memo, "fn1");
    let (fn2, fn2_batches) = make_length(&memo, "fn2");

    // warm fn1("x")
    memo.resolve_batch(vec![fn1.pending(CallArgs::new().arg("x"))])
        .await
        .unwrap();
    fn1_batches.lock().unwrap().clear();

    let results = memo
        .resolve_batch(vec![
            fn1.pending(CallArgs::new().arg("x")),
            fn2.pending(CallArgs::new().arg("yy")),
            fn1.pending(CallArgs::new().arg("zzz")),
        ])
        .await
        .unwrap();

    assert_eq!(results, vec![1, 2, 3]);
    assert_eq!(batch_inputs(&fn1_batches), vec![vec!["zzz".to_string()]]);
    assert_eq!(batch_inputs(&fn2_batches), vec![vec!["yy".to_string()]]);
}

#[tokio::test]
async fn differently_typed_functions_batch_as_json() {
    let (memo, _store) = make_memo();
    let count = memo
        .wrap(|args: CallArgs| async move {
            let text: String = args.get(0)?;
            Ok::<_, MemoError>(json!(text.len()))
        })
        .namespace("count")
        .build()
        .unwrap();
    let shout = memo
        .wrap(|args: CallArgs| async move {
            let text: String = args.get(0)?;
            Ok::<_, MemoError>(json!(text.to_uppercase()))
        })
        .namespace("shout")
        .build()
        .unwrap();

    let results = memo
        .resolve_batch(vec![
            shout.pending(CallArgs::new().arg("ab")),
            count.pending(CallArgs::new().arg("abc")),
        ])
        .await
        .unwrap();
    assert_eq!(results, vec![json!("AB"), json!(3)]);

    let length: u64 = serde_json::from_value(results[1].clone()).unwrap();
    assert_eq!(length, 3);
    assert_eq!(count.call(CallArgs::new().arg("abc")).await.unwrap(), json!(3));
}

#[tokio::test]
async fn interleaved_hits_and_misses() {
    let (memo, _store) = make_memo();
    let (square, calls) = make_square(&memo, "square", 0);

    for n in [1, 3, 5] {
        square.call(CallArgs::new().arg(n)).await.unwrap();
    }
    assert_eq!(calls.count(), 3);

    let pending = (0..7).map(|n| square.pending(CallArgs::new().arg(n))).collect();
    let results = memo.resolve_batch(pending).await.unwrap();

    assert_eq!(results, vec![0, 1, 4, 9, 16, 25, 36]);
    assert_eq!(calls.count(), 7);
}

#[tokio::test]
async fn scalar_misses_run_sequentially_in_group_order() {
    let (memo, _store) = make_memo();
    let (length, seen) = make_scalar_length(&memo, "length");

    let results = memo
        .resolve_batch(vec![
            length.pending(CallArgs::new().arg("ccc")),
            length.pending(CallArgs::new().arg("a")),
            length.pending(CallArgs::new().arg("bb")),
        ])
        .await
        .unwrap();

    assert_eq!(results, vec![3, 1, 2]);
    assert_eq!(*seen.lock().unwrap(), vec!["ccc", "a", "bb"]);
}

#[tokio::test]
async fn batch_and_scalar_recomputation_agree() {
    let (memo, _store) = make_memo();
    let (batched, _batches) = make_length(&memo, "batched");
    let (scalar, _seen) = make_scalar_length(&memo, "scalar");

    let inputs = ["", "a", "hello", "a", "naïve"];
    let batched_results = memo
        .resolve_batch(inputs.iter().map(|s| batched.pending(CallArgs::new().arg(*s))).collect())
        .await
        .unwrap();
    let scalar_results = memo
        .resolve_batch(inputs.iter().map(|s| scalar.pending(CallArgs::new().arg(*s))).collect())
        .await
        .unwrap();

    assert_eq!(batched_results, scalar_results);
}

#[tokio::test]
async fn cloned_handles_share_a_miss_group() {
    let (memo, _store) = make_memo();
    let (length, batches) = make_length(&memo, "length");
    let alias = length.clone();

    memo.resolve_batch(vec![
        length.pending(CallArgs::new().arg("a")),
        alias.pending(CallArgs::new().arg("bb")),
    ])
    .await
    .unwrap();

    assert_eq!(batch_inputs(&batches), vec![vec!["a".to_string(), "bb".to_string()]]);
}

#[tokio::test]
async fn batch_items_fall_back_to_named_args() {
    let (memo, _store) = make_memo();
    let received = Arc::new(Mutex::new(Vec::new()));
    let recorded = received.clone();
    let lookup = memo
        .wrap(|args: CallArgs| async move { Ok::<_, MemoError>(args.get_named::<Value>("id")?) })
        .namespace("lookup")
        .batch(move |items: Vec<CallArgs>| {
            recorded.lock().unwrap().extend(items.clone());
            async move {
                Ok::<_, MemoError>(items.into_iter().map(|item| json!(item.named.len())).collect())
            }
        })
        .build()
        .unwrap();

    let results = memo
        .resolve_batch(vec![
            lookup.pending(CallArgs::new().named("id", 1)),
            lookup.pending(CallArgs::new().arg(2).named("verbose", true)),
        ])
        .await
        .unwrap();

    assert_eq!(results, vec![json!(1), json!(0)]);
    let received = received.lock().unwrap();
    assert!(received[0].positional.is_empty());
    assert_eq!(received[1].positional, vec![json!(2)]);
    assert!(received[1].named.is_empty());
}

// =========================================================================
// Round trips
// =========================================================================

#[tokio::test]
async fn one_bulk_read_per_batch() {
    let (memo, store) = flaky_memo();
    let (length, _batches) = make_length(&memo, "length");

    memo.resolve_batch(
        ["a", "b", "c"]
            .iter()
            .map(|s| length.pending(CallArgs::new().arg(*s)))
            .collect(),
    )
    .await
    .unwrap();

    assert_eq!(store.reads(), 1);
    // three misses of one function, one pipeline
    assert_eq!(store.writes(), 1);
}

#[tokio::test]
async fn all_hits_skip_writes() {
    let (memo, store) = flaky_memo();
    let (square, calls) = make_square(&memo, "square", 0);
    square.call(CallArgs::new().arg(2)).await.unwrap();
    square.call(CallArgs::new().arg(3)).await.unwrap();
    let writes_before = store.writes();

    let results = memo
        .resolve_batch(vec![
            square.pending(CallArgs::new().arg(3)),
            square.pending(CallArgs::new().arg(2)),
        ])
        .await
        .unwrap();

    assert_eq!(results, vec![9, 4]);
    assert_eq!(store.writes(), writes_before);
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn empty_batch_touches_nothing() {
    let (memo, store) = flaky_memo();
    let results: Vec<i64> = memo.resolve_batch(Vec::new()).await.unwrap();
    assert!(results.is_empty());
    assert_eq!(store.reads(), 0);
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn misses_are_cached_for_later_calls() {
    let (memo, _store) = make_memo();
    let (square, calls) = make_square(&memo, "square", 0);

    memo.resolve_batch(vec![square.pending(CallArgs::new().arg(6))])
        .await
        .unwrap();
    assert_eq!(square.call(CallArgs::new().arg(6)).await.unwrap(), 36);
    assert_eq!(calls.count(), 1);
}

// =========================================================================
// Duplicates
// =========================================================================

#[tokio::test]
async fn duplicate_misses_compute_once() {
    let (memo, _store) = make_memo();
    let (length, batches) = make_length(&memo, "length");
    let (square, calls) = make_square(&memo, "square", 0);

    let results = memo
        .resolve_batch(vec![
            length.pending(CallArgs::new().arg("dup")),
            length.pending(CallArgs::new().arg("x")),
            length.pending(CallArgs::new().arg("dup")),
        ])
        .await
        .unwrap();
    assert_eq!(results, vec![3, 1, 3]);
    assert_eq!(batch_inputs(&batches), vec![vec!["dup".to_string(), "x".to_string()]]);

    let results = memo
        .resolve_batch(vec![
            square.pending(CallArgs::new().arg(4)),
            square.pending(CallArgs::new().arg(4)),
        ])
        .await
        .unwrap();
    assert_eq!(results, vec![16, 16]);
    assert_eq!(calls.count(), 1);
}

// =========================================================================
// Failures
// =========================================================================

#[tokio::test]
async fn wrong_batch_length_is_a_shape_error() {
    let (memo, store) = make_memo();
    let short = memo
        .wrap(|_args: CallArgs| async { Ok::<_, MemoError>(0u8) })
        .namespace("short")
        .batch(|_items: Vec<CallArgs>| async { Ok::<_, MemoError>(vec![1u8]) })
        .build()
        .unwrap();

    let err = memo
        .resolve_batch(vec![
            short.pending(CallArgs::new().arg(1)),
            short.pending(CallArgs::new().arg(2)),
        ])
        .await
        .unwrap_err();

    match err {
        MemoError::BatchShape {
            namespace,
            expected,
            got,
        } => {
            assert_eq!(namespace, "short");
            assert_eq!(expected, 2);
            assert_eq!(got, 1);
        }
        other => panic!("expected BatchShape, got {other:?}"),
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn failing_group_keeps_earlier_groups_cached() {
    let (memo, store) = make_memo();
    let (square, calls) = make_square(&memo, "square", 0);
    let broken = memo
        .wrap(|_args: CallArgs| async {
            Err::<i64, _>(MemoError::Computation("model offline".into()))
        })
        .namespace("broken")
        .build()
        .unwrap();

    let err = memo
        .resolve_batch(vec![
            square.pending(CallArgs::new().arg(3)),
            broken.pending(CallArgs::new().arg(3)),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, MemoError::Computation(_)));

    let key = square.key_for(&CallArgs::new().arg(3)).unwrap();
    assert!(store.contains_key(&key));
    assert_eq!(square.call(CallArgs::new().arg(3)).await.unwrap(), 9);
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn bulk_read_failure_propagates() {
    let (memo, store) = flaky_memo();
    let (square, calls) = make_square(&memo, "square", 0);
    store.set_fail_reads(true);

    let err = memo
        .resolve_batch(vec![square.pending(CallArgs::new().arg(1))])
        .await
        .unwrap_err();
    assert!(err.is_store_failure());
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn write_back_failure_still_returns_results() {
    let (memo, store) = flaky_memo();
    let (length, _batches) = make_length(&memo, "length");
    store.set_fail_writes(true);

    let results = memo
        .resolve_batch(vec![
            length.pending(CallArgs::new().arg("ab")),
            length.pending(CallArgs::new().arg("abc")),
        ])
        .await
        .unwrap();
    assert_eq!(results, vec![2, 3]);
    assert!(store.inner().is_empty());
}

#[tokio::test]
async fn pending_call_from_another_memo_is_rejected() {
    let (memo, _store) = make_memo();
    let (other, _other_store) = make_memo();
    let (square, calls) = make_square(&other, "square", 0);

    let err = memo
        .resolve_batch(vec![square.pending(CallArgs::new().arg(1))])
        .await
        .unwrap_err();
    assert!(matches!(err, MemoError::Configuration(_)));
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn bounded_namespace_trims_batch_writes() {
    let store = Arc::new(FlakyStore::new());
    let memo = Memo::new(store.clone());
    let (square, _calls) = make_square(&memo, "square", 2);

    let results: Result<Vec<i64>> = memo
        .resolve_batch((1..=4).map(|n| square.pending(CallArgs::new().arg(n))).collect())
        .await;
    assert_eq!(results.unwrap(), vec![1, 4, 9, 16]);

    let members = store.inner().index_members(square.descriptor().keys_index_name());
    let expected: Vec<String> = [3, 4]
        .iter()
        .map(|n| square.key_for(&CallArgs::new().arg(*n)).unwrap())
        .collect();
    assert_eq!(members, expected);
    assert_eq!(store.inner().len(), 2);
}
