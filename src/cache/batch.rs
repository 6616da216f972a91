//! Batched miss resolution.
//!
//! [`Memo::resolve_batch`] answers many pending calls with one bulk read.
//! Misses are grouped per function (clones of one [`CachedFn`] count as the
//! same function), deduplicated by key within the group, recomputed once
//! per unique key, written back in one pipeline per group, and fanned out
//! to every request index that asked for them.
//!
//! Groups are processed in order of their first miss. A failing group stops
//! the batch; groups already written stay cached.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::{CachedFn, Memo};
use crate::codec;
use crate::telemetry;
use crate::types::{CacheValue, CallArgs};
use crate::{MemoError, Result};

/// One queued call, created by [`CachedFn::pending`].
pub struct PendingCall<R> {
    function: CachedFn<R>,
    args: CallArgs,
}

impl<R> PendingCall<R> {
    pub(super) fn new(function: CachedFn<R>, args: CallArgs) -> Self {
        Self { function, args }
    }

    pub fn args(&self) -> &CallArgs {
        &self.args
    }
}

/// Misses of one key: computed once, delivered to every index.
struct UniqueMiss {
    key: String,
    args: CallArgs,
    indices: Vec<usize>,
}

struct MissGroup<R> {
    function: CachedFn<R>,
    misses: Vec<UniqueMiss>,
    by_key: HashMap<String, usize>,
}

impl<R> MissGroup<R> {
    fn new(function: CachedFn<R>) -> Self {
        Self {
            function,
            misses: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    fn push(&mut self, index: usize, key: String, args: CallArgs) {
        match self.by_key.get(&key) {
            Some(&slot) => self.misses[slot].indices.push(index),
            None => {
                self.by_key.insert(key.clone(), self.misses.len());
                self.misses.push(UniqueMiss {
                    key,
                    args,
                    indices: vec![index],
                });
            }
        }
    }
}

impl Memo {
    /// Resolve pending calls, returning results in request order.
    ///
    /// Every call must come from a function wrapped by this memo. Lookup
    /// and computation failures propagate; write-back failures are
    /// swallowed like on the single-call path.
    ///
    /// All calls of one batch share the result type `R`. To mix functions
    /// whose natural results differ, wrap them as `serde_json::Value`
    /// returning computations and convert after the batch resolves.
    #[instrument(skip(self, pending), fields(batch_size = pending.len()))]
    pub async fn resolve_batch<R: CacheValue>(&self, pending: Vec<PendingCall<R>>) -> Result<Vec<R>> {
        metrics::histogram!(telemetry::BATCH_SIZE).record(pending.len() as f64);
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(foreign) = pending.iter().find(|call| !call.function.memo().same_instance(self)) {
            return Err(MemoError::Configuration(format!(
                "pending call for '{}' belongs to a different memo",
                foreign.function.descriptor().namespace()
            )));
        }

        let keys = pending
            .iter()
            .map(|call| call.function.key_for(&call.args))
            .collect::<Result<Vec<_>>>()?;

        let stored = self.store().mget(&keys).await?;
        if stored.len() != keys.len() {
            return Err(MemoError::ConsistencyFault(format!(
                "bulk read returned {} values for {} keys",
                stored.len(),
                keys.len()
            )));
        }

        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(keys.len()).collect();
        let mut groups: Vec<MissGroup<R>> = Vec::new();

        for (index, ((call, key), bytes)) in pending.into_iter().zip(keys).zip(stored).enumerate() {
            let namespace = call.function.descriptor().namespace().to_string();
            match bytes {
                Some(bytes) => {
                    metrics::counter!(telemetry::CACHE_HITS_TOTAL, "namespace" => namespace).increment(1);
                    slots[index] = Some(codec::decode_value(self.serializer(), &bytes)?);
                }
                None => {
                    metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "namespace" => namespace).increment(1);
                    let position = groups.iter().position(|group| {
                        Arc::ptr_eq(group.function.descriptor_arc(), call.function.descriptor_arc())
                    });
                    let group = match position {
                        Some(position) => &mut groups[position],
                        None => {
                            groups.push(MissGroup::new(call.function.clone()));
                            let last = groups.len() - 1;
                            &mut groups[last]
                        }
                    };
                    group.push(index, key, call.args);
                }
            }
        }

        for group in groups {
            self.resolve_group(group, &mut slots).await?;
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    MemoError::ConsistencyFault(format!("result slot {index} was never populated"))
                })
            })
            .collect()
    }

    /// Recompute one function's misses, write them back, fill their slots.
    async fn resolve_group<R: CacheValue>(&self, group: MissGroup<R>, slots: &mut [Option<R>]) -> Result<()> {
        let MissGroup { function, misses, .. } = group;
        let descriptor = function.descriptor();
        let namespace = descriptor.namespace().to_string();

        let (targets, args): (Vec<(String, Vec<usize>)>, Vec<CallArgs>) = misses
            .into_iter()
            .map(|miss| ((miss.key, miss.indices), miss.args))
            .unzip();

        let results = match function.vectorised() {
            Some(batch) => {
                let items: Vec<CallArgs> = args.into_iter().map(CallArgs::into_batch_item).collect();
                metrics::counter!(
                    telemetry::RECOMPUTATIONS_TOTAL,
                    "namespace" => namespace.clone(),
                    "mode" => "batch"
                )
                .increment(1);
                let results = batch(items).await?;
                if results.len() != targets.len() {
                    return Err(MemoError::BatchShape {
                        namespace,
                        expected: targets.len(),
                        got: results.len(),
                    });
                }
                results
            }
            None => {
                let mut results = Vec::with_capacity(args.len());
                for call_args in args {
                    metrics::counter!(
                        telemetry::RECOMPUTATIONS_TOTAL,
                        "namespace" => namespace.clone(),
                        "mode" => "scalar"
                    )
                    .increment(1);
                    results.push((function.scalar())(call_args).await?);
                }
                results
            }
        };

        let encoded = results
            .iter()
            .map(|value| codec::encode_value(self.serializer(), value))
            .collect::<Result<Vec<_>>>()?;

        let entries = targets
            .iter()
            .zip(&encoded)
            .map(|((key, _), bytes)| (key.clone(), bytes.clone()))
            .collect();
        self.write_back(descriptor, entries).await;
        debug!(%namespace, computed = targets.len(), "resolved miss group");

        for (((_, indices), value), bytes) in targets.into_iter().zip(results).zip(&encoded) {
            let (first, rest) = indices
                .split_first()
                .ok_or_else(|| MemoError::ConsistencyFault("miss without a request index".into()))?;
            for &index in rest {
                let copy = codec::decode_value(self.serializer(), bytes)?;
                fill(slots, index, copy)?;
            }
            fill(slots, *first, value)?;
        }
        Ok(())
    }
}

fn fill<R>(slots: &mut [Option<R>], index: usize, value: R) -> Result<()> {
    let slot = slots
        .get_mut(index)
        .ok_or_else(|| MemoError::ConsistencyFault(format!("result slot {index} is out of range")))?;
    if slot.is_some() {
        return Err(MemoError::ConsistencyFault(format!(
            "result slot {index} populated twice"
        )));
    }
    *slot = Some(value);
    Ok(())
}
