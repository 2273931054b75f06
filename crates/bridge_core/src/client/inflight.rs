//! Bookkeeping for in-flight calls and recently completed results.

use crate::action::{ActionResult, IdempotencyKey};
use crate::error::RemoteFailureReason;
use crate::identifier::Identifier;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

type Outcome = Option<ActionResult>;

/// What a caller should do for a given key.
pub(crate) enum Slot {
    /// No call is outstanding; the caller must run it and publish the result
    Leader(watch::Sender<Outcome>),
    /// An identical call is already running; wait on its channel
    Follower(watch::Receiver<Outcome>),
    /// An identical call completed recently
    Cached(ActionResult),
}

/// At most one outstanding call per idempotency key.
#[derive(Debug, Default)]
pub(crate) struct InFlightTable {
    calls: DashMap<IdempotencyKey, watch::Receiver<Outcome>>,
}

impl InFlightTable {
    /// Claims `key` or joins the call that already holds it.
    ///
    /// `recheck` runs while the key's shard is locked so a result published
    /// between the caller's cache lookup and this claim is not missed.
    pub(crate) fn join_or_lead(
        &self,
        key: IdempotencyKey,
        recheck: impl FnOnce() -> Option<ActionResult>,
    ) -> Slot {
        match self.calls.entry(key) {
            Entry::Occupied(entry) => Slot::Follower(entry.get().clone()),
            Entry::Vacant(entry) => {
                if let Some(result) = recheck() {
                    return Slot::Cached(result);
                }
                let (sender, receiver) = watch::channel(None);
                entry.insert(receiver);
                Slot::Leader(sender)
            }
        }
    }

    /// Publishes the leader's result and releases the key.
    pub(crate) fn complete(
        &self,
        key: &IdempotencyKey,
        sender: &watch::Sender<Outcome>,
        result: ActionResult,
    ) {
        sender.send_replace(Some(result));
        self.calls.remove(key);
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

/// Waits for the leader's published result.
pub(crate) async fn wait_for_result(mut receiver: watch::Receiver<Outcome>) -> ActionResult {
    match receiver.wait_for(Option::is_some).await {
        Ok(outcome) => outcome
            .clone()
            .unwrap_or_else(|| ActionResult::RemoteFailure(RemoteFailureReason::Io("call aborted".into()))),
        Err(_) => ActionResult::RemoteFailure(RemoteFailureReason::Io(
            "call aborted before producing a result".into(),
        )),
    }
}

#[derive(Debug)]
struct CachedResult {
    result: ActionResult,
    stored_at: Instant,
}

/// Short-lived cache answering duplicates that arrive just after completion.
///
/// Only the most recently dispatched request per target may hold an entry.
/// A different request for the same target (revoke after grant) evicts the
/// older result, so a later repeat of the first request is sent again.
#[derive(Debug)]
pub(crate) struct ResultCache {
    entries: DashMap<IdempotencyKey, CachedResult>,
    latest: DashMap<Identifier, IdempotencyKey>,
    window: Duration,
}

impl ResultCache {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            latest: DashMap::new(),
            window,
        }
    }

    /// Records `key` as the newest request for `target`, evicting the
    /// cached result of whatever request it replaces.
    pub(crate) fn supersede(&self, target: &Identifier, key: IdempotencyKey) {
        if let Some(previous) = self.latest.insert(target.clone(), key) {
            if previous != key {
                self.entries.remove(&previous);
            }
        }
    }

    /// Only definitive outcomes are cached. Timeouts and transport failures
    /// leave the remote state unknown, so a repeat must really re-attempt.
    pub(crate) fn is_cacheable(result: &ActionResult) -> bool {
        matches!(
            result,
            ActionResult::Success(_) | ActionResult::RemoteFailure(RemoteFailureReason::Refused { .. })
        )
    }

    pub(crate) fn get(&self, key: &IdempotencyKey) -> Option<ActionResult> {
        if let Some(entry) = self.entries.get(key) {
            if entry.stored_at.elapsed() < self.window {
                return Some(entry.result.clone());
            }
        }
        self.entries
            .remove_if(key, |_, cached| cached.stored_at.elapsed() >= self.window);
        None
    }

    /// Caches `result` unless another request for `target` was dispatched
    /// since `key` was.
    pub(crate) fn insert(&self, target: &Identifier, key: IdempotencyKey, result: &ActionResult) {
        if self.window.is_zero() || !Self::is_cacheable(result) {
            return;
        }
        self.entries
            .retain(|_, cached| cached.stored_at.elapsed() < self.window);

        // Hold the target's slot so a concurrent `supersede` cannot land
        // between the check and the insert.
        let Some(latest) = self.latest.get(target) else {
            return;
        };
        if *latest != key {
            debug!("Not caching superseded result for {}", target);
            return;
        }
        self.entries.insert(
            key,
            CachedResult {
                result: result.clone(),
                stored_at: Instant::now(),
            },
        );
    }
}
