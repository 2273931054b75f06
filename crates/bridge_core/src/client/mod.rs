//! Integration Client: timeout-bounded, deduplicated calls to the game
//! server's control interface.
//!
//! Each [`ActionRequest`] goes through the same steps:
//!
//! 1. Answer from the short-lived result cache if an identical request
//!    completed within the dedup window.
//! 2. Join an identical call that is already in flight, or become its
//!    leader. The leader runs on its own task so a caller that gives up does
//!    not abort the call the others are waiting on.
//! 3. Send over a pooled session, bounded by the per-call timeout, retrying
//!    transport failures with backoff only when the action is idempotent.
//! 4. Publish the result to every waiter, cache it when it is definitive and
//!    release the key.
//!
//! A `Timeout` means the wait was abandoned, not that the remote side did
//! nothing: the request may still have been applied.

use crate::action::{Action, ActionRequest, ActionResult};
use crate::config::{ClientConfig, RemoteConfig};
use crate::error::{RemoteFailureReason, TransportError};
use crate::identifier::Identifier;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod inflight;
pub mod protocol;
pub mod retry;
pub mod transport;

use inflight::{wait_for_result, InFlightTable, ResultCache, Slot};
pub use protocol::{ControlRequest, ControlResponse, Opcode};
pub use retry::RetryPolicy;
pub use transport::{ControlTransport, TcpTransport};

/// Snapshot of client counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Calls that were actually executed against the transport (one per leader)
    pub calls_issued: u64,
    /// Individual transport attempts, including retries
    pub attempts: u64,
    /// Requests that joined an identical in-flight call
    pub deduplicated: u64,
    /// Requests answered from the result cache
    pub cache_hits: u64,
}

#[derive(Debug, Default)]
struct Counters {
    calls_issued: AtomicU64,
    attempts: AtomicU64,
    deduplicated: AtomicU64,
    cache_hits: AtomicU64,
}

#[derive(Debug)]
struct ClientInner {
    transport: Arc<dyn ControlTransport>,
    call_timeout: Duration,
    retry: RetryPolicy,
    in_flight: InFlightTable,
    cache: ResultCache,
    counters: Counters,
}

/// Outcome of a single attempt that did not produce a response.
enum AttemptFailure {
    Transport(TransportError),
    TimedOut,
}

impl AttemptFailure {
    fn is_transient(&self) -> bool {
        match self {
            AttemptFailure::TimedOut => true,
            AttemptFailure::Transport(e) => {
                matches!(e, TransportError::ConnectionRefused(_) | TransportError::Io(_))
            }
        }
    }

    fn into_result(self) -> ActionResult {
        match self {
            AttemptFailure::TimedOut => ActionResult::Timeout,
            AttemptFailure::Transport(e) => ActionResult::RemoteFailure(e.into()),
        }
    }

    fn describe(&self, timeout: Duration) -> String {
        match self {
            AttemptFailure::TimedOut => format!("no response within {}ms", timeout.as_millis()),
            AttemptFailure::Transport(e) => e.to_string(),
        }
    }
}

/// Client for the remote control interface.
///
/// Cheap to clone; clones share the session pool, in-flight table, result
/// cache and statistics.
#[derive(Debug, Clone)]
pub struct IntegrationClient {
    inner: Arc<ClientInner>,
}

impl IntegrationClient {
    /// Creates a client over an arbitrary transport.
    pub fn new(transport: Arc<dyn ControlTransport>, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                call_timeout: config.call_timeout(),
                retry: RetryPolicy::from_config(config),
                in_flight: InFlightTable::default(),
                cache: ResultCache::new(config.dedup_window()),
                counters: Counters::default(),
            }),
        }
    }

    /// Creates a client speaking the TCP control protocol to `remote`.
    ///
    /// No connection is made until the first call.
    pub fn connect(remote: &RemoteConfig, config: &ClientConfig) -> Self {
        Self::new(Arc::new(TcpTransport::new(remote.clone())), config)
    }

    /// Performs `request`, deduplicating against identical requests.
    pub async fn dispatch(&self, request: &ActionRequest) -> ActionResult {
        let key = request.idempotency_key();
        let counters = &self.inner.counters;
        self.inner.cache.supersede(request.target(), key);

        if let Some(result) = self.inner.cache.get(&key) {
            counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("♻️ Answering {} for {} from result cache", request.action().kind_name(), request.target());
            return result;
        }

        let receiver = match self.inner.in_flight.join_or_lead(key, || self.inner.cache.get(&key)) {
            Slot::Cached(result) => {
                counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return result;
            }
            Slot::Follower(receiver) => {
                counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                debug!("🔗 Joining in-flight {} for {}", request.action().kind_name(), request.target());
                receiver
            }
            Slot::Leader(sender) => {
                let receiver = sender.subscribe();
                let inner = Arc::clone(&self.inner);
                let request = request.clone();
                tokio::spawn(async move {
                    let result = inner.execute(&request).await;
                    inner.cache.insert(request.target(), key, &result);
                    inner.in_flight.complete(&key, &sender, result);
                });
                receiver
            }
        };

        wait_for_result(receiver).await
    }

    /// Grants `role` to `target` on the game server.
    pub async fn set_role(&self, target: &Identifier, role: &str) -> ActionResult {
        self.submit(target, Action::GrantRole { role: role.to_string() }).await
    }

    /// Removes `role` from `target` on the game server.
    pub async fn remove_role(&self, target: &Identifier, role: &str) -> ActionResult {
        self.submit(target, Action::RevokeRole { role: role.to_string() }).await
    }

    pub async fn kick(&self, target: &Identifier, reason: Option<&str>) -> ActionResult {
        self.submit(target, Action::Kick { reason: reason.map(str::to_string) }).await
    }

    /// Sends a server-wide announcement attributed to `sender`.
    pub async fn broadcast(&self, sender: &Identifier, message: &str) -> ActionResult {
        self.submit(sender, Action::Broadcast { message: message.to_string() }).await
    }

    pub async fn custom(
        &self,
        target: &Identifier,
        op: &str,
        payload: serde_json::Value,
        idempotent: bool,
    ) -> ActionResult {
        self.submit(
            target,
            Action::Custom {
                op: op.to_string(),
                payload,
                idempotent,
            },
        )
        .await
    }

    async fn submit(&self, target: &Identifier, action: Action) -> ActionResult {
        match ActionRequest::new(target.clone(), action) {
            Ok(request) => self.dispatch(&request).await,
            Err(rejected) => ActionResult::Rejected(rejected),
        }
    }

    pub fn stats(&self) -> ClientStats {
        let counters = &self.inner.counters;
        ClientStats {
            calls_issued: counters.calls_issued.load(Ordering::Relaxed),
            attempts: counters.attempts.load(Ordering::Relaxed),
            deduplicated: counters.deduplicated.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Number of distinct calls currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }
}

impl ClientInner {
    /// Runs the attempt loop for one leader.
    async fn execute(&self, request: &ActionRequest) -> ActionResult {
        self.counters.calls_issued.fetch_add(1, Ordering::Relaxed);

        let frame = ControlRequest::from_action(request);
        let attempts = self.retry.attempts_for(request.action().is_idempotent());
        let mut last_failure = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                warn!(
                    "🔁 Retrying {} for {} (attempt {}/{}) in {:?}",
                    frame.op,
                    request.target(),
                    attempt + 1,
                    attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            debug!("📤 Sending {} for {} ({})", frame.op, request.target(), frame.correlation);

            let failure = match tokio::time::timeout(self.call_timeout, self.transport.call(&frame)).await {
                Ok(Ok(response)) => return interpret(request, response),
                Ok(Err(e)) => AttemptFailure::Transport(e),
                Err(_) => AttemptFailure::TimedOut,
            };

            warn!(
                "⚠️ {} for {} failed: {}",
                frame.op,
                request.target(),
                failure.describe(self.call_timeout)
            );

            if !failure.is_transient() {
                return failure.into_result();
            }
            last_failure = Some(failure);
        }

        match last_failure {
            Some(failure) if attempts > 1 => ActionResult::RemoteFailure(RemoteFailureReason::RetriesExhausted {
                attempts,
                last: failure.describe(self.call_timeout),
            }),
            Some(failure) => failure.into_result(),
            None => ActionResult::RemoteFailure(RemoteFailureReason::Protocol("no attempt was made".into())),
        }
    }
}

fn interpret(request: &ActionRequest, response: ControlResponse) -> ActionResult {
    if response.ok {
        let detail = response
            .detail
            .unwrap_or_else(|| format!("{} applied to {}", request.action().kind_name(), request.target()));
        info!("✅ {} for {}: {}", request.action().kind_name(), request.target(), detail);
        ActionResult::Success(detail)
    } else {
        let code = response.code.unwrap_or_else(|| "refused".to_string());
        let reason = response.reason.unwrap_or_default();
        warn!("🚫 Remote refused {} for {}: {} {}", request.action().kind_name(), request.target(), code, reason);
        ActionResult::RemoteFailure(RemoteFailureReason::Refused { code, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::normalize;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted transport: pops one behaviour per call, defaulting to success.
    #[derive(Debug, Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Step>>,
        delay: Duration,
        calls: AtomicU64,
    }

    #[derive(Debug, Clone)]
    enum Step {
        Fail(TransportError),
        Refuse,
        Hang,
    }

    impl ScriptedTransport {
        fn with(steps: Vec<Step>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                delay,
                calls: AtomicU64::new(0),
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ControlTransport for ScriptedTransport {
        async fn call(&self, request: &ControlRequest) -> Result<ControlResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front();
            tokio::time::sleep(self.delay).await;
            match step {
                None => Ok(ControlResponse::success(request.correlation.clone(), "applied")),
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Refuse) => Ok(ControlResponse::refused(
                    request.correlation.clone(),
                    "no_such_player",
                    "player is not connected",
                )),
                Some(Step::Hang) => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn fast_config() -> ClientConfig {
        ClientConfig {
            call_timeout_ms: 200,
            max_retries: 2,
            initial_backoff_ms: 5,
            backoff_multiplier: 2,
            max_backoff_ms: 20,
            dedup_window_ms: 5000,
        }
    }

    fn id(raw: &str) -> Identifier {
        normalize(raw).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_share_one_call() {
        let transport = ScriptedTransport::with(vec![], Duration::from_millis(100));
        let client = IntegrationClient::new(transport.clone(), &fast_config());
        let target = id("someckey99");

        let (first, second) = tokio::join!(
            client.set_role(&target, "admin"),
            client.set_role(&target, "admin")
        );

        assert_eq!(transport.calls(), 1);
        assert_eq!(first, second);
        assert!(first.is_success());
        assert_eq!(client.stats().calls_issued, 1);
        assert_eq!(client.stats().deduplicated, 1);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_repeat_within_window_is_served_from_cache() {
        let transport = ScriptedTransport::with(vec![], Duration::ZERO);
        let client = IntegrationClient::new(transport.clone(), &fast_config());
        let target = id("player");

        let first = client.kick(&target, Some("afk")).await;
        let second = client.kick(&target, Some("afk")).await;
        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.stats().cache_hits, 1);

        client.kick(&target, Some("griefing")).await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_grant_revoke_grant_sends_every_change() {
        let transport = ScriptedTransport::with(vec![], Duration::ZERO);
        let client = IntegrationClient::new(transport.clone(), &fast_config());
        let target = id("player");

        assert!(client.set_role(&target, "admin").await.is_success());
        assert!(client.remove_role(&target, "admin").await.is_success());
        assert!(client.set_role(&target, "admin").await.is_success());

        assert_eq!(transport.calls(), 3);
        assert_eq!(client.stats().cache_hits, 0);
    }

    #[tokio::test]
    async fn test_unresponsive_remote_times_out_promptly() {
        let transport = ScriptedTransport::with(vec![Step::Hang], Duration::ZERO);
        let config = ClientConfig { call_timeout_ms: 2000, ..fast_config() };
        let client = IntegrationClient::new(transport.clone(), &config);

        let started = std::time::Instant::now();
        let result = client.kick(&id("player"), None).await;
        let elapsed = started.elapsed();

        assert_eq!(result, ActionResult::Timeout);
        assert!(elapsed >= Duration::from_millis(1900), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "returned too late: {elapsed:?}");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_are_not_cached() {
        let transport = ScriptedTransport::with(vec![Step::Hang], Duration::ZERO);
        let client = IntegrationClient::new(transport.clone(), &fast_config());
        let target = id("player");

        assert_eq!(client.broadcast(&target, "hello").await, ActionResult::Timeout);
        assert!(client.broadcast(&target, "hello").await.is_success());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_idempotent_call_retries_transient_failures() {
        let transport = ScriptedTransport::with(
            vec![
                Step::Fail(TransportError::Io("reset".into())),
                Step::Fail(TransportError::ConnectionRefused("down".into())),
            ],
            Duration::ZERO,
        );
        let client = IntegrationClient::new(transport.clone(), &fast_config());

        let result = client.set_role(&id("player"), "mentor").await;
        assert!(result.is_success());
        assert_eq!(transport.calls(), 3);
        assert_eq!(client.stats().attempts, 3);
        assert_eq!(client.stats().calls_issued, 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let failures = vec![Step::Fail(TransportError::Io("reset".into())); 5];
        let transport = ScriptedTransport::with(failures, Duration::ZERO);
        let client = IntegrationClient::new(transport.clone(), &fast_config());

        let result = client.remove_role(&id("player"), "mentor").await;
        assert!(matches!(
            result,
            ActionResult::RemoteFailure(RemoteFailureReason::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_idempotent_call_is_attempted_once() {
        let transport = ScriptedTransport::with(vec![Step::Fail(TransportError::Io("reset".into()))], Duration::ZERO);
        let client = IntegrationClient::new(transport.clone(), &fast_config());

        let result = client.kick(&id("player"), None).await;
        assert_eq!(result, ActionResult::RemoteFailure(RemoteFailureReason::Io("reset".into())));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_refusal_is_never_retried() {
        let transport = ScriptedTransport::with(vec![Step::Refuse], Duration::ZERO);
        let client = IntegrationClient::new(transport.clone(), &fast_config());

        let result = client.set_role(&id("ghost"), "admin").await;
        assert_eq!(
            result,
            ActionResult::RemoteFailure(RemoteFailureReason::Refused {
                code: "no_such_player".into(),
                reason: "player is not connected".into(),
            })
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_authentication_failure_is_not_retried() {
        let transport = ScriptedTransport::with(
            vec![Step::Fail(TransportError::Authentication("bad token".into()))],
            Duration::ZERO,
        );
        let client = IntegrationClient::new(transport.clone(), &fast_config());

        let result = client.set_role(&id("player"), "admin").await;
        assert_eq!(
            result,
            ActionResult::RemoteFailure(RemoteFailureReason::AuthenticationFailed("bad token".into()))
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_shared_call() {
        let transport = ScriptedTransport::with(vec![], Duration::from_millis(100));
        let client = IntegrationClient::new(transport.clone(), &fast_config());
        let target = id("player");

        let impatient = tokio::time::timeout(Duration::from_millis(10), client.set_role(&target, "admin")).await;
        assert!(impatient.is_err());

        let patient = client.set_role(&target, "admin").await;
        assert!(patient.is_success());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected_without_a_call() {
        let transport = ScriptedTransport::with(vec![], Duration::ZERO);
        let client = IntegrationClient::new(transport.clone(), &fast_config());

        let result = client.custom(&id("player"), "auth", serde_json::Value::Null, false).await;
        assert!(matches!(result, ActionResult::Rejected(_)));
        assert_eq!(transport.calls(), 0);
    }
}
