//! Response dispatcher — delivers replies to the chat platform with bounded
//! retry.
//!
//! The platform client itself is an external collaborator behind the
//! [`Transport`] trait. The dispatcher owns only the retry policy: transient
//! transport failures back off exponentially (`base * 2^attempt`) up to a
//! configured attempt ceiling; permanent failures (destination gone,
//! rejected payload) are surfaced immediately and never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::render::RenderedArtifact;

// ── Errors & acknowledgement ─────────────────────────────────────────────────

/// Failure of a single transport send.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Worth retrying: timeouts, rate limits, flaky connectivity.
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// Not worth retrying: destination invalid, payload rejected.
    #[error("permanent transport failure: {0}")]
    Permanent(String),
}

/// Failure surfaced by [`Dispatcher::dispatch`] after the policy ran out.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("delivery permanently failed: {0}")]
    Permanent(String),
}

/// Acknowledgement returned by the platform on successful delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryAck {
    /// Platform message id, when the transport reports one.
    pub message_id: Option<String>,
}

// ── Reply & transport seam ───────────────────────────────────────────────────

/// What the bot wants delivered: plain text or a rendered image with a
/// short caption.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Image { artifact: RenderedArtifact, caption: String },
}

/// Platform send operations. Implementations must not retry internally —
/// the dispatcher owns that policy.
pub trait Transport: Send + Sync + 'static {
    fn send_text(
        &self,
        destination: &str,
        text: &str,
    ) -> impl Future<Output = Result<DeliveryAck, TransportError>> + Send;

    fn send_image(
        &self,
        destination: &str,
        artifact: &RenderedArtifact,
        caption: &str,
    ) -> impl Future<Output = Result<DeliveryAck, TransportError>> + Send;
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

/// Retry-wrapping sender. Clones share the transport.
#[derive(Debug)]
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl<T: Transport> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
        }
    }
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, config: &DispatchConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
        }
    }

    /// Deliver `reply` to `destination` under the retry policy.
    pub async fn dispatch(
        &self,
        reply: &Reply,
        destination: &str,
    ) -> Result<DeliveryAck, DeliveryError> {
        let mut attempt: u32 = 0;

        loop {
            let result = match reply {
                Reply::Text(text) => self.transport.send_text(destination, text).await,
                Reply::Image { artifact, caption } => {
                    self.transport.send_image(destination, artifact, caption).await
                }
            };

            attempt += 1;

            match result {
                Ok(ack) => {
                    debug!(destination, attempt, "reply delivered");
                    return Ok(ack);
                }
                Err(TransportError::Permanent(msg)) => {
                    warn!(destination, %msg, "permanent delivery failure, not retrying");
                    return Err(DeliveryError::Permanent(msg));
                }
                Err(TransportError::Transient(msg)) => {
                    if attempt >= self.max_attempts {
                        warn!(destination, attempts = attempt, %msg, "delivery retries exhausted");
                        return Err(DeliveryError::Exhausted { attempts: attempt, last: msg });
                    }
                    // base, 2*base, 4*base, …
                    let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    debug!(destination, attempt, delay_ms = delay.as_millis() as u64, %msg,
                        "transient delivery failure, backing off");
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Scripted transport: pops one outcome per send and records call times.
    struct MockTransport {
        script: Mutex<Vec<Result<DeliveryAck, TransportError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl MockTransport {
        fn new(mut script: Vec<Result<DeliveryAck, TransportError>>) -> Self {
            script.reverse(); // pop() yields in declaration order
            Self { script: Mutex::new(script), calls: Mutex::new(Vec::new()) }
        }

        fn pop(&self) -> Result<DeliveryAck, TransportError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(TransportError::Transient("script exhausted".into())))
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Transport for Arc<MockTransport> {
        async fn send_text(&self, _: &str, _: &str) -> Result<DeliveryAck, TransportError> {
            self.pop()
        }

        async fn send_image(
            &self,
            _: &str,
            _: &RenderedArtifact,
            _: &str,
        ) -> Result<DeliveryAck, TransportError> {
            self.pop()
        }
    }

    fn policy(max_attempts: u32, base_ms: u64) -> DispatchConfig {
        DispatchConfig { max_attempts, backoff_base: Duration::from_millis(base_ms) }
    }

    fn ok() -> Result<DeliveryAck, TransportError> {
        Ok(DeliveryAck { message_id: Some("m1".into()) })
    }

    fn transient() -> Result<DeliveryAck, TransportError> {
        Err(TransportError::Transient("socket reset".into()))
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_retry() {
        let transport = Arc::new(MockTransport::new(vec![ok()]));
        let d = Dispatcher::new(transport.clone(), &policy(4, 100));

        let ack = d.dispatch(&Reply::Text("hi".into()), "chan0").await.unwrap();
        assert_eq!(ack.message_id.as_deref(), Some("m1"));
        assert_eq!(transport.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_with_increasing_backoff() {
        let transport = Arc::new(MockTransport::new(vec![transient(), transient(), ok()]));
        let d = Dispatcher::new(transport.clone(), &policy(4, 100));

        d.dispatch(&Reply::Text("hi".into()), "chan0").await.unwrap();

        let times = transport.call_times();
        assert_eq!(times.len(), 3);
        let gap1 = times[1] - times[0];
        let gap2 = times[2] - times[1];
        assert_eq!(gap1, Duration::from_millis(100));
        assert_eq!(gap2, Duration::from_millis(200));
        assert!(gap2 > gap1, "backoff must strictly increase");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_attempt_ceiling() {
        let transport = Arc::new(MockTransport::new(vec![
            transient(),
            transient(),
            transient(),
            ok(), // never reached
        ]));
        let d = Dispatcher::new(transport.clone(), &policy(3, 10));

        let err = d.dispatch(&Reply::Text("hi".into()), "chan0").await.unwrap_err();
        match err {
            DeliveryError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(transport.call_times().len(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let transport = Arc::new(MockTransport::new(vec![
            Err(TransportError::Permanent("destination deleted".into())),
            ok(),
        ]));
        let d = Dispatcher::new(transport.clone(), &policy(4, 10));

        let err = d.dispatch(&Reply::Text("hi".into()), "chan0").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent(_)));
        assert_eq!(transport.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn image_replies_use_the_image_path() {
        let transport = Arc::new(MockTransport::new(vec![transient(), ok()]));
        let d = Dispatcher::new(transport.clone(), &policy(2, 50));

        let reply = Reply::Image {
            artifact: RenderedArtifact { bytes: vec![1, 2, 3], mime_type: "image/png" },
            caption: "Caffeine".into(),
        };
        d.dispatch(&reply, "chan0").await.unwrap();
        assert_eq!(transport.call_times().len(), 2);
    }
}
