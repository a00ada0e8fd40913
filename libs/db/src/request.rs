use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;

/// Metadata for request payloads carried by RequestEnvelope.
pub trait RequestMeta: Send + 'static {
    type Reply: Send + 'static;

    /// Stable label for tracing/metrics.
    fn request_kind(&self) -> &'static str;
}

/// Generic envelope for request/response over async channels.
pub struct RequestEnvelope<T: RequestMeta> {
    pub payload: T,
    pub reply: Option<oneshot::Sender<anyhow::Result<T::Reply>>>,
    pub timeout: Option<Duration>,
    pub request_id: u64,
    pub created_at: Instant,
}

impl<T: RequestMeta> RequestEnvelope<T> {
    pub fn new(payload: T, reply: Option<oneshot::Sender<anyhow::Result<T::Reply>>>) -> Self {
        Self {
            payload,
            reply,
            timeout: None,
            request_id: new_request_id(),
            created_at: Instant::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.request_kind()
    }

    pub fn respond(&mut self, result: anyhow::Result<T::Reply>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }

    pub fn elapsed_nanos(&self) -> u64 {
        self.created_at.elapsed().as_nanos() as u64
    }
}

pub fn new_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
