use tokio::time::Instant;

use unigate_common::RequestId;

/// Per-request value threaded through the handler chain as an axum
/// extension.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub started: Instant,
    pub path: String,
}

impl RequestContext {
    pub fn new(request_id: RequestId, path: impl Into<String>) -> Self {
        Self {
            request_id,
            started: Instant::now(),
            path: path.into(),
        }
    }
}
