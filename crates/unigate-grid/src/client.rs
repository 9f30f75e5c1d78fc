use std::time::Duration;

use bytes::Bytes;

use crate::catalog::GridService;

/// Header carrying the shared secret to the grid upstream.
const SECRET_HEADER: &str = "x-grid-secret";

const USER_AGENT: &str = concat!("unigate/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("grid upstream returned status {0}")]
    Status(u16),
    #[error("grid upstream unreachable: {0}")]
    Transport(String),
}

/// Signed HTTPS client for the grid upstream. Every call carries the shared
/// secret header, an identifying user-agent, and the configured timeout.
pub struct GridClient {
    base_url: String,
    secret: String,
    timeout: Duration,
    http: wreq::Client,
}

impl GridClient {
    pub fn new(base_url: String, secret: String, timeout: Duration) -> Result<Self, GridError> {
        let http = wreq::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| GridError::Transport(err.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
            timeout,
            http,
        })
    }

    /// Fetches `service` for `input`, returning the payload and its content
    /// type.
    pub async fn call(
        &self,
        service: GridService,
        input: &str,
    ) -> Result<(Bytes, String), GridError> {
        let url = format!("{}/{}", self.base_url, service.upstream_path());
        let resp = self
            .http
            .get(&url)
            .query(&[("q", input)])
            .header(SECRET_HEADER, &self.secret)
            .header("user-agent", USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| GridError::Transport(err.to_string()))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(GridError::Status(status));
        }
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let payload = resp
            .bytes()
            .await
            .map_err(|err| GridError::Transport(err.to_string()))?;
        Ok((payload, content_type))
    }
}
