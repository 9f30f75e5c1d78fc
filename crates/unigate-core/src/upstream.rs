use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use wreq::{Client, Proxy};

use unigate_provider::{Outcome, OutcomeKind};

/// Raw upstream byte stream, bridged off the HTTP client's body.
pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub stream: bool,
    /// Per-attempt deadline; covers the full body for unary calls and the
    /// response head for streaming calls.
    pub timeout: Duration,
    /// Per-credential egress proxy override.
    pub proxy: Option<String>,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| key.to_ascii_lowercase() == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Transport-level failure (no HTTP response came back).
#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream transport failure: {message}")]
pub struct UpstreamFailure {
    pub kind: OutcomeKind,
    pub timed_out: bool,
    pub message: String,
}

impl UpstreamFailure {
    pub fn outcome(&self) -> Outcome {
        if self.timed_out {
            Outcome::Timeout
        } else {
            Outcome::Retryable(self.kind)
        }
    }
}

/// Seam between the dispatcher and HTTP IO; tests drive the dispatcher with
/// scripted implementations.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>>;
}

/// wreq-backed client. Clients are cached per egress proxy URL because a
/// proxy is a client-construction-time property.
pub struct WreqClient {
    connect_timeout: Duration,
    stream_idle_timeout: Duration,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl WreqClient {
    pub fn new(connect_timeout: Duration, stream_idle_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            stream_idle_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, UpstreamFailure> {
        let key = proxy
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let mut cache = self.clients.lock().map_err(|_| UpstreamFailure {
            kind: OutcomeKind::Io,
            timed_out: false,
            message: "upstream client cache lock failed".to_string(),
        })?;
        if let Some(client) = cache.get(&key) {
            return Ok(client.clone());
        }
        let mut builder = Client::builder().connect_timeout(self.connect_timeout);
        if let Some(proxy_url) = key.as_deref() {
            builder = builder.proxy(Proxy::all(proxy_url).map_err(map_wreq_error)?);
        }
        let client = builder.build().map_err(map_wreq_error)?;
        cache.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for WreqClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30))
    }
}

impl UpstreamClient for WreqClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client_for(req.proxy.as_deref())?;
            let mut builder = client.request(wreq::Method::POST, &req.url);
            // A whole-exchange timeout would cut long streams short; for
            // streaming the head deadline is enforced by the caller and the
            // body by the idle watchdog below.
            if !req.stream {
                builder = builder.timeout(req.timeout);
            }
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            let resp = builder.body(req.body).send().await.map_err(map_wreq_error)?;
            convert_response(resp, req.stream, self.stream_idle_timeout).await
        })
    }
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<UpstreamResponse, UpstreamFailure> {
    let status = resp.status().as_u16();
    let headers = resp
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect::<Vec<_>>();

    let success = (200..300).contains(&status);
    if !success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    // Bridge the body onto a channel; the reader task owns the connection
    // and drops it (releasing the socket) on idle timeout, stream error, or
    // a gone receiver.
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let Ok(item) = next else {
                break;
            };
            let Some(item) = item else {
                break;
            };
            let Ok(chunk) = item else {
                break;
            };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(UpstreamResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn map_wreq_error(err: wreq::Error) -> UpstreamFailure {
    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();
    let (kind, timed_out) = if err.is_timeout() {
        (OutcomeKind::Io, true)
    } else if err.is_connect() {
        if lowered.contains("dns") || lowered.contains("resolve") {
            (OutcomeKind::Dns, false)
        } else if lowered.contains("tls") || lowered.contains("ssl") {
            (OutcomeKind::Tls, false)
        } else {
            (OutcomeKind::Connect, false)
        }
    } else if lowered.contains("tls") || lowered.contains("ssl") {
        (OutcomeKind::Tls, false)
    } else {
        (OutcomeKind::Io, false)
    };
    UpstreamFailure {
        kind,
        timed_out,
        message,
    }
}
