use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Method};

/// Transport failure classes, named by the error codes the failover config
/// speaks (`retryableErrors`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    ConnectionRefused,
    TimedOut,
    NotFound,
    Tls,
    Other,
}

impl NetworkErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            NetworkErrorKind::ConnectionRefused => "ECONNREFUSED",
            NetworkErrorKind::TimedOut => "ETIMEDOUT",
            NetworkErrorKind::NotFound => "ENOTFOUND",
            NetworkErrorKind::Tls => "ETLS",
            NetworkErrorKind::Other => "EUNKNOWN",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{} ({message})", kind.code())]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub message: String,
}

#[derive(Debug)]
pub struct UpstreamRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub stream: bool,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    /// Chunked body; an `Err` item means the read broke mid-stream.
    Stream(mpsc::Receiver<Result<Bytes, NetworkError>>),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// IO seam for the dispatcher; tests substitute a stub.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, NetworkError>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub connect_timeout: Duration,
    /// Per-attempt ceiling for unary requests.
    pub request_timeout: Duration,
    /// Max silence between stream chunks before the read is abandoned.
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    client: Client,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        // No global request timeout on the client: streams are unbounded
        // with an idle cap, and the dispatcher enforces the unary ceiling.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.stream_idle_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &UpstreamClientConfig {
        &self.config
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, NetworkError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self.client.request(Method::POST, &req.url);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            builder = builder.body(req.body);

            let send = builder.send();
            let resp = if req.stream {
                send.await.map_err(map_wreq_error)?
            } else {
                tokio::time::timeout(self.config.request_timeout, send)
                    .await
                    .map_err(|_| NetworkError {
                        kind: NetworkErrorKind::TimedOut,
                        message: "request timeout elapsed".to_string(),
                    })?
                    .map_err(map_wreq_error)?
            };

            convert_response(resp, req.stream, self.config.stream_idle_timeout).await
        })
    }
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<UpstreamResponse, NetworkError> {
    let status = resp.status().as_u16();
    let headers = resp
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, NetworkError>>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let item = match next {
                Ok(item) => item,
                Err(_) => {
                    let _ = tx
                        .send(Err(NetworkError {
                            kind: NetworkErrorKind::TimedOut,
                            message: "stream idle timeout".to_string(),
                        }))
                        .await;
                    break;
                }
            };
            let Some(item) = item else {
                break;
            };
            match item {
                Ok(chunk) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        // Receiver gone: client disconnected; dropping the
                        // stream cancels the upstream read.
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(map_wreq_error(err))).await;
                    break;
                }
            }
        }
    });

    Ok(UpstreamResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn map_wreq_error(err: wreq::Error) -> NetworkError {
    NetworkError {
        kind: classify_wreq_error(&err),
        message: err.to_string(),
    }
}

fn classify_wreq_error(err: &wreq::Error) -> NetworkErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        return NetworkErrorKind::TimedOut;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return NetworkErrorKind::NotFound;
        }
        if message.contains("tls") || message.contains("ssl") {
            return NetworkErrorKind::Tls;
        }
        return NetworkErrorKind::ConnectionRefused;
    }
    if message.contains("dns") || message.contains("resolve") {
        return NetworkErrorKind::NotFound;
    }
    if message.contains("tls") || message.contains("ssl") {
        return NetworkErrorKind::Tls;
    }
    NetworkErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_failover_config_vocabulary() {
        assert_eq!(NetworkErrorKind::ConnectionRefused.code(), "ECONNREFUSED");
        assert_eq!(NetworkErrorKind::TimedOut.code(), "ETIMEDOUT");
        assert_eq!(NetworkErrorKind::NotFound.code(), "ENOTFOUND");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let resp = UpstreamResponse {
            status: 429,
            headers: vec![("Retry-After".to_string(), "30".to_string())],
            body: UpstreamBody::Bytes(Bytes::new()),
        };
        assert_eq!(resp.header("retry-after"), Some("30"));
    }
}
