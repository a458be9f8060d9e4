//! HTTP(S) transport backed by `reqwest`.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::HeaderMap;
use tokio_util::io::StreamReader;
use url::Url;

use super::{FetchRequest, Fetched, Transport};
use crate::error::{FetchError, FetchResult};

/// Network fetch: a plain GET whose response body is streamed, never buffered.
///
/// Any status outside 200-299 is a failure even if the server sent a body
/// (usually an error page). The error carries the status line and response
/// headers but never the body.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
    /// Limit on waiting for the response head. The body itself is not
    /// time-limited here; the engine timeout covers a stalled download.
    response_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, TLS roots, ...)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            response_timeout: None,
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: FetchRequest<'_>) -> FetchResult<Fetched> {
        let url = Url::parse(request.source).map_err(|_| FetchError::InvalidSource {
            source_str: request.source.to_string(),
        })?;

        let mut builder = self.client.get(url);
        for (name, values) in request.headers {
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let send = builder.send();
        let response = match self.response_timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| FetchError::Timeout(limit, request.source.to_string()))?,
            None => send.await,
        }
        .map_err(FetchError::network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status_line: status.to_string(),
                headers: format_headers(response.headers()),
            });
        }

        tracing::debug!(source = request.source, %status, "fetched response head");

        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(Fetched::new(Box::pin(StreamReader::new(body))))
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Render headers as `{name: [values]}` for error messages.
fn format_headers(headers: &HeaderMap) -> String {
    let mut pairs: Vec<String> = headers
        .keys()
        .map(|name| {
            let values: Vec<&str> = headers
                .get_all(name)
                .iter()
                .map(|v| v.to_str().unwrap_or("<binary>"))
                .collect();
            format!("{}: {:?}", name, values)
        })
        .collect();
    pairs.sort();
    format!("{{{}}}", pairs.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Headers;
    use reqwest::header::{HeaderValue, CONTENT_TYPE, SET_COOKIE};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Answer one connection on localhost with a canned response. Resolves
    /// the receiver with the request head the client sent.
    async fn serve_once(response: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        (format!("http://{addr}/doc.pdf"), rx)
    }

    fn local_transport() -> HttpTransport {
        HttpTransport::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    #[tokio::test]
    async fn test_non_2xx_reports_status_and_headers_but_not_body() {
        let (url, _head) = serve_once(
            "HTTP/1.1 404 Not Found\r\n\
             content-length: 11\r\n\
             x-origin: archive\r\n\
             connection: close\r\n\r\n\
             SECRET BODY",
        )
        .await;

        let headers = Headers::new();
        let err = local_transport()
            .fetch(FetchRequest {
                source: &url,
                headers: &headers,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { .. }));
        let msg = err.to_string();
        assert!(msg.contains("404 Not Found"), "{msg}");
        assert!(msg.contains("x-origin: [\"archive\"]"), "{msg}");
        assert!(!msg.contains("SECRET BODY"), "{msg}");
    }

    #[tokio::test]
    async fn test_success_streams_body_and_forwards_headers() {
        let (url, head) = serve_once(
            "HTTP/1.1 200 OK\r\n\
             content-length: 13\r\n\
             connection: close\r\n\r\n\
             %PDF-1.7 body",
        )
        .await;

        let mut headers = Headers::new();
        headers.insert(
            "Authorization".to_string(),
            vec!["Bearer doc-token".to_string()],
        );
        let mut fetched = local_transport()
            .fetch(FetchRequest {
                source: &url,
                headers: &headers,
            })
            .await
            .unwrap();

        let mut body = String::new();
        fetched.reader.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "%PDF-1.7 body");

        let head = head.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /doc.pdf "), "{head}");
        assert!(head.contains("authorization: bearer doc-token"), "{head}");
    }

    #[test]
    fn test_format_headers_groups_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));

        let rendered = format_headers(&headers);
        assert_eq!(
            rendered,
            "{content-type: [\"text/html\"], set-cookie: [\"a=1\", \"b=2\"]}"
        );
    }

    #[tokio::test]
    async fn test_relative_source_is_rejected() {
        let transport = HttpTransport::new();
        let headers = Headers::new();
        let err = transport
            .fetch(FetchRequest {
                source: "./testdata/resume.pdf",
                headers: &headers,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidSource { .. }));
    }
}
