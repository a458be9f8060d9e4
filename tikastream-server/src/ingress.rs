//! Ingress Adapter: inbound HTTP request → [`ExtractionRequest`].
//!
//! - `multipart/form-data`: the `file` field is spooled to disk and becomes the
//!   inline source; removing the spooled file is the request's cleanup hook.
//! - Any other body: read up to a small cap (excess dropped) and decoded as
//!   `{"url": "..."}`.
//! - Empty body: `GET` falls back to the `url` query parameter.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Query, Request};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use tikastream_core::{CleanupHook, ExtractionRequest, Headers, InlineSource};

/// Multipart field that carries the uploaded document.
pub const MULTIPART_FILE_FIELD: &str = "file";

/// Size caps and spool location for inbound requests.
#[derive(Debug, Clone)]
pub struct IngressLimits {
    pub max_json_body_bytes: usize,
    pub max_multipart_bytes: usize,
    pub spool_dir: PathBuf,
}

impl IngressLimits {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_json_body_bytes: 1 << 10,
            max_multipart_bytes: 1 << 20,
            spool_dir: spool_dir.into(),
        }
    }
}

/// Reasons an inbound request could not be turned into an extraction.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("empty \"url\" field")]
    EmptyUrl,

    #[error("no body passed in for method {0:?}")]
    NoBody(String),

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid multipart body: {0}")]
    Multipart(String),

    #[error("missing multipart field {:?}", MULTIPART_FILE_FIELD)]
    MissingFile,

    #[error("multipart body exceeds {limit} bytes")]
    MultipartTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("failed to spool upload: {0}")]
    Spool(#[source] io::Error),
}

impl IngressError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngressError::Spool(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Build an extraction request from an HTTP request.
pub async fn request_from_http(
    request: Request,
    limits: &IngressLimits,
) -> Result<ExtractionRequest, IngressError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));
    if is_multipart {
        return from_multipart(request, limits).await;
    }

    let (parts, body) = request.into_parts();
    let blob = read_truncated(body, limits.max_json_body_bytes).await?;

    if !blob.is_empty() {
        return Ok(serde_json::from_slice(&blob)?);
    }

    if parts.method != Method::GET {
        return Err(IngressError::NoBody(parts.method.to_string()));
    }

    let Query(query) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map_err(|e| IngressError::Body(e.body_text()))?;
    let url = query.get("url").map(|u| u.trim()).unwrap_or_default();
    if url.is_empty() {
        return Err(IngressError::EmptyUrl);
    }
    Ok(ExtractionRequest::from_url(url))
}

/// Read at most `cap` bytes of the body; the rest is never read.
async fn read_truncated(body: Body, cap: usize) -> Result<Bytes, IngressError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while buf.len() < cap {
        match stream.next().await {
            Some(Ok(chunk)) => {
                let take = chunk.len().min(cap - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Some(Err(e)) => return Err(IngressError::Body(e.to_string())),
            None => break,
        }
    }
    Ok(buf.freeze())
}

async fn from_multipart(
    request: Request,
    limits: &IngressLimits,
) -> Result<ExtractionRequest, IngressError> {
    let multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| IngressError::Multipart(e.body_text()))?;

    // Every early return, and a future dropped mid-upload, drops the spool
    // file and with it the partial upload.
    let (headers, spooled) = spool_upload(multipart, limits).await?;

    let file = match tokio::fs::File::open(&spooled).await {
        Ok(file) => file,
        Err(e) => {
            let path = spooled.to_path_buf();
            if let Err(cleanup) = spooled.close() {
                tracing::warn!(
                    path = %path.display(),
                    error = %cleanup,
                    "failed to remove spooled upload"
                );
            }
            return Err(IngressError::Spool(e));
        }
    };
    tracing::debug!(path = %spooled.display(), "upload spooled");

    let request =
        ExtractionRequest::from_source(InlineSource::new(Box::pin(file))).with_headers(headers);
    request.set_cleanup(spool_removal(spooled));
    Ok(request)
}

/// Cleanup hook that deletes the spooled upload. The hook owns the
/// [`TempPath`], so a request dropped before cleanup ran still deletes it.
fn spool_removal(spooled: TempPath) -> CleanupHook {
    let id = format!("remove {}", spooled.display());
    let slot = Arc::new(Mutex::new(Some(spooled)));
    CleanupHook::new(id, move || {
        let taken = match slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        async move {
            match taken.map(TempPath::close) {
                Some(Err(e)) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        }
    })
}

/// Write the `file` field to a fresh spool file, returning its part headers
/// and path. Other fields are read and discarded; every byte counts against
/// the cap.
async fn spool_upload(
    mut multipart: Multipart,
    limits: &IngressLimits,
) -> Result<(Headers, TempPath), IngressError> {
    let limit = limits.max_multipart_bytes;
    let mut total = 0usize;
    let mut spooled: Option<(Headers, TempPath)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let is_file = spooled.is_none() && field.name() == Some(MULTIPART_FILE_FIELD);
        let mut target = if is_file {
            Some(create_spool_file(&limits.spool_dir).await?)
        } else {
            None
        };
        let headers = part_headers(field.headers());

        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            total += chunk.len();
            if total > limit {
                return Err(IngressError::MultipartTooLarge { limit });
            }
            if let Some((file, _)) = target.as_mut() {
                file.write_all(&chunk).await.map_err(IngressError::Spool)?;
            }
        }

        if let Some((mut file, path)) = target {
            file.flush().await.map_err(IngressError::Spool)?;
            spooled = Some((headers, path));
        }
    }

    spooled.ok_or(IngressError::MissingFile)
}

/// Create `upload-*` under `dir`, deleted when the returned path is dropped.
async fn create_spool_file(dir: &Path) -> Result<(tokio::fs::File, TempPath), IngressError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(IngressError::Spool)?;
    let spool = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(dir)
        .map_err(IngressError::Spool)?;
    let (file, path) = spool.into_parts();
    Ok((tokio::fs::File::from_std(file), path))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> IngressError {
    IngressError::Multipart(e.body_text())
}

fn part_headers(map: &axum::http::HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> IngressLimits {
        IngressLimits::new(std::env::temp_dir().join("tikastream_ingress_unit"))
    }

    #[tokio::test]
    async fn test_json_body_sets_url() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(r#"{"url": "https://example.com/a.pdf"}"#))
            .unwrap();

        let extraction = request_from_http(request, &limits()).await.unwrap();
        assert_eq!(extraction.url, "https://example.com/a.pdf");
    }

    #[tokio::test]
    async fn test_body_is_truncated_at_cap() {
        let mut limits = limits();
        limits.max_json_body_bytes = 8;
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(r#"{"url": "https://example.com/a.pdf"}"#))
            .unwrap();

        let err = request_from_http(request, &limits).await.unwrap_err();
        assert!(matches!(err, IngressError::InvalidJson(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_query_url_is_trimmed() {
        let request = axum::http::Request::builder()
            .uri("/?url=%20https%3A%2F%2Fexample.com%2Fa.pdf%20")
            .body(Body::empty())
            .unwrap();

        let extraction = request_from_http(request, &limits()).await.unwrap();
        assert_eq!(extraction.url, "https://example.com/a.pdf");
    }

    #[tokio::test]
    async fn test_get_without_url_is_rejected() {
        let request = axum::http::Request::builder().uri("/?url=%20").body(Body::empty()).unwrap();

        let err = request_from_http(request, &limits()).await.unwrap_err();
        assert_eq!(err.to_string(), "empty \"url\" field");
    }

    #[tokio::test]
    async fn test_empty_put_is_rejected() {
        let request = axum::http::Request::builder()
            .method("PUT")
            .uri("/?url=https://example.com/a.pdf")
            .body(Body::empty())
            .unwrap();

        let err = request_from_http(request, &limits()).await.unwrap_err();
        assert_eq!(err.to_string(), "no body passed in for method \"PUT\"");
    }

    fn spool_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn multipart_head() -> String {
        "--spool-boundary\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"big.pdf\"\r\n\
         Content-Type: application/pdf\r\n\r\n"
            .to_string()
    }

    #[tokio::test]
    async fn test_stalled_upload_leaves_no_spool_file_when_dropped() {
        let spool = std::env::temp_dir().join(format!("tikastream_stalled_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&spool);
        let limits = IngressLimits::new(&spool);

        // First chunk opens the file field, then the client goes quiet.
        let mut first = multipart_head().into_bytes();
        first.extend_from_slice(&[b'x'; 8192]);
        let body = futures::stream::iter(vec![Ok::<_, io::Error>(Bytes::from(first))])
            .chain(futures::stream::pending());
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=spool-boundary")
            .body(Body::from_stream(body))
            .unwrap();

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(300),
            request_from_http(request, &limits),
        )
        .await;

        assert!(outcome.is_err(), "upload should still be waiting for the client");
        assert_eq!(spool_entries(&spool), Vec::<String>::new());
        std::fs::remove_dir_all(&spool).ok();
    }

    #[tokio::test]
    async fn test_dropped_request_removes_spooled_upload() {
        let spool = std::env::temp_dir().join(format!("tikastream_dropped_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&spool);
        let limits = IngressLimits::new(&spool);

        let mut body = multipart_head().into_bytes();
        body.extend_from_slice(b"document bytes\r\n--spool-boundary--\r\n");
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=spool-boundary")
            .body(Body::from(body))
            .unwrap();

        let extraction = request_from_http(request, &limits).await.unwrap();
        let spooled = spool_entries(&spool);
        assert_eq!(spooled.len(), 1);
        assert!(spooled[0].starts_with("upload-"));
        assert_eq!(extraction.headers["content-type"], vec!["application/pdf".to_string()]);

        drop(extraction);
        assert_eq!(spool_entries(&spool), Vec::<String>::new());
        std::fs::remove_dir_all(&spool).ok();
    }

    #[tokio::test]
    async fn test_spool_removal_hook_runs_once() {
        let spool = std::env::temp_dir().join(format!("tikastream_hook_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&spool);
        let (_, path) = create_spool_file(&spool).await.unwrap();
        let on_disk = path.to_path_buf();

        let hook = spool_removal(path);
        assert!(on_disk.exists());
        hook.run().await.unwrap();
        assert!(!on_disk.exists());
        hook.run().await.unwrap();
        std::fs::remove_dir_all(&spool).ok();
    }

    #[test]
    fn test_part_headers_keep_all_values() {
        let mut map = axum::http::HeaderMap::new();
        map.append("content-type", "application/pdf".parse().unwrap());
        map.append("x-tag", "a".parse().unwrap());
        map.append("x-tag", "b".parse().unwrap());

        let headers = part_headers(&map);
        assert_eq!(headers["content-type"], vec!["application/pdf".to_string()]);
        assert_eq!(headers["x-tag"], vec!["a".to_string(), "b".to_string()]);
    }
}
