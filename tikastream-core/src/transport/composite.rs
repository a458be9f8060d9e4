//! Scheme-dispatching transport: filesystem for `file` and bare paths, HTTP
//! for everything else.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use url::Url;

use super::{FetchRequest, Fetched, FileTransport, HttpTransport, Transport};
use crate::error::{FetchError, FetchResult};

/// Where a source string should be resolved.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    /// Explicit `file:` URL, resolved from the filesystem root
    FileUrl,
    /// No scheme at all, resolved relative to the local root
    BarePath,
    /// Any other scheme
    Remote,
}

fn route(source: &str) -> Route {
    match Url::parse(source) {
        Ok(url) if url.scheme() == "file" => Route::FileUrl,
        Ok(_) => Route::Remote,
        Err(_) => Route::BarePath,
    }
}

/// Combines local file access with network fetch under one interface.
#[derive(Debug, Clone)]
pub struct FileAndHttpTransport {
    http: HttpTransport,
    local: FileTransport,
    filesystem: FileTransport,
}

impl FileAndHttpTransport {
    /// Bare paths resolve against the process working directory.
    pub fn new() -> io::Result<Self> {
        Ok(Self::with_local_root(FileTransport::current_dir()?))
    }

    /// Bare paths resolve against `local` instead of the working directory.
    pub fn with_local_root(local: FileTransport) -> Self {
        Self {
            http: HttpTransport::new(),
            local,
            filesystem: FileTransport::filesystem_root(),
        }
    }

    pub fn with_http(mut self, http: HttpTransport) -> Self {
        self.http = http;
        self
    }
}

#[async_trait]
impl Transport for FileAndHttpTransport {
    async fn fetch(&self, request: FetchRequest<'_>) -> FetchResult<Fetched> {
        match route(request.source) {
            Route::FileUrl => {
                let path = Url::parse(request.source)
                    .ok()
                    .and_then(|url| url.to_file_path().ok())
                    .ok_or_else(|| FetchError::InvalidSource {
                        source_str: request.source.to_string(),
                    })?;
                self.filesystem.open(&path).await
            }
            Route::BarePath => self.local.open(Path::new(request.source)).await,
            Route::Remote => self.http.fetch(request).await,
        }
    }

    fn name(&self) -> &str {
        "file+http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Headers;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_routing_by_scheme() {
        assert_eq!(route("./testdata/resume.pdf"), Route::BarePath);
        assert_eq!(route("testdata/resume.pdf"), Route::BarePath);
        assert_eq!(route("/var/tmp/resume.pdf"), Route::BarePath);
        assert_eq!(route("file:///var/tmp/resume.pdf"), Route::FileUrl);
        assert_eq!(route("https://example.com/a.pdf"), Route::Remote);
        assert_eq!(route("http://example.com/a.pdf"), Route::Remote);
    }

    #[tokio::test]
    async fn test_file_url_reads_from_filesystem_root() {
        let dir = std::env::temp_dir().join("tikastream_composite_file_url");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("note.txt");
        std::fs::write(&path, b"absolute").unwrap();

        // Local root deliberately points elsewhere; file:// must ignore it.
        let transport =
            FileAndHttpTransport::with_local_root(FileTransport::new("/nonexistent-root"));
        let source = Url::from_file_path(&path).unwrap().to_string();
        let headers = Headers::new();
        let mut fetched = transport
            .fetch(FetchRequest {
                source: &source,
                headers: &headers,
            })
            .await
            .unwrap();

        let mut body = String::new();
        fetched.reader.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "absolute");

        std::fs::remove_dir_all(dir).ok();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_url_keeps_non_utf8_path_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = std::env::temp_dir().join("tikastream_composite_raw_bytes");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(OsStr::from_bytes(b"caf\xe9.txt"));
        std::fs::write(&path, b"latin-1 name").unwrap();

        let transport = FileAndHttpTransport::with_local_root(FileTransport::new("/nonexistent-root"));
        let source = Url::from_file_path(&path).unwrap().to_string();
        assert!(source.ends_with("caf%E9.txt"));
        let headers = Headers::new();
        let mut fetched = transport
            .fetch(FetchRequest {
                source: &source,
                headers: &headers,
            })
            .await
            .unwrap();

        let mut body = String::new();
        fetched.reader.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "latin-1 name");

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_missing_bare_path_fails() {
        let transport = FileAndHttpTransport::with_local_root(FileTransport::new(std::env::temp_dir()));
        let headers = Headers::new();
        let err = transport
            .fetch(FetchRequest {
                source: "./missing.pdf",
                headers: &headers,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
    }
}
