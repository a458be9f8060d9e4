//! Local filesystem transport.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::{FetchRequest, Fetched, Transport};
use crate::error::{FetchError, FetchResult};

/// Opens sources as paths below a fixed root directory.
///
/// The source is cleaned before joining: `.` is dropped and `..` never climbs
/// above `root`, so `/etc/passwd` and `../../etc/passwd` both resolve to
/// `<root>/etc/passwd`.
#[derive(Debug, Clone)]
pub struct FileTransport {
    root: PathBuf,
}

impl FileTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root at the process working directory
    pub fn current_dir() -> io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// Root at `/`, used for explicit `file://` URLs
    pub fn filesystem_root() -> Self {
        Self::new(PathBuf::from("/"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a source path onto the root
    pub fn resolve(&self, source: impl AsRef<Path>) -> PathBuf {
        let mut cleaned = PathBuf::new();
        for component in source.as_ref().components() {
            match component {
                Component::Normal(part) => cleaned.push(part),
                Component::ParentDir => {
                    cleaned.pop();
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }
        self.root.join(cleaned)
    }

    pub(crate) async fn open(&self, source: &Path) -> FetchResult<Fetched> {
        let path = self.resolve(source);
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                tracing::debug!(path = %path.display(), "opened local source");
                Ok(Fetched::new(Box::pin(file)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FetchError::NotFound {
                path: path.display().to_string(),
            }),
            Err(e) => Err(FetchError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn fetch(&self, request: FetchRequest<'_>) -> FetchResult<Fetched> {
        self.open(Path::new(request.source)).await
    }

    fn name(&self) -> &str {
        "file"
    }
}
