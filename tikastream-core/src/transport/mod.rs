//! Transport Resolver
//!
//! A [`Transport`] turns a source descriptor (a URL-like string) into a
//! readable byte stream. Built-in transports:
//!
//! - [`HttpTransport`] - HTTP(S) GET, the default network fetch
//! - [`FileTransport`] - local files below a fixed root
//! - [`FileAndHttpTransport`] - `file` scheme and scheme-less paths go to the
//!   filesystem, everything else goes over HTTP
//!
//! Callers may plug in their own implementation, either per request or as the
//! pipeline default.

pub mod composite;
pub mod file;
pub mod http;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::cleanup::SourceRelease;
use crate::error::FetchResult;

pub use composite::FileAndHttpTransport;
pub use file::FileTransport;
pub use http::HttpTransport;

/// An owned, readable byte source.
pub type SourceReader = Pin<Box<dyn AsyncRead + Send>>;

/// Header name to list of values.
pub type Headers = HashMap<String, Vec<String>>;

/// What to fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub source: &'a str,
    pub headers: &'a Headers,
}

/// A successfully opened source.
pub struct Fetched {
    pub reader: SourceReader,
    /// Extra release step for whatever backs `reader`. Dropping the reader
    /// closes it; this is only for resources that outlive the reader.
    pub release: SourceRelease,
}

impl Fetched {
    pub fn new(reader: SourceReader) -> Self {
        Self {
            reader,
            release: SourceRelease::NoCleanup,
        }
    }

    pub fn with_release(mut self, release: SourceRelease) -> Self {
        self.release = release;
        self
    }
}

impl std::fmt::Debug for Fetched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetched")
            .field("release", &self.release)
            .finish_non_exhaustive()
    }
}

/// Pluggable fetch strategy.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve `request.source` into a byte stream.
    async fn fetch(&self, request: FetchRequest<'_>) -> FetchResult<Fetched>;

    /// Transport identifier for logging
    fn name(&self) -> &str;
}
