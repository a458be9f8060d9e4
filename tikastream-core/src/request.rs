//! Extraction Request: what to extract and how to release it afterwards.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Deserialize;

use crate::cleanup::{CleanupChain, CleanupHook, SourceRelease};
use crate::error::{CleanupError, ExtractError, Result};
use crate::transport::{FetchRequest, Headers, SourceReader, Transport};

/// Bytes supplied directly by the caller (e.g. an upload), plus how to release
/// whatever backs them.
pub struct InlineSource {
    reader: SourceReader,
    release: SourceRelease,
}

impl InlineSource {
    /// A source with nothing to release beyond dropping the reader
    pub fn new(reader: SourceReader) -> Self {
        Self {
            reader,
            release: SourceRelease::NoCleanup,
        }
    }

    /// A source whose backing resource is released by `hook`
    pub fn owned(reader: SourceReader, hook: CleanupHook) -> Self {
        Self {
            reader,
            release: SourceRelease::Owned(hook),
        }
    }
}

impl fmt::Debug for InlineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineSource")
            .field("release", &self.release)
            .finish_non_exhaustive()
    }
}

/// One extraction job.
///
/// Either an inline source or a URL; the inline source wins when both are
/// present. Deserializes from `{"url": "..."}`.
#[derive(Default, Deserialize)]
pub struct ExtractionRequest {
    #[serde(default)]
    pub url: String,

    /// Sent along with fetches
    #[serde(default)]
    pub headers: Headers,

    #[serde(skip)]
    source: Option<InlineSource>,

    #[serde(skip)]
    transport: Option<Arc<dyn Transport>>,

    #[serde(skip)]
    cleanup: CleanupChain,

    #[serde(skip)]
    acquired: bool,
}

impl ExtractionRequest {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn from_source(source: InlineSource) -> Self {
        Self {
            source: Some(source),
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Fetch with `transport` instead of the pipeline default
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn has_inline_source(&self) -> bool {
        self.source.is_some()
    }

    /// Checks that the request names something to extract.
    pub fn validate(&self) -> Result<()> {
        if self.has_inline_source() || !self.url.trim().is_empty() {
            return Ok(());
        }
        Err(ExtractError::Validation("expecting \"url\"".to_string()))
    }

    /// Replace the cleanup hook(s) with `hook`, returning the previous ones.
    pub fn set_cleanup(&self, hook: CleanupHook) -> Vec<CleanupHook> {
        self.cleanup.set(hook)
    }

    /// Add `hook` after the existing ones. Chaining an identifier that is
    /// already present is a no-op.
    pub fn chain_cleanup(&self, hook: CleanupHook) {
        if !self.cleanup.chain(hook) {
            tracing::trace!("cleanup hook already chained, ignoring");
        }
    }

    /// Release everything the request holds.
    ///
    /// The returned future owns the hooks, so it can outlive the borrow.
    pub fn run_cleanup(
        &self,
    ) -> impl Future<Output = std::result::Result<(), CleanupError>> + Send + 'static {
        self.cleanup.run()
    }

    /// Obtain the byte source: the inline stream if there is one, otherwise a
    /// single fetch through the request's transport (or `default_transport`).
    ///
    /// May only succeed once per request.
    pub async fn acquire(&mut self, default_transport: &Arc<dyn Transport>) -> Result<SourceReader> {
        if self.acquired {
            return Err(ExtractError::AlreadyAcquired);
        }
        self.acquired = true;

        if let Some(inline) = self.source.take() {
            if let SourceRelease::Owned(hook) = inline.release {
                // An explicitly set hook takes precedence over the source's own
                if self.cleanup.is_empty() {
                    self.cleanup.chain(hook);
                } else {
                    tracing::debug!(hook = hook.id(), "explicit cleanup set, not adopting source closer");
                }
            }
            return Ok(inline.reader);
        }

        let transport = self
            .transport
            .clone()
            .unwrap_or_else(|| Arc::clone(default_transport));
        let source = self.url.trim();
        tracing::debug!(source, transport = transport.name(), "fetching source");

        let fetched = transport
            .fetch(FetchRequest {
                source,
                headers: &self.headers,
            })
            .await?;

        if let SourceRelease::Owned(hook) = fetched.release {
            self.chain_cleanup(hook);
        }
        Ok(fetched.reader)
    }
}

impl fmt::Debug for ExtractionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionRequest")
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("source", &self.source)
            .field("transport", &self.transport.as_ref().map(|t| t.name()))
            .field("cleanup", &self.cleanup.ids())
            .field("acquired", &self.acquired)
            .finish()
    }
}
