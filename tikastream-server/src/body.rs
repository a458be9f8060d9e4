//! Streaming response body for a [`StreamResult`].
//!
//! Engine output goes out as data frames as soon as it is produced. Once the
//! output ends the completion is awaited; a failure becomes the
//! `X-Extraction-Error` trailer, since the status line is long gone by then.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use futures::Stream;
use hyper::body::{Body, Frame, SizeHint};
use tikastream_core::{Completion, ExtractError, ExtractionStream, StreamResult};
use tokio_util::io::ReaderStream;

/// Trailer carrying an error that happened after streaming started.
pub const EXTRACTION_ERROR_TRAILER: HeaderName = HeaderName::from_static("x-extraction-error");

/// Body that drains the engine output, then reports the outcome.
pub struct ExtractionBody {
    stream: Option<ReaderStream<ExtractionStream>>,
    completion: Option<Completion>,
}

impl ExtractionBody {
    pub fn new(result: StreamResult) -> Self {
        let (stream, completion) = result.into_parts();
        Self {
            stream: Some(ReaderStream::new(stream)),
            completion: Some(completion),
        }
    }
}

impl Body for ExtractionBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if let Some(stream) = this.stream.as_mut() {
            match ready!(Pin::new(stream).poll_next(cx)) {
                Some(Ok(chunk)) => return Poll::Ready(Some(Ok(Frame::data(chunk)))),
                Some(Err(e)) => {
                    // Dropping the stream stops the engine; the completion
                    // reports what happened.
                    tracing::warn!(error = %e, "reading engine output failed");
                    this.stream = None;
                }
                None => this.stream = None,
            }
        }

        if let Some(completion) = this.completion.as_mut() {
            let outcome = ready!(Pin::new(completion).poll(cx));
            this.completion = None;
            if let Err(e) = outcome {
                return Poll::Ready(Some(Ok(Frame::trailers(error_trailers(&e)))));
            }
        }

        Poll::Ready(None)
    }

    fn is_end_stream(&self) -> bool {
        self.stream.is_none() && self.completion.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

fn error_trailers(error: &ExtractError) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    trailers.insert(EXTRACTION_ERROR_TRAILER, header_value(&error.to_string()));
    trailers
}

/// Header values cannot hold control characters; engine stderr may.
fn header_value(text: &str) -> HeaderValue {
    let flattened: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    HeaderValue::from_bytes(flattened.trim().as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("extraction failed"))
}
