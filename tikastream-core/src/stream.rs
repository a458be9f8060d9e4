//! Stream Result: extracted bytes plus a one-shot completion signal.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{EngineError, ExtractError, Result};

/// Read side of the engine's output pipe.
///
/// Reads wait until the engine produces output; end-of-stream is reported
/// once the engine has exited. Dropping the stream early cancels the
/// extraction.
pub struct ExtractionStream {
    pipe: DuplexStream,
    _cancel_on_drop: DropGuard,
}

impl AsyncRead for ExtractionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().pipe).poll_read(cx, buf)
    }
}

/// Terminal outcome of an extraction, delivered exactly once.
///
/// Resolves only after the output stream was closed on the producer side and
/// cleanup ran, so awaiting it right after end-of-stream never waits on
/// the engine.
pub struct Completion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ExtractError::Engine(EngineError::Abandoned))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// What [`Extractor::extract`](crate::Extractor::extract) hands back.
///
/// An empty stream alone cannot tell an empty document from a failed
/// extraction; check the completion after reading to the end.
pub struct StreamResult {
    stream: ExtractionStream,
    completion: Completion,
    cancel: CancellationToken,
}

impl StreamResult {
    pub(crate) fn new(
        pipe: DuplexStream,
        rx: oneshot::Receiver<Result<()>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream: ExtractionStream {
                pipe,
                _cancel_on_drop: cancel.clone().drop_guard(),
            },
            completion: Completion { rx },
            cancel,
        }
    }

    /// Kill the engine. The completion will report cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn into_parts(self) -> (ExtractionStream, Completion) {
        (self.stream, self.completion)
    }

    /// Drop the stream and wait for the outcome. Output not yet read is
    /// abandoned, which cancels a still-running engine.
    pub async fn finish(self) -> Result<()> {
        let (stream, completion) = self.into_parts();
        drop(stream);
        completion.await
    }
}

impl std::fmt::Debug for StreamResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResult")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for StreamResult {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}
