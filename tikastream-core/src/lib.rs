// tikastream core library
//
// Streams plain text out of documents by piping them through an external
// extraction engine (Apache Tika by default). Output is readable while the
// engine runs; success or failure arrives separately once it has exited.

pub mod cleanup;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod request;
pub mod stream;
pub mod transport;

// Re-export main types for easy use
pub use cleanup::{CleanupChain, CleanupHook, SourceRelease};
pub use engine::{EngineCommand, TIKA_TEXT_ARGS};
pub use error::{CleanupError, EngineError, ExtractError, FetchError, Result};
pub use pipeline::{Extractor, DEFAULT_PIPE_CAPACITY};
pub use request::{ExtractionRequest, InlineSource};
pub use stream::{Completion, ExtractionStream, StreamResult};
pub use transport::{
    FetchRequest, Fetched, FileAndHttpTransport, FileTransport, Headers, HttpTransport,
    SourceReader, Transport,
};
