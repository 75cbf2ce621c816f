//! Streaming provider module
//!
//! Provider HTTP client and the incremental frame parser for streamed
//! completions.

pub mod client;
pub mod parser;

// Re-export commonly used types
pub use client::{ProviderClient, DEFAULT_MODEL, DEFAULT_PROVIDER_URL};
pub use parser::{FrameParser, StreamEvent, DONE_MARKER, EVENT_PREFIX, MAX_LINE_BYTES};
