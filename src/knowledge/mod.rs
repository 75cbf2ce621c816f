// Read-side knowledge synthesis.
//
// Everything here derives briefing text from the outcome ledger on demand:
// persona-wide lessons, per-user relationship memory, and the final context
// block composed for the next model call.

pub mod context;
pub mod synthesizer;
pub mod user_memory;

// Re-export key types
pub use context::ContextBuilder;
pub use synthesizer::{KnowledgeSynthesizer, NO_EXPERIENCE_BRIEFING};
pub use user_memory::{UserMemoryService, NEW_USER_BRIEFING};
