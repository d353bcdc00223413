//! LLM provider adapter.
//!
//! One trait ([`LlmClient`]) and one implementation ([`GeminiClient`]) over
//! the Gemini streaming API. The process-wide client is lazily initialized on
//! first use via [`shared`]; a missing API key surfaces there, not at startup.

mod gemini;
mod sse;
mod traits;
mod util;

pub use gemini::{shared, GeminiClient};
pub use traits::{GenerateRequest, LlmClient};
