//! Provider streaming events (provider-agnostic).

use std::pin::Pin;

use crate::turn::Part;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events yielded by the LLM stream adapter: delta parts in generation order,
/// closed by exactly one `Done` carrying the assembled final candidate.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A delta part: text chunk, thought fragment, or a complete function call.
    Part(Part),

    /// Stream end sentinel with the full assembled model content.
    Done { candidate: Vec<Part> },
}
