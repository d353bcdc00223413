use bp_domain::cancel::CancelToken;
use bp_domain::error::Result;
use bp_domain::stream::{BoxStream, StreamEvent};
use bp_domain::tool::ToolDefinition;
use bp_domain::turn::Turn;

/// One generation request: the system prompt, the conversation so far, and
/// the tool declarations the model may call.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub system: &'a str,
    pub history: &'a [Turn],
    pub tools: &'a [ToolDefinition],
}

/// Trait the orchestrator drives. Implementations translate the internal
/// turn/part model to a provider wire format and back.
///
/// The returned stream yields delta parts in generation order and closes with
/// exactly one `Done` carrying the assembled candidate. Dropping the stream
/// (or tripping `cancel`) must tear down the upstream request, not merely
/// stop consumption.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn stream_generate(
        &self,
        req: GenerateRequest<'_>,
        cancel: CancelToken,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}
