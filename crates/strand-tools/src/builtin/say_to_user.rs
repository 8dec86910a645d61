use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use strand_core::error::Result;
use strand_core::tool::{ToolDescriptor, ToolParameterDescriptor, ToolParameterType};
use strand_core::traits::{Tool, ToolOutput};

use crate::registry::parse_args;

/// Shows a message to the user on stdout.
pub struct SayToUserTool;

#[derive(Deserialize)]
struct SayInput {
    message: String,
}

impl Tool for SayToUserTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "say_to_user",
            "Service tool, used by the agent to talk to the user.",
        )
        .with_required(ToolParameterDescriptor::new(
            "message",
            "Message for the user",
            ToolParameterType::String,
        ))
    }

    fn execute(&self, args: serde_json::Value) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: SayInput = parse_args("say_to_user", args)?;
            info!(chars = params.message.len(), "Agent message to user");
            println!("Agent says: {}", params.message);
            Ok(ToolOutput::text("DONE"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_core::error::StrandError;

    #[tokio::test]
    async fn requires_message() {
        let err = SayToUserTool.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, StrandError::ToolValidation(_)));
    }

    #[tokio::test]
    async fn says_done() {
        let out = SayToUserTool
            .execute(json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(out.content, "DONE");
    }
}
