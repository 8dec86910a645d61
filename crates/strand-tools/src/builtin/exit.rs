use futures::future::BoxFuture;
use serde::Deserialize;

use strand_core::error::Result;
use strand_core::tool::{ToolDescriptor, ToolParameterDescriptor, ToolParameterType};
use strand_core::traits::{Tool, ToolOutput};

use crate::registry::parse_args;

/// Lets the model declare the task finished, with an optional final answer.
pub struct ExitTool;

#[derive(Deserialize)]
struct ExitInput {
    #[serde(default)]
    result: Option<String>,
}

impl Tool for ExitTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "exit",
            "Service tool, used by the agent to end the conversation once the task is done.",
        )
        .with_optional(ToolParameterDescriptor::new(
            "result",
            "Final answer for the user",
            ToolParameterType::String,
        ))
    }

    fn execute(&self, args: serde_json::Value) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: ExitInput = parse_args("exit", args)?;
            let result = params.result.unwrap_or_else(|| "DONE".to_string());
            Ok(ToolOutput::text(result))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn defaults_to_done() {
        let out = ExitTool.execute(json!({})).await.unwrap();
        assert_eq!(out.content, "DONE");
        assert_eq!(out.result, json!("DONE"));
    }

    #[tokio::test]
    async fn echoes_result() {
        let out = ExitTool.execute(json!({"result": "42"})).await.unwrap();
        assert_eq!(out.content, "42");
    }
}
