use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use strand_core::error::Result;
use strand_core::types::{Message, ReceivedToolResult, ToolCall};

use crate::context::AgentContext;
use crate::graph::{EdgeBuilder, GraphValue};

/// Tool outcome classified as success or failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SafeResult<R> {
    Success { result: R, content: String },
    Failure { message: String },
}

impl<R> SafeResult<R> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Text the model saw for this outcome.
    pub fn content(&self) -> &str {
        match self {
            Self::Success { content, .. } => content,
            Self::Failure { message } => message,
        }
    }

    pub fn into_result(self) -> Option<R> {
        match self {
            Self::Success { result, .. } => Some(result),
            Self::Failure { .. } => None,
        }
    }
}

impl SafeResult<serde_json::Value> {
    /// Classify a raw result: no payload, or a JSON `null` one, is a failure.
    pub fn from_received(received: &ReceivedToolResult) -> Self {
        match &received.result {
            Some(value) if received.succeeded() => Self::Success {
                result: value.clone(),
                content: received.content.clone(),
            },
            _ => Self::Failure {
                message: received.content.clone(),
            },
        }
    }

    /// Decode the payload of a success into `R`.
    pub fn decode<R: DeserializeOwned>(self) -> Result<SafeResult<R>> {
        match self {
            Self::Success { result, content } => Ok(SafeResult::Success {
                result: serde_json::from_value(result)?,
                content,
            }),
            Self::Failure { message } => Ok(SafeResult::Failure { message }),
        }
    }
}

impl From<&ReceivedToolResult> for SafeResult<serde_json::Value> {
    fn from(received: &ReceivedToolResult) -> Self {
        Self::from_received(received)
    }
}

/// Typed handle for calling one tool from inside a node.
///
/// Arguments are serialized from `A`; a success payload is decoded into `R`.
pub struct SafeTool<A, R> {
    name: String,
    _types: PhantomData<fn(A) -> R>,
}

impl<A: Serialize, R: DeserializeOwned> SafeTool<A, R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _types: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the tool through the context's environment.
    ///
    /// Tool failures come back as `SafeResult::Failure`; only engine and
    /// environment errors are returned as `Err`.
    pub async fn execute(&self, ctx: &AgentContext, args: &A) -> Result<SafeResult<R>> {
        let args = serde_json::to_string(args)?;
        let call = ToolCall::new(None, self.name.clone(), args);
        let received = ctx.execute_tool(call).await?;
        Ok(self.classify(&received))
    }

    /// Like [`execute`](Self::execute), also recording the call and its
    /// result in the session history.
    pub async fn execute_and_record(
        &self,
        ctx: &AgentContext,
        args: &A,
    ) -> Result<SafeResult<R>> {
        let args = serde_json::to_string(args)?;
        let call = ToolCall::new(None, self.name.clone(), args);
        let received = ctx.execute_tool(call.clone()).await?;
        {
            let mut session = ctx.session().write_session().await;
            session.append(Message::tool_call(call));
            session.append(Message::tool_result(received.clone()));
        }
        Ok(self.classify(&received))
    }

    /// A payload that does not decode as `R` counts as a failure.
    fn classify(&self, received: &ReceivedToolResult) -> SafeResult<R> {
        SafeResult::from_received(received)
            .decode::<R>()
            .unwrap_or_else(|e| SafeResult::Failure {
                message: format!("{}: unexpected result: {}", self.name, e),
            })
    }
}

impl<S, T> EdgeBuilder<S, T, ReceivedToolResult> {
    /// Classify the raw result so later steps can branch on it.
    pub fn as_safe_result(self) -> EdgeBuilder<S, T, SafeResult<serde_json::Value>> {
        self.transformed(|_, received| SafeResult::from_received(&received))
    }
}

impl<S, T, R: GraphValue> EdgeBuilder<S, T, SafeResult<R>> {
    /// Accept a success matching `condition`; yields the payload.
    pub fn on_successful(
        self,
        condition: impl Fn(&R) -> bool + Send + Sync + 'static,
    ) -> EdgeBuilder<S, T, R> {
        self.filter_map(move |_, outcome| match outcome {
            SafeResult::Success { result, .. } if condition(&result) => Some(result),
            _ => None,
        })
    }

    /// Accept a failure matching `condition`; yields its message.
    pub fn on_failure(
        self,
        condition: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> EdgeBuilder<S, T, String> {
        self.filter_map(move |_, outcome| match outcome {
            SafeResult::Failure { message } if condition(&message) => Some(message),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call() -> ToolCall {
        ToolCall::new(Some("1".into()), "add", "{}")
    }

    #[test]
    fn payload_decides_classification() {
        let ok = ReceivedToolResult::success(&call(), "3", json!(3));
        let failed = ReceivedToolResult::failure(&call(), "bad args");
        let null = ReceivedToolResult::success(&call(), "nothing", serde_json::Value::Null);

        assert_eq!(
            SafeResult::<serde_json::Value>::from(&ok),
            SafeResult::Success {
                result: json!(3),
                content: "3".into()
            }
        );
        assert_eq!(
            SafeResult::<serde_json::Value>::from(&failed),
            SafeResult::Failure {
                message: "bad args".into()
            }
        );
        assert!(SafeResult::<serde_json::Value>::from(&null).is_failure());
    }

    #[test]
    fn payload_of_any_shape_is_success() {
        for payload in [json!(0), json!(""), json!([]), json!({}), json!(false)] {
            let received = ReceivedToolResult::success(&call(), "x", payload);
            assert!(SafeResult::from_received(&received).is_success());
        }
    }

    #[test]
    fn decode_typed_payload() {
        let received = ReceivedToolResult::success(&call(), "3", json!(3));
        let typed: SafeResult<i64> = SafeResult::from_received(&received).decode().unwrap();
        assert_eq!(typed.content(), "3");
        assert_eq!(typed.into_result(), Some(3));

        let wrong = SafeResult::from_received(&received).decode::<String>();
        assert!(wrong.is_err());
    }
}
