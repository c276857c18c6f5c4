use futures::future::BoxFuture;

use reflow_core::error::Result;
use reflow_core::graph::Node;
use reflow_core::traits::NodeExecutor;
use reflow_core::types::{ExecutionContext, Message};

/// Forwards the latest pending input unchanged, tagged `passthrough = true`.
///
/// With no input it emits an empty user message.
pub struct PassthroughExecutor;

impl NodeExecutor for PassthroughExecutor {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Vec<Message>,
        _ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<Message>> {
        Box::pin(async move {
            let forwarded = match inputs.last() {
                Some(last) => {
                    let mut msg = Message::new(last.role, last.content.clone(), node.id.as_str());
                    msg.metadata = last.metadata.clone();
                    msg
                }
                None => Message::user("", node.id.as_str()),
            };
            Ok(forwarded.with_metadata("passthrough", serde_json::Value::Bool(true)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflow_core::types::Role;

    #[tokio::test]
    async fn test_forwards_last_input() {
        let node = Node::passthrough("relay");
        let inputs = vec![
            Message::user("first", "TASK"),
            Message::assistant("second", "writer").with_metadata("model", serde_json::json!("gpt-4o")),
        ];

        let out = PassthroughExecutor
            .execute(&node, inputs, ExecutionContext::default())
            .await
            .unwrap();

        assert_eq!(out.content, "second");
        assert_eq!(out.role, Role::Assistant);
        assert_eq!(out.source, "relay");
        assert_eq!(out.meta_str("model"), Some("gpt-4o"));
        assert_eq!(out.metadata["passthrough"], true);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let node = Node::passthrough("relay");
        let out = PassthroughExecutor
            .execute(&node, vec![], ExecutionContext::default())
            .await
            .unwrap();

        assert_eq!(out.content, "");
        assert_eq!(out.role, Role::User);
        assert_eq!(out.metadata["passthrough"], true);
    }

    #[tokio::test]
    async fn test_error_flag_survives() {
        let node = Node::passthrough("relay");
        let inputs = vec![Message::error("Error executing remote node: boom", "up", "boom")];
        let out = PassthroughExecutor
            .execute(&node, inputs, ExecutionContext::default())
            .await
            .unwrap();
        assert!(out.is_error_flagged());
    }
}
