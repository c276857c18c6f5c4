use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use reflow_core::error::Result;
use reflow_core::graph::Node;
use reflow_core::traits::NodeExecutor;
use reflow_core::types::{ExecutionContext, Message};

/// A deterministic in-process computation.
///
/// Receives the node (for its config), the pending inputs and the run
/// context. `Err` is reported as an error output, not a run failure.
pub type LocalFn = Arc<
    dyn Fn(&Node, &[Message], &ExecutionContext) -> std::result::Result<String, String>
        + Send
        + Sync,
>;

/// Named local functions, selected per node by `config.function`.
#[derive(Clone, Default)]
pub struct LocalFunctions {
    functions: HashMap<String, LocalFn>,
}

impl LocalFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding `concat`, `word_count` and `template`.
    pub fn builtins() -> Self {
        let mut table = Self::new();
        table.register("concat", Arc::new(concat));
        table.register("word_count", Arc::new(word_count));
        table.register("template", Arc::new(template));
        table
    }

    pub fn register(&mut self, name: impl Into<String>, function: LocalFn) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<&LocalFn> {
        self.functions.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Executor for `local` nodes.
pub struct LocalExecutor {
    functions: LocalFunctions,
}

impl LocalExecutor {
    pub fn new(functions: LocalFunctions) -> Self {
        Self { functions }
    }

    pub fn with_builtins() -> Self {
        Self::new(LocalFunctions::builtins())
    }
}

impl NodeExecutor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
    }

    fn execute<'a>(
        &'a self,
        node: &'a Node,
        inputs: Vec<Message>,
        ctx: ExecutionContext,
    ) -> BoxFuture<'a, Result<Message>> {
        Box::pin(async move {
            let name = node.config_str("function").unwrap_or("concat");
            let outcome = match self.functions.get(name) {
                Some(function) => function(node, &inputs, &ctx),
                None => Err(format!("unknown local function '{}'", name)),
            };

            match outcome {
                Ok(content) => Ok(Message::assistant(content, node.id.as_str())
                    .with_metadata("function", serde_json::json!(name))),
                Err(e) => {
                    warn!(node_id = %node.id, function = name, error = %e, "Local node failed");
                    Ok(Message::error(
                        format!("Error executing local node '{}': {}", node.id, e),
                        node.id.as_str(),
                        e,
                    ))
                }
            }
        })
    }
}

/// Join all input contents with `config.separator` (default blank line).
fn concat(node: &Node, inputs: &[Message], _ctx: &ExecutionContext) -> std::result::Result<String, String> {
    let separator = node.config_str("separator").unwrap_or("\n\n");
    Ok(inputs
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(separator))
}

fn word_count(_node: &Node, inputs: &[Message], _ctx: &ExecutionContext) -> std::result::Result<String, String> {
    let count: usize = inputs.iter().map(|m| m.content.split_whitespace().count()).sum();
    Ok(count.to_string())
}

/// Render `config.template`, replacing `{{key}}` placeholders.
///
/// `{{input}}` is the latest pending input; any other key is looked up in
/// prior outputs, then in string values of the shared context. Unknown keys
/// are left as written.
fn template(node: &Node, inputs: &[Message], ctx: &ExecutionContext) -> std::result::Result<String, String> {
    let template = node
        .config_str("template")
        .ok_or_else(|| "missing config.template".to_string())?;

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };

        let key = after[..close].trim();
        let value = if key == "input" {
            inputs.last().map(|m| m.content.as_str())
        } else {
            ctx.prior_output(key)
                .or_else(|| ctx.shared_value(key).and_then(|v| v.as_str()))
        };
        match value {
            Some(v) => out.push_str(v),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            prior_outputs: Arc::new(
                [
                    ("analyst".to_string(), "Revenue up 12%".to_string()),
                    ("Research Analyst".to_string(), "Revenue up 12%".to_string()),
                ]
                .into(),
            ),
            shared: Arc::new([("ticker".to_string(), serde_json::json!("ACME"))].into()),
        }
    }

    async fn run(node: Node, inputs: Vec<Message>) -> Message {
        LocalExecutor::with_builtins()
            .execute(&node, inputs, ctx())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_concat_default() {
        let out = run(
            Node::local("join"),
            vec![Message::user("a", "x"), Message::user("b", "y")],
        )
        .await;
        assert_eq!(out.content, "a\n\nb");
        assert_eq!(out.source, "join");
        assert_eq!(out.meta_str("function"), Some("concat"));
    }

    #[tokio::test]
    async fn test_concat_separator() {
        let node = Node::local("join")
            .with_config("function", serde_json::json!("concat"))
            .with_config("separator", serde_json::json!(" | "));
        let out = run(node, vec![Message::user("a", "x"), Message::user("b", "y")]).await;
        assert_eq!(out.content, "a | b");
    }

    #[tokio::test]
    async fn test_word_count() {
        let node = Node::local("count").with_config("function", serde_json::json!("word_count"));
        let out = run(
            node,
            vec![Message::user("one two", "x"), Message::user(" three ", "y")],
        )
        .await;
        assert_eq!(out.content, "3");
    }

    #[tokio::test]
    async fn test_template_lookups() {
        let node = Node::local("report")
            .with_config("function", serde_json::json!("template"))
            .with_config(
                "template",
                serde_json::json!("{{ticker}}: {{analyst}} / {{Research Analyst}} / {{input}} / {{nobody}}"),
            );
        let out = run(node, vec![Message::user("latest", "x")]).await;
        assert_eq!(
            out.content,
            "ACME: Revenue up 12% / Revenue up 12% / latest / {{nobody}}"
        );
    }

    #[tokio::test]
    async fn test_template_unclosed_placeholder() {
        let node = Node::local("report")
            .with_config("function", serde_json::json!("template"))
            .with_config("template", serde_json::json!("{{analyst}} and {{oops"));
        let out = run(node, vec![]).await;
        assert_eq!(out.content, "Revenue up 12% and {{oops");
    }

    #[tokio::test]
    async fn test_template_missing_config_is_error_output() {
        let node = Node::local("report").with_config("function", serde_json::json!("template"));
        let out = run(node, vec![]).await;
        assert!(out.is_error_flagged());
        assert!(out.content.starts_with("Error executing local node 'report'"));
    }

    #[tokio::test]
    async fn test_unknown_function_is_error_output() {
        let node = Node::local("x").with_config("function", serde_json::json!("nope"));
        let out = run(node, vec![]).await;
        assert!(out.is_error_flagged());
        assert!(out.content.contains("unknown local function 'nope'"));
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(
            LocalFunctions::builtins().names(),
            vec!["concat", "template", "word_count"]
        );
    }
}
