pub mod providers;
pub mod retry;

use std::sync::Arc;

use reflow_core::config::AppConfig;
use reflow_core::error::Result;
use reflow_core::traits::NodeExecutor;

pub use providers::openai::ChatCompletionExecutor;
pub use retry::{RetryClassify, RetryPolicy};

/// Create the executor used for `remote` nodes.
pub fn create_remote_executor(config: &AppConfig) -> Result<Arc<dyn NodeExecutor>> {
    let retry = RetryPolicy::from(&config.retry);
    Ok(Arc::new(ChatCompletionExecutor::new(
        config.provider.clone(),
        retry,
    )?))
}
