pub mod openai;

pub use openai::ChatCompletionExecutor;
