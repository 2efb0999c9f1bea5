pub mod client;
pub mod config;
pub mod degraded;
pub mod limit;
pub mod openai;
pub mod retry;
pub mod stub;

pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage, complete_text};
pub use config::{LlmConfig, build_llm_client};
pub use degraded::DegradingClient;
pub use limit::SemaphoredClient;
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
pub use stub::StubLlmClient;
