//! Model-provider clients: chat completion for distillation and text
//! embeddings for the vector store.

pub mod chat;
pub mod embedding;

pub use chat::{ChatClient, OpenRouterChatClient};
pub use embedding::{EmbeddingClient, EmbeddingProvider, OpenAiEmbeddingProvider};

/// Rate limiting and server-side failures are worth another attempt.
pub(crate) fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
