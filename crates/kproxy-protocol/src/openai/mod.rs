pub mod models;
pub mod request;
pub mod response;
pub mod stream;

pub use models::{Model, ModelList};
pub use request::{ChatMessage, CreateChatCompletionRequest, MessageContent};
pub use response::{AssistantMessage, ChatChoice, ChatCompletionResponse, Usage};
pub use stream::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
