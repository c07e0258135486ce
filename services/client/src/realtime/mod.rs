pub mod conversation;
pub mod openai;
pub mod wire;

pub use openai::{OpenAIRealtimeClient, RealtimeEndpoint};
