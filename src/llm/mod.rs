// Model provider adapters (OpenAI-compatible and Anthropic)

pub mod provider;
pub mod openai;
pub mod anthropic;

pub use provider::*;
