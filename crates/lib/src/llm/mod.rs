//! Completion service abstraction and OpenAI client.
//!
//! Text completion (prompt in, ranked candidate texts out) with fixed generation parameters.

mod completion;
mod openai;

pub use completion::{
    CompletionChoice, CompletionClient, CompletionError, CompletionRequest, CompletionResponse,
    GenerationParams, DEFAULT_MODEL,
};
pub use openai::OpenAiClient;
