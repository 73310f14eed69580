//! Chat service for the Llama API.
//!
//! Notes:
//! - We use `async-openai` for its HTTP client and SSE stream handling.
//! - The Llama API answers in its own shape (`completion_message`, `event.delta`)
//!   next to the OpenAI-compatible one, so requests go through async-openai's
//!   `byot` ("bring your own types") methods and decode both.

pub mod benchmark;
mod client;
mod error;
mod history;
mod manager;
mod models;
mod session;
mod stream;
mod types;

pub use benchmark::{
    benchmark_models, test_all_models, BenchmarkReport, ModelRanking, ModelTestResult,
    BENCHMARK_PROMPTS, DEFAULT_TEST_PROMPT,
};
pub use client::{ChatApi, OpenAiCompatClient};
pub use error::ChatError;
pub use history::{build_valid_history, prepare_for_transmission};
pub use manager::{InFlightGuard, RequestRegistry};
pub use models::{find_model, DEFAULT_MODEL, MODELS};
pub use session::{ChatSession, ChatStream};
pub use types::{
    ChatOptions, ChatReply, ChatResult, ChatTurn, ChunkStream, GenerationParams, ModelInfo,
    StreamChunk, UserInput, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
