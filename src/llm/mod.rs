//! LLM integration for mobile-judge.
//!
//! The judge consumes a chat/vision model only through the [`LlmProvider`]
//! trait. One provider instance is built per process and shared by every
//! stage as an `Arc<dyn LlmProvider>`:
//!
//! ```ignore
//! use mobile_judge::llm::{ChatCompletionsClient, RetryPolicy, RetryingProvider};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = ChatCompletionsClient::from_env()?;
//! let provider = RetryingProvider::new(Arc::new(client), RetryPolicy::default())
//!     .with_call_timeout(Duration::from_secs(180));
//! ```

pub mod client;
pub mod image;
pub mod retry;
pub mod types;

pub use client::{generate_text, ChatCompletionsClient, LlmProvider, DEFAULT_API_BASE, DEFAULT_MODEL};
pub use image::{encode_image, image_part, image_parts};
pub use retry::{RetryPolicy, RetryingProvider};
pub use types::{
    Choice, ContentPart, GenerationRequest, GenerationResponse, ImageUrl, Message, MessageContent,
    Usage,
};
