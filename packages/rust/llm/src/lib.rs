//! Generation backend capability for the copilot pipeline.
//!
//! Stages never construct clients themselves. They ask a [`BackendProvider`]
//! for a handle configured with the [`Sampling`] they need and call
//! [`GenerationBackend::invoke`] on it. Production wires in a [`ClientCache`]
//! over [`OpenAiClient`]; tests substitute scripted fakes.

mod cache;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use copilot_shared::Result;

pub use cache::{BackendFactory, ClientCache};
pub use openai::{OpenAiClient, OpenAiSettings};

/// Sampling configuration a stage requests a backend handle for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    /// `None` leaves the output length to the backend's default.
    pub max_output_tokens: Option<u32>,
}

impl Sampling {
    pub const fn new(temperature: f32, max_output_tokens: Option<u32>) -> Self {
        Self {
            temperature,
            max_output_tokens,
        }
    }
}

/// Text produced by one backend call, with token usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A configured handle that turns a system + user instruction pair into text.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Run one completion. Transport and auth failures surface as `CopilotError::Backend`.
    async fn invoke(&self, system: &str, user: &str) -> Result<Generation>;

    /// Model identifier, for logging.
    fn model(&self) -> &str;
}

/// Hands out backend handles keyed by sampling configuration.
pub trait BackendProvider: Send + Sync {
    fn backend(&self, sampling: Sampling) -> Result<Arc<dyn GenerationBackend>>;
}
