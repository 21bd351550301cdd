//! LLM provider abstraction for the lantern runtime.
//!
//! The engine talks to every provider through the [`LlmPort`] trait using
//! provider-agnostic request/response types. Wire protocols live outside
//! this workspace; adapters implement the port and translate. This crate
//! also owns the retry policy for transient provider errors and the tier
//! router that picks a concrete model for a turn.

pub mod error;
pub mod provider;
pub mod retry;
pub mod router;
pub mod types;

pub use error::{ProviderError, Result};
pub use provider::LlmPort;
pub use retry::{RetryConfig, compute_delay, is_retryable};
pub use router::{LlmRouter, ModelChoice, RouterConfig};
pub use types::{ChatRequest, ChatResponse, ContentBlock, StopReason, StreamChunk, Usage, ViewMessage};
