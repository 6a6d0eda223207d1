//! Answer pipeline and conversation logic for ChatBox.
//!
//! This crate ties the Gemini transport, the exact-match answer cache and the
//! rate-limit retry loop into a pipeline, and wraps it in a chat session with
//! a single-flight guard and display history.

pub mod cache;
pub mod flight;
pub mod pipeline;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{AnswerCache, CacheStats};
pub use flight::{Busy, FlightGuard, FlightPermit};
pub use pipeline::{
    AnswerPipeline, Failure, PipelineObserver, PipelineState, RATE_LIMITED_MESSAGE,
    REQUEST_FAILED_MESSAGE, RetryPolicy, SilentObserver,
};
pub use session::{ChatHistory, ChatSession, PendingSubmit, Rejected, SubmitOutcome};
pub use transport::{GeminiTransport, GenerateContentResponse, Transport, TransportError};
