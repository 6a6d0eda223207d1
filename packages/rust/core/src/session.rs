//! Conversation state around the answer pipeline.
//!
//! A [`ChatSession`] owns the display history and the single-flight guard.
//! A submit is split into three steps so UI shells can run the network part
//! on a background task:
//!
//! 1. [`ChatSession::begin`] validates input and claims the flight permit
//! 2. [`PendingSubmit::run`] drives the pipeline and releases the permit
//! 3. [`ChatSession::complete`] appends the exchange to the history
//!
//! [`ChatSession::submit`] does all three in sequence.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use chatbox_shared::{Answer, ChatConfig, ChatMessage, Query, SessionId};

use crate::flight::{Busy, FlightGuard, FlightPermit};
use crate::pipeline::{AnswerPipeline, Failure, PipelineObserver};
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Ordered list of messages shown to the user.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    /// A history that starts with the given bot greetings.
    pub fn with_greetings(greetings: &[String]) -> Self {
        Self {
            messages: greetings.iter().map(ChatMessage::bot).collect(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append the user's query followed by the answer or failure message.
    pub fn record(&mut self, query: &Query, result: &Result<Answer, Failure>) {
        self.messages.push(ChatMessage::user(query.as_str()));
        let reply = match result {
            Ok(answer) => answer.as_str(),
            Err(failure) => failure.message(),
        };
        self.messages.push(ChatMessage::bot(reply));
    }
}

// ---------------------------------------------------------------------------
// Submit lifecycle
// ---------------------------------------------------------------------------

/// Why a submit was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    /// Input was blank after trimming.
    #[error("nothing to send")]
    EmptyInput,
    /// Another submit is still outstanding.
    #[error(transparent)]
    Busy(#[from] Busy),
}

/// A validated query holding the flight permit, ready to run.
#[must_use = "a pending submit holds the flight permit until run or dropped"]
pub struct PendingSubmit<T> {
    session_id: SessionId,
    query: Query,
    pipeline: Arc<AnswerPipeline<T>>,
    permit: FlightPermit,
}

/// Result of a finished submit, to be passed to [`ChatSession::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub query: Query,
    pub result: Result<Answer, Failure>,
}

impl SubmitOutcome {
    /// Shells clear their input line only when this is true.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The bot message that goes into the history.
    pub fn reply(&self) -> &str {
        match &self.result {
            Ok(answer) => answer.as_str(),
            Err(failure) => failure.message(),
        }
    }
}

impl<T: Transport> PendingSubmit<T> {
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Drive the pipeline to completion. The permit is released before this
    /// returns, on every path.
    #[instrument(skip_all, fields(session = %self.session_id))]
    pub async fn run(self, observer: &dyn PipelineObserver) -> SubmitOutcome {
        let Self {
            query,
            pipeline,
            permit,
            ..
        } = self;

        let result = pipeline.submit(&query, observer).await;
        drop(permit);

        match &result {
            Ok(_) => debug!("submit succeeded"),
            Err(failure) => debug!(?failure, "submit failed"),
        }
        SubmitOutcome { query, result }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One conversation: pipeline (with its cache), history, and busy flag.
pub struct ChatSession<T> {
    id: SessionId,
    pipeline: Arc<AnswerPipeline<T>>,
    guard: FlightGuard,
    history: ChatHistory,
}

impl<T: Transport> ChatSession<T> {
    pub fn new(pipeline: AnswerPipeline<T>, chat: &ChatConfig) -> Self {
        let id = SessionId::new();
        info!(session = %id, "chat session started");
        Self {
            id,
            pipeline: Arc::new(pipeline),
            guard: FlightGuard::new(),
            history: ChatHistory::with_greetings(&chat.greetings),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn pipeline(&self) -> &AnswerPipeline<T> {
        &self.pipeline
    }

    /// True while a submit is outstanding.
    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    /// Validate `input` and claim the flight permit.
    pub fn begin(&self, input: &str) -> Result<PendingSubmit<T>, Rejected> {
        let query = Query::new(input).map_err(|_| Rejected::EmptyInput)?;
        let permit = self.guard.try_acquire()?;
        Ok(PendingSubmit {
            session_id: self.id.clone(),
            query,
            pipeline: Arc::clone(&self.pipeline),
            permit,
        })
    }

    /// Record a finished submit in the history.
    pub fn complete(&mut self, outcome: &SubmitOutcome) {
        self.history.record(&outcome.query, &outcome.result);
    }

    /// Begin, run and complete in one call.
    pub async fn submit(
        &mut self,
        input: &str,
        observer: &dyn PipelineObserver,
    ) -> Result<SubmitOutcome, Rejected> {
        let pending = self.begin(input)?;
        let outcome = pending.run(observer).await;
        self.complete(&outcome);
        Ok(outcome)
    }
}
