//! Test doubles shared by the pipeline and session tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use chatbox_shared::Query;

use crate::pipeline::{PipelineObserver, PipelineState};
use crate::transport::{GenerateContentResponse, Transport, TransportError};

type Reply = Result<GenerateContentResponse, TransportError>;

/// An HTTP status error with an empty body.
pub(crate) fn status(code: u16) -> TransportError {
    TransportError::Status {
        status: code,
        body: String::new(),
    }
}

/// Replays scripted replies, then repeats `fallback` forever.
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl FakeTransport {
    pub(crate) fn always(reply: Reply) -> Self {
        Self::scripted(Vec::new(), reply)
    }

    pub(crate) fn scripted(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Elapsed (tokio) time between consecutive calls.
    pub(crate) fn gaps(&self) -> Vec<Duration> {
        let times = self.call_times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

impl Transport for FakeTransport {
    async fn generate(&self, _query: &Query) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Collects every state the pipeline reports.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    states: Mutex<Vec<PipelineState>>,
}

impl RecordingObserver {
    pub(crate) fn states(&self) -> Vec<PipelineState> {
        self.states.lock().unwrap().clone()
    }
}

impl PipelineObserver for RecordingObserver {
    fn state_changed(&self, state: &PipelineState) {
        self.states.lock().unwrap().push(state.clone());
    }
}
