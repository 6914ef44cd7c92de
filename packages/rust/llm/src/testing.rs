//! Scripted [`TextGenerator`] implementations for tests, no network involved.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sourcestream_shared::{Result, SourcestreamError};

use crate::client::{GenerationRequest, GenerationResponse, TextGenerator};

type ScriptedReply = std::result::Result<GenerationResponse, String>;

/// Replays queued replies in order, then the fallback reply forever.
#[derive(Default)]
pub struct ScriptedGenerator {
    queue: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<ScriptedReply>,
}

fn reply(text: &str, input_tokens: u64, output_tokens: u64) -> ScriptedReply {
    Ok(GenerationResponse {
        text: text.to_string(),
        input_tokens,
        output_tokens,
    })
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with the same text on every call.
    pub fn replying(text: &str, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Some(reply(text, input_tokens, output_tokens)),
        }
    }

    /// Fail every call with the given error.
    pub fn failing(error: SourcestreamError) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Some(Err(error.to_string())),
        }
    }

    /// Queue a one-shot reply ahead of the fallback.
    pub fn then_replying(self, text: &str, input_tokens: u64, output_tokens: u64) -> Self {
        self.lock_queue().push_back(reply(text, input_tokens, output_tokens));
        self
    }

    /// Queue a one-shot failure ahead of the fallback.
    pub fn then_failing(self, error: SourcestreamError) -> Self {
        self.lock_queue().push_back(Err(error.to_string()));
        self
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptedReply>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResponse> {
        let next = self.lock_queue().pop_front();
        let reply = match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| SourcestreamError::Generation("scripted replies exhausted".into()))?,
        };
        reply.map_err(SourcestreamError::Generation)
    }
}

/// A generator whose calls never resolve, for deadline and cancellation
/// tests. Counts started calls and calls dropped while in flight so a test
/// can observe that stalled work was actually torn down.
#[derive(Default)]
pub struct StallingGenerator {
    calls: Arc<AtomicUsize>,
    dropped_in_flight: Arc<AtomicUsize>,
}

impl StallingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter of generation calls that have started.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Counter of generation calls dropped before resolving.
    pub fn dropped_in_flight(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.dropped_in_flight)
    }
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TextGenerator for StallingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // The future never completes, so the counter fires exactly when the
        // caller abandons the call.
        let _in_flight = DropCounter(Arc::clone(&self.dropped_in_flight));
        std::future::pending().await
    }
}
