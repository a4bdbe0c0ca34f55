//! Per-turn orchestration: persist, prompt, generate, parse, persist.
//!
//! The UI (or any collaborator) calls `submit` and becomes a pure subscriber:
//! progress and the terminal result arrive over an ordered channel. At most
//! one generation is in flight per session; a submission while one is
//! outstanding is rejected, never interleaved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::HISTORY_WINDOW;
use crate::db::StorageError;
use crate::history::HistoryStore;
use crate::models::{Emotion, Role};
use crate::ollama::{InferenceError, OllamaClient};
use crate::parser::{self, ParsedReply};
use crate::prompt::build_prompt;

/// Fixed reply when inference is unavailable or fails. The interaction is
/// still recorded like any other turn.
pub const DEGRADED_REPLY: &str =
    "I'm having a little trouble thinking right now. Give me a moment and ask me again?";

/// Trait for LLM text generation within a companion session.
///
/// `OllamaClient` is the real implementation; tests substitute scripted
/// mocks.
pub trait LlmGenerate {
    fn generate(&self, prompt: &str) -> Result<String, InferenceError>;

    /// Open a streaming generation as a caller-driven fragment iterator.
    fn stream<'a>(
        &'a self,
        prompt: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<String, InferenceError>> + 'a>, InferenceError>;

    fn prewarm(&self) -> Result<(), InferenceError>;
}

impl LlmGenerate for OllamaClient {
    fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        OllamaClient::generate(self, prompt)
    }

    fn stream<'a>(
        &'a self,
        prompt: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<String, InferenceError>> + 'a>, InferenceError>
    {
        Ok(Box::new(OllamaClient::stream(self, prompt)?))
    }

    fn prewarm(&self) -> Result<(), InferenceError> {
        OllamaClient::prewarm(self)
    }
}

/// Event emitted to the subscriber during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Incremental display text. Best-effort partial extraction of the
    /// reply field; falls back to the raw buffer. Display-only.
    Partial { text: String },
    /// Terminal: the finalized reply, already persisted.
    Done { text: String, emotion: Emotion },
    /// Terminal: the assistant turn could not be recorded.
    Error { message: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A generation is already in flight")]
    Busy,

    #[error("Input must not be empty")]
    EmptyInput,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One companion session: a history store plus an inference backend.
pub struct Session<G: LlmGenerate> {
    llm: Arc<G>,
    history: Arc<HistoryStore>,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl<G: LlmGenerate + Send + Sync + 'static> Session<G> {
    pub fn new(llm: Arc<G>, history: Arc<HistoryStore>) -> Self {
        Self {
            llm,
            history,
            busy: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Accept one user input and start a turn.
    ///
    /// The user turn is persisted synchronously, so a storage failure is a
    /// hard error here rather than a lost message. Generation then runs on a
    /// worker thread; the returned channel yields zero or more `Partial`
    /// events followed by exactly one terminal event, unless the turn is
    /// cancelled.
    pub fn submit(&self, text: &str) -> Result<Receiver<SessionEvent>, SessionError> {
        let input = text.trim();
        if input.is_empty() {
            return Err(SessionError::EmptyInput);
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::Busy);
        }
        let guard = TurnGuard(Arc::clone(&self.busy));
        self.cancel.store(false, Ordering::SeqCst);

        self.history.append(Role::User, input, Emotion::Neutral)?;
        let recent = self.history.recent(HISTORY_WINDOW)?;
        let prompt = build_prompt(&recent, input);

        let (tx, rx) = mpsc::channel();
        let llm = Arc::clone(&self.llm);
        let history = Arc::clone(&self.history);
        let cancel = Arc::clone(&self.cancel);

        thread::spawn(move || {
            let _guard = guard;
            run_turn(llm.as_ref(), history.as_ref(), &cancel, &prompt, &tx);
        });

        Ok(rx)
    }

    /// Whether a generation is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Ask an in-flight turn to stop at the next fragment boundary. An
    /// abandoned turn may leave no assistant row in history.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Fire-and-forget model pre-warm. Failure is logged and discarded;
    /// correctness never depends on it.
    pub fn prewarm(&self) {
        let llm = Arc::clone(&self.llm);
        thread::spawn(move || {
            if let Err(e) = llm.prewarm() {
                tracing::debug!(error = %e, "Pre-warm skipped");
            }
        });
    }

    /// Delete all stored conversation history.
    pub fn clear_history(&self) -> Result<(), StorageError> {
        self.history.clear()
    }
}

/// Resets the busy flag when the turn ends, however it ends.
struct TurnGuard(Arc<AtomicBool>);

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn run_turn<G: LlmGenerate>(
    llm: &G,
    history: &HistoryStore,
    cancel: &AtomicBool,
    prompt: &str,
    tx: &Sender<SessionEvent>,
) {
    let Some(raw) = collect_reply(llm, prompt, tx, cancel) else {
        tracing::info!("Turn abandoned before completion");
        return;
    };
    if cancel.load(Ordering::SeqCst) {
        tracing::info!("Turn abandoned before persisting");
        return;
    }

    let parsed = parser::parse_reply(&raw);
    let parsed = if parsed.text.trim().is_empty() {
        ParsedReply {
            text: DEGRADED_REPLY.to_string(),
            emotion: Emotion::Neutral,
        }
    } else {
        parsed
    };

    match history.append(Role::Assistant, &parsed.text, parsed.emotion) {
        Ok(_) => {
            let _ = tx.send(SessionEvent::Done {
                text: parsed.text,
                emotion: parsed.emotion,
            });
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to record assistant turn");
            let _ = tx.send(SessionEvent::Error {
                message: e.to_string(),
            });
        }
    }
}

/// Gather the full raw reply, preferring streaming. Returns `None` only when
/// the turn was cancelled mid-stream.
fn collect_reply<G: LlmGenerate>(
    llm: &G,
    prompt: &str,
    tx: &Sender<SessionEvent>,
    cancel: &AtomicBool,
) -> Option<String> {
    match llm.stream(prompt) {
        Ok(fragments) => {
            let mut buffer = String::new();
            for fragment in fragments {
                if cancel.load(Ordering::SeqCst) {
                    return None;
                }
                match fragment {
                    Ok(chunk) => {
                        buffer.push_str(&chunk);
                        let text = parser::extract_partial_reply(&buffer)
                            .unwrap_or_else(|| buffer.clone());
                        let _ = tx.send(SessionEvent::Partial { text });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Stream failed mid-flight");
                        return Some(blocking_or_degraded(llm, prompt));
                    }
                }
            }
            if buffer.is_empty() {
                return Some(blocking_or_degraded(llm, prompt));
            }
            Some(buffer)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Streaming unavailable");
            Some(blocking_or_degraded(llm, prompt))
        }
    }
}

fn blocking_or_degraded<G: LlmGenerate>(llm: &G, prompt: &str) -> String {
    match llm.generate(prompt) {
        Ok(raw) if !raw.trim().is_empty() => raw,
        Ok(_) => DEGRADED_REPLY.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Blocking generation failed, using degraded reply");
            DEGRADED_REPLY.to_string()
        }
    }
}
