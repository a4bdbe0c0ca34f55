//! Vela: the conversational core of a local AI companion.
//!
//! Everything runs against a local Ollama server; no data leaves the
//! machine. The crate exposes a [`Session`] that accepts user text,
//! streams emotion-tagged replies, and records every exchange in a
//! SQLite history store. GUI, voice, and assets live with collaborators;
//! this crate is the brain and the memory.

pub mod config;
pub mod db;
pub mod history;
pub mod models;
pub mod ollama;
pub mod parser;
pub mod prompt;
pub mod session;

pub use history::HistoryStore;
pub use models::{Emotion, Role, Turn};
pub use ollama::OllamaClient;
pub use session::{Session, SessionError, SessionEvent};

/// Install the global tracing subscriber. `RUST_LOG` wins when set;
/// otherwise the crate logs at info level.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
