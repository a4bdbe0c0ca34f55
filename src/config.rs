//! Application constants and deployment-fixed model configuration.
//!
//! Everything here is fixed per deployment, never per request: which model
//! to talk to, how it samples, what persona it speaks with, and where the
//! conversation log lives on disk.

use std::path::PathBuf;

use serde::Serialize;

/// Application-level constants
pub const APP_NAME: &str = "Vela";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How many recent turns feed each prompt.
pub const HISTORY_WINDOW: usize = 4;

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> String {
    format!("{}=info", env!("CARGO_PKG_NAME"))
}

/// Get the application data directory
/// ~/Vela/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join(APP_NAME)
}

/// Path of the conversation history database.
pub fn history_db_path() -> PathBuf {
    app_data_dir().join("memory.db")
}

/// Persona instruction sent as the request's `system` field.
pub const SYSTEM_PROMPT: &str = r#"You are an emotionally intelligent AI companion named "Vela".
Always reply in simple, clear English. Keep it short: 1-3 sentences.
Adapt tone based on emotion:
- Happy: enthusiastic, friendly
- Sad: warm, comforting
- Lonely: affectionate, present
- Neutral: friendly, curious
Do not repeat the same answer; keep responses fresh and natural.
Never say you are just an AI; speak like a caring friend.
Remember recent conversation to stay context-aware.
Format every reply strictly as JSON:
{"response":"your reply here","emotion":"happy/sad/neutral/love"}
The emotion value must be one of: happy, sad, neutral, love"#;

/// Sampling parameters forwarded as the request's `options` object.
#[derive(Debug, Clone, Serialize)]
pub struct SamplingOptions {
    pub num_predict: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub num_ctx: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            num_predict: 40,
            temperature: 0.6,
            top_p: 0.85,
            top_k: 40,
            num_ctx: 2048,
        }
    }
}

/// Deployment-fixed generation configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model: String,
    pub system_prompt: String,
    pub options: SamplingOptions,
    /// Sequences that terminate generation (keeps the model from writing
    /// the user's next line itself).
    pub stop: Vec<String>,
    /// How long the server keeps the model resident after a request.
    pub keep_alive: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2:3b".to_string(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            options: SamplingOptions::default(),
            stop: vec!["\nUser:".to_string()],
            keep_alive: "10m".to_string(),
        }
    }
}
