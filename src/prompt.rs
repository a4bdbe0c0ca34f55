//! Prompt assembly: recent turns plus new input, as one model-ready string.

use crate::models::{Role, Turn};

/// Build the generation prompt from history and the new user input.
///
/// One `"Role: message"` line per turn in chronological order, then the new
/// input and an open assistant line for the model to complete. Deterministic,
/// no hidden state. The persona instruction travels separately in the
/// request's `system` field.
pub fn build_prompt(history: &[Turn], user_input: &str) -> String {
    let mut prompt = String::new();

    for turn in history {
        let label = match turn.role {
            Role::User => "User",
            _ => "Assistant",
        };
        prompt.push_str(&format!("{}: {}\n", label, turn.message));
    }

    prompt.push_str(&format!("User: {user_input}\nAssistant:"));
    prompt
}
