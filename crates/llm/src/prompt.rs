//! Chat messages and the support-agent system prompt

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Persona and response rules for the broadband support agent
pub const SYSTEM_PROMPT: &str = "You are a patient customer support agent for a broadband \
and cable TV provider, speaking with a caller over the phone. \
Reply in one to three short spoken sentences. \
Give exactly one instruction at a time and wait for the caller to report back. \
Never invent outage information, ticket numbers or account details. \
If the caller asks for a human, say that you are connecting them to a technician.";

/// Builds the message list for one model call
///
/// The call context (customer, recent exchanges, steps, knowledge) goes in
/// the system message so the user turn stays the caller's own words.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(SYSTEM_PROMPT)
    }
}

impl PromptBuilder {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
        }
    }

    pub fn build(&self, prompt: &str, context: &str) -> Vec<Message> {
        let system = if context.trim().is_empty() {
            self.system.clone()
        } else {
            format!("{}\n\n{}", self.system, context.trim())
        };
        vec![Message::system(system), Message::user(prompt)]
    }
}
