//! Speaker session and command permissions
//!
//! The session records who was last identified. Permissions are granted
//! per speaker as a list of command phrases; a spoken or typed command is
//! permitted when it contains one of the speaker's phrases, ignoring case.
//! Nothing here executes commands.

use crate::identify::{Decision, IdentificationResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Speaker label -> allowed command phrases
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PermissionTable {
    phrases: BTreeMap<String, Vec<String>>,
}

impl PermissionTable {
    pub fn new(phrases: BTreeMap<String, Vec<String>>) -> Self {
        Self { phrases }
    }

    /// Phrases granted to a speaker, empty for unknown speakers
    pub fn phrases_for(&self, speaker: &str) -> &[String] {
        self.phrases.get(speaker).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The first granted phrase contained in `command`
    pub fn matching_phrase(&self, speaker: &str, command: &str) -> Option<&str> {
        let command = command.trim().to_lowercase();
        if command.is_empty() {
            return None;
        }
        self.phrases_for(speaker)
            .iter()
            .find(|phrase| {
                let phrase = phrase.trim().to_lowercase();
                !phrase.is_empty() && command.contains(&phrase)
            })
            .map(String::as_str)
    }
}

impl From<BTreeMap<String, Vec<String>>> for PermissionTable {
    fn from(phrases: BTreeMap<String, Vec<String>>) -> Self {
        Self::new(phrases)
    }
}

/// Who is currently identified
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpeakerSession {
    current_speaker: Option<String>,
    authenticated: bool,
}

/// Result of a permission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PermissionCheck {
    Allowed { speaker: String, phrase: String },
    Denied { speaker: String },
    NotAuthenticated,
}

impl PermissionCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionCheck::Allowed { .. })
    }
}

impl SpeakerSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_speaker(&self) -> Option<&str> {
        self.current_speaker.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Adopt the outcome of an identification run
    ///
    /// A recognized speaker authenticates the session; `Unknown` resets it.
    pub fn apply(&mut self, decision: &Decision) {
        match decision {
            Decision::Speaker(name) => {
                tracing::info!("Session authenticated as {}", name);
                self.current_speaker = Some(name.clone());
                self.authenticated = true;
            }
            Decision::Unknown => {
                if self.authenticated {
                    tracing::info!("Session reset: speaker not recognized");
                }
                self.reset();
            }
        }
    }

    pub fn apply_result(&mut self, result: &IdentificationResult) {
        self.apply(&result.decision);
    }

    /// Forget the current speaker
    pub fn reset(&mut self) {
        self.current_speaker = None;
        self.authenticated = false;
    }

    /// Check whether the current speaker may run `command`
    pub fn check(&self, table: &PermissionTable, command: &str) -> PermissionCheck {
        let speaker = match (&self.current_speaker, self.authenticated) {
            (Some(speaker), true) => speaker,
            _ => return PermissionCheck::NotAuthenticated,
        };

        match table.matching_phrase(speaker, command) {
            Some(phrase) => PermissionCheck::Allowed {
                speaker: speaker.clone(),
                phrase: phrase.to_string(),
            },
            None => {
                tracing::debug!("{} has no permission for '{}'", speaker, command);
                PermissionCheck::Denied {
                    speaker: speaker.clone(),
                }
            }
        }
    }

    pub fn permits(&self, table: &PermissionTable, command: &str) -> bool {
        self.check(table, command).is_allowed()
    }
}
