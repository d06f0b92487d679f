//! Practice conversations with a tutor contact.
//!
//! The language service itself is a collaborator behind
//! [`ConversationService`]. This module owns what happens around it: the
//! system prompt built from the contact record, and the `chat.<contactId>`
//! transcript every turn is appended to. A service failure becomes a visible
//! system message in the transcript; it never aborts the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::catalog::{chat_key, keys};
use crate::error::{ErrorCode, SyncError};
use crate::merge::{MergeRule, Side};
use crate::store::{Store, StoreError, write_record};

// ---------------------------------------------------------------------------
// Collaborator boundary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One transcript entry as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub reply: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub corrected_text: String,
    pub explanation: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("conversation service is not configured: {0}")]
    NotConfigured(String),

    #[error("conversation service request failed: {0}")]
    Transport(String),

    #[error("conversation service answered with status {status}")]
    Status { status: u16 },

    #[error("conversation service sent an unreadable response: {0}")]
    InvalidResponse(String),
}

impl ChatError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::ChatUnavailable
    }
}

/// Remote language service used by practice sessions.
pub trait ConversationService {
    /// Continue a conversation.
    ///
    /// # Errors
    ///
    /// Returns a [`ChatError`] if the service cannot produce a reply.
    fn send(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<Reply, ChatError>;

    /// Correct a learner's sentence and explain the correction.
    ///
    /// # Errors
    ///
    /// Returns a [`ChatError`] if the service cannot analyze the text.
    fn analyze(&self, text: &str) -> Result<Analysis, ChatError>;

    /// Render `text` as audio in the given voice.
    ///
    /// # Errors
    ///
    /// Returns a [`ChatError`] if speech synthesis fails.
    fn synthesize_speech(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, ChatError>;
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Result of one learner turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    Replied {
        reply: ChatMessage,
        suggestions: Vec<String>,
    },
    /// The service failed; `notice` was appended to the transcript instead.
    Failed { notice: ChatMessage },
}

pub struct ChatSession<'a> {
    store: &'a dyn Store,
    service: &'a dyn ConversationService,
    contact_id: String,
}

impl std::fmt::Debug for ChatSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("contact_id", &self.contact_id)
            .finish_non_exhaustive()
    }
}

impl<'a> ChatSession<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn Store,
        service: &'a dyn ConversationService,
        contact_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            service,
            contact_id: contact_id.into(),
        }
    }

    #[must_use]
    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }

    /// The contact's transcript. Entries that do not parse as messages are
    /// left out.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StorageRead`] if the record cannot be read or is
    /// not JSON, and [`SyncError::UnreadableRecord`] if it is not a
    /// transcript.
    pub fn transcript(&self) -> Result<Vec<ChatMessage>, SyncError> {
        Ok(self
            .raw_transcript()?
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect())
    }

    /// Send a learner message and record the outcome.
    ///
    /// # Errors
    ///
    /// Only storage failures are errors, including a stored transcript that
    /// cannot be read; it is left untouched. A failing service yields
    /// [`Turn::Failed`].
    pub fn send(&self, text: &str, now: DateTime<Utc>) -> Result<Turn, SyncError> {
        let mut raw = self.raw_transcript()?;
        let history: Vec<ChatMessage> = raw
            .iter()
            .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect();
        let mut ids: HashSet<String> = history.iter().map(|m| m.id.clone()).collect();
        let at = now.timestamp_millis();

        let user = message(&mut ids, Role::User, text, at);
        let prompt = self.system_prompt()?;

        let turn = match self.service.send(&prompt, &history, text) {
            Ok(reply) => Turn::Replied {
                reply: message(&mut ids, Role::Assistant, &reply.reply, at + 1),
                suggestions: reply.suggestions,
            },
            Err(err) => {
                tracing::warn!(contact = %self.contact_id, error = %err, "tutor reply failed");
                let code = err.code();
                let notice = format!("{} ({code}).", code.message());
                Turn::Failed {
                    notice: message(&mut ids, Role::System, &notice, at + 1),
                }
            }
        };

        let answer = match &turn {
            Turn::Replied { reply, .. } => reply,
            Turn::Failed { notice } => notice,
        };
        raw.push(to_value(&user)?);
        raw.push(to_value(answer)?);

        let key = chat_key(&self.contact_id);
        write_record(self.store, &key, Value::Array(raw))
            .map_err(|source| SyncError::StorageWrite { key, source })?;
        tracing::info!(contact = %self.contact_id, ok = matches!(turn, Turn::Replied { .. }), "chat turn recorded");
        Ok(turn)
    }

    /// Ask the service to correct `text`.
    ///
    /// # Errors
    ///
    /// Returns the service's [`ChatError`].
    pub fn analyze(&self, text: &str) -> Result<Analysis, ChatError> {
        self.service.analyze(text)
    }

    /// Speak `text` in the contact's configured voice, or `fallback_voice`.
    ///
    /// # Errors
    ///
    /// Returns the service's [`ChatError`].
    pub fn speak(&self, text: &str, fallback_voice: &str) -> Result<Vec<u8>, ChatError> {
        let voice = self
            .contact()
            .ok()
            .flatten()
            .and_then(|contact| contact.get("voice").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| fallback_voice.to_string());
        self.service.synthesize_speech(text, &voice)
    }

    /// Prompt describing the tutor persona from the contact record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StorageRead`] if the contacts record cannot be read.
    pub fn system_prompt(&self) -> Result<String, SyncError> {
        let contact = self.contact()?;
        let field = |name: &str| {
            contact
                .as_ref()
                .and_then(|c| c.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let name = field("name").unwrap_or_else(|| self.contact_id.clone());
        let mut prompt = format!(
            "You are {name}, a friendly conversation partner helping a language learner practise."
        );
        if let Some(language) = field("language") {
            prompt.push_str(&format!(" Always reply in the language with code `{language}`."));
        }
        if let Some(persona) = field("persona") {
            prompt.push(' ');
            prompt.push_str(&persona);
        }
        prompt.push_str(" Keep replies short and suggest up to three follow-up phrases.");
        Ok(prompt)
    }

    fn contact(&self) -> Result<Option<Value>, SyncError> {
        let contacts = read(self.store, keys::CONTACTS)?;
        Ok(match contacts {
            Some(Value::Object(mut map)) => map.remove(&self.contact_id),
            Some(Value::Array(items)) => items.into_iter().find(|item| {
                item.get("id").and_then(Value::as_str) == Some(self.contact_id.as_str())
            }),
            _ => None,
        })
    }

    fn raw_transcript(&self) -> Result<Vec<Value>, SyncError> {
        let key = chat_key(&self.contact_id);
        let value = match self.store.get(&key) {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(Vec::new()),
            Err(source) => return Err(SyncError::StorageRead { key, source }),
        };
        if let Err(source) = MergeRule::Transcript.check(&value, Side::Local) {
            tracing::warn!(contact = %self.contact_id, error = %source, "refusing to touch transcript");
            return Err(SyncError::UnreadableRecord { key, source });
        }
        match value {
            Value::Array(items) => Ok(items),
            _ => Ok(Vec::new()),
        }
    }
}

fn read(store: &dyn Store, key: &str) -> Result<Option<Value>, SyncError> {
    match store.get(key) {
        Ok(value) => Ok(value),
        Err(err @ StoreError::Corrupt { .. }) => {
            tracing::warn!(key, error = %err, "ignoring unreadable record");
            Ok(None)
        }
        Err(source) => Err(SyncError::StorageRead {
            key: key.to_string(),
            source,
        }),
    }
}

fn message(ids: &mut HashSet<String>, role: Role, text: &str, timestamp: i64) -> ChatMessage {
    let tag = match role {
        Role::User => "u",
        Role::Assistant => "a",
        Role::System => "s",
    };
    let mut seq = 0_u32;
    let id = loop {
        let candidate = format!("{timestamp}-{tag}{seq}");
        if ids.insert(candidate.clone()) {
            break candidate;
        }
        seq += 1;
    };
    ChatMessage {
        id,
        role,
        text: text.to_string(),
        timestamp,
    }
}

fn to_value(message: &ChatMessage) -> Result<Value, SyncError> {
    serde_json::to_value(message).map_err(SyncError::Serialization)
}
