//! HTTP client for the hosted tutor service.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::io::Read;
use std::time::Duration;
use studydeck_core::chat::{Analysis, ChatError, ChatMessage, ConversationService, Reply};
use studydeck_core::config::ChatConfig;

const TIMEOUT: Duration = Duration::from_secs(30);
const MAX_AUDIO_BYTES: u64 = 16 * 1024 * 1024;

pub struct HttpTutor {
    endpoint: String,
    model: String,
    api_key_env: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl HttpTutor {
    pub fn from_config(config: &ChatConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            api_key,
            agent: ureq::AgentBuilder::new().timeout(TIMEOUT).build(),
        }
    }

    fn post(&self, path: &str, body: &Value) -> Result<ureq::Response, ChatError> {
        let Some(key) = &self.api_key else {
            return Err(ChatError::NotConfigured(format!(
                "set {} to your API key",
                self.api_key_env
            )));
        };
        let url = format!("{}/{path}", self.endpoint);
        tracing::debug!(%url, "tutor request");

        self.agent
            .post(&url)
            .set("Authorization", &format!("Bearer {key}"))
            .set("User-Agent", "studydeck-cli")
            .send_json(body)
            .map_err(|err| match err {
                ureq::Error::Status(status, _) => ChatError::Status { status },
                ureq::Error::Transport(transport) => ChatError::Transport(transport.to_string()),
            })
    }

    fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ChatError> {
        self.post(path, body)?
            .into_json::<T>()
            .map_err(|err| ChatError::InvalidResponse(err.to_string()))
    }
}

fn chat_body(model: &str, system_prompt: &str, history: &[ChatMessage], message: &str) -> Value {
    let mut messages: Vec<Value> = history
        .iter()
        .map(|m| json!({"role": m.role, "content": m.text}))
        .collect();
    messages.push(json!({"role": "user", "content": message}));
    json!({
        "model": model,
        "system": system_prompt,
        "messages": messages,
    })
}

impl ConversationService for HttpTutor {
    fn send(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<Reply, ChatError> {
        self.post_json("chat", &chat_body(&self.model, system_prompt, history, message))
    }

    fn analyze(&self, text: &str) -> Result<Analysis, ChatError> {
        self.post_json("analyze", &json!({"model": self.model, "text": text}))
    }

    fn synthesize_speech(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, ChatError> {
        let response = self.post("speech", &json!({"text": text, "voice": voice_id}))?;
        let mut audio = Vec::new();
        response
            .into_reader()
            .take(MAX_AUDIO_BYTES)
            .read_to_end(&mut audio)
            .map_err(|err| ChatError::InvalidResponse(err.to_string()))?;
        Ok(audio)
    }
}
