//! OpenAI-compatible HTTP clients.
//!
//! Works against local servers that mirror the OpenAI REST surface
//! (LM Studio, llama.cpp server, faster-whisper-server, Kokoro-FastAPI):
//!
//! - `POST /v1/audio/transcriptions` (multipart WAV upload)
//! - `POST /v1/chat/completions`
//! - `POST /v1/audio/speech` with `response_format = "wav"`

use super::{LanguageModel, SpeechToText, TextToSpeech};
use crate::audio::{Waveform, wav};
use crate::config::{LlmConfig, SttConfig, TtsConfig};
use crate::error::{Result, SpeechError};
use crate::memory::{ContextMessage, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Request timeout for the audio endpoints.
const AUDIO_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

fn build_client(timeout: Duration) -> std::result::Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

fn authorize(request: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    if api_key.is_empty() {
        request
    } else {
        request.bearer_auth(api_key)
    }
}

/// Extract an error message from an OpenAI-style error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Fail with the server's message when the status is not 2xx.
async fn check_status(
    response: reqwest::Response,
    service: &str,
    to_error: fn(String) -> SpeechError,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(to_error(format!(
        "{service} HTTP {}: {}",
        status.as_u16(),
        extract_error_message(&body)
    )))
}

// ── Speech-to-text ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Whisper-style transcription client.
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    config: SttConfig,
    client: reqwest::Client,
}

impl OpenAiStt {
    /// # Errors
    ///
    /// Returns an STT error if the HTTP client cannot be built.
    pub fn new(config: SttConfig) -> Result<Self> {
        let client = build_client(AUDIO_REQUEST_TIMEOUT)
            .map_err(|e| SpeechError::Stt(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SpeechToText for OpenAiStt {
    async fn transcribe(&self, wav_path: &Path) -> Result<String> {
        let audio = tokio::fs::read(wav_path).await.map_err(|e| {
            SpeechError::Stt(format!("cannot read {}: {e}", wav_path.display()))
        })?;
        let file_name = wav_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "utterance.wav".into());

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| SpeechError::Stt(format!("invalid mime type: {e}")))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("response_format", "json");
        if let Some(ref language) = self.config.language {
            form = form.text("language", language.clone());
        }

        let url = endpoint(&self.config.api_url, "/v1/audio/transcriptions");
        let request = authorize(self.client.post(&url), &self.config.api_key).multipart(form);
        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::Stt(format!("transcription request failed: {e}")))?;
        let response = check_status(response, "transcription", SpeechError::Stt).await?;

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::Stt(format!("invalid transcription response: {e}")))?;
        debug!("transcribed {} chars", parsed.text.len());
        Ok(parsed.text.trim().to_owned())
    }
}

// ── Chat completions ──────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f64,
    top_p: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client with a fixed system prompt.
#[derive(Debug, Clone)]
pub struct OpenAiLlm {
    config: LlmConfig,
    system_prompt: String,
    client: reqwest::Client,
}

impl OpenAiLlm {
    /// # Errors
    ///
    /// Returns an LLM error if the HTTP client cannot be built.
    pub fn new(config: LlmConfig, system_prompt: impl Into<String>) -> Result<Self> {
        let client = build_client(Duration::from_secs(config.timeout_secs.max(1)))
            .map_err(|e| SpeechError::Llm(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            config,
            system_prompt: system_prompt.into(),
            client,
        })
    }

    /// Messages sent for one completion: system prompt, context, then the
    /// prompt unless the context already ends with it.
    fn build_messages<'a>(
        &'a self,
        prompt: &'a str,
        context: &'a [ContextMessage],
    ) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(context.len() + 2);
        if !self.system_prompt.trim().is_empty() {
            messages.push(ChatMessage {
                role: Role::System.as_str(),
                content: &self.system_prompt,
            });
        }
        messages.extend(context.iter().map(|m| ChatMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));
        let already_last = context
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == prompt);
        if !already_last && !prompt.is_empty() {
            messages.push(ChatMessage {
                role: Role::User.as_str(),
                content: prompt,
            });
        }
        messages
    }
}

#[async_trait]
impl LanguageModel for OpenAiLlm {
    async fn complete(&self, prompt: &str, context: &[ContextMessage]) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: self.build_messages(prompt, context),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stream: false,
        };

        let url = endpoint(&self.config.api_url, "/v1/chat/completions");
        let response = authorize(self.client.post(&url), &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::Llm(format!("completion request failed: {e}")))?;
        let response = check_status(response, "completion", SpeechError::Llm).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::Llm(format!("invalid completion response: {e}")))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SpeechError::Llm("completion response has no content".into()))?;
        Ok(text.trim().to_owned())
    }
}

// ── Text-to-speech ────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Speech synthesis client returning decoded WAV audio.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    config: TtsConfig,
    client: reqwest::Client,
}

impl OpenAiTts {
    /// # Errors
    ///
    /// Returns a TTS error if the HTTP client cannot be built.
    pub fn new(config: TtsConfig) -> Result<Self> {
        let client = build_client(AUDIO_REQUEST_TIMEOUT)
            .map_err(|e| SpeechError::Tts(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<Option<Waveform>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let body = SpeechRequest {
            model: &self.config.model,
            input: text,
            voice: &self.config.voice,
            response_format: "wav",
        };

        let url = endpoint(&self.config.api_url, "/v1/audio/speech");
        let response = authorize(self.client.post(&url), &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::Tts(format!("speech request failed: {e}")))?;
        let response = check_status(response, "speech", SpeechError::Tts).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Tts(format!("cannot read speech body: {e}")))?;
        let waveform = wav::decode_waveform(&bytes)
            .map_err(|e| SpeechError::Tts(format!("speech body is not audio: {e}")))?;
        debug!(
            "synthesized {:.2}s at {}Hz",
            waveform.duration().as_secs_f32(),
            waveform.sample_rate()
        );
        Ok((!waveform.is_empty()).then_some(waveform))
    }
}
