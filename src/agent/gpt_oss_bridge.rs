// SYNOID Model Bridge
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// One reqwest client speaking the OpenAI-compatible API for every model-backed service:
// chat completions (classification, rewriting), embeddings, vision and transcription.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::agent::services::{EmbeddingService, JudgmentRequest, JudgmentService, Transcriber, VisionService};
use crate::agent::transcription::{transcript_from_verbose_json, Transcript};
use crate::config::PersonalizerConfig;
use crate::error::ServiceError;

const VISION_PROMPT: &str = "Describe this video frame in 1-2 sentences. Focus on: What is the person doing? \
What's the setting? What's the mood/energy? Keep it concise and factual.";

pub struct SynoidAgent {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    chat_model: String,
    vision_model: String,
    vision_max_tokens: u32,
    embedding_model: String,
    transcription_model: String,
}

impl SynoidAgent {
    pub fn new(api_url: &str, api_key: &str, config: &PersonalizerConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::Unavailable(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            chat_model: config.chat_model.clone(),
            vision_model: config.vision_model.clone(),
            vision_max_tokens: config.vision_max_tokens,
            embedding_model: config.embedding_model.clone(),
            transcription_model: config.transcription_model.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, ServiceError> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;
        read_json(resp).await
    }

    async fn chat(&self, model: &str, messages: Value, temperature: f32, max_tokens: Option<u32>) -> Result<String, ServiceError> {
        let mut payload = json!({
            "model": model,
            "messages": messages,
            "temperature": temperature,
        });
        if let Some(max_tokens) = max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        let body = self.post_json("chat/completions", &payload).await?;
        // choices[0].message.content
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ServiceError::InvalidResponse("chat completion had no content".to_string()))
    }
}

/// Map an HTTP response to JSON, turning provider failures into typed service errors.
async fn read_json(resp: reqwest::Response) -> Result<Value, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    if status.as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64);
        return Err(ServiceError::RateLimited { retry_after });
    }

    let message = resp.text().await.unwrap_or_default();
    error!("[BRIDGE] API Error {}: {}", status, message);
    Err(ServiceError::Http {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl JudgmentService for SynoidAgent {
    async fn complete(&self, request: &JudgmentRequest) -> Result<String, ServiceError> {
        debug!("[BRIDGE] Chat request to {} ({} chars)", self.chat_model, request.prompt.len());
        let messages = json!([
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.prompt }
        ]);
        self.chat(&self.chat_model, messages, request.temperature, None).await
    }
}

#[async_trait]
impl EmbeddingService for SynoidAgent {
    fn model_id(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = self
            .post_json(
                "embeddings",
                &json!({ "model": self.embedding_model, "input": texts }),
            )
            .await?;

        let data = body["data"]
            .as_array()
            .ok_or_else(|| ServiceError::InvalidResponse("embeddings response has no data".to_string()))?;

        // Results carry an index; order by it rather than trusting array order.
        let mut rows: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for (pos, item) in data.iter().enumerate() {
            let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(pos);
            let vector = item["embedding"]
                .as_array()
                .ok_or_else(|| ServiceError::InvalidResponse("embedding row without vector".to_string()))?
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(|| ServiceError::InvalidResponse("non-numeric embedding value".to_string()))?;
            rows.push((index, vector));
        }
        rows.sort_by_key(|(i, _)| *i);
        Ok(rows.into_iter().map(|(_, v)| v).collect())
    }
}

#[async_trait]
impl VisionService for SynoidAgent {
    async fn describe_frame(&self, jpeg: &[u8]) -> Result<String, ServiceError> {
        let data_url = format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg));
        let messages = json!([{
            "role": "user",
            "content": [
                { "type": "text", "text": VISION_PROMPT },
                { "type": "image_url", "image_url": { "url": data_url } }
            ]
        }]);
        self.chat(&self.vision_model, messages, 0.2, Some(self.vision_max_tokens)).await
    }
}

#[async_trait]
impl Transcriber for SynoidAgent {
    async fn transcribe(&self, audio: &Path) -> Result<Transcript, ServiceError> {
        info!("[EAR] Transcribing {:?} with {}", audio, self.transcription_model);

        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| ServiceError::Unavailable(format!("cannot read {:?}: {}", audio, e)))?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.transcription_model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word")
            .text("timestamp_granularities[]", "segment");

        let resp = self
            .client
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let body = read_json(resp).await?;
        transcript_from_verbose_json(&body)
    }
}
