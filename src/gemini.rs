use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;

use crate::error::AppError;

const MODEL: &str = "gemini-1.5-flash";

const PROMPT: &str = "Give me a JSON response with a 'title' and 'description' for this image. \
Do not include any extra text or formatting. \
Example: {\"title\": \"Your title here\", \"description\": \"Your description here\"}";

/// Ceiling on a single generation call; the model can be slow on large images.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Seam for the remote captioning service so the pipeline can be exercised
/// without network access.
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Returns the model's raw textual response, unvalidated. The caller is
    /// responsible for normalizing it into a caption record.
    async fn generate(&self, image: &[u8], mime_type: &str) -> Result<String, AppError>;
}

/// Captioner backed by the Gemini `generateContent` REST endpoint. Sampling
/// parameters are fixed at construction and not exposed per request.
pub struct GeminiCaptioner {
    client: reqwest::Client,
    api_key: String,
}

impl GeminiCaptioner {
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(GENERATION_TIMEOUT)
            .build()?;
        Ok(GeminiCaptioner { client, api_key })
    }
}

#[async_trait]
impl Captioner for GeminiCaptioner {
    async fn generate(&self, image: &[u8], mime_type: &str) -> Result<String, AppError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            MODEL, self.api_key
        );

        let payload = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": PROMPT },
                    {
                        "inline_data": {
                            "mime_type": mime_type,
                            "data": general_purpose::STANDARD.encode(image),
                        }
                    }
                ]
            }],
            "generationConfig": {
                "temperature": 1.0,
                "topP": 0.95,
                "topK": 64,
                "maxOutputTokens": 8192,
            }
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Generation(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Generation(e.to_string()))?;

        if !status.is_success() {
            return Err(AppError::Generation(format!("api error {status}: {body}")));
        }

        let result: Value = serde_json::from_str(&body)
            .map_err(|e| AppError::Generation(format!("unparseable response: {e}")))?;

        extract_text(&result)
            .ok_or_else(|| AppError::Generation("response contained no candidate text".to_owned()))
    }
}

/// Pulls the first candidate's text out of a `generateContent` response.
fn extract_text(result: &Value) -> Option<String> {
    result["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_candidate_text() {
        let response = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{ "text": "{\"title\":\"Dog\",\"description\":\"A brown dog\"}" }],
                    "role": "model",
                },
                "finishReason": "STOP",
            }]
        });
        assert_eq!(
            extract_text(&response).unwrap(),
            "{\"title\":\"Dog\",\"description\":\"A brown dog\"}"
        );
    }

    #[test]
    fn missing_candidates_yield_none() {
        let response = serde_json::json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(extract_text(&response).is_none());
    }

    #[test]
    fn non_string_text_yields_none() {
        let response = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": 42 }] } }]
        });
        assert!(extract_text(&response).is_none());
    }
}
