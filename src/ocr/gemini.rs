//! Gemini `generateContent` client for invoice extraction

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::normalize::{normalize_items, split_reply, LineItem};
use super::OcrError;
use crate::config::Config;

const EXTRACTION_PROMPT: &str = "\
You are reading a purchase invoice. Return JSON only, no prose.
Return an object with two keys:
  \"invoice_number\": the invoice number as printed, or null if none is visible
  \"items\": an array with one entry per invoice line, each having
    \"item_name\" (short product name),
    \"description\" (full line text),
    \"quantity\" (integer),
    \"unit_price\" (number, no currency symbol),
    \"total_price\" (number, no currency symbol),
    \"serial_number\" (string, empty when not printed).
Skip subtotal, tax, shipping and discount lines.";

/// What a scan produced; an unreadable invoice yields no items
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub invoice_number: Option<String>,
    pub items: Vec<LineItem>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Invoice extraction client
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    max_attempts: u32,
    retry_base: Duration,
}

impl GeminiClient {
    /// `None` when no API key is configured
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.gemini_api_key.clone()?;
        Some(Self {
            client: Client::new(),
            api_key,
            api_url: config.gemini_api_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
            max_attempts: config.ocr_max_retries.max(1),
            retry_base: config.ocr_retry_base,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent?key={}",
            self.api_url, self.model, self.api_key
        )
    }

    /// Delay before retrying after failed attempt number `attempt` (0-based)
    fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_base.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Extract line items from an invoice image or PDF.
    ///
    /// Transport and HTTP errors are retried with exponential backoff. Once
    /// attempts run out, or the reply cannot be read, the result is empty.
    pub async fn scan(&self, bytes: &[u8], mime_type: &str) -> ScanResult {
        let body = request_body(bytes, mime_type);

        for attempt in 0..self.max_attempts {
            match self.request_once(&body).await {
                Ok(result) => {
                    info!(
                        items = result.items.len(),
                        invoice_number = ?result.invoice_number,
                        "Invoice scanned"
                    );
                    return result;
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt = attempt + 1, ?delay, "OCR request failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, "OCR gave up: {}", e);
                    return ScanResult::default();
                }
            }
        }
        ScanResult::default()
    }

    async fn request_once(&self, body: &Value) -> Result<ScanResult, OcrError> {
        let response = self.client.post(self.endpoint()).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: GenerateResponse = response.json().await?;
        let text = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or(OcrError::NoCandidates)?;

        let value: Value = serde_json::from_str(strip_code_fence(&text))?;
        let (invoice_number, raw_items) = split_reply(value);
        Ok(ScanResult {
            invoice_number,
            items: normalize_items(&raw_items),
        })
    }
}

fn request_body(bytes: &[u8], mime_type: &str) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": EXTRACTION_PROMPT },
                { "inlineData": { "mimeType": mime_type, "data": STANDARD.encode(bytes) } }
            ]
        }],
        "generationConfig": { "responseMimeType": "application/json" }
    })
}

/// Models sometimes wrap JSON in a markdown fence despite the mime type
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
