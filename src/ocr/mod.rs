//! Invoice OCR: a Gemini `generateContent` client and normalization of the
//! line items it returns

pub mod gemini;
pub mod normalize;

pub use gemini::{GeminiClient, ScanResult};
pub use normalize::{normalize_items, LineItem};

/// OCR errors
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Gemini API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("No candidates in model reply")]
    NoCandidates,

    #[error("Model reply is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl OcrError {
    /// Transport and HTTP failures are worth another attempt; a reply the
    /// model got wrong is not
    pub fn is_retryable(&self) -> bool {
        matches!(self, OcrError::Request(_) | OcrError::Api { .. })
    }
}
