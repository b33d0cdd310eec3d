use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Generation API request failed with status {status}: {body}")]
    GenerationApi { status: u16, body: String },
    #[error("Generation API returned no text")]
    EmptyGeneration,
    #[error("Generation request timed out after {0} seconds")]
    GenerationTimeout(u64),
    #[error("Generation API key is not configured. Set GEMINI_API_KEY first.")]
    MissingApiKey,
    #[error("OCR engine is not available: {0}")]
    OcrUnavailable(String),
    #[error("No PDF documents found in {0}")]
    NoDocuments(String),
    #[error("No records were produced from the input documents")]
    NoRecords,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::GenerationApi { status, .. } => *status == 429 || *status >= 500,
            CoreError::GenerationTimeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_retryable() {
        let rate_limited = CoreError::GenerationApi {
            status: 429,
            body: String::new(),
        };
        let unavailable = CoreError::GenerationApi {
            status: 503,
            body: String::new(),
        };
        let bad_request = CoreError::GenerationApi {
            status: 400,
            body: "invalid argument".to_string(),
        };

        assert!(rate_limited.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!bad_request.is_retryable());
        assert!(CoreError::GenerationTimeout(60).is_retryable());
        assert!(!CoreError::EmptyGeneration.is_retryable());
        assert!(!CoreError::MissingApiKey.is_retryable());
    }
}
