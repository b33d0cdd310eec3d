use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::CoreError;
use super::models::RuntimeSettings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl GenerationOptions {
    pub fn with_temperature(temperature: f64) -> Self {
        Self {
            temperature,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 1024,
        }
    }
}

/// Prompt in, text out. Failures are reported, never papered over.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> anyhow::Result<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: RequestGenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestGenerationConfig {
    temperature: f64,
    top_p: f64,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseCandidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let candidate = self.candidates.into_iter().next()?;
        if let Some(reason) = candidate.finish_reason.as_deref() {
            tracing::debug!(finish_reason = reason, "generation finished");
        }
        let text = candidate
            .content?
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");

        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Gemini `generateContent` over HTTPS with a per-request timeout and
/// exponential backoff on transient failures.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    timeout: Duration,
    max_retries: usize,
    retry_delay_seconds: f64,
}

impl GeminiClient {
    pub fn from_settings(settings: &RuntimeSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            api_key: settings
                .gemini_api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            base_url: settings.gemini_base_url.trim_end_matches('/').to_string(),
            model: settings.gemini_model.clone(),
            timeout: Duration::from_secs(settings.generation_timeout_seconds),
            max_retries: settings.max_retries,
            retry_delay_seconds: settings.retry_delay_seconds,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self, api_key: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model
        ))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }

    async fn generate_once(
        &self,
        api_key: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> anyhow::Result<String> {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: RequestGenerationConfig {
                temperature: options.temperature,
                top_p: options.top_p,
                top_k: options.top_k,
                max_output_tokens: options.max_output_tokens,
            },
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        };

        let request = async {
            let response = self
                .client
                .post(self.endpoint(api_key)?)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow::Error::from(CoreError::GenerationApi {
                    status: status.as_u16(),
                    body: truncate_for_log(&body),
                }));
            }

            let parsed = response.json::<GenerateResponse>().await?;
            let text = parsed.into_text().ok_or(CoreError::EmptyGeneration)?;
            Ok::<String, anyhow::Error>(text)
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::GenerationTimeout(self.timeout.as_secs()).into()),
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> anyhow::Result<String> {
        let api_key = self.api_key.as_deref().ok_or(CoreError::MissingApiKey)?;

        with_retry(self.max_retries, self.retry_delay_seconds, |_| {
            self.generate_once(api_key, prompt, options)
        })
        .await
    }
}

/// Runs `operation` up to `max_attempts` times, sleeping
/// `retry_delay_seconds * 2^attempt` between retryable failures.
pub async fn with_retry<T, F, Fut>(
    max_attempts: usize,
    retry_delay_seconds: f64,
    mut operation: F,
) -> anyhow::Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let is_last_attempt = attempt + 1 >= max_attempts;
                if !is_retryable_error(&err) || is_last_attempt {
                    return Err(err);
                }

                let backoff_seconds = retry_delay_seconds * 2_f64.powf(attempt as f64);
                tracing::warn!(
                    attempt = attempt + 1,
                    backoff_seconds,
                    "generation request failed, retrying: {err:#}"
                );
                tokio::time::sleep(Duration::from_secs_f64(backoff_seconds.max(0.1))).await;
                attempt += 1;
            }
        }
    }
}

pub fn is_retryable_error(error: &anyhow::Error) -> bool {
    if let Some(core_error) = error.downcast_ref::<CoreError>() {
        return core_error.is_retryable();
    }

    if let Some(reqwest_error) = error.downcast_ref::<reqwest::Error>() {
        if reqwest_error.is_timeout() || reqwest_error.is_connect() {
            return true;
        }

        if let Some(status) = reqwest_error.status() {
            let code = status.as_u16();
            return code == 429 || code >= 500;
        }
    }

    false
}

fn truncate_for_log(body: &str) -> String {
    const LIMIT: usize = 500;
    if body.chars().count() <= LIMIT {
        body.to_string()
    } else {
        format!("{}...", body.chars().take(LIMIT).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn extracts_joined_text_from_first_candidate() {
        let json = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "• One\n"}, {"text": "• Two  "}]}, "finishReason": "STOP"},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("• One\n• Two"));
    }

    #[test]
    fn blocked_or_blank_responses_have_no_text() {
        let blocked: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        assert_eq!(blocked.into_text(), None);

        let blank: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "  \n"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(blank.into_text(), None);
    }

    #[test]
    fn request_body_uses_api_field_names() {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: "hi" }],
            }],
            generation_config: RequestGenerationConfig {
                temperature: 0.2,
                top_p: 0.8,
                top_k: 40,
                max_output_tokens: 1024,
            },
            safety_settings: Vec::new(),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 1024);
        assert_eq!(value["generationConfig"]["topK"], 40);
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn endpoint_carries_model_and_encoded_key() {
        let settings = RuntimeSettings {
            gemini_api_key: Some("a b".to_string()),
            ..RuntimeSettings::default()
        };
        let client = GeminiClient::from_settings(&settings).unwrap();
        let url = client.endpoint("a b").unwrap();
        assert!(url
            .as_str()
            .ends_with("/models/gemini-2.5-flash-lite:generateContent?key=a+b"));
    }

    #[tokio::test]
    async fn missing_key_fails_without_a_request() {
        let client = GeminiClient::from_settings(&RuntimeSettings::default()).unwrap();
        assert!(!client.has_api_key());

        let err = client
            .generate("prompt", &GenerationOptions::with_temperature(0.3))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::MissingApiKey)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(3, 1.0, |_| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(CoreError::GenerationApi {
                        status: 503,
                        body: String::new(),
                    }
                    .into())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: anyhow::Result<()> = with_retry(5, 1.0, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::EmptyGeneration.into()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_last_attempt() {
        let calls = AtomicUsize::new(0);
        let result: anyhow::Result<()> = with_retry(2, 0.5, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::GenerationTimeout(60).into()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
