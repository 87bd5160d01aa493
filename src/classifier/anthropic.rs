use std::time::Duration;

use reqwest::Client;

use super::error::{ClassifyError, mentions_safety_block};
use super::types::{ImageSource, Message, MessagesRequest, MessagesResponse, RequestBlock};
use super::{Classifier, RUBRIC, retry_after_ms};
use crate::normalize::NormalizedPayload;

const API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Cliente direto da API Messages da Anthropic.
pub struct AnthropicClassifier {
    api_key: String,
    model: String,
    client: Client,
    base_url: String,
}

impl AnthropicClassifier {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
    ) -> Result<Self, ClassifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key,
            model,
            client,
            base_url: base_url.unwrap_or_else(|| API_URL.to_string()),
        })
    }

    fn request(&self, payload: &NormalizedPayload) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: 1024,
            messages: vec![Message {
                role: "user".into(),
                content: vec![
                    RequestBlock::Image {
                        source: ImageSource {
                            source_type: "base64".into(),
                            media_type: payload.media_type().into(),
                            data: payload.encoded().to_string(),
                        },
                    },
                    RequestBlock::Text {
                        text: RUBRIC.to_string(),
                    },
                ],
            }],
        }
    }
}

impl Classifier for AnthropicClassifier {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn classify(
        &self,
        payload: &NormalizedPayload,
        timeout: Duration,
    ) -> Result<String, ClassifyError> {
        let response = self
            .client
            .post(&self.base_url)
            .timeout(timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&self.request(payload))
            .send()
            .await
            .map_err(ClassifyError::from_transport)?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassifyError::RateLimited {
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            if mentions_safety_block(&message) {
                return Err(ClassifyError::SafetyBlocked(message));
            }
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<MessagesResponse>()
            .await
            .map_err(ClassifyError::from_transport)?;

        if body.stop_reason.as_deref() == Some("refusal") {
            return Err(ClassifyError::SafetyBlocked(format!(
                "model refused to review the image ({})",
                body.id
            )));
        }

        Ok(body.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> NormalizedPayload {
        NormalizedPayload::from_bytes(b"fake image", "image/png")
    }

    async fn classifier(server: &MockServer) -> AnthropicClassifier {
        AnthropicClassifier::new(
            "sk-test".into(),
            "claude-test".into(),
            Some(format!("{}/v1/messages", server.uri())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn returns_text_of_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "content": [{"type": "text", "text": "{\"suitable_for_teens\": true}"}],
                "stop_reason": "end_turn"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = classifier(&server)
            .await
            .classify(&payload(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(text, "{\"suitable_for_teens\": true}");
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let err = classifier(&server)
            .await
            .classify(&payload(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::RateLimited {
                retry_after_ms: Some(3000)
            }
        ));
    }

    #[tokio::test]
    async fn maps_refusal_to_safety_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_2",
                "content": [],
                "stop_reason": "refusal"
            })))
            .mount(&server)
            .await;

        let err = classifier(&server)
            .await
            .classify(&payload(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_terminal());
        assert!(matches!(err, ClassifyError::SafetyBlocked(_)));
    }

    #[tokio::test]
    async fn maps_server_error_to_retryable_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = classifier(&server)
            .await
            .classify(&payload(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(!err.is_terminal());
        assert!(matches!(err, ClassifyError::Api { status: 529, .. }));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({"id": "x", "content": [], "stop_reason": null})),
            )
            .mount(&server)
            .await;

        let err = classifier(&server)
            .await
            .classify(&payload(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Timeout));
    }
}
