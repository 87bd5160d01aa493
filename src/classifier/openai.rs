use std::time::Duration;

use reqwest::Client;

use super::error::{ClassifyError, mentions_safety_block};
use super::types::{ChatMessage, ChatPart, ChatRequest, ChatResponse, ImageUrl};
use super::{Classifier, RUBRIC, retry_after_ms};
use crate::normalize::NormalizedPayload;

/// Endpoint da Zhipu compatível com OpenAI; qualquer outro serviço ou proxy
/// compatível pode ser usado via `base_url`.
const API_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";

/// Finish reasons que indicam que o filtro do próprio provedor cortou a resposta.
const FILTERED_FINISH_REASONS: &[&str] = &["content_filter", "sensitive"];

/// Cliente para endpoints `chat/completions` compatíveis com OpenAI.
pub struct OpenAiClassifier {
    api_key: String,
    model: String,
    client: Client,
    base_url: String,
}

impl OpenAiClassifier {
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

    fn request(&self, payload: &NormalizedPayload) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: vec![
                    ChatPart::ImageUrl {
                        image_url: ImageUrl {
                            url: payload.data_uri(),
                        },
                    },
                    ChatPart::Text {
                        text: RUBRIC.to_string(),
                    },
                ],
            }],
        }
    }
}

impl Classifier for OpenAiClassifier {
    fn name(&self) -> &str {
        "openai-compatible"
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
            .bearer_auth(&self.api_key)
            .json(&self.request(payload))
            .send()
            .await
            .map_err(ClassifyError::from_transport)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(ClassifyError::from_transport)?;

        // Alguns provedores relatam bloqueio de conteúdo com 400 ou até 429.
        if !status.is_success() && mentions_safety_block(&body) {
            return Err(ClassifyError::SafetyBlocked(body));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassifyError::RateLimited {
                retry_after_ms: retry_after_ms(&headers),
            });
        }

        if !status.is_success() {
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ClassifyError::ParseFailure(format!("invalid response body: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClassifyError::ParseFailure("response has no choices".into()))?;

        if let Some(reason) = choice.finish_reason.as_deref()
            && FILTERED_FINISH_REASONS.contains(&reason)
        {
            return Err(ClassifyError::SafetyBlocked(format!(
                "generation stopped with finish_reason={reason}"
            )));
        }

        Ok(choice.message.content.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> NormalizedPayload {
        NormalizedPayload::from_bytes(b"fake image", "image/jpeg")
    }

    fn classifier(server: &MockServer) -> OpenAiClassifier {
        OpenAiClassifier::new(
            "key".into(),
            "glm-4v".into(),
            Some(format!("{}/chat/completions", server.uri())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "looks fine: {\"suitable_for_teens\": true}"},
                    "finish_reason": "stop"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = classifier(&server)
            .classify(&payload(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(text.contains("suitable_for_teens"));
    }

    #[tokio::test]
    async fn content_filter_error_code_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "1301", "message": "系统检测到输入或生成内容可能包含不安全或敏感内容"}
            })))
            .mount(&server)
            .await;

        let err = classifier(&server)
            .classify(&payload(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::SafetyBlocked(_)));
    }

    #[tokio::test]
    async fn sensitive_finish_reason_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": null}, "finish_reason": "sensitive"}]
            })))
            .mount(&server)
            .await;

        let err = classifier(&server)
            .classify(&payload(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn plain_429_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": "1302", "message": "rate limit reached"}
            })))
            .mount(&server)
            .await;

        let err = classifier(&server)
            .classify(&payload(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::RateLimited {
                retry_after_ms: None
            }
        ));
    }

    #[tokio::test]
    async fn garbage_body_is_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
            .mount(&server)
            .await;

        let err = classifier(&server)
            .classify(&payload(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::ParseFailure(_)));
    }
}
