pub mod anthropic;
pub mod error;
pub mod openai;
pub mod types;

use std::future::Future;
use std::time::Duration;

pub use anthropic::AnthropicClassifier;
pub use error::ClassifyError;
pub use openai::OpenAiClassifier;

use crate::config::{ClassifierConfig, Provider};
use crate::normalize::NormalizedPayload;

/// Instruções enviadas junto com cada imagem.
pub const RUBRIC: &str = "\
Review this image and decide whether it is suitable for viewers aged 16 and up.

Check carefully for:
1. Sexual suggestion, sexual acts or nudity
2. Overly revealing clothing (bikinis, lingerie and similar)
3. Provocative poses or expressions
4. Sexualised depiction of characters that look underage
5. Anything else unsuitable for teenagers

Respond with JSON only:
{\"suitable_for_teens\": true/false, \"reason\": \"short explanation\", \"confidence\": 0.0-1.0}

If in doubt, judge the image unsuitable.";

/// Serviço remoto que classifica uma imagem por chamada.
///
/// As implementações fazem exatamente uma tentativa e expõem as falhas pela
/// taxonomia comum [`ClassifyError`]; repetir é tarefa de quem chama.
pub trait Classifier: Send + Sync + 'static {
    /// Nome curto do backend, para logs.
    fn name(&self) -> &str;

    /// Envia o payload e devolve o texto bruto da resposta.
    fn classify(
        &self,
        payload: &NormalizedPayload,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, ClassifyError>> + Send;
}

/// Backend escolhido pela configuração na inicialização.
pub enum Backend {
    Anthropic(AnthropicClassifier),
    OpenAi(OpenAiClassifier),
}

impl Backend {
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifyError> {
        let backend = match config.provider {
            Provider::Anthropic => Backend::Anthropic(AnthropicClassifier::new(
                config.api_key.clone(),
                config.model.clone(),
                config.base_url.clone(),
            )?),
            Provider::OpenAi => Backend::OpenAi(OpenAiClassifier::new(
                config.api_key.clone(),
                config.model.clone(),
                config.base_url.clone(),
            )?),
        };
        Ok(backend)
    }
}

impl Classifier for Backend {
    fn name(&self) -> &str {
        match self {
            Backend::Anthropic(c) => c.name(),
            Backend::OpenAi(c) => c.name(),
        }
    }

    async fn classify(
        &self,
        payload: &NormalizedPayload,
        timeout: Duration,
    ) -> Result<String, ClassifyError> {
        match self {
            Backend::Anthropic(c) => c.classify(payload, timeout).await,
            Backend::OpenAi(c) => c.classify(payload, timeout).await,
        }
    }
}

/// Lê um header `retry-after` dado em segundos inteiros.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000)
}
