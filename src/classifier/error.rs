//! Taxonomia de erros comum a todos os backends de classificação.
//!
//! Define [`ClassifyError`] com variantes terminais (bloqueio de segurança,
//! payload grande demais) e retentáveis (rate limit, rede, timeout, erro de
//! API, falha de parse). O motor de retentativa decide o caminho apenas por
//! [`ClassifyError::is_terminal`], nunca pelo tipo concreto do backend.

use thiserror::Error;

/// Erros que podem ocorrer ao classificar uma imagem remotamente.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// A camada de segurança do próprio serviço bloqueou o conteúdo.
    #[error("content blocked by remote safety layer: {0}")]
    SafetyBlocked(String),

    /// O payload normalizado excede o limite aceito.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    OversizedPayload { size: usize, limit: usize },

    /// O servidor retornou HTTP 429 (rate limit).
    /// `retry_after_ms` vem do cabeçalho `retry-after`, quando presente.
    #[error("rate limited{}", retry_hint(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    /// Falha de rede subjacente (DNS, conexão recusada, reset).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A chamada não terminou dentro do timeout configurado.
    #[error("request timed out")]
    Timeout,

    /// Erro retornado pela API (ex.: 500 erro interno, 529 sobrecarregado).
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// A resposta não contém nenhuma estrutura de veredito reconhecível.
    #[error("unparsable classifier response: {0}")]
    ParseFailure(String),
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(", retry after {ms}ms"),
        None => String::new(),
    }
}

impl ClassifyError {
    /// Erros terminais encerram a classificação com um veredito sintetizado.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClassifyError::SafetyBlocked(_) | ClassifyError::OversizedPayload { .. }
        )
    }

    /// Mapeia erros do `reqwest`, separando timeouts do resto da rede.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClassifyError::Timeout
        } else {
            ClassifyError::Network(err)
        }
    }
}

/// Marcadores que os serviços usam para sinalizar bloqueio por filtro de conteúdo.
const SAFETY_MARKERS: &[&str] = &[
    "contentfilter",
    "content_filter",
    "content filter",
    "不安全或敏感内容",
];

/// Código de erro da Zhipu para conteúdo sensível.
const SAFETY_ERROR_CODE: &str = "1301";

/// Verifica se um corpo de erro indica bloqueio pela camada de segurança remota.
///
/// O código `1301` só é aceito no campo `code` do JSON de erro, nunca como
/// substring solta do corpo.
pub fn mentions_safety_block(body: &str) -> bool {
    if error_code(body).as_deref() == Some(SAFETY_ERROR_CODE) {
        return true;
    }
    let lower = body.to_lowercase();
    SAFETY_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Lê `error.code` (ou `code` na raiz) de um corpo JSON, como texto.
fn error_code(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let code = value
        .pointer("/error/code")
        .or_else(|| value.get("code"))?;
    match code {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = ClassifyError::RateLimited {
            retry_after_ms: Some(5000),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 5000ms");

        let err = ClassifyError::RateLimited {
            retry_after_ms: None,
        };
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn api_error_display() {
        let err = ClassifyError::Api {
            status: 500,
            message: "Internal Server Error".into(),
        };
        assert_eq!(
            err.to_string(),
            "API error (status 500): Internal Server Error"
        );
    }

    #[test]
    fn terminal_classification() {
        assert!(ClassifyError::SafetyBlocked("x".into()).is_terminal());
        assert!(
            ClassifyError::OversizedPayload {
                size: 11,
                limit: 10
            }
            .is_terminal()
        );
        assert!(!ClassifyError::Timeout.is_terminal());
        assert!(!ClassifyError::ParseFailure("x".into()).is_terminal());
        assert!(
            !ClassifyError::RateLimited {
                retry_after_ms: None
            }
            .is_terminal()
        );
    }

    #[test]
    fn safety_markers_detected() {
        assert!(mentions_safety_block(
            r#"{"error":{"code":"1301","message":"..."}}"#
        ));
        assert!(mentions_safety_block("blocked by contentFilter"));
        assert!(mentions_safety_block("系统检测到输入或生成内容可能包含不安全或敏感内容"));
        assert!(!mentions_safety_block("internal server error"));
    }

    #[test]
    fn safety_code_must_be_the_error_code() {
        assert!(mentions_safety_block(r#"{"error":{"code":1301,"message":"x"}}"#));
        assert!(mentions_safety_block(r#"{"code":"1301","msg":"x"}"#));
        assert!(!mentions_safety_block(
            r#"{"error":{"code":"500","message":"upstream failed","request_id":"req-13014"}}"#
        ));
        assert!(!mentions_safety_block("bad gateway after 1301 bytes"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClassifyError>();
    }
}
