//! Configuração do picsieve carregada a partir de `picsieve.toml`.
//!
//! A struct [`SieveConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! `PICSIEVE_API_KEY` tem precedência sobre o arquivo; na ausência dela,
//! usa-se `ANTHROPIC_API_KEY` ou `OPENAI_API_KEY` conforme o provedor.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::SieveError;
use crate::pipeline::{PipelineSettings, RetryPolicy};
use crate::screen::DEFAULT_INDICATORS;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "picsieve.toml";

/// Limites aceitos para a concorrência máxima.
const CONCURRENCY_RANGE: std::ops::RangeInclusive<usize> = 1..=50;

/// Configuração de nível superior carregada de `picsieve.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SieveConfig {
    /// Número máximo de classificações simultâneas (teto do pool).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// Teto do atraso entre retentativas, em milissegundos.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Timeout de cada chamada ao classificador, em segundos.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Pasta (relativa à raiz da varredura) que recebe imagens rejeitadas.
    #[serde(default = "default_quarantine_folder")]
    pub quarantine_folder: String,

    /// Marcador acrescentado ao nome de arquivos aprovados.
    #[serde(default = "default_approval_marker")]
    pub approval_marker: String,

    /// Número de tentativas após o qual um item é reportado como travado.
    #[serde(default = "default_stall_warning_after")]
    pub stall_warning_after: u32,

    /// Tamanho máximo (base64) aceito para envio; acima disso a imagem é rejeitada.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Orçamento (base64) que o normalizador tenta respeitar.
    #[serde(default = "default_payload_budget_bytes")]
    pub payload_budget_bytes: usize,

    /// Intervalo entre atualizações de progresso, em milissegundos.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Rejeita imagens cujo nome contém indicadores de conteúdo adulto.
    #[serde(default = "default_screen_filenames")]
    pub screen_filenames: bool,

    /// Indicadores usados pela triagem de nomes de arquivo.
    #[serde(default = "default_filename_indicators")]
    pub filename_indicators: Vec<String>,

    /// Backend de classificação.
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// Provedores de classificação suportados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// API Messages da Anthropic, chamada diretamente.
    Anthropic,
    /// Qualquer endpoint compatível com `chat/completions` (Zhipu, OpenAI, proxies).
    #[serde(alias = "openai-compatible", alias = "zhipu")]
    OpenAi,
}

/// Parâmetros do backend de classificação.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,

    /// Chave da API do provedor.
    #[serde(default)]
    pub api_key: String,

    /// Modelo de visão a usar.
    #[serde(default = "default_model")]
    pub model: String,

    /// URL completa do endpoint, para proxies ou serviços compatíveis.
    #[serde(default)]
    pub base_url: Option<String>,
}

// Valor padrão para a concorrência: 20.
fn default_max_concurrency() -> usize {
    20
}

// Valor padrão para o atraso base: 1000ms.
fn default_base_retry_delay_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_quarantine_folder() -> String {
    "quarantine".to_string()
}

fn default_approval_marker() -> String {
    "_approved".to_string()
}

fn default_stall_warning_after() -> u32 {
    10
}

fn default_max_payload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_payload_budget_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_progress_interval_ms() -> u64 {
    2000
}

fn default_screen_filenames() -> bool {
    true
}

fn default_filename_indicators() -> Vec<String> {
    DEFAULT_INDICATORS.iter().map(|s| s.to_string()).collect()
}

fn default_provider() -> Provider {
    Provider::Anthropic
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: String::new(),
            model: default_model(),
            base_url: None,
        }
    }
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            quarantine_folder: default_quarantine_folder(),
            approval_marker: default_approval_marker(),
            stall_warning_after: default_stall_warning_after(),
            max_payload_bytes: default_max_payload_bytes(),
            payload_budget_bytes: default_payload_budget_bytes(),
            progress_interval_ms: default_progress_interval_ms(),
            screen_filenames: default_screen_filenames(),
            filename_indicators: default_filename_indicators(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl SieveConfig {
    /// Carrega a configuração do caminho dado ou de `picsieve.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self, SieveError> {
        let path = path.unwrap_or(Path::new(CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<SieveConfig>(&contents)?
        } else {
            Self::default()
        };

        config.apply_env_key(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo para a chave da API.
    fn apply_env_key(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let provider_var = match self.classifier.provider {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        };
        if let Some(key) = lookup("PICSIEVE_API_KEY").filter(|k| !k.is_empty()) {
            self.classifier.api_key = key;
        } else if self.classifier.api_key.is_empty()
            && let Some(key) = lookup(provider_var).filter(|k| !k.is_empty())
        {
            self.classifier.api_key = key;
        }
    }

    /// Troca o provedor e reaplica a chave do ambiente correspondente.
    pub fn set_provider(&mut self, provider: Provider) {
        self.classifier.provider = provider;
        self.apply_env_key(|name| std::env::var(name).ok());
    }

    /// Valida os limites antes de iniciar uma execução.
    pub fn validate(&self) -> Result<(), SieveError> {
        if !CONCURRENCY_RANGE.contains(&self.max_concurrency) {
            return Err(SieveError::Config(format!(
                "max_concurrency must be between {} and {}, got {}",
                CONCURRENCY_RANGE.start(),
                CONCURRENCY_RANGE.end(),
                self.max_concurrency
            )));
        }
        if self.quarantine_folder.trim().is_empty() {
            return Err(SieveError::Config("quarantine_folder must not be empty".into()));
        }
        if self.approval_marker.trim().is_empty() {
            return Err(SieveError::Config("approval_marker must not be empty".into()));
        }
        if self.payload_budget_bytes > self.max_payload_bytes {
            return Err(SieveError::Config(
                "payload_budget_bytes must not exceed max_payload_bytes".into(),
            ));
        }
        Ok(())
    }

    /// Exige uma chave de API; usado apenas por comandos que chamam o classificador.
    pub fn require_api_key(&self) -> Result<(), SieveError> {
        if self.classifier.api_key.is_empty() {
            return Err(SieveError::Config(
                "no API key configured; set PICSIEVE_API_KEY or classifier.api_key".into(),
            ));
        }
        Ok(())
    }

    /// Parâmetros do pipeline derivados desta configuração.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_concurrency: self.max_concurrency,
            call_timeout: Duration::from_secs(self.timeout_secs),
            max_payload_bytes: self.max_payload_bytes,
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(self.base_retry_delay_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                stall_warning_after: self.stall_warning_after,
                ..RetryPolicy::default()
            },
        }
    }
}
