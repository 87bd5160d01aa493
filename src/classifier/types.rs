//! Tipos de dados para requisições e respostas dos backends de visão.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! conforme o formato esperado pelos endpoints `v1/messages` da Anthropic e
//! `chat/completions` dos serviços compatíveis com OpenAI.

use serde::{Deserialize, Serialize};

// ─── Anthropic Messages ─────────────────────────────────────────────────────

/// Corpo da requisição para o endpoint `/v1/messages` da API Anthropic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// Identificador do modelo a ser usado.
    pub model: String,
    /// Número máximo de tokens na resposta gerada pelo modelo.
    pub max_tokens: u32,
    /// Lista de mensagens compondo a conversa.
    pub messages: Vec<Message>,
}

/// Uma única mensagem com blocos de conteúdo (imagem e texto).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Papel do remetente: "user" ou "assistant".
    pub role: String,
    /// Blocos de conteúdo da mensagem.
    pub content: Vec<RequestBlock>,
}

/// Bloco de conteúdo enviado na requisição.
///
/// O discriminante é serializado como `"type"` no JSON via `serde(tag)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBlock {
    Image { source: ImageSource },
    Text { text: String },
}

/// Imagem embutida em base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    /// Sempre "base64".
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

/// Resposta retornada pelo endpoint `/v1/messages` da API Anthropic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Identificador único da resposta (gerado pela API).
    pub id: String,
    /// Blocos de conteúdo na resposta (normalmente texto).
    pub content: Vec<ContentBlock>,
    /// Motivo da parada da geração (ex.: "end_turn", "refusal").
    pub stop_reason: Option<String>,
}

/// Um bloco de conteúdo dentro da resposta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Tipo do bloco ("text"). Serializado como "type" no JSON.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Conteúdo textual deste bloco; ausente em blocos que não são texto.
    #[serde(default)]
    pub text: Option<String>,
}

impl MessagesResponse {
    /// Concatena todos os blocos de texto da resposta.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ─── Chat completions compatível com OpenAI ─────────────────────────────────

/// Corpo da requisição para `chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Mensagem com partes de conteúdo multimodal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ChatPart>,
}

/// Parte de conteúdo: imagem por URL (data URI) ou texto.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatPart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Resposta de `chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: ChatReply,
    /// Motivo da parada (ex.: "stop", "content_filter", "sensitive").
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub content: Option<String>,
}
