use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Adequação de uma imagem, em três estados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suitability {
    Yes,
    No,
    /// Inconclusivo; o item fica onde está.
    Unknown,
}

impl fmt::Display for Suitability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suitability::Yes => write!(f, "suitable"),
            Suitability::No => write!(f, "unsuitable"),
            Suitability::Unknown => write!(f, "unknown"),
        }
    }
}

/// Resultado estruturado da classificação de uma imagem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub suitable: Suitability,
    pub reason: String,
    /// Sempre dentro de `[0, 1]`.
    pub confidence: f64,
}

/// Chave JSON com o veredito nas respostas do classificador.
const VERDICT_KEY: &str = "suitable_for_teens";

/// Confiança atribuída a vereditos obtidos por palavras-chave.
const KEYWORD_CONFIDENCE: f64 = 0.8;

impl Verdict {
    /// Rejeição com confiança total, usada quando a falha deve fechar.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            suitable: Suitability::No,
            reason: reason.into(),
            confidence: 1.0,
        }
    }

    /// Extrai um veredito da resposta livre do classificador.
    ///
    /// Tenta primeiro cada objeto JSON embutido e depois a pontuação por
    /// palavras-chave. Retorna `None` quando nenhum decide; o chamador deve
    /// tratar isso como falha a repetir, nunca como aprovação.
    pub fn parse(raw: &str) -> Option<Self> {
        from_embedded_json(raw).or_else(|| from_keywords(raw))
    }
}

fn from_embedded_json(raw: &str) -> Option<Verdict> {
    for (start, _) in raw.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next()
            && let Some(flag) = map.get(VERDICT_KEY)
        {
            return verdict_from_fields(flag, map.get("reason"), map.get("confidence"));
        }
    }
    None
}

fn verdict_from_fields(
    flag: &Value,
    reason: Option<&Value>,
    confidence: Option<&Value>,
) -> Option<Verdict> {
    let suitable = match flag {
        Value::Bool(true) => Suitability::Yes,
        Value::Bool(false) => Suitability::No,
        Value::Null => Suitability::Unknown,
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Suitability::Yes,
            "false" | "no" => Suitability::No,
            "unknown" | "null" => Suitability::Unknown,
            _ => return None,
        },
        _ => return None,
    };

    let reason = reason
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("no reason given")
        .to_string();

    let confidence = if suitable == Suitability::Unknown {
        0.0
    } else {
        confidence
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0)
    };

    Some(Verdict {
        suitable,
        reason,
        confidence,
    })
}

/// Pontuação ponderada por palavras-chave sobre o texto bruto.
///
/// Palavras positivas só contam quando aparecem como palavra inteira e sem
/// negação logo antes ("not safe", "不适合"); a ocorrência negada conta como
/// evidência negativa. Marcadores de dúvida ("not sure", "cannot") anulam a
/// pontuação e devolvem `None`.
fn from_keywords(raw: &str) -> Option<Verdict> {
    let lower = raw.to_lowercase();

    if UNCERTAINTY_MARKERS.iter().any(|m| lower.contains(m)) {
        return None;
    }

    let mut negative_score: u32 = NEGATIVE_KEYWORDS
        .iter()
        .filter(|(keyword, _)| lower.contains(keyword))
        .map(|(_, weight)| weight)
        .sum();
    let mut positive_score: u32 = 0;

    for (keyword, weight) in POSITIVE_KEYWORDS {
        for (idx, _) in lower.match_indices(keyword) {
            if !is_whole_word(&lower, idx, keyword.len()) {
                continue;
            }
            if is_negated(&lower[..idx]) {
                negative_score += NEGATED_POSITIVE_WEIGHT;
            } else {
                positive_score += *weight;
            }
        }
    }

    let (suitable, reason) = if negative_score > positive_score {
        (Suitability::No, "classifier judged the image unsuitable")
    } else if positive_score > negative_score {
        (Suitability::Yes, "classifier judged the image suitable")
    } else {
        return None;
    };

    Some(Verdict {
        suitable,
        reason: reason.to_string(),
        confidence: KEYWORD_CONFIDENCE,
    })
}

const NEGATIVE_KEYWORDS: &[(&str, u32)] = &[
    ("unsuitable", 10),
    ("inappropriate", 10),
    ("not appropriate", 10),
    ("not suitable", 10),
    ("not safe", 10),
    ("unsafe", 8),
    ("nsfw", 8),
    ("false", 5),
    ("不适合", 10),
    ("不安全", 10),
    ("不建议", 8),
];

const POSITIVE_KEYWORDS: &[(&str, u32)] = &[
    ("suitable", 5),
    ("appropriate", 5),
    ("safe", 3),
    ("true", 5),
    ("适合", 5),
    ("安全", 3),
];

/// Peso de uma palavra positiva precedida de negação.
const NEGATED_POSITIVE_WEIGHT: u32 = 10;

/// Frases que indicam que o classificador não decidiu.
const UNCERTAINTY_MARKERS: &[&str] = &[
    "not sure",
    "unsure",
    "cannot",
    "can't",
    "can not",
    "unable to",
    "uncertain",
    "无法",
    "不确定",
];

/// Palavras que negam o termo positivo seguinte.
const NEGATORS: &[&str] = &[
    "not", "no", "never", "isn't", "isnt", "aren't", "wasn't", "nor", "neither", "hardly",
    "barely",
];

/// Quantas palavras antes do termo positivo são inspecionadas.
const NEGATION_WINDOW: usize = 3;

fn is_whole_word(text: &str, idx: usize, len: usize) -> bool {
    let before = text[..idx].chars().next_back();
    let after = text[idx + len..].chars().next();
    // Termos CJK não têm separador de palavras.
    let cjk = text[idx..].chars().next().is_some_and(|c| !c.is_ascii());
    cjk || (!before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric))
}

fn is_negated(prefix: &str) -> bool {
    if prefix.ends_with('不') || prefix.ends_with('非') {
        return true;
    }
    prefix
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .rev()
        .take(NEGATION_WINDOW)
        .any(|w| NEGATORS.contains(&w))
}
