use std::path::Path;

use crate::verdict::{Suitability, Verdict};

/// Trechos de nome de arquivo que marcam uma imagem como conteúdo adulto sem
/// consultar o classificador.
pub const DEFAULT_INDICATORS: &[&str] = &[
    "r18", "r-18", "nsfw", "gu18", "g18", "adult", "xxx", "sex", "porn", "色图", "涩图", "福利",
    "本子", "hentai", "ecchi", "工口", "ero", "18+", "成人", "限制级", "restricted", "mature",
    "不可描述",
];

/// Confiança de um veredito obtido só pelo nome do arquivo.
const SCREEN_CONFIDENCE: f64 = 0.9;

/// Pré-checagem determinística dos nomes de arquivo.
#[derive(Debug, Clone)]
pub struct FilenameScreen {
    indicators: Vec<String>,
}

impl FilenameScreen {
    pub fn new(indicators: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            indicators: indicators
                .into_iter()
                .map(|i| i.into().to_lowercase())
                .filter(|i| !i.is_empty())
                .collect(),
        }
    }

    /// Triagem que nunca casa.
    pub fn disabled() -> Self {
        Self {
            indicators: Vec::new(),
        }
    }

    /// Rejeita a imagem se o nome do arquivo tiver algum indicador.
    pub fn check(&self, path: &Path) -> Option<Verdict> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        let hit = self.indicators.iter().find(|i| name.contains(i.as_str()))?;
        Some(Verdict {
            suitable: Suitability::No,
            reason: format!("file name carries adult-content indicator '{hit}'"),
            confidence: SCREEN_CONFIDENCE,
        })
    }
}

impl Default for FilenameScreen {
    fn default() -> Self {
        Self::new(DEFAULT_INDICATORS.iter().copied())
    }
}
