//! Remoção dos marcadores de aprovação, para revisar uma árvore do zero.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::enumerate::walk_images;
use crate::remediate::{extension_of, move_to_reserved, preview_destination};

/// Marcadores gravados por versões antigas e outras ferramentas de revisão.
pub const KNOWN_APPROVAL_PATTERNS: &[&str] = &[
    "_approved",
    "_checked",
    "_verified",
    "_审查已经通过",
    "_审查已通过",
    "_审查通过",
    "_已审查通过",
    "_已通过审查",
    "_通过审查",
    "_审核通过",
    "_已审核通过",
];

/// Nome usado quando só restavam marcadores no nome do arquivo.
const EMPTY_STEM: &str = "image";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UntagReport {
    pub scanned: u64,
    pub renamed: u64,
    pub unchanged: u64,
    pub errors: u64,
    /// Cada rename feito, ou planejado num dry run.
    pub changes: Vec<Rename>,
}

/// Remove marcadores de aprovação dos nomes de arquivo.
#[derive(Debug, Clone)]
pub struct Untagger {
    /// `None` quando nenhum padrão foi dado.
    markers: Option<Regex>,
    repeated_underscores: Regex,
}

impl Untagger {
    /// Monta a partir de padrões explícitos, casados literalmente e sem diferenciar maiúsculas.
    pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self, regex::Error> {
        let mut patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        // mais longos primeiro, para remover marcadores sobrepostos inteiros
        patterns.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.cmp(b))
        });
        patterns.dedup();

        let markers = if patterns.is_empty() {
            None
        } else {
            let alternation = patterns
                .iter()
                .map(|p| regex::escape(p))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&format!("(?i)(?:{alternation})"))?)
        };

        Ok(Self {
            markers,
            repeated_underscores: Regex::new("_{2,}")?,
        })
    }

    /// O marcador configurado junto com [`KNOWN_APPROVAL_PATTERNS`].
    pub fn with_marker(marker: &str) -> Result<Self, regex::Error> {
        Self::new(std::iter::once(marker).chain(KNOWN_APPROVAL_PATTERNS.iter().copied()))
    }

    /// Nome sem nenhum marcador, ou `None` se não houver marcador.
    pub fn clean_stem(&self, stem: &str) -> Option<String> {
        let markers = self.markers.as_ref()?;
        if !markers.is_match(stem) {
            return None;
        }
        let stripped = markers.replace_all(stem, "");
        let collapsed = self.repeated_underscores.replace_all(&stripped, "_");
        let trimmed = collapsed.trim_matches('_');
        let cleaned = if trimmed.is_empty() {
            EMPTY_STEM
        } else {
            trimmed
        };
        (cleaned != stem).then(|| cleaned.to_string())
    }

    /// Remove os marcadores de toda imagem sob `root`.
    pub fn run(&self, root: &Path, dry_run: bool) -> UntagReport {
        let mut report = UntagReport::default();
        let mut planned = HashSet::new();

        // coletados antes, para não visitar de novo arquivos renomeados
        let images: Vec<PathBuf> = walk_images(root).map(|e| e.into_path()).collect();
        for path in &images {
            report.scanned += 1;
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                report.unchanged += 1;
                continue;
            };
            let Some(clean) = self.clean_stem(&stem) else {
                report.unchanged += 1;
                continue;
            };

            let dir = path.parent().unwrap_or(Path::new("."));
            let ext = extension_of(path);
            if dry_run {
                let to = preview_destination(dir, &clean, &ext, &planned);
                planned.insert(to.clone());
                debug!(from = %path.display(), to = %to.display(), "would rename");
                report.renamed += 1;
                report.changes.push(Rename {
                    from: path.to_path_buf(),
                    to,
                });
                continue;
            }

            match move_to_reserved(path, dir, &clean, &ext) {
                Ok(to) => {
                    debug!(from = %path.display(), to = %to.display(), "renamed");
                    report.renamed += 1;
                    report.changes.push(Rename {
                        from: path.to_path_buf(),
                        to,
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not rename");
                    report.errors += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            renamed = report.renamed,
            errors = report.errors,
            dry_run,
            "untag finished"
        );
        report
    }
}
