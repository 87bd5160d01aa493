//! Ações no sistema de arquivos depois que um item tem veredito.
//!
//! Imagens rejeitadas vão para `quarantine_root/<pasta pai>/<motivo>.<ext>`;
//! as aprovadas ganham o marcador de aprovação no nome; as inconclusivas
//! ficam onde estão. Os nomes de destino são reservados com `create_new`
//! antes do rename, então workers concorrentes nunca sobrescrevem os
//! arquivos uns dos outros.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::enumerate::WorkItem;
use crate::normalize::NormalizedPayload;
use crate::verdict::{Suitability, Verdict};

/// Caracteres proibidos em nomes de arquivo nos sistemas de arquivos comuns.
static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("Invalid file name regex")
});

const MAX_REASON_CHARS: usize = 50;
const FALLBACK_REASON: &str = "unsuitable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    Quarantined,
    Approved,
    LeftInPlace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationResult {
    pub success: bool,
    pub action: RemediationAction,
    pub new_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl RemediationResult {
    fn done(action: RemediationAction, new_path: Option<PathBuf>) -> Self {
        Self {
            success: true,
            action,
            new_path,
            error: None,
        }
    }

    fn failed(action: RemediationAction, err: &io::Error) -> Self {
        Self {
            success: false,
            action,
            new_path: None,
            error: Some(err.to_string()),
        }
    }
}

/// Aplica um veredito ao arquivo a que ele se refere.
#[derive(Debug, Clone)]
pub struct OutcomeResolver {
    quarantine_root: PathBuf,
    approval_marker: String,
}

impl OutcomeResolver {
    pub fn new(quarantine_root: impl Into<PathBuf>, approval_marker: impl Into<String>) -> Self {
        Self {
            quarantine_root: quarantine_root.into(),
            approval_marker: approval_marker.into(),
        }
    }

    /// Executa o veredito e libera o arquivo temporário do payload.
    pub fn resolve(
        &self,
        item: &WorkItem,
        verdict: &Verdict,
        payload: Option<NormalizedPayload>,
    ) -> RemediationResult {
        let result = match verdict.suitable {
            Suitability::No => self.quarantine(item.path(), &verdict.reason),
            Suitability::Yes => self.approve(item.path()),
            Suitability::Unknown => {
                debug!(path = %item, "inconclusive verdict, leaving in place");
                RemediationResult::done(RemediationAction::LeftInPlace, None)
            }
        };

        if let Some(payload) = payload
            && let Err(e) = payload.release()
        {
            debug!(path = %item, error = %e, "could not remove transient image");
        }
        result
    }

    fn quarantine(&self, path: &Path, reason: &str) -> RemediationResult {
        let action = RemediationAction::Quarantined;
        let parent = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "_".to_string());
        let dir = self.quarantine_root.join(parent);
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(path = %path.display(), error = %e, "could not create quarantine folder");
            return RemediationResult::failed(action, &e);
        }

        match move_to_reserved(path, &dir, &sanitize_reason(reason), &extension_of(path)) {
            Ok(dest) => {
                info!(path = %path.display(), dest = %dest.display(), reason, "quarantined");
                RemediationResult::done(action, Some(dest))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "quarantine move failed");
                RemediationResult::failed(action, &e)
            }
        }
    }

    fn approve(&self, path: &Path) -> RemediationResult {
        let action = RemediationAction::Approved;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.contains(&self.approval_marker) {
            return RemediationResult::done(action, Some(path.to_path_buf()));
        }

        let dir = path.parent().unwrap_or(Path::new("."));
        let tagged = format!("{stem}{}", self.approval_marker);
        match move_to_reserved(path, dir, &tagged, &extension_of(path)) {
            Ok(dest) => {
                debug!(path = %path.display(), dest = %dest.display(), "approved");
                RemediationResult::done(action, Some(dest))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "approval rename failed");
                RemediationResult::failed(action, &e)
            }
        }
    }
}

/// Transforma um motivo livre num nome de arquivo seguro de até 50 caracteres.
pub fn sanitize_reason(reason: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(reason.trim(), "_");
    let truncated: String = cleaned.chars().take(MAX_REASON_CHARS).collect();
    let truncated = truncated.trim_end();
    if truncated.is_empty() {
        FALLBACK_REASON.to_string()
    } else {
        truncated.to_string()
    }
}

/// `.ext` de `path`, ou string vazia.
pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Reserva o primeiro nome livre entre `stem.ext`, `stem_1.ext`, `stem_2.ext`, ...
pub(crate) fn reserve_destination(dir: &Path, stem: &str, ext: &str) -> io::Result<PathBuf> {
    let mut n: u32 = 0;
    loop {
        let candidate = candidate_path(dir, stem, ext, n);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Primeiro nome livre que [`reserve_destination`] escolheria, sem criá-lo.
///
/// `planned` lista destinos já prometidos a outros arquivos na mesma
/// simulação.
pub(crate) fn preview_destination(
    dir: &Path,
    stem: &str,
    ext: &str,
    planned: &HashSet<PathBuf>,
) -> PathBuf {
    (0..)
        .map(|n| candidate_path(dir, stem, ext, n))
        .find(|candidate| !candidate.exists() && !planned.contains(candidate))
        .unwrap_or_else(|| dir.join(format!("{stem}{ext}")))
}

fn candidate_path(dir: &Path, stem: &str, ext: &str, n: u32) -> PathBuf {
    if n == 0 {
        dir.join(format!("{stem}{ext}"))
    } else {
        dir.join(format!("{stem}_{n}{ext}"))
    }
}

/// Move `src` para um nome recém-reservado em `dir`.
pub(crate) fn move_to_reserved(src: &Path, dir: &Path, stem: &str, ext: &str) -> io::Result<PathBuf> {
    let dest = reserve_destination(dir, stem, ext)?;
    if let Err(e) = move_file(src, &dest) {
        let _ = fs::remove_file(&dest);
        return Err(e);
    }
    Ok(dest)
}

/// Rename, com cópia + remoção entre sistemas de arquivos diferentes.
fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(src, dest)?;
            fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, OutcomeResolver) {
        let dir = tempfile::tempdir().unwrap();
        let resolver = OutcomeResolver::new(dir.path().join("quarantine"), "_approved");
        (dir, resolver)
    }

    fn write(path: &Path) -> WorkItem {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"img").unwrap();
        WorkItem::new(path)
    }

    fn verdict(suitable: Suitability, reason: &str) -> Verdict {
        Verdict {
            suitable,
            reason: reason.into(),
            confidence: 0.9,
        }
    }

    #[test]
    fn rejected_image_moves_to_quarantine_by_parent() {
        let (dir, resolver) = setup();
        let item = write(&dir.path().join("album/photoA.jpg"));

        let result = resolver.resolve(&item, &verdict(Suitability::No, "explicit content"), None);

        assert!(result.success);
        assert_eq!(result.action, RemediationAction::Quarantined);
        let expected = dir.path().join("quarantine/album/explicit content.jpg");
        assert!(expected.exists());
        assert!(!dir.path().join("album/photoA.jpg").exists());
        assert_eq!(
            fs::canonicalize(result.new_path.unwrap()).unwrap(),
            fs::canonicalize(expected).unwrap()
        );
    }

    #[test]
    fn quarantine_collisions_get_numeric_suffix() {
        let (dir, resolver) = setup();
        let first = write(&dir.path().join("album/one.png"));
        let second = write(&dir.path().join("album/two.png"));
        let v = verdict(Suitability::No, "explicit content");

        resolver.resolve(&first, &v, None);
        let result = resolver.resolve(&second, &v, None);

        assert!(result.success);
        assert!(dir.path().join("quarantine/album/explicit content.png").exists());
        assert!(dir.path().join("quarantine/album/explicit content_1.png").exists());
    }

    #[test]
    fn approved_image_gets_marker() {
        let (dir, resolver) = setup();
        let item = write(&dir.path().join("album/photo.jpg"));

        let result = resolver.resolve(&item, &verdict(Suitability::Yes, "fine"), None);

        assert!(result.success);
        assert!(dir.path().join("album/photo_approved.jpg").exists());
        assert!(!dir.path().join("album/photo.jpg").exists());
    }

    #[test]
    fn already_marked_image_is_untouched() {
        let (dir, resolver) = setup();
        let path = dir.path().join("album/photo_approved.jpg");
        let item = write(&path);

        let result = resolver.resolve(&item, &verdict(Suitability::Yes, "fine"), None);

        assert!(result.success);
        assert!(path.exists());
        assert!(!dir.path().join("album/photo_approved_approved.jpg").exists());
    }

    #[test]
    fn unknown_verdict_leaves_file() {
        let (dir, resolver) = setup();
        let path = dir.path().join("album/photo.jpg");
        let item = write(&path);

        let result = resolver.resolve(&item, &verdict(Suitability::Unknown, "?"), None);

        assert_eq!(result.action, RemediationAction::LeftInPlace);
        assert!(path.exists());
    }

    #[test]
    fn missing_source_is_reported_not_panicked() {
        let (dir, resolver) = setup();
        let item = WorkItem::new(dir.path().join("album/gone.jpg"));

        let result = resolver.resolve(&item, &verdict(Suitability::No, "bad"), None);

        assert!(!result.success);
        assert!(result.error.is_some());
        // a reserva vazia é removida
        assert!(!dir.path().join("quarantine/album/bad.jpg").exists());
    }

    #[test]
    fn payload_artifact_is_released() {
        let (dir, resolver) = setup();
        let item = write(&dir.path().join("album/photo.jpg"));
        let artifact = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        let artifact_path = artifact.to_path_buf();
        let payload = NormalizedPayload::from_bytes(b"x", "image/jpeg").with_temp_file(artifact);

        resolver.resolve(&item, &verdict(Suitability::Yes, "fine"), Some(payload));

        assert!(!artifact_path.exists());
    }

    #[test]
    fn sanitizes_reasons() {
        assert_eq!(sanitize_reason("a/b:c*d?"), "a_b_c_d_");
        assert_eq!(sanitize_reason("  \n "), "unsuitable");
        assert_eq!(sanitize_reason(""), "unsuitable");
        let long = "x".repeat(80);
        assert_eq!(sanitize_reason(&long).chars().count(), 50);
        assert_eq!(sanitize_reason("裸露内容，不适合青少年"), "裸露内容，不适合青少年");
    }
}
