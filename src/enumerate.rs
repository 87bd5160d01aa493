//! Descoberta das imagens candidatas sob um diretório raiz.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Extensões (minúsculas, sem ponto) tratadas como imagem.
pub const IMAGE_EXTENSIONS: &[&str] = &["webp", "jpg", "jpeg", "png", "gif", "bmp"];

/// Uma imagem a processar, identificada pelo caminho canônico.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    path: PathBuf,
}

impl WorkItem {
    /// Canonicaliza `path`; usa o caminho dado se não for possível resolvê-lo.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = std::fs::canonicalize(&path).unwrap_or(path);
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identificador usado para garantir no máximo um processamento.
    pub fn id(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Indica se `path` tem uma extensão de imagem permitida.
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

/// Percorre todo arquivo de imagem sob `root`, pulando entradas ilegíveis.
pub fn walk_images(root: &Path) -> impl Iterator<Item = DirEntry> + use<> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_image(entry.path()))
}

/// Enumera, sob demanda, as imagens de `root` que ainda precisam de revisão.
///
/// A varredura nunca entra em `exclude_subtree`, e arquivos cujo nome já
/// carrega `approved_marker` são pulados.
pub fn enumerate(
    root: &Path,
    exclude_subtree: &Path,
    approved_marker: &str,
) -> impl Iterator<Item = WorkItem> + use<> {
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let exclude = std::fs::canonicalize(exclude_subtree)
        .unwrap_or_else(|_| exclude_subtree.to_path_buf());
    let marker = approved_marker.to_string();

    WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(move |entry| !entry.path().starts_with(&exclude))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_image(entry.path()))
        .filter(move |entry| !entry.file_name().to_string_lossy().contains(marker.as_str()))
        .map(|entry| WorkItem::new(entry.into_path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;

    fn names(items: impl Iterator<Item = WorkItem>) -> BTreeSet<String> {
        items
            .map(|i| i.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn yields_only_pending_images() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("album/nested")).unwrap();
        fs::create_dir_all(root.join("quarantine/album")).unwrap();
        fs::write(root.join("album/photoA.jpg"), b"a").unwrap();
        fs::write(root.join("album/photoB_approved.png"), b"b").unwrap();
        fs::write(root.join("album/nested/pic.WEBP"), b"c").unwrap();
        fs::write(root.join("album/notes.txt"), b"d").unwrap();
        fs::write(root.join("quarantine/album/rejected.jpg"), b"e").unwrap();

        let found = names(enumerate(root, &root.join("quarantine"), "_approved"));
        assert_eq!(
            found,
            BTreeSet::from(["photoA.jpg".to_string(), "pic.WEBP".to_string()])
        );
    }

    #[test]
    fn missing_exclude_dir_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.gif"), b"x").unwrap();
        let found = names(enumerate(dir.path(), &dir.path().join("nope"), "_approved"));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn items_are_canonical() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.jpg"), b"x").unwrap();
        let item = enumerate(dir.path(), &dir.path().join("q"), "_approved")
            .next()
            .unwrap();
        assert_eq!(item.path(), fs::canonicalize(dir.path().join("x.jpg")).unwrap());
        assert_eq!(WorkItem::new(dir.path().join("x.jpg")), item);
    }

    #[test]
    fn iterator_outlives_borrowed_arguments() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.png"), b"x").unwrap();
        let items = enumerate(dir.path(), &dir.path().join("quarantine"), &String::from("_ok"));
        let walked = walk_images(&dir.path().to_path_buf());
        assert_eq!(names(items).len(), 1);
        assert_eq!(walked.count(), 1);
    }

    #[test]
    fn extension_allowlist() {
        assert!(is_image(Path::new("a.JPEG")));
        assert!(is_image(Path::new("a.bmp")));
        assert!(!is_image(Path::new("a.tiff")));
        assert!(!is_image(Path::new("jpg")));
    }
}
