//! Normalização de imagens antes da classificação.
//!
//! O pipeline enxerga a normalização como uma capacidade opaca atrás da trait
//! [`Normalizer`]. O padrão é o [`ImageNormalizer`]: arquivos pequenos passam
//! sem mudança; os demais são decodificados e re-codificados em JPEG em
//! tamanhos cada vez menores até o base64 caber no orçamento.

use std::io::Write;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::SieveError;

/// Arquivos até este tamanho não são re-codificados, exceto WebP.
const REENCODE_THRESHOLD_BYTES: u64 = 3 * 1024 * 1024;

/// Tamanhos do maior lado tentados, em ordem, na re-codificação.
const EDGE_STEPS: &[u32] = &[2048, 1536, 1024, 768, 512];

/// Qualidades JPEG tentadas em cada tamanho.
const QUALITY_STEPS: &[u8] = &[85, 70, 55, 40];

/// Comprimento do texto base64 para `raw_len` bytes de entrada.
pub fn base64_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}

/// Dados da imagem, já no tamanho certo para enviar ao classificador.
///
/// É dono do arquivo temporário re-codificado, se algum foi gravado. O
/// arquivo é removido exatamente uma vez: por [`NormalizedPayload::release`]
/// ou, em qualquer outro caminho de saída, quando o payload é descartado.
#[derive(Debug)]
pub struct NormalizedPayload {
    encoded: String,
    media_type: &'static str,
    artifact: Option<TempPath>,
}

impl NormalizedPayload {
    /// Embrulha os bytes da imagem sem arquivo temporário.
    pub fn from_bytes(bytes: &[u8], media_type: &'static str) -> Self {
        Self {
            encoded: STANDARD.encode(bytes),
            media_type,
            artifact: None,
        }
    }

    fn with_artifact(bytes: &[u8], artifact: TempPath) -> Self {
        Self {
            encoded: STANDARD.encode(bytes),
            media_type: "image/jpeg",
            artifact: Some(artifact),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_temp_file(mut self, artifact: TempPath) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Texto base64 da imagem.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    /// Forma `data:` URI usada pelos endpoints compatíveis com OpenAI.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.encoded)
    }

    /// Caminho do arquivo temporário re-codificado, se houver.
    #[cfg(test)]
    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Remove o arquivo temporário agora, relatando qualquer falha de I/O.
    pub fn release(self) -> std::io::Result<()> {
        match self.artifact {
            Some(artifact) => artifact.close(),
            None => Ok(()),
        }
    }
}

/// Produz um [`NormalizedPayload`] para uma imagem em disco.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, path: &Path) -> Result<NormalizedPayload, SieveError>;
}

/// Normalizador padrão, apoiado na crate `image`.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    /// Comprimento máximo, em base64, do payload produzido.
    budget_bytes: usize,
}

impl ImageNormalizer {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    fn reencode(&self, img: &DynamicImage) -> Result<NormalizedPayload, SieveError> {
        let (width, height) = img.dimensions();
        let longest = width.max(height);
        let mut smallest: Option<Vec<u8>> = None;

        for &edge in EDGE_STEPS {
            let resized = if longest > edge {
                img.resize(edge, edge, FilterType::Lanczos3)
            } else {
                img.clone()
            };
            let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

            for &quality in QUALITY_STEPS {
                let mut buf = Vec::new();
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
                let encoded = base64_len(buf.len());
                debug!(edge, quality, encoded, "re-encoded candidate");
                if encoded <= self.budget_bytes {
                    return self.persist(&buf);
                }
                if smallest.as_ref().is_none_or(|s| buf.len() < s.len()) {
                    smallest = Some(buf);
                }
            }
        }

        // Piso atingido: devolve a menor tentativa.
        let buf = smallest.unwrap_or_default();
        warn!(
            encoded = base64_len(buf.len()),
            budget = self.budget_bytes,
            "could not fit image into payload budget, using best effort"
        );
        self.persist(&buf)
    }

    fn persist(&self, buf: &[u8]) -> Result<NormalizedPayload, SieveError> {
        let mut file = tempfile::Builder::new()
            .prefix("picsieve-")
            .suffix(".jpg")
            .tempfile()?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(NormalizedPayload::with_artifact(buf, file.into_temp_path()))
    }
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(8 * 1024 * 1024)
    }
}

impl Normalizer for ImageNormalizer {
    fn normalize(&self, path: &Path) -> Result<NormalizedPayload, SieveError> {
        let bytes = std::fs::read(path)?;
        let media_type = media_type_for(path);
        let is_webp = media_type == "image/webp";

        if !is_webp
            && bytes.len() as u64 <= REENCODE_THRESHOLD_BYTES
            && base64_len(bytes.len()) <= self.budget_bytes
        {
            return Ok(NormalizedPayload::from_bytes(&bytes, media_type));
        }

        match image::load_from_memory(&bytes) {
            Ok(img) => self.reencode(&img),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to decode image, sending original bytes");
                Ok(NormalizedPayload::from_bytes(&bytes, media_type))
            }
        }
    }
}

/// Tipo MIME deduzido pela extensão do arquivo.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn base64_length_rounds_up() {
        assert_eq!(base64_len(0), 0);
        assert_eq!(base64_len(1), 4);
        assert_eq!(base64_len(3), 4);
        assert_eq!(base64_len(4), 8);
    }

    #[test]
    fn small_file_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.png");
        std::fs::write(&path, b"not really a png").unwrap();

        let payload = ImageNormalizer::default().normalize(&path).unwrap();
        assert_eq!(payload.media_type(), "image/png");
        assert_eq!(payload.encoded(), STANDARD.encode(b"not really a png"));
        assert!(payload.artifact_path().is_none());
        payload.release().unwrap();
    }

    #[test]
    fn webp_is_reencoded_to_jpeg_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.webp");
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(32, 16, |x, y| Rgb([x as u8 * 8, y as u8 * 16, 128]));
        DynamicImage::ImageRgb8(img)
            .save_with_format(&path, image::ImageFormat::WebP)
            .unwrap();

        let payload = ImageNormalizer::default().normalize(&path).unwrap();
        assert_eq!(payload.media_type(), "image/jpeg");
        let artifact = payload.artifact_path().unwrap().to_path_buf();
        assert!(artifact.exists());

        payload.release().unwrap();
        assert!(!artifact.exists());
    }

    #[test]
    fn dropped_payload_removes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.webp");
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(8, 8, Rgb([1, 2, 3]));
        DynamicImage::ImageRgb8(img)
            .save_with_format(&path, image::ImageFormat::WebP)
            .unwrap();

        let payload = ImageNormalizer::default().normalize(&path).unwrap();
        let artifact = payload.artifact_path().unwrap().to_path_buf();
        drop(payload);
        assert!(!artifact.exists());
    }

    #[test]
    fn tight_budget_downscales() {
        let mut seed: u32 = 0x9e37_79b9;
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(1200, 900, |_, _| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let b = seed.to_le_bytes();
            Rgb([b[1], b[2], b[3]])
        });
        let budget = 512 * 1024;
        let normalizer = ImageNormalizer::new(budget);
        let payload = normalizer.reencode(&DynamicImage::ImageRgb8(img)).unwrap();
        assert!(payload.encoded_len() <= budget);
        assert!(payload.artifact_path().is_some());
    }

    #[test]
    fn undecodable_webp_falls_back_to_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.webp");
        std::fs::write(&path, b"garbage").unwrap();

        let payload = ImageNormalizer::default().normalize(&path).unwrap();
        assert_eq!(payload.media_type(), "image/webp");
        assert!(payload.artifact_path().is_none());
    }

    #[test]
    fn media_types_from_extension() {
        assert_eq!(media_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("a.gif")), "image/gif");
        assert_eq!(media_type_for(Path::new("a.bmp")), "image/bmp");
    }
}
