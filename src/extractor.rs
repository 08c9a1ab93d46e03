//! Extracción de texto de PDFs subidos: texto por página, páginas separadas
//! por una línea en blanco y una confianza heurística por página.
//!
//! `pdf-extract` sólo lee la capa de texto del PDF; no hay OCR. Un PDF escaneado
//! (sólo imágenes) acaba en `PipelineError::Extraction`. La confianza por página
//! es una estimación en [95, 99] basada en la proporción de caracteres legibles,
//! no una confianza real de OCR.

use std::time::Duration;

use async_trait::async_trait;
use mime_guess::MimeGuess;
use tracing::{info, warn};

use crate::{
    error::PipelineError,
    models::{ExtractedText, RawDocument},
};

const PAGE_SEPARATOR: &str = "\n\n";
const EMPTY_TEXT_MESSAGE: &str =
    "Could not extract any text from the PDF. The file might be corrupted or contain only images.";

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, document: RawDocument) -> Result<ExtractedText, PipelineError>;
}

/// Extractor basado en la capa de texto del PDF.
#[derive(Debug, Clone)]
pub struct PdfTextExtractor {
    timeout: Duration,
}

impl PdfTextExtractor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, document: RawDocument) -> Result<ExtractedText, PipelineError> {
        let RawDocument { file_name, bytes } = document;

        if !bytes.starts_with(b"%PDF-") {
            let mime: MimeGuess = MimeGuess::from_path(&file_name);
            let looks_like_pdf = mime
                .first()
                .map(|m| m.essence_str() == "application/pdf")
                .unwrap_or(false);
            let reason = if looks_like_pdf {
                format!("'{}' is not a well-formed PDF document.", file_name)
            } else {
                format!("'{}' is not a PDF. Only PDF documents are supported.", file_name)
            };
            return Err(PipelineError::Extraction(reason));
        }

        let size = bytes.len();
        // pdf-extract es CPU puro y puede entrar en pánico con PDFs raros:
        // se ejecuta en el pool bloqueante y el pánico llega como JoinError.
        let task = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|e| e.to_string())
        });

        let pages = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                warn!("Extracción de '{}' superó {:?}", file_name, self.timeout);
                return Err(PipelineError::Extraction(format!(
                    "Text extraction timed out after {} seconds.",
                    self.timeout.as_secs()
                )));
            }
            Ok(Err(join_err)) => {
                warn!("El parser de PDF falló con '{}': {}", file_name, join_err);
                return Err(PipelineError::Extraction(format!(
                    "'{}' could not be read as a PDF document.",
                    file_name
                )));
            }
            Ok(Ok(Err(e))) => {
                warn!("No se pudo extraer texto del PDF '{}': {}", file_name, e);
                return Err(PipelineError::Extraction(format!(
                    "'{}' is not a well-formed PDF document ({}).",
                    file_name, e
                )));
            }
            Ok(Ok(Ok(pages))) => pages,
        };

        let extracted = assemble_pages(&pages)?;
        info!(
            "Extraídas {} páginas de '{}' ({} bytes, {} caracteres, confianza {:.1})",
            extracted.page_count(),
            file_name,
            size,
            extracted.full_text.len(),
            extracted.overall_confidence
        );
        Ok(extracted)
    }
}

/// Une el texto de las páginas en orden y calcula las confianzas.
///
/// Los fragmentos (líneas) de cada página se unen con un espacio; las páginas
/// con una línea en blanco. Las páginas vacías conservan su hueco para que la
/// numeración de páginas siga alineada.
pub fn assemble_pages<S: AsRef<str>>(pages: &[S]) -> Result<ExtractedText, PipelineError> {
    if pages.is_empty() {
        return Err(PipelineError::Extraction(
            "The PDF does not contain any pages.".to_string(),
        ));
    }

    let mut page_texts = Vec::with_capacity(pages.len());
    let mut page_confidences = Vec::with_capacity(pages.len());

    for page in pages {
        let text = page
            .as_ref()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        page_confidences.push(estimate_page_confidence(&text));
        page_texts.push(text);
    }

    let full_text = page_texts.join(PAGE_SEPARATOR);
    if full_text.trim().is_empty() {
        return Err(PipelineError::Extraction(EMPTY_TEXT_MESSAGE.to_string()));
    }

    let overall_confidence = mean(&page_confidences);
    Ok(ExtractedText {
        full_text,
        page_confidences,
        overall_confidence,
    })
}

/// 0 sin texto; si no, 95 + 4 × proporción de caracteres legibles.
pub fn estimate_page_confidence(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let readable = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || ".,;:'\"()-/£$€%&@!?".contains(*c))
        .count();
    95.0 + 4.0 * (readable as f64 / total as f64)
}

/// Media aritmética; 0 para una lista vacía.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
