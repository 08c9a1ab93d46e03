//! Búsqueda literal en el texto retenido del contrato.

use regex::RegexBuilder;
use serde::Serialize;

/// Separador de páginas que produce el extractor.
const PAGE_SEPARATOR: &str = "\n\n";

/// Coincidencia: rango en bytes dentro de `full_text` y página (desde 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextMatch {
    pub page: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Busca `term` sin distinguir mayúsculas. El término se escapa, así que nunca
/// se interpreta como expresión regular. Un término en blanco no devuelve nada.
pub fn find_matches(full_text: &str, term: &str) -> Vec<TextMatch> {
    let term = term.trim();
    if term.is_empty() {
        return Vec::new();
    }

    let Ok(re) = RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
    else {
        return Vec::new();
    };

    re.find_iter(full_text)
        .map(|m| TextMatch {
            page: full_text[..m.start()].matches(PAGE_SEPARATOR).count() + 1,
            start: m.start(),
            end: m.end(),
            text: m.as_str().to_string(),
        })
        .collect()
}
