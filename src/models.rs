//! Modelos de dominio: documento subido, texto extraído, registro estructurado
//! del contrato, fechas críticas, turnos de conversación y análisis guardados.
//!
//! Los tipos del registro (`LeaseRecord` y anidados) son a la vez el objetivo de
//! deserialización y la fuente del esquema JSON que se envía al modelo
//! (`schemars`), así que esquema y validación no pueden divergir.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Documento binario tal como llega del usuario. Se consume una sola vez.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// Resultado del extractor de texto.
///
/// `overall_confidence` es la media aritmética de `page_confidences`
/// (0 si no hay páginas). Las confianzas son heurísticas, no de OCR real.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedText {
    pub full_text: String,
    pub page_confidences: Vec<f64>,
    pub overall_confidence: f64,
}

impl ExtractedText {
    pub fn page_count(&self) -> usize {
        self.page_confidences.len()
    }
}

/// Análisis estructurado de un contrato. Ninguna clave puede faltar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[schemars(description = "Key information extracted from a property lease agreement.")]
pub struct LeaseRecord {
    #[schemars(description = "A concise, one-paragraph summary of the lease agreement.")]
    pub summary: String,
    pub parties: Parties,
    pub dates: LeaseDates,
    pub rent: Rent,
    pub clauses: Clauses,
    #[schemars(description = "A list of critical dates from the lease.")]
    pub critical_dates: Vec<CriticalDate>,
    /// La añade el orquestador tras el análisis; nunca la produce el modelo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(skip)]
    pub ocr_confidence: Option<f64>,
}

impl LeaseRecord {
    /// Fechas críticas en orden cronológico. Las que no se pueden interpretar
    /// (registros antiguos guardados antes de validar) quedan al final.
    pub fn critical_dates_chronological(&self) -> Vec<&CriticalDate> {
        let mut dates: Vec<&CriticalDate> = self.critical_dates.iter().collect();
        dates.sort_by_key(|d| match crate::reminder::parse_lease_date(&d.date) {
            Ok(date) => (0, Some(date)),
            Err(_) => (1, None),
        });
        dates
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Parties {
    #[schemars(description = "Full legal name of Tenant.")]
    pub tenant: String,
    #[schemars(description = "Full legal name of Landlord.")]
    pub landlord: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaseDates {
    #[schemars(description = "Start date in 'DD Month YYYY' format (e.g., '01 Jan 2024').")]
    pub commencement_date: String,
    #[schemars(description = "Total duration of the lease (e.g., '5 years').")]
    pub term: String,
    #[schemars(description = "End date in 'DD Month YYYY' format (e.g., '31 Dec 2029').")]
    pub expiration_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rent {
    #[schemars(description = "Rent amount with currency (e.g., '£5,000').")]
    pub amount: String,
    #[schemars(description = "How often rent is paid (e.g., 'Per Calendar Month').")]
    pub frequency: String,
    #[schemars(description = "Next rent due date in 'DD Month YYYY' format.")]
    pub next_due_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Clauses {
    #[schemars(description = "Summarize break clause. If none, state 'No break clause found'.")]
    pub break_clause: String,
    #[schemars(description = "Describe the permitted use of the property.")]
    pub permitted_use: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CriticalDate {
    #[schemars(description = "Date in 'DD Month YYYY' format (e.g., '29 Sep 2026').")]
    pub date: String,
    #[schemars(description = "What the date is for (e.g., 'Rent review date').")]
    pub description: String,
    #[schemars(description = "The type of event.")]
    pub category: CriticalDateCategory,
}

/// Categoría cerrada: un valor fuera de la lista es una violación de esquema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub enum CriticalDateCategory {
    Rent,
    Notice,
    Compliance,
    Other,
}

impl CriticalDateCategory {
    /// Etiqueta que muestra el frontend.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rent => "Rent Payment",
            Self::Notice => "Notice Period",
            Self::Compliance => "Compliance",
            Self::Other => "General",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: ChatRole::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Model, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Error, text: text.into() }
    }
}

/// Registro persistido por el colaborador de almacenamiento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedAnalysis {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub lease_data: LeaseRecord,
    pub full_text: String,
    pub created_at: String,
}
