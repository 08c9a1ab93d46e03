//! Análisis estructurado del contrato con salida restringida por esquema.
//!
//! Flujo:
//!   1. Rechazo inmediato de texto vacío (sin llamar al modelo).
//!   2. Prompt + esquema JSON derivado de `LeaseRecord`.
//!   3. Deserialización estricta: una clave ausente, una categoría desconocida o
//!      JSON malformado es `SchemaViolation`. No se intenta "arreglar" la salida.
//!   4. Cada fecha crítica debe poder interpretarse como fecha de calendario.
//!
//! No hay reintentos; quien llama decide su política.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::generate::SchemaSettings;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    error::PipelineError,
    llm::{GenerationRequest, GenerativeModel},
    models::LeaseRecord,
    reminder::parse_lease_date,
};

#[async_trait]
pub trait LeaseAnalyzer: Send + Sync {
    /// Devuelve el registro sin `ocr_confidence`; la añade el orquestador.
    async fn analyze(&self, full_text: &str) -> Result<LeaseRecord, PipelineError>;
}

pub struct SchemaConstrainedAnalyzer {
    model: Arc<dyn GenerativeModel>,
    schema: Value,
}

impl SchemaConstrainedAnalyzer {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self {
            model,
            schema: lease_schema(),
        }
    }

    fn build_prompt(&self, full_text: &str) -> String {
        const INSTRUCTIONS: &str = r#"
Analyze this property lease agreement and extract key information.
Ensure all dates are formatted as 'DD Month YYYY' (e.g. '01 Jan 2024').
Every field of the schema must be present. If a value is not stated in the lease, use an empty string; for the break clause, state 'No break clause found'.
Each critical date must be a real calendar date and its category one of: Rent, Notice, Compliance, Other.
Respond only with a single JSON object matching this schema, without explanations:
"#;
        let schema = serde_json::to_string_pretty(&self.schema).unwrap_or_default();
        format!(
            "{}{}\n\nLEASE TEXT:\n{}",
            INSTRUCTIONS.trim_start(),
            schema,
            full_text
        )
    }
}

#[async_trait]
impl LeaseAnalyzer for SchemaConstrainedAnalyzer {
    async fn analyze(&self, full_text: &str) -> Result<LeaseRecord, PipelineError> {
        if full_text.trim().is_empty() {
            return Err(PipelineError::EmptyInput(
                "Cannot analyze an empty lease document. Text extraction might have failed.".to_string(),
            ));
        }

        let request = GenerationRequest::structured(self.build_prompt(full_text), self.schema.clone());
        let response = self.model.generate(request).await?;

        let record = parse_lease_response(&response).map_err(|e| {
            warn!("Respuesta del LLM fuera de esquema ({} caracteres): {}", response.len(), e);
            e
        })?;

        info!(
            "Contrato analizado: {} fechas críticas",
            record.critical_dates.len()
        );
        Ok(record)
    }
}

/// Esquema JSON de `LeaseRecord` con los subesquemas en línea.
pub fn lease_schema() -> Value {
    let schema = SchemaSettings::draft2020_12()
        .with(|s| s.inline_subschemas = true)
        .into_generator()
        .into_root_schema_for::<LeaseRecord>();

    let mut value = serde_json::to_value(schema).unwrap_or(Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// Valida la respuesta del modelo contra la forma fija del registro.
pub fn parse_lease_response(response: &str) -> Result<LeaseRecord, PipelineError> {
    // Limpiar la respuesta del LLM por si viene envuelta en un bloque de código
    let json_response = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if json_response.is_empty() {
        return Err(PipelineError::SchemaViolation("empty response".to_string()));
    }

    let record: LeaseRecord = serde_json::from_str(json_response)
        .map_err(|e| PipelineError::SchemaViolation(e.to_string()))?;

    for (idx, critical) in record.critical_dates.iter().enumerate() {
        if parse_lease_date(&critical.date).is_err() {
            return Err(PipelineError::SchemaViolation(format!(
                "criticalDates[{}].date '{}' is not a calendar date",
                idx, critical.date
            )));
        }
    }

    // El modelo no decide la confianza de extracción.
    Ok(LeaseRecord {
        ocr_confidence: None,
        ..record
    })
}
