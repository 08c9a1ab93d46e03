//! Taxonomía de errores del pipeline de análisis y su traducción a HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm::ModelError;

/// Fallos de los componentes del pipeline (extractor, analizador, Q&A).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Documento ilegible o sin texto.
    #[error("{0}")]
    Extraction(String),

    /// Validación previa a cualquier llamada de red.
    #[error("{0}")]
    EmptyInput(String),

    #[error("The AI service is currently unavailable. Please try again later. ({0})")]
    Model(#[from] ModelError),

    /// La respuesta del modelo no encaja con el esquema fijo.
    #[error("The AI response did not match the expected lease structure: {0}")]
    SchemaViolation(String),
}

/// Límite del plan gratuito alcanzado.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Free plan limit reached: you can keep up to {limit} saved analyses. Upgrade to Pro to analyze more leases.")]
pub struct QuotaExceeded {
    pub limit: usize,
}

/// Peticiones que el orquestador rechaza sin cambiar de estado.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("An analysis is already in progress. Wait for it to finish first.")]
    Busy,

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error("Start a new analysis before uploading another lease.")]
    ResultsOpen,

    #[error("There is no completed analysis to work with.")]
    NoResults,

    #[error("A question is already being answered. Please wait for the answer.")]
    QuestionPending,

    #[error("Please enter a question.")]
    EmptyQuestion,

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errores de la API HTTP.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing user identity")]
    Unauthenticated,

    #[error("Saved analysis not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "Authentication required.".to_string(),
            ),
            ApiError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Saved analysis not found: {}", id),
            ),
            ApiError::Rejected(rejection) => match rejection {
                Rejection::QuotaExceeded(_) => (StatusCode::FORBIDDEN, rejection.to_string()),
                Rejection::EmptyQuestion => (StatusCode::BAD_REQUEST, rejection.to_string()),
                Rejection::Storage(e) => {
                    tracing::error!("Error de almacenamiento: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Storage error".to_string(),
                    )
                }
                _ => (StatusCode::CONFLICT, rejection.to_string()),
            },
            ApiError::Internal(e) => {
                tracing::error!("Error interno: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
