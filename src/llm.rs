//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! Implementados Gemini y OpenAI; Ollama queda preparado para el futuro.
//!
//! El resto de la aplicación sólo ve el trait [`GenerativeModel`]: recibe un
//! prompt y, opcionalmente, un esquema JSON de salida, y devuelve texto.

use std::time::Duration;

use async_trait::async_trait;
use rig::completion::Prompt;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::{AppConfig, LlmProvider};

/// Petición al endpoint generativo.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub contents: String,
    /// Si existe, el modelo debe responder sólo con JSON que cumpla el esquema.
    pub response_schema: Option<Value>,
}

impl GenerationRequest {
    pub fn text(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            response_schema: None,
        }
    }

    pub fn structured(contents: impl Into<String>, schema: Value) -> Self {
        Self {
            contents: contents.into(),
            response_schema: Some(schema),
        }
    }
}

/// Fallos de transporte, autenticación o tiempo agotado del endpoint.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Transport(String),

    #[error("LLM provider {0} is not implemented yet")]
    UnsupportedProvider(String),
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ModelError>;
}

/// Gestor de LLMs sobre los clientes de Rig.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
    pub timeout: Duration,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            timeout: cfg.llm_timeout,
        }
    }

    async fn generate_with_gemini(&self, request: GenerationRequest) -> Result<String, ModelError> {
        use rig::client::{CompletionClient as _, ProviderClient as _};
        use rig::providers::gemini;

        // Cliente Gemini de Rig (lee GEMINI_API_KEY)
        let client = gemini::Client::from_env();
        let mut builder = client.agent(&self.chat_model);

        if let Some(schema) = &request.response_schema {
            builder = builder.additional_params(json!({
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseSchema": gemini_schema(schema),
                }
            }));
        }

        let agent = builder.build();
        agent
            .prompt(request.contents.as_str())
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))
    }

    async fn generate_with_openai(&self, request: GenerationRequest) -> Result<String, ModelError> {
        use rig::client::{CompletionClient as _, ProviderClient as _};
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let mut builder = client.agent(&self.chat_model);

        if let Some(schema) = &request.response_schema {
            builder = builder.additional_params(json!({
                "response_format": {
                    "type": "json_schema",
                    "json_schema": {
                        "name": "lease_record",
                        "schema": schema,
                    }
                }
            }));
        }

        let agent = builder.build();
        agent
            .prompt(request.contents.as_str())
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))
    }
}

#[async_trait]
impl GenerativeModel for LlmManager {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ModelError> {
        debug!(
            "Llamada al LLM ({:?}, modelo {}): {} caracteres, esquema: {}",
            self.provider,
            self.chat_model,
            request.contents.len(),
            request.response_schema.is_some()
        );

        let call = async {
            match self.provider {
                LlmProvider::Gemini => self.generate_with_gemini(request).await,
                LlmProvider::OpenAI => self.generate_with_openai(request).await,
                ref other => Err(ModelError::UnsupportedProvider(format!("{:?}", other))),
            }
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout(self.timeout)),
        }
    }
}

/// Traduce un JSON Schema al subconjunto OpenAPI que acepta Gemini:
/// `type` en mayúsculas y sólo las claves que el endpoint reconoce.
pub fn gemini_schema(schema: &Value) -> Value {
    const KEPT: [&str; 8] = [
        "type",
        "properties",
        "items",
        "enum",
        "description",
        "required",
        "nullable",
        "format",
    ];

    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };

    let mut out = Map::new();
    for (key, value) in obj {
        if !KEPT.contains(&key.as_str()) {
            continue;
        }
        let translated = match key.as_str() {
            "type" => match value {
                Value::String(t) => Value::String(t.to_uppercase()),
                other => other.clone(),
            },
            "properties" => match value.as_object() {
                Some(props) => Value::Object(
                    props
                        .iter()
                        .map(|(name, sub)| (name.clone(), gemini_schema(sub)))
                        .collect(),
                ),
                None => value.clone(),
            },
            "items" => gemini_schema(value),
            _ => value.clone(),
        };
        out.insert(key.clone(), translated);
    }
    Value::Object(out)
}
