//! Preguntas y respuestas sobre el texto del contrato.
//!
//! Cada pregunta es una llamada independiente con el texto completo del
//! documento: no hay ventana de contexto incremental, así que el coste crece con
//! la longitud del contrato. Que el modelo responda sólo con el texto dado es un
//! contrato del prompt, no algo que la aplicación pueda verificar.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::{
    error::PipelineError,
    llm::{GenerationRequest, GenerativeModel, ModelError},
    models::ConversationTurn,
};

#[async_trait]
pub trait QuestionResponder: Send + Sync {
    async fn answer(&self, full_text: &str, question: &str) -> Result<String, PipelineError>;
}

pub struct GroundedResponder {
    model: Arc<dyn GenerativeModel>,
}

impl GroundedResponder {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }
}

fn build_prompt(full_text: &str, question: &str) -> String {
    const SYSTEM_PROMPT: &str = r#"
You are a helpful legal assistant. Answer the user's question based ONLY
on the provided lease text. When you mention a date, format it as
'DD Month YYYY'. If the answer is not in the text, state that clearly.
Keep answers concise.
"#;

    format!(
        "{}\nLEASE TEXT:\n---\n{}\n---\n\nUSER'S QUESTION:\n\"{}\"",
        SYSTEM_PROMPT.trim_start(),
        full_text,
        question
    )
}

#[async_trait]
impl QuestionResponder for GroundedResponder {
    async fn answer(&self, full_text: &str, question: &str) -> Result<String, PipelineError> {
        if full_text.trim().is_empty() || question.trim().is_empty() {
            return Err(PipelineError::EmptyInput(
                "Lease text and question cannot be empty.".to_string(),
            ));
        }

        let request = GenerationRequest::text(build_prompt(full_text, question.trim()));
        let answer = self.model.generate(request).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(ModelError::Transport("the model returned an empty answer".to_string()).into());
        }

        info!("Pregunta respondida ({} caracteres)", answer.len());
        Ok(answer.to_string())
    }
}

/// Historial de conversación de una sesión de resultados. Sólo crece; se
/// descarta al salir de los resultados y nunca se persiste.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    turns: Vec<ConversationTurn>,
}

impl ChatSession {
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
