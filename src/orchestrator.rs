//! Máquina de estados de una sesión de análisis.
//!
//! ```text
//! Idle --upload--> Extracting --ok--> Analyzing --ok--> Results(record)
//!                      |                  |
//!                      +------ error -----+--> Failed(mensaje)
//! Results | Failed --reset--> Idle
//! Idle | Results | Failed --abrir guardado--> Results
//! ```
//!
//! Sólo hay una ejecución activa por sesión: la guarda de estado rechaza una
//! subida mientras se extrae o analiza. El candado protege únicamente el estado
//! y nunca se mantiene a través de un `.await`; cada ejecución lleva un
//! `run_id` y sus resultados se descartan si la sesión ya pasó a otra.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    accounts::{QuotaPolicy, User},
    analyzer::LeaseAnalyzer,
    error::{PipelineError, Rejection},
    extractor::TextExtractor,
    models::{ConversationTurn, CriticalDateCategory, LeaseRecord, RawDocument, SavedAnalysis},
    qa::{ChatSession, QuestionResponder},
    search::{find_matches, TextMatch},
    store::LeaseStore,
};

pub const EXTRACTING_MESSAGE: &str = "Extracting text from PDF...";
pub const ANALYZING_MESSAGE: &str = "Analyzing lease with AI...";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum AnalysisRunState {
    Idle,
    Extracting,
    Analyzing,
    Results(LeaseRecord),
    Failed(String),
}

impl AnalysisRunState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Extracting | Self::Analyzing)
    }

    /// Mensaje de progreso para el frontend.
    pub fn progress_message(&self) -> Option<&'static str> {
        match self {
            Self::Extracting => Some(EXTRACTING_MESSAGE),
            Self::Analyzing => Some(ANALYZING_MESSAGE),
            _ => None,
        }
    }
}

/// Colaboradores inyectados en cada orquestador.
#[derive(Clone)]
pub struct Pipeline {
    pub extractor: Arc<dyn TextExtractor>,
    pub analyzer: Arc<dyn LeaseAnalyzer>,
    pub responder: Arc<dyn QuestionResponder>,
    pub store: Arc<dyn LeaseStore>,
    pub quota: QuotaPolicy,
}

/// Permiso para ejecutar una subida aceptada por [`AnalysisOrchestrator::begin`].
#[derive(Debug)]
pub struct RunTicket {
    run_id: u64,
    document: RawDocument,
}

/// Datos retenidos mientras la sesión está en `Results`.
#[derive(Debug, Clone)]
struct RunDocument {
    full_text: String,
    file_name: String,
    saved_id: Option<String>,
}

#[derive(Debug)]
struct RunSession {
    state: AnalysisRunState,
    run_id: u64,
    document: Option<RunDocument>,
    chat: ChatSession,
    answering: bool,
}

impl RunSession {
    /// Pasa a un estado nuevo descartando todo lo de la ejecución anterior.
    fn restart(&mut self, state: AnalysisRunState) -> u64 {
        self.run_id += 1;
        self.state = state;
        self.document = None;
        self.chat = ChatSession::default();
        self.answering = false;
        self.run_id
    }
}

/// Fecha crítica tal como la muestra el frontend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalDateView {
    pub date: String,
    pub description: String,
    pub category: CriticalDateCategory,
    pub label: &'static str,
}

/// Instantánea de la sesión para la API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub state: AnalysisRunState,
    pub message: Option<&'static str>,
    pub file_name: Option<String>,
    pub saved_id: Option<String>,
    pub chat: Vec<ConversationTurn>,
    pub critical_dates: Vec<CriticalDateView>,
    pub answering: bool,
}

impl SessionView {
    /// Vista de un usuario sin sesión abierta.
    pub fn idle() -> Self {
        Self {
            state: AnalysisRunState::Idle,
            message: None,
            file_name: None,
            saved_id: None,
            chat: Vec::new(),
            critical_dates: Vec::new(),
            answering: false,
        }
    }
}

pub struct AnalysisOrchestrator {
    pipeline: Pipeline,
    session: Mutex<RunSession>,
}

impl AnalysisOrchestrator {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            session: Mutex::new(RunSession {
                state: AnalysisRunState::Idle,
                run_id: 0,
                document: None,
                chat: ChatSession::default(),
                answering: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> AnalysisRunState {
        self.lock().state.clone()
    }

    pub fn view(&self) -> SessionView {
        let session = self.lock();
        let critical_dates = match &session.state {
            AnalysisRunState::Results(record) => record
                .critical_dates_chronological()
                .into_iter()
                .map(|d| CriticalDateView {
                    date: d.date.clone(),
                    description: d.description.clone(),
                    category: d.category,
                    label: d.category.label(),
                })
                .collect(),
            _ => Vec::new(),
        };

        SessionView {
            state: session.state.clone(),
            message: session.state.progress_message(),
            file_name: session.document.as_ref().map(|d| d.file_name.clone()),
            saved_id: session.document.as_ref().and_then(|d| d.saved_id.clone()),
            chat: session.chat.turns().to_vec(),
            critical_dates,
            answering: session.answering,
        }
    }

    fn ensure_upload_allowed(state: &AnalysisRunState) -> Result<(), Rejection> {
        match state {
            AnalysisRunState::Extracting | AnalysisRunState::Analyzing => Err(Rejection::Busy),
            AnalysisRunState::Results(_) => Err(Rejection::ResultsOpen),
            AnalysisRunState::Idle | AnalysisRunState::Failed(_) => Ok(()),
        }
    }

    /// Guarda de subida. Si la acepta, la sesión pasa a `Extracting` y el
    /// ticket debe entregarse a [`run`](Self::run). Si la rechaza, el estado no cambia.
    pub async fn begin(&self, user: &User, document: RawDocument) -> Result<RunTicket, Rejection> {
        Self::ensure_upload_allowed(&self.lock().state)?;

        let saved = self
            .pipeline
            .store
            .count_by_owner(&user.uid)
            .await
            .map_err(|e| Rejection::Storage(e.to_string()))?;
        if let Err(quota) = self.pipeline.quota.check(user, saved) {
            warn!("Subida de '{}' rechazada por cuota ({} guardados)", user.uid, saved);
            return Err(quota.into());
        }

        // Otra subida pudo ganar la carrera mientras se contaba.
        let mut session = self.lock();
        Self::ensure_upload_allowed(&session.state)?;
        let run_id = session.restart(AnalysisRunState::Extracting);
        info!(
            "Ejecución {} iniciada: '{}' ({} bytes)",
            run_id,
            document.file_name,
            document.size_bytes()
        );
        Ok(RunTicket { run_id, document })
    }

    /// Ejecuta extracción y análisis para un ticket aceptado y devuelve el
    /// estado final de la ejecución.
    pub async fn run(&self, ticket: RunTicket) -> AnalysisRunState {
        let RunTicket { run_id, document } = ticket;
        let file_name = document.file_name.clone();

        let extracted = match self.pipeline.extractor.extract(document).await {
            Ok(extracted) => extracted,
            Err(e) => return self.fail(run_id, e),
        };

        if !self.advance(run_id, AnalysisRunState::Analyzing) {
            return self.state();
        }

        let record = match self.pipeline.analyzer.analyze(&extracted.full_text).await {
            Ok(record) => record,
            Err(e) => return self.fail(run_id, e),
        };

        let record = LeaseRecord {
            ocr_confidence: Some(extracted.overall_confidence),
            ..record
        };
        let state = AnalysisRunState::Results(record);

        let mut session = self.lock();
        if session.run_id != run_id {
            warn!("Resultados de la ejecución {} descartados", run_id);
            return session.state.clone();
        }
        session.state = state.clone();
        session.document = Some(RunDocument {
            full_text: extracted.full_text,
            file_name,
            saved_id: None,
        });
        info!("Ejecución {} completada", run_id);
        state
    }

    /// `begin` + `run` en una sola llamada.
    pub async fn upload(&self, user: &User, document: RawDocument) -> Result<AnalysisRunState, Rejection> {
        let ticket = self.begin(user, document).await?;
        Ok(self.run(ticket).await)
    }

    fn advance(&self, run_id: u64, next: AnalysisRunState) -> bool {
        let mut session = self.lock();
        if session.run_id != run_id {
            return false;
        }
        session.state = next;
        true
    }

    fn fail(&self, run_id: u64, cause: PipelineError) -> AnalysisRunState {
        error!("Ejecución {} fallida: {}", run_id, cause);
        let state = AnalysisRunState::Failed(format!("Failed to process lease. {}", cause));
        if self.advance(run_id, state.clone()) {
            state
        } else {
            self.state()
        }
    }

    /// `Results | Failed → Idle`.
    pub fn reset(&self) -> Result<(), Rejection> {
        let mut session = self.lock();
        if session.state.is_running() {
            return Err(Rejection::Busy);
        }
        session.restart(AnalysisRunState::Idle);
        Ok(())
    }

    /// Abre un análisis guardado directamente en `Results`, sin extraer ni analizar.
    pub fn load_saved(&self, saved: SavedAnalysis) -> Result<(), Rejection> {
        let mut session = self.lock();
        if session.state.is_running() {
            return Err(Rejection::Busy);
        }
        info!("Abriendo análisis guardado {} ('{}')", saved.id, saved.file_name);
        session.restart(AnalysisRunState::Results(saved.lease_data));
        session.document = Some(RunDocument {
            full_text: saved.full_text,
            file_name: saved.file_name,
            saved_id: Some(saved.id),
        });
        Ok(())
    }

    /// Persiste los resultados actuales. Guardar dos veces devuelve el mismo id.
    pub async fn save(&self, user: &User) -> Result<String, Rejection> {
        let (run_id, record, document) = {
            let session = self.lock();
            let (AnalysisRunState::Results(record), Some(document)) = (&session.state, &session.document) else {
                return Err(Rejection::NoResults);
            };
            if let Some(id) = &document.saved_id {
                return Ok(id.clone());
            }
            (session.run_id, record.clone(), document.clone())
        };

        let store = &self.pipeline.store;
        let saved = store
            .count_by_owner(&user.uid)
            .await
            .map_err(|e| Rejection::Storage(e.to_string()))?;
        self.pipeline.quota.check(user, saved)?;

        let id = store
            .save(&record, &document.full_text, &document.file_name, &user.uid)
            .await
            .map_err(|e| Rejection::Storage(e.to_string()))?;

        let mut session = self.lock();
        if session.run_id == run_id {
            if let Some(document) = session.document.as_mut() {
                document.saved_id = Some(id.clone());
            }
        }
        Ok(id)
    }

    /// Añade la pregunta al chat y después la respuesta (o un turno de error).
    /// Un fallo del modelo nunca cambia el estado de la ejecución.
    pub async fn ask(&self, question: &str) -> Result<ConversationTurn, Rejection> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Rejection::EmptyQuestion);
        }

        let (run_id, full_text) = {
            let mut session = self.lock();
            let full_text = match (&session.state, &session.document) {
                (AnalysisRunState::Results(_), Some(document)) => document.full_text.clone(),
                _ => return Err(Rejection::NoResults),
            };
            if session.answering {
                return Err(Rejection::QuestionPending);
            }
            session.answering = true;
            session.chat.push(ConversationTurn::user(question));
            (session.run_id, full_text)
        };

        let turn = match self.pipeline.responder.answer(&full_text, question).await {
            Ok(answer) => ConversationTurn::model(answer),
            Err(e) => {
                warn!("Pregunta sin respuesta: {}", e);
                ConversationTurn::error(format!("Sorry, I couldn't get an answer. {}", e))
            }
        };

        let mut session = self.lock();
        if session.run_id == run_id {
            session.answering = false;
            session.chat.push(turn.clone());
        }
        Ok(turn)
    }

    /// Búsqueda literal en el texto del análisis abierto.
    pub fn search(&self, term: &str) -> Result<Vec<TextMatch>, Rejection> {
        let session = self.lock();
        match (&session.state, &session.document) {
            (AnalysisRunState::Results(_), Some(document)) => Ok(find_matches(&document.full_text, term)),
            _ => Err(Rejection::NoResults),
        }
    }
}
