use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    accounts::AccountDirectory,
    config::AppConfig,
    orchestrator::{AnalysisOrchestrator, AnalysisRunState, Pipeline},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Pipeline,
    pub accounts: Arc<dyn AccountDirectory>,
    /// Una sesión de análisis por usuario. Sólo vive en memoria.
    pub sessions: Arc<Mutex<HashMap<String, Arc<AnalysisOrchestrator>>>>,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: Pipeline, accounts: Arc<dyn AccountDirectory>) -> Self {
        Self {
            config,
            pipeline,
            accounts,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Sesión existente del usuario, sin crearla.
    pub fn existing_session(&self, uid: &str) -> Option<Arc<AnalysisOrchestrator>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.get(uid).cloned()
    }

    /// Descarta la sesión si está en `Idle` y ninguna petición la retiene.
    pub fn release_if_idle(&self, uid: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = sessions
            .get(uid)
            .is_some_and(|s| Arc::strong_count(s) == 1 && s.state() == AnalysisRunState::Idle);
        if idle {
            sessions.remove(uid);
        }
    }

    /// Sesión del usuario, creada en `Idle` la primera vez.
    pub fn session_for(&self, uid: &str) -> Arc<AnalysisOrchestrator> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(uid.to_string())
            .or_insert_with(|| Arc::new(AnalysisOrchestrator::new(self.pipeline.clone())))
            .clone()
    }
}
