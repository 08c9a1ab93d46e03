//! Dobles de prueba compartidos por los tests de los módulos.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    accounts::{QuotaPolicy, SubscriptionTier, User},
    analyzer::SchemaConstrainedAnalyzer,
    error::PipelineError,
    extractor::{assemble_pages, TextExtractor},
    llm::{GenerationRequest, GenerativeModel, ModelError},
    models::{ExtractedText, LeaseRecord, RawDocument},
    orchestrator::{AnalysisOrchestrator, Pipeline},
    qa::GroundedResponder,
    store::{InMemoryStore, LeaseStore},
};

pub const ADMIN_EMAIL: &str = "admin@sweetlease.app";

/// Respuesta del modelo para el contrato de ejemplo.
pub fn lease_json() -> String {
    serde_json::json!({
        "summary": "A five year commercial lease of office premises between Roe Properties and Acme Ltd.",
        "parties": {
            "tenant": "Acme Ltd",
            "landlord": "Roe Properties"
        },
        "dates": {
            "commencementDate": "01 Jan 2024",
            "term": "5 years",
            "expirationDate": "31 Dec 2028"
        },
        "rent": {
            "amount": "£1,000",
            "frequency": "Monthly",
            "nextDueDate": "01 Feb 2024"
        },
        "clauses": {
            "breakClause": "No break clause found",
            "permittedUse": "Offices within Class E(g)(i)."
        },
        "criticalDates": [
            {
                "date": "01 Feb 2024",
                "description": "Next rent payment",
                "category": "Rent"
            },
            {
                "date": "30 Jun 2028",
                "description": "Last day to serve notice of renewal",
                "category": "Notice"
            },
            {
                "date": "01 Jan 2025",
                "description": "Annual fire safety inspection",
                "category": "Compliance"
            }
        ]
    })
    .to_string()
}

pub fn sample_record() -> LeaseRecord {
    serde_json::from_str(&lease_json()).expect("lease_json válido")
}

pub fn free_user() -> User {
    User::new("user-free", "jane.doe@example.com", ADMIN_EMAIL, SubscriptionTier::Free)
}

pub fn pro_user() -> User {
    User::new("user-pro", "max.power@example.com", ADMIN_EMAIL, SubscriptionTier::Pro)
}

pub fn pdf(file_name: &str) -> RawDocument {
    RawDocument::new(file_name, b"%PDF-1.7\n%test".to_vec())
}

// --- Modelo generativo con guion ---

pub struct ScriptedModel {
    response: Result<String, String>,
    requests: Mutex<Vec<GenerationRequest>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedModel {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: Ok(response.into()),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Registra la petición y no responde hasta que `gate` recibe `notify_one`.
    pub fn gated(response: impl Into<String>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(response)
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(request);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.response.clone().map_err(ModelError::Transport)
    }
}

// --- Extractor con páginas fijas ---

pub struct FixedExtractor {
    pages: Mutex<Result<Vec<String>, String>>,
    calls: AtomicUsize,
}

impl FixedExtractor {
    pub fn pages(pages: &[&str]) -> Self {
        Self {
            pages: Mutex::new(Ok(pages.iter().map(|p| p.to_string()).collect())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            pages: Mutex::new(Err(message.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_pages(&self, pages: &[&str]) {
        *self.pages.lock().unwrap() = Ok(pages.iter().map(|p| p.to_string()).collect());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for FixedExtractor {
    async fn extract(&self, _document: RawDocument) -> Result<ExtractedText, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pages = self.pages.lock().unwrap().clone();
        match pages {
            Ok(pages) => assemble_pages(&pages),
            Err(message) => Err(PipelineError::Extraction(message)),
        }
    }
}

// --- Pipeline completo con dobles ---

pub struct Harness {
    pub extractor: Arc<FixedExtractor>,
    pub analysis_model: Arc<ScriptedModel>,
    pub answer_model: Arc<ScriptedModel>,
    pub store: Arc<InMemoryStore>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new(extractor: FixedExtractor) -> Self {
        Self::build(
            extractor,
            ScriptedModel::new(lease_json()),
            ScriptedModel::new("The tenant is Acme Ltd."),
        )
    }

    pub fn with_analysis_response(extractor: FixedExtractor, response: &str) -> Self {
        Self::build(
            extractor,
            ScriptedModel::new(response),
            ScriptedModel::new("The tenant is Acme Ltd."),
        )
    }

    pub fn with_failing_answers(extractor: FixedExtractor, message: &str) -> Self {
        Self::build(
            extractor,
            ScriptedModel::new(lease_json()),
            ScriptedModel::failing(message),
        )
    }

    /// El análisis queda retenido en `Analyzing` hasta liberar `gate`.
    pub fn with_gated_analysis(extractor: FixedExtractor, gate: Arc<Notify>) -> Self {
        Self::build(
            extractor,
            ScriptedModel::gated(lease_json(), gate),
            ScriptedModel::new("The tenant is Acme Ltd."),
        )
    }

    fn build(extractor: FixedExtractor, analysis: ScriptedModel, answers: ScriptedModel) -> Self {
        let extractor = Arc::new(extractor);
        let analysis_model = Arc::new(analysis);
        let answer_model = Arc::new(answers);
        let store = Arc::new(InMemoryStore::new());

        let pipeline = Pipeline {
            extractor: extractor.clone(),
            analyzer: Arc::new(SchemaConstrainedAnalyzer::new(analysis_model.clone())),
            responder: Arc::new(GroundedResponder::new(answer_model.clone())),
            store: store.clone(),
            quota: QuotaPolicy::new(3),
        };

        Self {
            extractor,
            analysis_model,
            answer_model,
            store,
            pipeline,
        }
    }

    pub fn orchestrator(&self) -> AnalysisOrchestrator {
        AnalysisOrchestrator::new(self.pipeline.clone())
    }

    /// Guarda `count` análisis de ejemplo para `uid` y devuelve sus ids.
    pub async fn fill_saved(&self, uid: &str, count: usize) -> Vec<String> {
        let record = sample_record();
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let text = format!("Tenant: Acme Ltd\n\nSaved lease number {i}");
            let id = self
                .store
                .save(&record, &text, &format!("saved-{i}.pdf"), uid)
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }
}
