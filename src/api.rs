use std::sync::Arc;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Json, Multipart, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{info, warn};

use crate::{
    accounts::User,
    app_state::AppState,
    error::{ApiError, Rejection},
    models::{ConversationTurn, RawDocument, SavedAnalysis},
    orchestrator::{AnalysisOrchestrator, AnalysisRunState, SessionView},
    reminder::{build_reminder, ReminderOffset, CALENDAR_MIME_TYPE},
    search::TextMatch,
};

const USER_ID_HEADER: &str = "x-user-id";
const USER_EMAIL_HEADER: &str = "x-user-email";

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct QuestionPayload {
    question: String,
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
pub struct ReminderPayload {
    date: String,
    description: String,
    offset: ReminderOffset,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    user: User,
    initials: String,
    saved_count: usize,
    /// `None` para planes sin límite.
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    term: String,
    matches: Vec<TextMatch>,
}

// --- Identidad ---

/// Usuario autenticado por el proxy de entrada (`x-user-id` / `x-user-email`).
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let (Some(uid), Some(email)) = (header_value(USER_ID_HEADER), header_value(USER_EMAIL_HEADER)) else {
            return Err(ApiError::Unauthenticated);
        };

        let tier = state.accounts.subscription_tier(&uid, &email).await?;
        Ok(CurrentUser(User::new(uid, email, &state.config.admin_email, tier)))
    }
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    let upload_limit = app_state.config.max_upload_bytes;

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/me", get(me_handler))
        .route("/api/analysis", post(upload_handler).get(analysis_handler))
        .route("/api/analysis/reset", post(reset_handler))
        .route("/api/analysis/save", post(save_handler))
        .route("/api/analysis/questions", post(question_handler))
        .route("/api/analysis/search", get(search_handler))
        .route("/api/leases", get(list_leases_handler))
        .route("/api/leases/:id/open", post(open_lease_handler))
        .route("/api/reminders", post(reminder_handler))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "storage": state.pipeline.store.backend_name(),
        "llmProvider": format!("{:?}", state.config.llm_provider),
    }))
}

#[axum::debug_handler]
async fn me_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MeResponse>, ApiError> {
    let saved_count = state.pipeline.store.count_by_owner(&user.uid).await?;
    Ok(Json(MeResponse {
        initials: user.initials(),
        saved_count,
        limit: state.pipeline.quota.limit_for(user.subscription_tier),
        user,
    }))
}

/// Acepta la subida (o la rechaza con 409/403) y continúa la ejecución en
/// segundo plano. El frontend sigue el progreso con `GET /api/analysis`.
#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    let mut document = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("lease.pdf").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        document = Some(RawDocument::new(file_name, bytes.to_vec()));
    }

    let document = document
        .filter(|d| d.size_bytes() > 0)
        .ok_or_else(|| ApiError::InvalidRequest("Please upload a PDF file in the 'file' field.".to_string()))?;

    let session = state.session_for(&user.uid);
    let ticket = session.begin(&user, document).await?;

    let runner = session.clone();
    let uid = user.uid.clone();
    spawn(async move {
        match runner.run(ticket).await {
            AnalysisRunState::Results(_) => info!("Análisis listo para '{}'", uid),
            AnalysisRunState::Failed(reason) => warn!("Análisis de '{}' fallido: {}", uid, reason),
            _ => {}
        }
    });

    Ok((StatusCode::ACCEPTED, Json(session.view())))
}

/// Sesión con resultados abiertos; sin sesión no hay nada que consultar.
fn open_session(state: &AppState, uid: &str) -> Result<Arc<AnalysisOrchestrator>, ApiError> {
    state
        .existing_session(uid)
        .ok_or_else(|| Rejection::NoResults.into())
}

#[axum::debug_handler]
async fn analysis_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<SessionView> {
    let view = state
        .existing_session(&user.uid)
        .map(|session| session.view())
        .unwrap_or_else(SessionView::idle);
    Json(view)
}

#[axum::debug_handler]
async fn reset_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<SessionView>, ApiError> {
    if let Some(session) = state.existing_session(&user.uid) {
        session.reset()?;
    }
    state.release_if_idle(&user.uid);
    Ok(Json(SessionView::idle()))
}

#[axum::debug_handler]
async fn save_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = open_session(&state, &user.uid)?.save(&user).await?;
    Ok(Json(json!({ "id": id })))
}

#[axum::debug_handler]
async fn question_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<QuestionPayload>,
) -> Result<Json<ConversationTurn>, ApiError> {
    let turn = open_session(&state, &user.uid)?.ask(&payload.question).await?;
    Ok(Json(turn))
}

#[axum::debug_handler]
async fn search_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let matches = open_session(&state, &user.uid)?.search(&params.q)?;
    Ok(Json(SearchResponse {
        term: params.q,
        matches,
    }))
}

#[axum::debug_handler]
async fn list_leases_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<SavedAnalysis>>, ApiError> {
    Ok(Json(state.pipeline.store.list_by_owner(&user.uid).await?))
}

#[axum::debug_handler]
async fn open_lease_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let saved = state
        .pipeline
        .store
        .find(&user.uid, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;

    let session = state.session_for(&user.uid);
    session.load_saved(saved)?;
    Ok(Json(session.view()))
}

#[axum::debug_handler]
async fn reminder_handler(Json(payload): Json<ReminderPayload>) -> Result<impl IntoResponse, ApiError> {
    let invite = build_reminder(&payload.date, &payload.description, payload.offset, Utc::now())
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    let headers = [
        (header::CONTENT_TYPE, format!("{}; charset=utf-8", CALENDAR_MIME_TYPE)),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", invite.file_name),
        ),
    ];
    Ok((StatusCode::OK, headers, invite.content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::testing::{FixedExtractor, Harness};
    use axum::body::Body;
    use axum::http::{Request, Response};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "sweetleaseboundary";

    fn app_state(harness: &Harness) -> AppState {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        AppState::new(config, harness.pipeline.clone(), harness.store.clone())
    }

    fn app(harness: &Harness) -> Router {
        create_router(app_state(harness))
    }

    fn harness() -> Harness {
        Harness::new(FixedExtractor::pages(&[
            "Tenant: Acme Ltd, Landlord: Roe Properties",
            "rent £1,000 monthly, commencing 01 Jan 2024, term 5 years",
        ]))
    }

    fn authed(method: &str, uri: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_ID_HEADER, "user-1")
            .header(USER_EMAIL_HEADER, "jane.doe@example.com")
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        authed(method, uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload_request(file_name: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        authed("POST", "/api/analysis")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_for_results(app: &Router) -> Value {
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(authed("GET", "/api/analysis").body(Body::empty()).unwrap())
                .await
                .unwrap();
            let view = body_json(response).await;
            if view["state"]["status"] == "results" {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("el análisis no terminó");
    }

    #[tokio::test]
    async fn requests_without_identity_are_unauthorized() {
        let harness = harness();
        let response = app(&harness)
            .oneshot(Request::builder().uri("/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["status"], 401);
    }

    #[tokio::test]
    async fn status_reports_storage_backend() {
        let harness = harness();
        let response = app(&harness)
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["storage"], "memory");
    }

    #[tokio::test]
    async fn me_reports_initials_and_free_limit() {
        let harness = harness();
        let response = app(&harness)
            .oneshot(authed("GET", "/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let me = body_json(response).await;
        assert_eq!(me["initials"], "JD");
        assert_eq!(me["savedCount"], 0);
        assert_eq!(me["limit"], 3);
        assert_eq!(me["user"]["subscriptionTier"], "free");
        assert_eq!(me["user"]["role"], "user");
    }

    #[tokio::test]
    async fn upload_question_save_and_reopen() {
        let harness = harness();
        let app = app(&harness);

        let response = app.clone().oneshot(upload_request("lease.pdf", b"%PDF-1.7 body")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let view = wait_for_results(&app).await;
        assert_eq!(view["state"]["detail"]["parties"]["tenant"], "Acme Ltd");
        assert_eq!(view["fileName"], "lease.pdf");
        assert_eq!(view["criticalDates"][0]["label"], "Rent Payment");

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/analysis/questions", json!({ "question": "Who is the tenant?" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["role"], "model");

        let response = app
            .clone()
            .oneshot(authed("GET", "/api/analysis/search?q=ACME").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let search = body_json(response).await;
        assert_eq!(search["matches"][0]["page"], 1);

        let response = app
            .clone()
            .oneshot(authed("POST", "/api/analysis/save").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(authed("POST", "/api/analysis/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["state"]["status"], "idle");

        let response = app
            .clone()
            .oneshot(authed("GET", "/api/leases").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let leases = body_json(response).await;
        assert_eq!(leases.as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(authed("POST", &format!("/api/leases/{id}/open")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let view = body_json(response).await;
        assert_eq!(view["state"]["status"], "results");
        assert_eq!(view["savedId"], id.as_str());
        assert_eq!(harness.extractor.call_count(), 1);
    }

    #[tokio::test]
    async fn sessions_live_from_upload_until_reset() {
        let harness = harness();
        let state = app_state(&harness);
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(authed("GET", "/api/analysis").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["state"]["status"], "idle");

        let response = app
            .clone()
            .oneshot(authed("GET", "/api/analysis/search?q=rent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(state.existing_session("user-1").is_none());

        let response = app.clone().oneshot(upload_request("lease.pdf", b"%PDF-1.7 body")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        wait_for_results(&app).await;
        assert!(state.existing_session("user-1").is_some());

        let response = app
            .clone()
            .oneshot(authed("POST", "/api/analysis/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["state"]["status"], "idle");
        assert!(state.existing_session("user-1").is_none());
    }

    #[tokio::test]
    async fn upload_at_free_limit_is_forbidden() {
        let harness = harness();
        harness.fill_saved("user-1", 3).await;
        let response = app(&harness)
            .oneshot(upload_request("lease.pdf", b"%PDF-1.7 body"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(harness.extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn upload_without_file_is_bad_request() {
        let harness = harness();
        let response = app(&harness).oneshot(upload_request("lease.pdf", b"")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn question_without_results_conflicts() {
        let harness = harness();
        let response = app(&harness)
            .oneshot(json_request("POST", "/api/analysis/questions", json!({ "question": "Rent?" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn opening_unknown_lease_is_not_found() {
        let harness = harness();
        let response = app(&harness)
            .oneshot(authed("POST", "/api/leases/missing/open").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reminder_download_is_an_ics_attachment() {
        let harness = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/api/reminders")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "date": "31 January 2027", "description": "Break notice", "offset": "1m" }).to_string(),
            ))
            .unwrap();

        let response = app(&harness).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/calendar; charset=utf-8"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"reminder_break_notice.ics\""
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let ics = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(ics.contains("DTSTART;VALUE=DATE:20261231\r\n"));
    }

    #[tokio::test]
    async fn reminder_with_unparseable_date_is_bad_request() {
        let harness = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/api/reminders")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "date": "TBC", "description": "Rent review", "offset": "3m" }).to_string(),
            ))
            .unwrap();
        let response = app(&harness).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
