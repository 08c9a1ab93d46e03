// Módulos de la aplicación
mod accounts;
mod analyzer;
mod api;
mod app_state;
mod config;
mod error;
mod extractor;
mod llm;
mod models;
mod orchestrator;
mod qa;
mod reminder;
mod search;
mod store;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    accounts::{AccountDirectory, QuotaPolicy},
    analyzer::SchemaConstrainedAnalyzer,
    app_state::AppState,
    extractor::PdfTextExtractor,
    llm::{GenerativeModel, LlmManager},
    orchestrator::Pipeline,
    qa::GroundedResponder,
    store::{InMemoryStore, LeaseStore, Neo4jStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Almacenamiento: Neo4j si está configurado, memoria si no
    let (store, accounts): (Arc<dyn LeaseStore>, Arc<dyn AccountDirectory>) = match &cfg.neo4j {
        Some(neo4j) => {
            let store = Arc::new(
                Neo4jStore::connect(neo4j)
                    .await
                    .context("Error conectando a Neo4j")?,
            );
            (store.clone() as Arc<dyn LeaseStore>, store as Arc<dyn AccountDirectory>)
        }
        None => {
            warn!("NEO4J_URI no definido: los análisis guardados sólo vivirán en memoria.");
            let store = Arc::new(InMemoryStore::new());
            (store.clone() as Arc<dyn LeaseStore>, store as Arc<dyn AccountDirectory>)
        }
    };

    // 4. Inicializar gestor de LLMs y componentes del pipeline
    let llm: Arc<dyn GenerativeModel> = Arc::new(LlmManager::from_config(&cfg));
    info!(
        "LLM: {:?} / {} (timeout {:?})",
        cfg.llm_provider, cfg.llm_chat_model, cfg.llm_timeout
    );

    let pipeline = Pipeline {
        extractor: Arc::new(PdfTextExtractor::new(cfg.extraction_timeout)),
        analyzer: Arc::new(SchemaConstrainedAnalyzer::new(llm.clone())),
        responder: Arc::new(GroundedResponder::new(llm)),
        store,
        quota: QuotaPolicy::new(cfg.free_tier_limit),
    };

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState::new(cfg.clone(), pipeline, accounts);

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    let server_url = format!("http://{}", cfg.server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Apagado ordenado con Ctrl+C.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
