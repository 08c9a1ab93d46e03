//! Carga y gestión de configuración de la aplicación (servidor, LLM, Neo4j y cuotas).

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAI,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Modelo de chat por defecto de cada proveedor.
    pub fn default_chat_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.5-flash",
            Self::OpenAI => "gpt-4o-mini",
            Self::Ollama => "llama3.1",
        }
    }
}

/// Credenciales de Neo4j. Sólo existen si `NEO4J_URI` está definido.
#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub frontend_dir: String,
    pub open_browser: bool,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    pub llm_timeout: Duration,
    pub extraction_timeout: Duration,

    pub neo4j: Option<Neo4jConfig>,

    pub free_tier_limit: usize,
    pub max_upload_bytes: usize,
    pub admin_email: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de consulta de claves.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let server_addr = var_or("SERVER_ADDR", "127.0.0.1:3322");
        let frontend_dir = var_or("FRONTEND_DIR", "frontend");
        let open_browser = parse_bool("OPEN_BROWSER", &var_or("OPEN_BROWSER", "false"))?;

        let llm_provider = LlmProvider::from_str(&var_or("LLM_PROVIDER", "gemini"))?;
        let llm_chat_model = lookup("LLM_CHAT_MODEL")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| llm_provider.default_chat_model().to_string());
        let llm_timeout = Duration::from_secs(parse_number("LLM_TIMEOUT_SECS", &var_or("LLM_TIMEOUT_SECS", "60"))?);
        let extraction_timeout = Duration::from_secs(parse_number(
            "EXTRACTION_TIMEOUT_SECS",
            &var_or("EXTRACTION_TIMEOUT_SECS", "30"),
        )?);

        let neo4j = match lookup("NEO4J_URI") {
            Some(uri) => Some(Neo4jConfig {
                uri,
                user: lookup("NEO4J_USER").ok_or_else(|| anyhow!("Falta NEO4J_USER en el entorno"))?,
                password: lookup("NEO4J_PASSWORD")
                    .ok_or_else(|| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?,
            }),
            None => None,
        };

        let free_tier_limit = parse_number("FREE_TIER_LIMIT", &var_or("FREE_TIER_LIMIT", "3"))? as usize;
        let max_upload_mb = parse_number("MAX_UPLOAD_MB", &var_or("MAX_UPLOAD_MB", "20"))?;
        let max_upload_bytes = usize::try_from(max_upload_mb)
            .ok()
            .and_then(|mb| mb.checked_mul(1024 * 1024))
            .ok_or_else(|| anyhow!("MAX_UPLOAD_MB es demasiado grande (valor: {max_upload_mb})"))?;
        let admin_email = var_or("ADMIN_EMAIL", "admin@sweetlease.app");

        Ok(Self {
            server_addr,
            frontend_dir,
            open_browser,
            llm_provider,
            llm_chat_model,
            llm_timeout,
            extraction_timeout,
            neo4j,
            free_tier_limit,
            max_upload_bytes,
            admin_email,
        })
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("{key} debe ser un entero positivo (valor: '{raw}')"))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("{key} debe ser booleano (valor: '{other}')")),
    }
}
