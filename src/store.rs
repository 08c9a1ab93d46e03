//! Persistencia de análisis guardados y directorio de cuentas.
//!
//! Dos implementaciones:
//!   - `Neo4jStore`: grafo `(:User)-[:OWNS]->(:Lease)` con `neo4rs`.
//!   - `InMemoryStore`: para desarrollo sin Neo4j y para los tests.
//!
//! El orquestador sólo llama a `save` tras una acción explícita del usuario,
//! nunca durante una ejecución.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::{
    accounts::{AccountDirectory, SubscriptionTier},
    config::Neo4jConfig,
    models::{LeaseRecord, SavedAnalysis},
};

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Devuelve el id del nuevo registro.
    async fn save(
        &self,
        record: &LeaseRecord,
        full_text: &str,
        file_name: &str,
        owner_id: &str,
    ) -> Result<String>;

    /// Más recientes primero.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SavedAnalysis>>;

    async fn count_by_owner(&self, owner_id: &str) -> Result<usize>;

    async fn find(&self, owner_id: &str, id: &str) -> Result<Option<SavedAnalysis>>;

    fn backend_name(&self) -> &'static str;
}

// --- Neo4j ---

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub async fn connect(cfg: &Neo4jConfig) -> Result<Self> {
        let url = Url::parse(&cfg.uri).with_context(|| format!("NEO4J_URI inválida: {}", cfg.uri))?;
        let host = url.host_str().unwrap_or("localhost");
        let port = url.port().unwrap_or(7687);
        let addr = format!("{host}:{port}");

        info!("Conectando a Neo4j en {addr}...");
        let graph = Graph::new(&addr, &cfg.user, &cfg.password).await?;
        info!("Conexión a Neo4j OK");

        let store = Self { graph };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Constraints de unicidad para :User y :Lease.
    async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT user_uid IF NOT EXISTS
             FOR (u:User)
             REQUIRE u.uid IS UNIQUE",
            "CREATE CONSTRAINT lease_id IF NOT EXISTS
             FOR (l:Lease)
             REQUIRE l.id IS UNIQUE",
        ];

        for stmt in statements {
            self.graph.run(query(stmt)).await?;
        }

        info!("Esquema de Neo4j asegurado.");
        Ok(())
    }

    async fn fetch_leases(&self, owner_id: &str, id: Option<&str>) -> Result<Vec<SavedAnalysis>> {
        let cypher = match id {
            Some(_) => {
                "MATCH (u:User {uid: $uid})-[:OWNS]->(l:Lease {id: $id})
                 RETURN l.id AS id, l.file_name AS file_name, l.lease_json AS lease_json,
                        l.full_text AS full_text, l.created_at AS created_at"
            }
            None => {
                "MATCH (u:User {uid: $uid})-[:OWNS]->(l:Lease)
                 RETURN l.id AS id, l.file_name AS file_name, l.lease_json AS lease_json,
                        l.full_text AS full_text, l.created_at AS created_at
                 ORDER BY l.created_at DESC"
            }
        };

        let mut q = query(cypher).param("uid", owner_id.to_string());
        if let Some(id) = id {
            q = q.param("id", id.to_string());
        }

        let mut cursor = self.graph.execute(q).await?;
        let mut leases = Vec::new();
        while let Some(row) = cursor.next().await? {
            let (Some(id), Some(lease_json)) = (row.get::<String>("id"), row.get::<String>("lease_json")) else {
                continue;
            };
            let lease_data: LeaseRecord = serde_json::from_str(&lease_json)
                .with_context(|| format!("lease_json corrupto en :Lease {id}"))?;
            leases.push(SavedAnalysis {
                id,
                user_id: owner_id.to_string(),
                file_name: row.get("file_name").unwrap_or_default(),
                lease_data,
                full_text: row.get("full_text").unwrap_or_default(),
                created_at: row.get("created_at").unwrap_or_default(),
            });
        }
        Ok(leases)
    }
}

#[async_trait]
impl LeaseStore for Neo4jStore {
    async fn save(
        &self,
        record: &LeaseRecord,
        full_text: &str,
        file_name: &str,
        owner_id: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let lease_json = serde_json::to_string(record)?;

        self.graph
            .run(
                query(
                    "MERGE (u:User {uid: $uid})
                     ON CREATE SET u.subscription_tier = $tier
                     CREATE (l:Lease {id: $id, file_name: $file_name, lease_json: $lease_json,
                                      full_text: $full_text, created_at: $created_at})
                     CREATE (u)-[:OWNS]->(l)",
                )
                .param("uid", owner_id.to_string())
                .param("tier", SubscriptionTier::Free.as_str().to_string())
                .param("id", id.clone())
                .param("file_name", file_name.to_string())
                .param("lease_json", lease_json)
                .param("full_text", full_text.to_string())
                .param("created_at", Utc::now().to_rfc3339()),
            )
            .await?;

        info!("Análisis '{}' guardado como :Lease {}", file_name, id);
        Ok(id)
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SavedAnalysis>> {
        self.fetch_leases(owner_id, None).await
    }

    async fn count_by_owner(&self, owner_id: &str) -> Result<usize> {
        let mut cursor = self
            .graph
            .execute(
                query("MATCH (:User {uid: $uid})-[:OWNS]->(l:Lease) RETURN count(l) AS total")
                    .param("uid", owner_id.to_string()),
            )
            .await?;

        let total = match cursor.next().await? {
            Some(row) => row.get::<i64>("total").unwrap_or(0),
            None => 0,
        };
        Ok(usize::try_from(total).unwrap_or(0))
    }

    async fn find(&self, owner_id: &str, id: &str) -> Result<Option<SavedAnalysis>> {
        Ok(self.fetch_leases(owner_id, Some(id)).await?.into_iter().next())
    }

    fn backend_name(&self) -> &'static str {
        "neo4j"
    }
}

#[async_trait]
impl AccountDirectory for Neo4jStore {
    async fn subscription_tier(&self, uid: &str, email: &str) -> Result<SubscriptionTier> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MERGE (u:User {uid: $uid})
                     ON CREATE SET u.subscription_tier = $tier
                     SET u.email = $email
                     RETURN u.subscription_tier AS tier",
                )
                .param("uid", uid.to_string())
                .param("email", email.to_string())
                .param("tier", SubscriptionTier::Free.as_str().to_string()),
            )
            .await?;

        let tier = match cursor.next().await? {
            Some(row) => row.get::<String>("tier").unwrap_or_default(),
            None => String::new(),
        };
        Ok(SubscriptionTier::parse(&tier))
    }
}

// --- Memoria ---

#[derive(Default)]
pub struct InMemoryStore {
    leases: Mutex<Vec<SavedAnalysis>>,
    tiers: Mutex<HashMap<String, SubscriptionTier>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn set_tier(&self, uid: &str, tier: SubscriptionTier) {
        self.tiers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid.to_string(), tier);
    }
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    async fn save(
        &self,
        record: &LeaseRecord,
        full_text: &str,
        file_name: &str,
        owner_id: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SavedAnalysis {
                id: id.clone(),
                user_id: owner_id.to_string(),
                file_name: file_name.to_string(),
                lease_data: record.clone(),
                full_text: full_text.to_string(),
                created_at: Utc::now().to_rfc3339(),
            });
        Ok(id)
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<SavedAnalysis>> {
        let leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(leases
            .iter()
            .rev()
            .filter(|l| l.user_id == owner_id)
            .cloned()
            .collect())
    }

    async fn count_by_owner(&self, owner_id: &str) -> Result<usize> {
        let leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(leases.iter().filter(|l| l.user_id == owner_id).count())
    }

    async fn find(&self, owner_id: &str, id: &str) -> Result<Option<SavedAnalysis>> {
        let leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(leases
            .iter()
            .find(|l| l.user_id == owner_id && l.id == id)
            .cloned())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl AccountDirectory for InMemoryStore {
    async fn subscription_tier(&self, uid: &str, _email: &str) -> Result<SubscriptionTier> {
        let mut tiers = self.tiers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(*tiers.entry(uid.to_string()).or_insert(SubscriptionTier::Free))
    }
}
