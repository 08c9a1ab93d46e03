//! Vista del colaborador de autenticación: identidad del usuario, rol, plan
//! de suscripción y la política de cuota del plan gratuito.
//!
//! La autenticación en sí (login, sesiones) y la facturación quedan fuera: el
//! plan llega ya resuelto desde el directorio de cuentas.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QuotaExceeded;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Pro,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }

    /// Valores desconocidos se tratan como plan gratuito.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "pro" => Self::Pro,
            _ => Self::Free,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub email: String,
    pub role: Role,
    pub subscription_tier: SubscriptionTier,
}

impl User {
    pub fn new(uid: impl Into<String>, email: impl Into<String>, admin_email: &str, tier: SubscriptionTier) -> Self {
        let email = email.into();
        let role = if email.eq_ignore_ascii_case(admin_email) {
            Role::Admin
        } else {
            Role::User
        };
        Self {
            uid: uid.into(),
            email,
            role,
            subscription_tier: tier,
        }
    }

    /// Iniciales para el avatar: primera letra de la primera y la última parte
    /// del usuario del e-mail (separadas por `.`, `_` o `-`), o sus dos primeros caracteres.
    pub fn initials(&self) -> String {
        let local = self.email.split('@').next().unwrap_or_default();
        let parts: Vec<&str> = local
            .split(|c| c == '.' || c == '_' || c == '-')
            .filter(|p| !p.is_empty())
            .collect();

        let initials: String = match parts.as_slice() {
            [first, .., last] => first.chars().take(1).chain(last.chars().take(1)).collect(),
            _ => local.chars().take(2).collect(),
        };
        initials.to_uppercase()
    }
}

/// Límite de análisis guardados por plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub free_tier_limit: usize,
}

impl QuotaPolicy {
    pub fn new(free_tier_limit: usize) -> Self {
        Self { free_tier_limit }
    }

    /// `None` si el plan no tiene límite.
    pub fn limit_for(&self, tier: SubscriptionTier) -> Option<usize> {
        match tier {
            SubscriptionTier::Free => Some(self.free_tier_limit),
            SubscriptionTier::Pro => None,
        }
    }

    pub fn check(&self, user: &User, saved_count: usize) -> Result<(), QuotaExceeded> {
        match self.limit_for(user.subscription_tier) {
            Some(limit) if saved_count >= limit => Err(QuotaExceeded { limit }),
            _ => Ok(()),
        }
    }
}

/// Directorio de cuentas: resuelve el plan de un usuario autenticado.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Registra la cuenta como `free` si aún no existe.
    async fn subscription_tier(&self, uid: &str, email: &str) -> Result<SubscriptionTier>;
}
