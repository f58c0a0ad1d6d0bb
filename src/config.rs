use serde::Deserialize;

use crate::flow::MasterAccount;

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub supabase: SupabaseConfig,
    /// Domain used for deterministic synthetic backend accounts.
    pub synthetic_email_domain: String,
    pub master_identifier: Option<String>,
    pub master_password_hash: Option<String>,
    pub session_ttl_days: i64,
    /// Where the console binary persists its local session.
    pub session_file: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let supabase = SupabaseConfig {
            url: std::env::var("SUPABASE_URL")?,
            anon_key: std::env::var("SUPABASE_ANON_KEY")?,
        };
        Ok(Self {
            database_url,
            supabase,
            synthetic_email_domain: std::env::var("SYNTHETIC_EMAIL_DOMAIN")
                .unwrap_or_else(|_| "clientes.carteira.app".into()),
            master_identifier: std::env::var("MASTER_IDENTIFIER").ok(),
            master_password_hash: std::env::var("MASTER_PASSWORD_HASH").ok(),
            session_ttl_days: std::env::var("SESSION_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(30),
            session_file: std::env::var("SESSION_FILE")
                .unwrap_or_else(|_| "carteira-session.json".into()),
        })
    }

    /// The privileged account, enabled only when both settings are present.
    pub fn master_account(&self) -> Option<MasterAccount> {
        match (&self.master_identifier, &self.master_password_hash) {
            (Some(identifier), Some(password_hash)) => Some(MasterAccount {
                identifier: identifier.clone(),
                password_hash: password_hash.clone(),
            }),
            _ => None,
        }
    }
}
