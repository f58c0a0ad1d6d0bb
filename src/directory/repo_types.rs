use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// One registered account in the hosted `users` table.
///
/// Accounts are created out-of-band; this subsystem only reads them and,
/// during first-time setup, writes `password_hash` and flips
/// `registration_complete`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRecord {
    pub id: String,                               // stable unique identifier
    pub identifier: Option<String>,               // phone-style login ID
    pub email: Option<String>,                    // case-insensitive unique in practice
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,            // bcrypt hash, legacy plaintext, or unset
    pub display_name: String,
    pub registration_complete: bool,
    pub subscription_status: Option<String>,
    pub expiration_date: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}
