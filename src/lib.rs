//! Authentication and session reconciliation for the Carteira finance
//! companion.
//!
//! The flow is: resolve a login identifier (phone-style ID or email)
//! against the hosted `users` table, branch on whether the account already
//! has a password, verify or create one, then establish a dual session —
//! a locally persisted identity that alone decides "logged in", plus a
//! best-effort reconciled session with the hosted auth provider so its
//! row-level-security policies accept downstream queries.

pub mod config;
pub mod directory;
pub mod error;
pub mod flow;
pub mod identifier;
pub mod password;
pub mod session;

pub use config::AppConfig;
pub use directory::{lookup_user, PgUserStore, UserRecord, UserStore};
pub use error::AuthError;
pub use flow::{AuthFlow, FlowStep, MasterAccount};
pub use identifier::LookupMethod;
pub use password::{set_password, StoredPassword};
pub use session::{
    AuthBackend, GoTrueClient, LocalSession, SessionCoordinator, SessionStore,
};
