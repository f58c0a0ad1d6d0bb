pub mod backend;
pub mod coordinator;
pub mod gotrue;
pub mod store;

pub use backend::{AuthBackend, BackendSession, BackendUser, FakeBackend};
pub use coordinator::{Established, Reconciliation, SessionCoordinator};
pub use gotrue::GoTrueClient;
pub use store::{FileStorage, LocalSession, MemStorage, SessionEvent, SessionStorage, SessionStore};
