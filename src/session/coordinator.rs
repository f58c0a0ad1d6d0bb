use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::session::backend::{client_metadata, AuthBackend};
use crate::session::store::{LocalSession, SessionStore};

/// Terminal state of one backend reconciliation attempt. Whatever the
/// outcome, the local session stands: the backend session only exists to
/// satisfy row-level-security policies on downstream queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Backend session already carries the right client id.
    AlreadyConsistent,
    /// Backend session pointed at another client; metadata was corrected.
    MetadataPatched,
    SignedIn,
    SignedUp,
    /// Anonymous backend session with patched metadata.
    Anonymous,
    /// Every rung of the ladder failed; logged and accepted.
    Unreconciled,
}

/// Result of establishing the dual session.
#[derive(Debug)]
pub struct Established {
    pub session: LocalSession,
    pub reconciliation: Reconciliation,
}

/// Keeps the locally persisted session and the hosted provider's native
/// session in step. Local persistence is authoritative and happens first;
/// backend reconciliation is best-effort and can never revoke it.
pub struct SessionCoordinator {
    store: Arc<SessionStore>,
    backend: Arc<dyn AuthBackend>,
    synthetic_domain: String,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<SessionStore>,
        backend: Arc<dyn AuthBackend>,
        synthetic_domain: &str,
    ) -> Self {
        Self {
            store,
            backend,
            synthetic_domain: synthetic_domain.to_string(),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Deterministic email for the synthetic backend account of a client.
    pub fn synthetic_email(&self, user_id: &str) -> String {
        let slug: String = user_id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_lowercase();
        format!("client-{slug}@{}", self.synthetic_domain)
    }

    /// Establish the dual session. `credential` is the just-verified
    /// plaintext when the call site has one; the user id doubles as the
    /// synthetic password otherwise.
    pub async fn establish_session(
        &self,
        user_id: &str,
        user_name: &str,
        credential: Option<&str>,
    ) -> Result<Established, AuthError> {
        if user_id.trim().is_empty() {
            return Err(AuthError::InvalidInput("user_id"));
        }

        // Local persistence first; from here on the user is logged in no
        // matter what the backend says.
        let session = self.store.set(user_id, user_name);
        info!(user_id = %user_id, "local session established");

        let reconciliation = self.reconcile(user_id, user_name, credential).await;
        match reconciliation {
            Reconciliation::Unreconciled => {
                warn!(user_id = %user_id, "backend session could not be reconciled")
            }
            outcome => debug!(user_id = %user_id, ?outcome, "backend session reconciled"),
        }

        self.store.notify_changed();
        Ok(Established {
            session,
            reconciliation,
        })
    }

    async fn reconcile(
        &self,
        user_id: &str,
        user_name: &str,
        credential: Option<&str>,
    ) -> Reconciliation {
        let current = match self.backend.current_user().await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "backend session read failed");
                None
            }
        };

        match current {
            Some(user) => match user.client_id() {
                Some(client_id) if client_id == user_id => Reconciliation::AlreadyConsistent,
                mismatch => {
                    // detectable anomaly, never fatal
                    warn!(
                        local_id = %user_id,
                        backend_client_id = ?mismatch,
                        backend_user = %user.id,
                        "backend session does not match local session"
                    );
                    if let Err(e) = self
                        .backend
                        .update_user_metadata(client_metadata(user_id, user_name))
                        .await
                    {
                        warn!(error = %e, "backend metadata update failed");
                        return Reconciliation::Unreconciled;
                    }
                    if let Err(e) = self.backend.refresh_session().await {
                        warn!(error = %e, "backend session refresh failed");
                    }
                    Reconciliation::MetadataPatched
                }
            },
            None => {
                let email = self.synthetic_email(user_id);
                let password = credential.unwrap_or(user_id);

                match self.backend.sign_in_with_password(&email, password).await {
                    Ok(_) => return Reconciliation::SignedIn,
                    Err(e) => debug!(error = %e, "synthetic sign-in failed, trying sign-up"),
                }

                match self
                    .backend
                    .sign_up(&email, password, client_metadata(user_id, user_name))
                    .await
                {
                    Ok(_) => return Reconciliation::SignedUp,
                    Err(e) => debug!(error = %e, "synthetic sign-up failed, trying anonymous"),
                }

                match self.backend.sign_in_anonymously().await {
                    Ok(_) => {
                        if let Err(e) = self
                            .backend
                            .update_user_metadata(client_metadata(user_id, user_name))
                            .await
                        {
                            warn!(error = %e, "metadata update on anonymous session failed");
                        }
                        Reconciliation::Anonymous
                    }
                    Err(e) => {
                        warn!(error = %e, "anonymous sign-in failed");
                        Reconciliation::Unreconciled
                    }
                }
            }
        }
    }

    /// Tear down both sessions. Backend sign-out is best-effort; the local
    /// keys are removed regardless. Idempotent.
    pub async fn clear_session(&self) {
        if let Err(e) = self.backend.sign_out().await {
            warn!(error = %e, "backend sign-out failed");
        }
        self.store.clear();
        self.store.notify_changed();
        info!("session cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::backend::{BackendUser, FakeBackend};
    use crate::session::store::MemStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator(backend: Arc<FakeBackend>) -> SessionCoordinator {
        let store = Arc::new(SessionStore::new(Arc::new(MemStorage::new()), 30));
        SessionCoordinator::new(store, backend, "clientes.test")
    }

    #[test]
    fn synthetic_email_is_deterministic_and_sanitized() {
        let coord = coordinator(Arc::new(FakeBackend::new()));
        assert_eq!(
            coord.synthetic_email("+5511999998888"),
            "client-5511999998888@clientes.test"
        );
        assert_eq!(
            coord.synthetic_email("U-123"),
            coord.synthetic_email("u123")
        );
    }

    #[tokio::test]
    async fn establish_rejects_empty_user_id() {
        let coord = coordinator(Arc::new(FakeBackend::new()));
        let err = coord.establish_session("  ", "Maria", None).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidInput(_)));
        assert!(coord.store().get().is_none());
    }

    #[tokio::test]
    async fn local_session_survives_total_backend_failure() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_everything();
        let coord = coordinator(backend);

        let established = coord
            .establish_session("u1", "Maria", Some("s3cret!"))
            .await
            .expect("local establishment must not depend on the backend");
        assert_eq!(established.reconciliation, Reconciliation::Unreconciled);
        assert_eq!(established.session.user_id, "u1");
        assert_eq!(coord.store().get().unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn fresh_client_signs_up_then_later_signs_in() {
        let backend = Arc::new(FakeBackend::new());
        let coord = coordinator(backend.clone());

        let first = coord
            .establish_session("u1", "Maria", Some("s3cret!"))
            .await
            .unwrap();
        assert_eq!(first.reconciliation, Reconciliation::SignedUp);
        assert_eq!(backend.current().unwrap().client_id(), Some("u1"));

        backend.configure(|s| s.current = None);
        let second = coord
            .establish_session("u1", "Maria", Some("s3cret!"))
            .await
            .unwrap();
        assert_eq!(second.reconciliation, Reconciliation::SignedIn);
    }

    #[tokio::test]
    async fn consistent_backend_session_is_left_alone() {
        let backend = Arc::new(FakeBackend::new());
        backend.configure(|s| {
            s.current = Some(BackendUser {
                id: "b1".into(),
                email: None,
                metadata: client_metadata("u1", "Maria"),
            });
        });
        let coord = coordinator(backend.clone());

        let established = coord.establish_session("u1", "Maria", None).await.unwrap();
        assert_eq!(established.reconciliation, Reconciliation::AlreadyConsistent);
        assert_eq!(backend.calls(), vec!["current_user"]);
    }

    #[tokio::test]
    async fn mismatched_backend_session_gets_patched_and_refreshed() {
        let backend = Arc::new(FakeBackend::new());
        backend.configure(|s| {
            s.current = Some(BackendUser {
                id: "b1".into(),
                email: None,
                metadata: client_metadata("someone-else", "Other"),
            });
        });
        let coord = coordinator(backend.clone());

        let established = coord.establish_session("u1", "Maria", None).await.unwrap();
        assert_eq!(established.reconciliation, Reconciliation::MetadataPatched);
        assert_eq!(backend.current().unwrap().client_id(), Some("u1"));
        assert!(backend.calls().contains(&"refresh_session"));
    }

    #[tokio::test]
    async fn anonymous_fallback_patches_metadata() {
        let backend = Arc::new(FakeBackend::new());
        backend.configure(|s| {
            s.fail_sign_in = true;
            s.fail_sign_up = true;
        });
        let coord = coordinator(backend.clone());

        let established = coord.establish_session("u1", "Maria", None).await.unwrap();
        assert_eq!(established.reconciliation, Reconciliation::Anonymous);
        assert_eq!(backend.current().unwrap().client_id(), Some("u1"));
    }

    #[tokio::test]
    async fn establish_notifies_even_when_unreconciled() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_everything();
        let coord = coordinator(backend);

        let fired = Arc::new(AtomicUsize::new(0));
        let observed = fired.clone();
        coord.store().subscribe(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        coord.establish_session("u1", "Maria", None).await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_session_survives_backend_sign_out_failure() {
        let backend = Arc::new(FakeBackend::new());
        let coord = coordinator(backend.clone());
        coord.establish_session("u1", "Maria", None).await.unwrap();

        backend.configure(|s| s.fail_sign_out = true);
        coord.clear_session().await;
        assert!(coord.store().get().is_none());

        // idempotent: clearing with no session is not an error
        coord.clear_session().await;
        assert!(coord.store().get().is_none());
    }
}
