//! Kernel session registry.
//!
//! Keys live sessions by id. Each session sits behind its own mutex, so the
//! registry map lock is held only for lookups and never across a fragment
//! execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::kernel::channel::KernelChannel;
use crate::kernel::error::KernelError;
use crate::kernel::session::{ExecutionResult, KernelSession};
use crate::kernel::worker::KernelWorker;

pub struct KernelRegistry<C, W> {
    sessions: RwLock<HashMap<String, Arc<Mutex<KernelSession<C, W>>>>>,
}

impl<C, W> Default for KernelRegistry<C, W> {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl<C, W> KernelRegistry<C, W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids of all registered sessions, sorted.
    pub async fn list(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<C: KernelChannel, W: KernelWorker> KernelRegistry<C, W> {
    pub async fn register(&self, session: KernelSession<C, W>) -> Result<(), KernelError> {
        let id = session.id().to_string();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(KernelError::AlreadyRegistered { id });
        }
        info!(kernel_id = %id, "Kernel session registered");
        sessions.insert(id, Arc::new(Mutex::new(session)));
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<KernelSession<C, W>>>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Run one fragment on the named kernel.
    ///
    /// The map lock is released before the session mutex is taken, so long
    /// executions only serialize callers of the same kernel.
    pub async fn execute(
        &self,
        id: &str,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, KernelError> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| KernelError::NotFound { id: id.to_string() })?;
        let mut session = session.lock().await;
        Ok(session.execute(code, timeout).await)
    }

    pub async fn restart(&self, id: &str) -> Result<(), KernelError> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| KernelError::NotFound { id: id.to_string() })?;
        let mut session = session.lock().await;
        session.restart().await
    }

    /// Forget the session and shut its kernel down.
    pub async fn remove(&self, id: &str) -> Result<(), KernelError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(id)
                .ok_or_else(|| KernelError::NotFound { id: id.to_string() })?
        };
        let mut session = session.lock().await;
        session.shutdown().await?;
        info!(kernel_id = %id, "Kernel session removed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use nbexec_core::config::KernelConfig;

    use crate::kernel::session::ExecutionStatus;
    use crate::kernel::wire::{ExecutionState, KernelMessage, MessageContent};

    struct IdleChannel;

    #[async_trait]
    impl KernelChannel for IdleChannel {
        async fn submit(&mut self, _code: &str) -> Result<String, KernelError> {
            Ok("req".to_string())
        }

        async fn recv(
            &mut self,
            _timeout: Duration,
        ) -> Result<Option<KernelMessage>, KernelError> {
            Ok(Some(KernelMessage {
                parent_id: Some("req".to_string()),
                content: MessageContent::Status {
                    state: ExecutionState::Idle,
                },
            }))
        }
    }

    struct NoopWorker;

    #[async_trait]
    impl KernelWorker for NoopWorker {
        async fn interrupt(&mut self) -> Result<(), KernelError> {
            Ok(())
        }

        async fn restart(&mut self) -> Result<(), KernelError> {
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<(), KernelError> {
            Ok(())
        }

        async fn is_alive(&mut self) -> bool {
            true
        }
    }

    fn test_session(id: &str) -> KernelSession<IdleChannel, NoopWorker> {
        KernelSession::new(id, IdleChannel, NoopWorker, &KernelConfig::default())
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let registry = KernelRegistry::new();
        registry.register(test_session("k1")).await.expect("first");
        let err = registry
            .register(test_session("k1"))
            .await
            .expect_err("duplicate id");
        assert!(matches!(err, KernelError::AlreadyRegistered { .. }));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn execute_unknown_kernel_not_found() {
        let registry: KernelRegistry<IdleChannel, NoopWorker> = KernelRegistry::new();
        let err = registry
            .execute("ghost", "print(1)", Some(Duration::from_secs(1)))
            .await
            .expect_err("unknown kernel");
        assert!(matches!(err, KernelError::NotFound { .. }));
    }

    #[tokio::test]
    async fn execute_routes_to_session() {
        let registry = KernelRegistry::new();
        registry.register(test_session("k1")).await.expect("register");
        let result = registry
            .execute("k1", "pass", Some(Duration::from_secs(1)))
            .await
            .expect("execute");
        assert_eq!(result.status, ExecutionStatus::Ok);
        assert_eq!(result.sequence, 1);
    }

    #[tokio::test]
    async fn remove_forgets_session() {
        let registry = KernelRegistry::new();
        registry.register(test_session("k1")).await.expect("register");
        registry.remove("k1").await.expect("remove");
        assert!(registry.is_empty().await);
        let err = registry.remove("k1").await.expect_err("already gone");
        assert!(matches!(err, KernelError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let registry = KernelRegistry::new();
        registry.register(test_session("kb")).await.expect("register");
        registry.register(test_session("ka")).await.expect("register");
        assert_eq!(registry.list().await, vec!["ka", "kb"]);
    }
}
