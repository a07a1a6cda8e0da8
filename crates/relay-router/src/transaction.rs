//! Optional transactional boundary around the routing unit of work.
//!
//! The router only knows begin/commit/rollback as a callback boundary; how a
//! transaction joins an ambient one, and what commit/rollback actually do,
//! is owned by the external transaction collaborator.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// How the router resolves a transaction around one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionAction {
    /// Run without transaction management, whatever is ambient.
    #[default]
    Indifferent,
    /// Never run inside a transaction.
    None,
    /// Always begin a new transaction.
    AlwaysBegin,
    /// Join the ambient transaction, beginning one when none is active.
    BeginOrJoin,
    /// Join the ambient transaction when one is active, else run without.
    JoinIfPossible,
}

impl TransactionAction {
    /// Whether this action consults the factory at all.
    fn resolves_transaction(&self) -> bool {
        !matches!(self, Self::Indifferent | Self::None)
    }
}

/// A transaction in progress. Consumed by completion.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

/// Collaborator resolving transactions for the configured action. The
/// factory owns the begin-vs-join policy detail; returning `None` means the
/// unit of work runs without a transaction for this action.
#[async_trait]
pub trait TransactionFactory: Send + Sync {
    async fn resolve(&self, action: TransactionAction)
        -> anyhow::Result<Option<Box<dyn Transaction>>>;
}

#[derive(Clone)]
pub struct TransactionConfig {
    pub action: TransactionAction,
    pub factory: Arc<dyn TransactionFactory>,
}

impl TransactionConfig {
    pub fn new(action: TransactionAction, factory: Arc<dyn TransactionFactory>) -> Self {
        Self { action, factory }
    }
}

impl fmt::Debug for TransactionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionConfig")
            .field("action", &self.action)
            .finish()
    }
}

/// Executes one unit of work under the configured transactional boundary:
/// resolve/begin per policy, commit on success, roll back on failure. No
/// automatic retry.
pub struct TransactionTemplate {
    config: Option<TransactionConfig>,
}

impl TransactionTemplate {
    pub fn new(config: Option<TransactionConfig>) -> Self {
        Self { config }
    }

    pub async fn execute<T, F>(&self, work: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        let transaction = self.resolve().await?;
        match work.await {
            Ok(value) => {
                if let Some(transaction) = transaction {
                    debug!("Unit of work succeeded, committing transaction");
                    transaction.commit().await?;
                }
                Ok(value)
            }
            Err(error) => {
                if let Some(transaction) = transaction {
                    debug!("Unit of work failed, rolling back transaction");
                    if let Err(rollback_error) = transaction.rollback().await {
                        // The unit-of-work failure is the one the caller
                        // needs; the rollback failure is only logged.
                        warn!(error = %rollback_error, "Transaction rollback failed");
                    }
                }
                Err(error)
            }
        }
    }

    async fn resolve(&self) -> anyhow::Result<Option<Box<dyn Transaction>>> {
        match &self.config {
            Some(config) if config.action.resolves_transaction() => {
                config.factory.resolve(config.action).await
            }
            _ => Ok(None),
        }
    }
}
