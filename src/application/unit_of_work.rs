//! Write scopes: one store transaction plus the change batch it fills.
//!
//! Descriptors collected in a scope reach the caches only after the
//! transaction commits. Abandoning or dropping a scope discards them.

use time::OffsetDateTime;
use tracing::{debug, error, warn};

use crate::application::repos::{ContentStore, ContentTransaction, RepoError};
use crate::cache::{ChangeBatch, ChannelError};
use crate::cluster::{ClusterMessenger, FlushReport};

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    /// The transaction committed but the caches could not be updated.
    #[error("committed, but flushing cache changes failed")]
    Flush(#[source] ChannelError),
}

pub struct WriteScope {
    tx: Box<dyn ContentTransaction>,
    changes: ChangeBatch,
    now: OffsetDateTime,
}

impl WriteScope {
    pub async fn begin(store: &dyn ContentStore) -> Result<Self, RepoError> {
        Ok(Self {
            tx: store.begin().await?,
            changes: ChangeBatch::new(),
            now: OffsetDateTime::now_utc(),
        })
    }

    /// Pin the scope's clock; guards compare release and expire dates to it.
    pub fn at(mut self, now: OffsetDateTime) -> Self {
        self.now = now;
        self
    }

    pub fn now(&self) -> OffsetDateTime {
        self.now
    }

    pub fn tx(&mut self) -> &mut dyn ContentTransaction {
        self.tx.as_mut()
    }

    pub fn changes(&mut self) -> &mut ChangeBatch {
        &mut self.changes
    }

    pub fn pending(&self) -> usize {
        self.changes.len()
    }

    /// Commit the transaction, then flush the batch exactly once.
    pub async fn commit(self, messenger: &ClusterMessenger) -> Result<FlushReport, CommitError> {
        let WriteScope { tx, changes, .. } = self;
        tx.commit().await?;
        messenger.flush(changes).map_err(|err| {
            error!(error = %err, "Cache flush rejected after commit");
            CommitError::Flush(err)
        })
    }

    /// Commit when `result` is `Ok`, otherwise roll back; the result passes
    /// through unless the commit itself fails.
    pub async fn complete<T, E>(
        self,
        messenger: &ClusterMessenger,
        result: Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<CommitError>,
    {
        match result {
            Ok(value) => {
                self.commit(messenger).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.abandon().await {
                    warn!(error = %rollback, "Rollback failed after a rejected write");
                }
                Err(err)
            }
        }
    }

    /// Roll back and drop every collected descriptor.
    pub async fn abandon(self) -> Result<(), RepoError> {
        let WriteScope { tx, changes, .. } = self;
        if !changes.is_empty() {
            debug!(discarded = changes.len(), "Write scope abandoned");
        }
        tx.rollback().await
    }
}
