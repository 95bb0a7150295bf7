use core::time::Duration;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    ANY_VERSION, CompositeKey, CoordinationClient, CoordinationConfig, CoordinationSessionManager,
    Result,
    batch::{check_count, collect_batch_async},
    key::check_composite,
};

/// Issues sequence numbers from node versions in the coordination service.
///
/// Each composite key owns the node `/<prefix>/<composite key>`. Issuing an
/// ID performs an unconditional write to that node and returns the new
/// version, so IDs for one key are strictly increasing across every client
/// of the same ensemble. The first ID for a fresh key is `1`.
///
/// Versions are 32-bit: a key wraps after roughly two billion IDs.
pub struct SequenceIdGenerator<C> {
    session: Arc<CoordinationSessionManager<C>>,
}

impl<C> SequenceIdGenerator<C>
where
    C: CoordinationClient,
{
    /// Wraps a session manager. The session may be started before or after.
    pub fn new(session: Arc<CoordinationSessionManager<C>>) -> Self {
        Self { session }
    }

    /// Builds a session manager from `config`, starts it, and wraps it.
    ///
    /// # Errors
    ///
    /// See [`CoordinationSessionManager::new`] and
    /// [`CoordinationSessionManager::start_and_block`].
    pub async fn connect(
        client: C,
        config: CoordinationConfig,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let session = CoordinationSessionManager::new(client, config)?;
        session.start_and_block(timeout).await?;
        Ok(Self::new(Arc::new(session)))
    }

    pub fn session(&self) -> &Arc<CoordinationSessionManager<C>> {
        &self.session
    }

    /// Issues the next sequence number for an already composed key.
    ///
    /// # Errors
    /// - [`Error::EmptyKey`] if `composite_key` is empty.
    /// - [`Error::InvalidState`] unless the session is started.
    /// - [`Error::Coordination`] if the node could not be created or written
    ///   once retries were exhausted.
    ///
    /// [`Error::EmptyKey`]: crate::Error::EmptyKey
    /// [`Error::InvalidState`]: crate::Error::InvalidState
    /// [`Error::Coordination`]: crate::Error::Coordination
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn next_sequence_id(&self, composite_key: &str) -> Result<String> {
        check_composite(composite_key)?;
        let path = self.session.node_path(composite_key);
        self.session.ensure_path(&path).await?;
        let stat = self.session.set_data(&path, &[], ANY_VERSION).await?;
        Ok(stat.version.to_string())
    }

    /// Issues the next sequence number for `prefix:name:key`.
    pub async fn next_sequence_id_for(&self, name: &str, key: &str) -> Result<String> {
        let composite = CompositeKey::new(self.session.prefix(), name, key)?;
        self.next_sequence_id(composite.as_str()).await
    }

    /// Issues `count` sequence numbers, one write each. The batch is not
    /// contiguous when other clients write to the same key concurrently.
    ///
    /// # Errors
    ///
    /// [`Error::CountOutOfRange`](crate::Error::CountOutOfRange) unless
    /// `count` is in `[1, 1000]`; a failure after the first ID yields
    /// [`Error::PartialBatch`](crate::Error::PartialBatch).
    pub async fn next_sequence_ids(&self, composite_key: &str, count: usize) -> Result<Vec<String>> {
        check_count(count)?;
        check_composite(composite_key)?;
        let path = self.session.node_path(composite_key);
        self.session.ensure_path(&path).await?;

        let session = &self.session;
        let path = path.as_str();
        collect_batch_async(count, move || async move {
            let stat = session.set_data(path, &[], ANY_VERSION).await?;
            Ok(stat.version.to_string())
        })
        .await
    }

    pub async fn next_sequence_ids_for(
        &self,
        name: &str,
        key: &str,
        count: usize,
    ) -> Result<Vec<String>> {
        let composite = CompositeKey::new(self.session.prefix(), name, key)?;
        self.next_sequence_ids(composite.as_str(), count).await
    }

    /// Closes the underlying session.
    pub async fn shutdown(&self) -> Result<()> {
        self.session.close().await
    }
}
