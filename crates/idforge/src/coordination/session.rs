use core::{fmt, time::Duration};

use portable_atomic::{AtomicU8, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    CoordinationClient, CoordinationConfig, CreateMode, Error, NodeStat, Result, RetryPolicy,
    coordination::{CoordinationError, validate_path},
    retry::retry_loop,
};

/// Lifecycle of a [`CoordinationSessionManager`].
///
/// `Uninitialized -> Started -> Closed`. A failed start leaves the session
/// `Uninitialized` so it can be started again; `Closed` is terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Started,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Started => "started",
            Self::Closed => "closed",
        })
    }
}

const UNINITIALIZED: u8 = 0;
const STARTING: u8 = 1;
const STARTED: u8 = 2;
const CLOSED: u8 = 3;

/// Owns the single connection to the coordination service and gates every
/// node operation on the session being started.
///
/// Node operations that fail with a
/// [retryable](CoordinationError::is_retryable) error are retried under the
/// [`RetryPolicy`] selected from the configuration. Share one manager behind
/// an [`Arc`](std::sync::Arc) between all users of the connection.
pub struct CoordinationSessionManager<C> {
    client: C,
    config: CoordinationConfig,
    policy: RetryPolicy,
    state: AtomicU8,
}

impl<C> CoordinationSessionManager<C>
where
    C: CoordinationClient,
{
    /// Validates `config` and wraps `client`. No I/O happens here.
    ///
    /// # Errors
    /// - [`Error::MissingConnectString`] if the connect string is blank.
    /// - [`Error::UnsupportedRetryType`] if the retry type is unknown.
    /// - [`Error::EmptyKey`] if the prefix is empty.
    pub fn new(client: C, config: CoordinationConfig) -> Result<Self> {
        if config.connect_string.trim().is_empty() {
            return Err(Error::MissingConnectString);
        }
        if config.prefix.is_empty() {
            return Err(Error::EmptyKey("prefix"));
        }
        let policy = RetryPolicy::try_from(&config.retry)?;
        validate_path(&format!("/{}", config.prefix))?;

        Ok(Self {
            client,
            config,
            policy,
            state: AtomicU8::new(UNINITIALIZED),
        })
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            STARTED => SessionState::Started,
            CLOSED => SessionState::Closed,
            _ => SessionState::Uninitialized,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::Acquire) == STARTED
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// `/<prefix>`, the parent of every sequence node.
    pub fn root_path(&self) -> String {
        format!("/{}", self.config.prefix)
    }

    /// `/<prefix>/<key>`.
    pub fn node_path(&self, key: &str) -> String {
        format!("/{}/{}", self.config.prefix, key)
    }

    /// Connects and blocks until the session is established, then makes sure
    /// the root path exists.
    ///
    /// Connection attempts are retried under the configured policy. With
    /// `timeout` set, the whole start is abandoned once it elapses.
    ///
    /// A failed start leaves the session `Uninitialized`, unless it was closed
    /// meanwhile, in which case it stays `Closed`.
    ///
    /// # Errors
    /// - [`Error::InvalidState`] unless the session is `Uninitialized`, or if
    ///   it was closed before the start completed.
    /// - [`Error::ConnectionTimeout`] if `timeout` elapsed first.
    /// - [`Error::Coordination`] if connecting or creating the root failed.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn start_and_block(&self, timeout: Option<Duration>) -> Result<()> {
        if self
            .state
            .compare_exchange(UNINITIALIZED, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::InvalidState {
                state: self.state(),
                op: "start",
            });
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            connect_string = %self.config.connect_string,
            retry_type = %self.policy.retry_type(),
            "starting coordination session"
        );

        let started = async {
            self.connect().await?;
            self.state.store(STARTED, Ordering::Release);
            self.ensure_path(&self.root_path()).await
        };
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, started)
                .await
                .unwrap_or(Err(Error::ConnectionTimeout(limit))),
            None => started.await,
        };

        if let Err(e) = result {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, "coordination session failed to start");
            self.abort_start().await;
            return Err(e);
        }
        if !self.is_started() {
            return Err(Error::InvalidState {
                state: self.state(),
                op: "start",
            });
        }

        #[cfg(feature = "tracing")]
        tracing::info!(root = %self.root_path(), "coordination session started");
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        let client = &self.client;
        let session_timeout = self.config.session_timeout();
        let connection_timeout = self.config.connection_timeout();
        retry_loop(
            &self.policy,
            || Ok(()),
            move || client.connect(session_timeout, connection_timeout),
        )
        .await
    }

    /// Rolls a failed start back to `Uninitialized`. A session closed in the
    /// meantime stays `Closed`; its client was closed by [`close`](Self::close).
    async fn abort_start(&self) {
        if self
            .state
            .compare_exchange(STARTED, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // Connected but the root could not be created.
            if let Err(_e) = self.client.close().await {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, "failed to close client after aborted start");
            }
        }
        let _ = self.state.compare_exchange(
            STARTING,
            UNINITIALIZED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Closes the session. Only a started session can be closed, so the
    /// underlying client is closed at most once. Node operations still
    /// retrying stop with [`Error::InvalidState`] at their next attempt.
    ///
    /// # Errors
    /// - [`Error::InvalidState`] unless the session is `Started`.
    /// - [`Error::Coordination`] if the client failed to close cleanly. The
    ///   session is `Closed` regardless.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn close(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(STARTED, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::InvalidState {
                state: self.state(),
                op: "close",
            });
        }
        #[cfg(feature = "tracing")]
        tracing::info!("closing coordination session");
        self.client.close().await?;
        Ok(())
    }

    fn ensure_started(&self, op: &'static str) -> Result<()> {
        let state = self.state();
        if state != SessionState::Started {
            return Err(Error::InvalidState { state, op });
        }
        Ok(())
    }

    /// Returns the node's stat, or `None` if it does not exist.
    pub async fn node_stat(&self, path: &str) -> Result<Option<NodeStat>> {
        self.ensure_started("read node")?;
        validate_path(path)?;
        let client = &self.client;
        retry_loop(
            &self.policy,
            || self.ensure_started("read node"),
            move || client.exists(path),
        )
        .await
    }

    pub async fn path_exists(&self, path: &str) -> Result<bool> {
        Ok(self.node_stat(path).await?.is_some())
    }

    /// Creates a node and any missing parents.
    ///
    /// # Errors
    ///
    /// Fails with [`CoordinationError::NodeExists`] if the node is already
    /// there.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, data)))]
    pub async fn create_path(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<()> {
        self.ensure_started("create node")?;
        validate_path(path)?;
        let client = &self.client;
        retry_loop(
            &self.policy,
            || self.ensure_started("create node"),
            move || client.create(path, data, mode),
        )
        .await
    }

    /// Creates a persistent empty node unless one already exists. Losing a
    /// creation race to another client counts as success.
    pub async fn ensure_path(&self, path: &str) -> Result<()> {
        if self.path_exists(path).await? {
            return Ok(());
        }
        match self.create_path(path, &[], CreateMode::Persistent).await {
            Err(Error::Coordination(CoordinationError::NodeExists(_))) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(path, "node created concurrently");
                Ok(())
            }
            other => other,
        }
    }

    /// Writes `data` to the node, conditional on `version` unless it is
    /// [`ANY_VERSION`](crate::ANY_VERSION), and returns the updated stat.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self, data)))]
    pub async fn set_data(&self, path: &str, data: &[u8], version: i32) -> Result<NodeStat> {
        self.ensure_started("write node")?;
        validate_path(path)?;
        let client = &self.client;
        retry_loop(
            &self.policy,
            || self.ensure_started("write node"),
            move || client.set_data(path, data, version),
        )
        .await
    }

    /// Deletes the node and everything beneath it.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn delete_path(&self, path: &str) -> Result<()> {
        self.ensure_started("delete node")?;
        validate_path(path)?;
        let client = &self.client;
        retry_loop(
            &self.policy,
            || self.ensure_started("delete node"),
            move || client.delete(path),
        )
        .await
    }

    /// Names of the node's direct children.
    pub async fn child_names(&self, path: &str) -> Result<Vec<String>> {
        self.ensure_started("list children")?;
        validate_path(path)?;
        let client = &self.client;
        retry_loop(
            &self.policy,
            || self.ensure_started("list children"),
            move || client.children(path),
        )
        .await
    }

    /// Full paths of the node's direct children.
    pub async fn child_paths(&self, path: &str) -> Result<Vec<String>> {
        let parent = path.trim_end_matches('/');
        Ok(self
            .child_names(path)
            .await?
            .into_iter()
            .map(|name| format!("{parent}/{name}"))
            .collect())
    }
}
