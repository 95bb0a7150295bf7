use core::{future::Future, time::Duration};

/// Version argument for [`CoordinationClient::set_data`] that matches any
/// current version.
pub const ANY_VERSION: i32 = -1;

/// Node lifetime, as understood by the coordination service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Survives the session that created it.
    Persistent,
    /// Removed when the creating session ends.
    Ephemeral,
}

/// Metadata returned for a node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodeStat {
    /// Number of data writes applied to the node since creation.
    pub version: i32,
    /// Number of direct children.
    pub num_children: i32,
}

/// Errors reported by a [`CoordinationClient`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CoordinationError {
    #[error("connection lost")]
    ConnectionLoss,

    #[error("operation timed out")]
    OperationTimeout,

    #[error("session expired")]
    SessionExpired,

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("no node: {0}")]
    NoNode(String),

    #[error("version conflict on {0}")]
    BadVersion(String),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("{0}")]
    Other(String),
}

impl CoordinationError {
    /// Whether the failure is transient and the operation may be retried
    /// under the session's [`RetryPolicy`].
    ///
    /// [`RetryPolicy`]: crate::RetryPolicy
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLoss | Self::OperationTimeout | Self::SessionExpired
        )
    }
}

/// Capability interface for a hierarchical coordination service offering
/// versioned nodes (the role ZooKeeper plays in most deployments).
///
/// Implementations own the network connection. Paths are absolute,
/// `/`-separated, and already validated by the caller. Reconnect policy is
/// not the implementation's concern: the session manager retries
/// [retryable](CoordinationError::is_retryable) failures itself.
pub trait CoordinationClient: Send + Sync {
    /// Performs one connection attempt.
    fn connect(
        &self,
        session_timeout: Duration,
        connection_timeout: Duration,
    ) -> impl Future<Output = Result<(), CoordinationError>> + Send;

    /// Ends the session.
    fn close(&self) -> impl Future<Output = Result<(), CoordinationError>> + Send;

    /// Returns the node's stat, or `None` if it does not exist.
    fn exists(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<NodeStat>, CoordinationError>> + Send;

    /// Creates a node, creating missing parents as persistent nodes.
    ///
    /// Fails with [`CoordinationError::NodeExists`] if `path` already exists.
    fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> impl Future<Output = Result<(), CoordinationError>> + Send;

    /// Replaces the node's data if its version equals `version`, or
    /// unconditionally when `version` is [`ANY_VERSION`]. Every successful
    /// write increments the node version by exactly one; the returned stat
    /// carries the new version.
    fn set_data(
        &self,
        path: &str,
        data: &[u8],
        version: i32,
    ) -> impl Future<Output = Result<NodeStat, CoordinationError>> + Send;

    /// Deletes a node and all of its descendants.
    fn delete(&self, path: &str) -> impl Future<Output = Result<(), CoordinationError>> + Send;

    /// Lists the names of a node's direct children.
    fn children(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Vec<String>, CoordinationError>> + Send;
}

/// Checks that `path` is an absolute, normalized node path.
pub fn validate_path(path: &str) -> Result<(), CoordinationError> {
    let invalid = |reason| {
        Err(CoordinationError::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if !path.starts_with('/') {
        return invalid("path must start with /");
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return invalid("path must not end with /");
    }
    if path.contains('\0') {
        return invalid("null character not allowed");
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return invalid("empty node name"),
            "." | ".." => return invalid("relative paths not allowed"),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_normalized_paths() {
        for path in ["/", "/idforge", "/idforge/idforge:order:k1", "/a/b/c"] {
            assert_eq!(validate_path(path), Ok(()), "{path}");
        }
    }

    #[test]
    fn rejects_malformed_paths() {
        for path in ["", "idforge", "/idforge/", "//a", "/a//b", "/a/./b", "/a/..", "/a\0b"] {
            assert!(
                matches!(validate_path(path), Err(CoordinationError::InvalidPath { .. })),
                "{path:?}"
            );
        }
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(CoordinationError::ConnectionLoss.is_retryable());
        assert!(CoordinationError::OperationTimeout.is_retryable());
        assert!(CoordinationError::SessionExpired.is_retryable());
        assert!(!CoordinationError::NodeExists("/a".into()).is_retryable());
        assert!(!CoordinationError::NoNode("/a".into()).is_retryable());
        assert!(!CoordinationError::Other("boom".into()).is_retryable());
    }
}
