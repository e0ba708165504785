use std::fmt;
use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Chunked file content handed to [`Repository::upload_content`].
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("repository returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

impl RepositoryError {
    pub fn is_auth(&self) -> bool {
        match self {
            RepositoryError::Auth(_) => true,
            RepositoryError::Api { status, .. } => {
                matches!(*status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            }
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Api { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            RepositoryError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

/// Numeric id of a node (folder or document) in the repository.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub id: NodeId,
    pub name: String,
}

/// Session ticket returned by [`Repository::authenticate`]; acquired once per
/// run and reused for every call within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Server-side handle for an in-progress create-or-version operation, opened
/// before streaming bytes and consumed by the upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextHandle(String);

impl ContextHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// File metadata forwarded per upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    pub name: String,
    pub size: u64,
    pub created: Option<OffsetDateTime>,
    pub modified: Option<OffsetDateTime>,
}

/// The remote document repository, reduced to the capabilities the upload
/// engine consumes. Name uniqueness under a parent is owned by the
/// repository, not enforced by callers.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn authenticate(&self) -> Result<SessionToken, RepositoryError>;

    /// Name lookup under a parent. Absence is `Ok(None)`, not an error.
    async fn find_node_by_name(
        &self,
        session: &SessionToken,
        parent: NodeId,
        name: &str,
    ) -> Result<Option<RemoteNode>, RepositoryError>;

    async fn create_folder(
        &self,
        session: &SessionToken,
        parent: NodeId,
        name: &str,
    ) -> Result<RemoteNode, RepositoryError>;

    /// Opens a context for a brand-new document under `parent`.
    async fn open_document_context(
        &self,
        session: &SessionToken,
        parent: NodeId,
        name: &str,
        metadata: Option<&FileAttributes>,
    ) -> Result<ContextHandle, RepositoryError>;

    /// Opens a context for a new version of the existing document `node`.
    async fn open_version_context(
        &self,
        session: &SessionToken,
        node: NodeId,
        metadata: Option<&FileAttributes>,
    ) -> Result<ContextHandle, RepositoryError>;

    /// Streams file content into an open context and returns the id of the
    /// created or versioned node.
    async fn upload_content(
        &self,
        session: &SessionToken,
        context: &ContextHandle,
        attributes: &FileAttributes,
        content: ByteStream,
    ) -> Result<NodeId, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_variant_is_classified_as_auth() {
        let err = RepositoryError::Auth("bad credentials".into());
        assert!(err.is_auth());
        assert!(!err.is_retryable());
    }

    #[test]
    fn unauthorized_api_error_is_classified_as_auth() {
        let err = RepositoryError::Api {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
        };
        assert!(err.is_auth());
    }

    #[test]
    fn server_errors_are_retryable_but_not_auth() {
        let err = RepositoryError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".into(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_auth());
    }

    #[test]
    fn node_id_displays_as_plain_number() {
        assert_eq!(NodeId(2000).to_string(), "2000");
    }
}
