use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use docship_core::{NodeId, Repository, RepositoryError, SessionToken};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use super::local::{self, LocalNode, NodeKind};
use super::progress::ProgressReader;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Folder,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Folder or document created fresh.
    Added,
    /// Folder already present remotely; reused as the target for children.
    AlreadyExists,
    /// New version attached to an existing document.
    VersionAdded,
}

/// The engine's sole channel of communication with consumers. Events arrive
/// in traversal order (depth-first, pre-order); every run ends with exactly
/// one `Completed`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    TokenAcquired {
        token: String,
    },
    EnteringItem {
        name: String,
    },
    ByteProgress {
        bytes_read: u64,
        total_bytes: u64,
    },
    ItemResult {
        kind: ItemKind,
        remote_id: NodeId,
        name: String,
        outcome: ItemOutcome,
    },
    Error {
        name: String,
        message: String,
    },
    Completed {
        summary: RunSummary,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub folders_created: u64,
    pub folders_reused: u64,
    pub files_created: u64,
    pub versions_created: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub counters: RunCounters,
    pub processed: u64,
    pub total: u64,
    pub cancelled: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "folders created: {} ({} reused), files created: {}, versions created: {}, failed: {}",
            self.counters.folders_created,
            self.counters.folders_reused,
            self.counters.files_created,
            self.counters.versions_created,
            self.counters.failed
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub root: PathBuf,
    pub remote_parent: NodeId,
    pub include_root_folder: bool,
}

/// Whether a subtree ran to its end or stopped at a cancellation boundary.
/// Cancellation is a normal termination path, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Finished,
    Cancelled,
}

#[derive(Debug, Default)]
struct RunState {
    counters: RunCounters,
    processed: u64,
    total: u64,
}

/// Mirrors one local file or folder tree into the repository, deciding per
/// node between reuse, create, and version. Strictly sequential: one remote
/// call at a time, children visited depth-first in name order.
pub struct SyncEngine {
    repository: Arc<dyn Repository>,
    events: mpsc::UnboundedSender<ProgressEvent>,
    cancel: Arc<AtomicBool>,
    state: RunState,
}

impl SyncEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        events: mpsc::UnboundedSender<ProgressEvent>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            repository,
            events,
            cancel,
            state: RunState::default(),
        }
    }

    /// Runs the whole synchronization. Consumes the engine: a run is a lazy,
    /// single-pass traversal and is not restartable.
    pub async fn run(mut self, request: RunRequest) -> RunSummary {
        let root = match LocalNode::snapshot(&request.root).await {
            Ok(root) => root,
            Err(err) => {
                self.emit(ProgressEvent::Error {
                    name: request.root.display().to_string(),
                    message: format!("root path is not accessible: {err}"),
                });
                return self.finish(false);
            }
        };

        self.state.total = match root.kind {
            NodeKind::File => 1,
            NodeKind::Directory => match local::count_entries(&root.path).await {
                Ok(count) => count + u64::from(request.include_root_folder),
                Err(err) => {
                    self.emit(ProgressEvent::Error {
                        name: root.name.clone(),
                        message: format!("cannot scan root directory: {err}"),
                    });
                    return self.finish(false);
                }
            },
        };

        // One session per run; authentication failure is fatal to the run.
        let session = match self.repository.authenticate().await {
            Ok(session) => {
                self.emit(ProgressEvent::TokenAcquired {
                    token: session.as_str().to_string(),
                });
                session
            }
            Err(err) => {
                self.emit(ProgressEvent::Error {
                    name: root.name.clone(),
                    message: format!("authentication failed: {err}"),
                });
                return self.finish(false);
            }
        };

        let walk = match root.kind {
            NodeKind::File => {
                self.upload_file(&session, request.remote_parent, &root).await;
                Walk::Finished
            }
            NodeKind::Directory => {
                self.sync_folder(
                    &session,
                    request.remote_parent,
                    root,
                    request.include_root_folder,
                )
                .await
            }
        };

        self.finish(walk == Walk::Cancelled)
    }

    fn emit(&self, event: ProgressEvent) {
        let _ = self.events.send(event);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn finish(self, cancelled: bool) -> RunSummary {
        let summary = RunSummary {
            counters: self.state.counters,
            processed: self.state.processed,
            total: self.state.total,
            cancelled,
        };
        self.emit(ProgressEvent::Completed { summary });
        summary
    }

    /// Mirrors one directory. The cancellation flag is checked before any
    /// remote call for the directory itself and again before each child.
    async fn sync_folder(
        &mut self,
        session: &SessionToken,
        parent: NodeId,
        node: LocalNode,
        include_self: bool,
    ) -> Walk {
        if self.is_cancelled() {
            return Walk::Cancelled;
        }

        let mut target = parent;
        if include_self {
            self.emit(ProgressEvent::EnteringItem {
                name: node.name.clone(),
            });
            match self.resolve_folder(session, parent, &node.name).await {
                Ok(id) => target = id,
                Err(err) => {
                    // Without the folder the whole subtree has no target.
                    self.state.counters.failed += 1;
                    self.state.processed += 1;
                    self.emit(ProgressEvent::Error {
                        name: node.name.clone(),
                        message: err.to_string(),
                    });
                    return Walk::Finished;
                }
            }
        }

        let children = match local::sorted_children(&node.path).await {
            Ok(children) => children,
            Err(err) => {
                self.state.counters.failed += 1;
                self.emit(ProgressEvent::Error {
                    name: node.name.clone(),
                    message: format!("cannot enumerate directory: {err}"),
                });
                return Walk::Finished;
            }
        };

        for child in children {
            if self.is_cancelled() {
                return Walk::Cancelled;
            }
            match child.kind {
                NodeKind::Directory => {
                    let walk = Box::pin(self.sync_folder(session, target, child, true)).await;
                    if walk == Walk::Cancelled {
                        return Walk::Cancelled;
                    }
                }
                NodeKind::File => self.upload_file(session, target, &child).await,
            }
        }

        Walk::Finished
    }

    /// Reuses the remote folder when one with the same name exists, creates
    /// it otherwise, and returns the id children should target.
    async fn resolve_folder(
        &mut self,
        session: &SessionToken,
        parent: NodeId,
        name: &str,
    ) -> Result<NodeId, EngineError> {
        let existing = self
            .repository
            .find_node_by_name(session, parent, name)
            .await?;
        let (node, outcome) = match existing {
            Some(node) => {
                self.state.counters.folders_reused += 1;
                (node, ItemOutcome::AlreadyExists)
            }
            None => {
                let created = self.repository.create_folder(session, parent, name).await?;
                self.state.counters.folders_created += 1;
                (created, ItemOutcome::Added)
            }
        };
        self.state.processed += 1;
        self.emit(ProgressEvent::ItemResult {
            kind: ItemKind::Folder,
            remote_id: node.id,
            name: name.to_string(),
            outcome,
        });
        Ok(node.id)
    }

    /// Uploads one file. Any failure is scoped to this file: it is counted,
    /// reported, and the traversal continues with the next sibling.
    async fn upload_file(&mut self, session: &SessionToken, parent: NodeId, node: &LocalNode) {
        self.emit(ProgressEvent::EnteringItem {
            name: node.name.clone(),
        });
        match self.resolve_document(session, parent, node).await {
            Ok((id, outcome)) => {
                match outcome {
                    ItemOutcome::VersionAdded => self.state.counters.versions_created += 1,
                    _ => self.state.counters.files_created += 1,
                }
                self.emit(ProgressEvent::ItemResult {
                    kind: ItemKind::File,
                    remote_id: id,
                    name: node.name.clone(),
                    outcome,
                });
            }
            Err(err) => {
                self.state.counters.failed += 1;
                self.emit(ProgressEvent::Error {
                    name: node.name.clone(),
                    message: err.to_string(),
                });
            }
        }
        self.state.processed += 1;
    }

    /// Creates a new document or attaches a version to an existing one,
    /// streaming the file's bytes so byte-level progress reaches consumers.
    async fn resolve_document(
        &mut self,
        session: &SessionToken,
        parent: NodeId,
        node: &LocalNode,
    ) -> Result<(NodeId, ItemOutcome), EngineError> {
        let attributes = node.attributes();
        let existing = self
            .repository
            .find_node_by_name(session, parent, &node.name)
            .await?;
        let (context, outcome) = match existing {
            None => (
                self.repository
                    .open_document_context(session, parent, &node.name, None)
                    .await?,
                ItemOutcome::Added,
            ),
            Some(found) => (
                self.repository
                    .open_version_context(session, found.id, None)
                    .await?,
                ItemOutcome::VersionAdded,
            ),
        };
        let file = tokio::fs::File::open(&node.path).await?;
        let content = ProgressReader::new(ReaderStream::new(file), node.size, self.events.clone());
        let id = self
            .repository
            .upload_content(session, &context, &attributes, Box::pin(content))
            .await?;
        Ok((id, outcome))
    }
}
