//! Shared test double: an in-memory repository with deterministic ids and
//! switches for the failure modes the engine has to survive.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docship_core::{
    ByteStream, ContextHandle, FileAttributes, NodeId, RemoteNode, Repository, RepositoryError,
    SessionToken,
};
use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::sync::{Semaphore, mpsc};

use super::engine::{ProgressEvent, RunRequest, RunSummary, SyncEngine};

pub struct FakeRepository {
    nodes: Mutex<HashMap<(i64, String), i64>>,
    next_id: AtomicI64,
    uploads: Mutex<Vec<(String, u64)>>,
    fail_auth: AtomicBool,
    fail_uploads: Mutex<HashSet<String>>,
    cancel_during: Mutex<Option<String>>,
    cancel_flag: Mutex<Option<Arc<AtomicBool>>>,
    hold_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeRepository {
    pub const ROOT_PARENT: NodeId = NodeId(2000);

    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(3000),
            uploads: Mutex::new(Vec::new()),
            fail_auth: AtomicBool::new(false),
            fail_uploads: Mutex::new(HashSet::new()),
            cancel_during: Mutex::new(None),
            cancel_flag: Mutex::new(None),
            hold_gate: Mutex::new(None),
        }
    }

    pub fn fail_authentication(&self) {
        self.fail_auth.store(true, Ordering::SeqCst);
    }

    pub fn fail_upload_of(&self, name: &str) {
        self.fail_uploads.lock().unwrap().insert(name.to_string());
    }

    /// Flip the attached cancellation flag while `name` is streaming, i.e.
    /// after its first chunk has been consumed.
    pub fn cancel_during_upload_of(&self, name: &str) {
        *self.cancel_during.lock().unwrap() = Some(name.to_string());
    }

    pub fn attach_cancel_flag(&self, flag: Arc<AtomicBool>) {
        *self.cancel_flag.lock().unwrap() = Some(flag);
    }

    /// Makes every upload wait for one permit on the returned gate, so a
    /// test can keep a run in flight as long as it needs.
    pub fn hold_uploads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.hold_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn uploaded_bytes(&self, name: &str) -> Option<u64> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .find(|(uploaded, _)| uploaded == name)
            .map(|(_, bytes)| *bytes)
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes
            .lock()
            .unwrap()
            .keys()
            .any(|(_, node_name)| node_name == name)
    }

    pub fn has_node_under(&self, parent: NodeId, name: &str) -> bool {
        self.nodes
            .lock()
            .unwrap()
            .contains_key(&(parent.0, name.to_string()))
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn trigger_cancel_if_configured(&self, name: &str) {
        let matches = self
            .cancel_during
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|configured| configured == name);
        if matches
            && let Some(flag) = self.cancel_flag.lock().unwrap().as_ref()
        {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn authenticate(&self) -> Result<SessionToken, RepositoryError> {
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(RepositoryError::Auth("bad credentials".into()));
        }
        Ok(SessionToken::new("fake-token"))
    }

    async fn find_node_by_name(
        &self,
        _session: &SessionToken,
        parent: NodeId,
        name: &str,
    ) -> Result<Option<RemoteNode>, RepositoryError> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes
            .get(&(parent.0, name.to_string()))
            .map(|id| RemoteNode {
                id: NodeId(*id),
                name: name.to_string(),
            }))
    }

    async fn create_folder(
        &self,
        _session: &SessionToken,
        parent: NodeId,
        name: &str,
    ) -> Result<RemoteNode, RepositoryError> {
        let id = self.allocate_id();
        self.nodes
            .lock()
            .unwrap()
            .insert((parent.0, name.to_string()), id);
        Ok(RemoteNode {
            id: NodeId(id),
            name: name.to_string(),
        })
    }

    async fn open_document_context(
        &self,
        _session: &SessionToken,
        parent: NodeId,
        name: &str,
        _metadata: Option<&FileAttributes>,
    ) -> Result<ContextHandle, RepositoryError> {
        Ok(ContextHandle::new(format!("doc:{}:{name}", parent.0)))
    }

    async fn open_version_context(
        &self,
        _session: &SessionToken,
        node: NodeId,
        _metadata: Option<&FileAttributes>,
    ) -> Result<ContextHandle, RepositoryError> {
        Ok(ContextHandle::new(format!("ver:{}", node.0)))
    }

    async fn upload_content(
        &self,
        _session: &SessionToken,
        context: &ContextHandle,
        attributes: &FileAttributes,
        mut content: ByteStream,
    ) -> Result<NodeId, RepositoryError> {
        let gate = self.hold_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("upload gate closed").forget();
        }

        if self.fail_uploads.lock().unwrap().contains(&attributes.name) {
            return Err(RepositoryError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "upload rejected".into(),
            });
        }

        let mut bytes = 0u64;
        let mut first_chunk = true;
        while let Some(chunk) = content.next().await {
            let chunk = chunk.map_err(|err| RepositoryError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: err.to_string(),
            })?;
            bytes += chunk.len() as u64;
            if first_chunk {
                self.trigger_cancel_if_configured(&attributes.name);
                first_chunk = false;
            }
        }
        self.trigger_cancel_if_configured(&attributes.name);

        let id = match context.as_str().split_once(':') {
            Some(("doc", rest)) => {
                let (parent, name) = rest.split_once(':').expect("malformed document context");
                let parent: i64 = parent.parse().expect("malformed parent id");
                let id = self.allocate_id();
                self.nodes
                    .lock()
                    .unwrap()
                    .insert((parent, name.to_string()), id);
                id
            }
            Some(("ver", id)) => id.parse().expect("malformed version context"),
            _ => panic!("unknown context handle: {}", context.as_str()),
        };

        self.uploads
            .lock()
            .unwrap()
            .push((attributes.name.clone(), bytes));
        Ok(NodeId(id))
    }
}

/// `<dir>/root/{a.txt, sub/{b.txt}}` — the canonical two-level tree.
pub fn build_sample_tree(dir: &Path) -> PathBuf {
    let root = dir.join("root");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("a.txt"), b"alpha").unwrap();
    std::fs::create_dir(root.join("sub")).unwrap();
    std::fs::write(root.join("sub/b.txt"), b"bravo").unwrap();
    root
}

/// Runs one engine pass against the fake and returns the summary plus every
/// event in emission order.
pub async fn run_engine(
    repo: Arc<FakeRepository>,
    root: &Path,
    include_root_folder: bool,
) -> (RunSummary, Vec<ProgressEvent>) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let cancel = Arc::new(AtomicBool::new(false));
    repo.attach_cancel_flag(Arc::clone(&cancel));

    let engine = SyncEngine::new(repo, events_tx, cancel);
    let summary = engine
        .run(RunRequest {
            root: root.to_path_buf(),
            remote_parent: FakeRepository::ROOT_PARENT,
            include_root_folder,
        })
        .await;

    let mut events = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        events.push(event);
    }
    (summary, events)
}
