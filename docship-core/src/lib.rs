mod http;
mod repository;

pub use http::HttpRepository;
pub use repository::{
    ByteStream, ContextHandle, FileAttributes, NodeId, RemoteNode, Repository, RepositoryError,
    SessionToken,
};
