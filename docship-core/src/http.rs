use async_trait::async_trait;
use reqwest::{Body, Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use url::Url;

use crate::repository::{
    ByteStream, ContextHandle, FileAttributes, NodeId, RemoteNode, Repository, RepositoryError,
    SessionToken,
};

const SESSION_HEADER: &str = "X-Session-Token";

/// REST client for the document repository. Credentials are held so a fresh
/// session can be opened at the start of every run.
#[derive(Clone)]
pub struct HttpRepository {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl HttpRepository {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, RepositoryError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            username: username.into(),
            password: password.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RepositoryError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RepositoryError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RepositoryError::Api { status, body })
        }
    }
}

fn metadata_headers(request: RequestBuilder, attributes: &FileAttributes) -> RequestBuilder {
    let mut request = request
        .header("X-File-Name", attributes.name.as_str())
        .header("X-File-Size", attributes.size.to_string());
    if let Some(created) = attributes.created
        && let Ok(value) = created.format(&Rfc3339)
    {
        request = request.header("X-File-Created", value);
    }
    if let Some(modified) = attributes.modified
        && let Ok(value) = modified.format(&Rfc3339)
    {
        request = request.header("X-File-Modified", value);
    }
    request
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Serialize)]
struct NamedRequest<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct ContextResponse {
    context: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    id: NodeId,
}

#[async_trait]
impl Repository for HttpRepository {
    async fn authenticate(&self) -> Result<SessionToken, RepositoryError> {
        let url = self.endpoint("/v1/auth")?;
        let response = self
            .http
            .post(url)
            .json(&AuthRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            let body = response.text().await.unwrap_or_default();
            return Err(RepositoryError::Auth(body));
        }
        let payload: AuthResponse = Self::handle_response(response).await?;
        Ok(SessionToken::new(payload.token))
    }

    async fn find_node_by_name(
        &self,
        session: &SessionToken,
        parent: NodeId,
        name: &str,
    ) -> Result<Option<RemoteNode>, RepositoryError> {
        let mut url = self.endpoint(&format!("/v1/nodes/{parent}/children"))?;
        url.query_pairs_mut().append_pair("name", name);
        let response = self
            .http
            .get(url)
            .header(SESSION_HEADER, session.as_str())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::handle_response(response).await?))
    }

    async fn create_folder(
        &self,
        session: &SessionToken,
        parent: NodeId,
        name: &str,
    ) -> Result<RemoteNode, RepositoryError> {
        let url = self.endpoint(&format!("/v1/nodes/{parent}/folders"))?;
        let response = self
            .http
            .post(url)
            .header(SESSION_HEADER, session.as_str())
            .json(&NamedRequest { name })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn open_document_context(
        &self,
        session: &SessionToken,
        parent: NodeId,
        name: &str,
        metadata: Option<&FileAttributes>,
    ) -> Result<ContextHandle, RepositoryError> {
        let url = self.endpoint(&format!("/v1/nodes/{parent}/documents"))?;
        let mut request = self
            .http
            .post(url)
            .header(SESSION_HEADER, session.as_str())
            .json(&NamedRequest { name });
        if let Some(metadata) = metadata {
            request = metadata_headers(request, metadata);
        }
        let payload: ContextResponse = Self::handle_response(request.send().await?).await?;
        Ok(ContextHandle::new(payload.context))
    }

    async fn open_version_context(
        &self,
        session: &SessionToken,
        node: NodeId,
        metadata: Option<&FileAttributes>,
    ) -> Result<ContextHandle, RepositoryError> {
        let url = self.endpoint(&format!("/v1/nodes/{node}/versions"))?;
        let mut request = self.http.post(url).header(SESSION_HEADER, session.as_str());
        if let Some(metadata) = metadata {
            request = metadata_headers(request, metadata);
        }
        let payload: ContextResponse = Self::handle_response(request.send().await?).await?;
        Ok(ContextHandle::new(payload.context))
    }

    async fn upload_content(
        &self,
        session: &SessionToken,
        context: &ContextHandle,
        attributes: &FileAttributes,
        content: ByteStream,
    ) -> Result<NodeId, RepositoryError> {
        let url = self.endpoint(&format!("/v1/contexts/{}/content", context.as_str()))?;
        let request = metadata_headers(
            self.http.put(url).header(SESSION_HEADER, session.as_str()),
            attributes,
        );
        let response = request.body(Body::wrap_stream(content)).send().await?;
        let payload: UploadResponse = Self::handle_response(response).await?;
        Ok(payload.id)
    }
}
