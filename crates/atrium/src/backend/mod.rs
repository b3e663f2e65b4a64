//! Client for the persistence backend.
//!
//! The backend is an external collaborator: it owns projects and users and
//! serves REST endpoints. This module consumes that boundary and never
//! reimplements it. All calls are fire-and-forget from the orchestrator's
//! perspective: a failure is surfaced and the local session carries on.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;

use atrium_protocol::{FileTree, ParticipantRef, Project};

use crate::error::{PersistenceError, TransportError};
use crate::filetree::PersistTree;

/// Backend endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend API.
    pub base_url: String,
    /// Bearer token attached to every request, when set.
    pub auth_token: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:14000/api".to_string(),
            auth_token: None,
        }
    }
}

/// The persistence collaborator as the orchestrator sees it.
#[async_trait]
pub trait ProjectBackend: Send + Sync {
    /// Fetch a project, including its file tree.
    async fn fetch_project(&self, project_id: &str) -> Result<Project, TransportError>;

    /// Overwrite the server-side copy of a project's file tree.
    async fn persist_file_tree(
        &self,
        project_id: &str,
        tree: &FileTree,
    ) -> Result<(), PersistenceError>;

    /// Append participants to a project's membership.
    async fn add_collaborators(
        &self,
        project_id: &str,
        users: &[String],
    ) -> Result<(), TransportError>;

    /// All known participants, for invitation search.
    async fn fetch_all_participants(&self) -> Result<Vec<ParticipantRef>, TransportError>;
}

/// Adapter that lets any backend serve as the store's write-through
/// persistence hook.
pub struct BackendPersist(pub std::sync::Arc<dyn ProjectBackend>);

#[async_trait]
impl PersistTree for BackendPersist {
    async fn persist(&self, project_id: &str, tree: &FileTree) -> Result<(), PersistenceError> {
        self.0.persist_file_tree(project_id, tree).await
    }
}

/// REST client for the backend.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    config: BackendConfig,
}

/// Response envelope of `GET /projects/get-project/{id}`.
#[derive(Deserialize)]
struct ProjectEnvelope {
    project: Project,
}

/// Response envelope of `GET /users/all`.
#[derive(Deserialize)]
struct UsersEnvelope {
    users: Vec<ParticipantRef>,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url, path);
        let mut builder = self.http.request(method, url);
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn check_status(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let response = Self::check_status(endpoint, response)?;
        response
            .json()
            .await
            .map_err(|err| TransportError::Decode {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl ProjectBackend for BackendClient {
    async fn fetch_project(&self, project_id: &str) -> Result<Project, TransportError> {
        let endpoint = format!("/projects/get-project/{project_id}");
        let response = self
            .request(reqwest::Method::GET, &endpoint)
            .send()
            .await?;
        let envelope: ProjectEnvelope = Self::decode(&endpoint, response).await?;
        debug!(
            "fetched project {} with {} file(s)",
            envelope.project.id,
            envelope.project.file_tree.len()
        );
        Ok(envelope.project)
    }

    async fn persist_file_tree(
        &self,
        project_id: &str,
        tree: &FileTree,
    ) -> Result<(), PersistenceError> {
        let endpoint = "/projects/update-file-tree";
        let result: Result<(), TransportError> = async {
            let response = self
                .request(reqwest::Method::PUT, endpoint)
                .json(&json!({ "projectId": project_id, "fileTree": tree }))
                .send()
                .await?;
            Self::check_status(endpoint, response)?;
            Ok(())
        }
        .await;

        result.map_err(|source| PersistenceError {
            project_id: project_id.to_string(),
            source,
        })
    }

    async fn add_collaborators(
        &self,
        project_id: &str,
        users: &[String],
    ) -> Result<(), TransportError> {
        let endpoint = "/projects/add-user";
        let response = self
            .request(reqwest::Method::PUT, endpoint)
            .json(&json!({ "projectId": project_id, "users": users }))
            .send()
            .await?;
        Self::check_status(endpoint, response)?;
        Ok(())
    }

    async fn fetch_all_participants(&self) -> Result<Vec<ParticipantRef>, TransportError> {
        let endpoint = "/users/all";
        let response = self.request(reqwest::Method::GET, endpoint).send().await?;
        let envelope: UsersEnvelope = Self::decode(endpoint, response).await?;
        Ok(envelope.users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_envelope_decodes_backend_shape() {
        let raw = r#"{
            "project": {
                "_id": "p-1",
                "name": "demo",
                "users": [{"_id": "u-1", "email": "dev@localhost"}],
                "fileTree": {"index.html": "<h1>hi</h1>"}
            }
        }"#;
        let envelope: ProjectEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.project.id, "p-1");
        assert_eq!(
            envelope.project.file_tree.get("index.html"),
            Some("<h1>hi</h1>")
        );
    }

    #[test]
    fn test_users_envelope_decodes() {
        let raw = r#"{"users": [
            {"_id": "u-1", "email": "dev@localhost"},
            {"_id": "u-2", "email": "amy@localhost"}
        ]}"#;
        let envelope: UsersEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.users.len(), 2);
        assert_eq!(envelope.users[1].email, "amy@localhost");
    }

    #[test]
    fn test_persist_payload_shape() {
        let tree: FileTree = [("a.js".to_string(), "x".to_string())].into_iter().collect();
        let payload = json!({ "projectId": "p-1", "fileTree": tree });
        assert_eq!(payload["fileTree"]["a.js"], "x");
    }
}
