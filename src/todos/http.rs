//! HTTP implementation of the todo and user services

use super::error::FetchError;
use super::model::{Todo, User, UserId};
use super::service::{TodoService, UserService};
use crate::config::ApiConfig;
use crate::effect::Effect;
use crate::error::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Which resource a request targets; decides how a 404 is reported.
#[derive(Debug, Clone, Copy)]
enum Resource {
    Todos,
    User(UserId),
}

/// JSON API client for the todo collection and its users.
#[derive(Debug, Clone)]
pub struct HttpTodoApi {
    client: Client,
    base_url: Arc<str>,
}

impl HttpTodoApi {
    /// Create a client for the endpoint described by `config`
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get<T>(&self, path: String, resource: Resource) -> Effect<T, FetchError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.client.clone();
        let url = format!("{}/{}", self.base_url, path);
        Effect::from_future(move || fetch_json(client.clone(), url.clone(), resource))
    }
}

async fn fetch_json<T: DeserializeOwned>(
    client: Client,
    url: String,
    resource: Resource,
) -> std::result::Result<T, FetchError> {
    debug!("GET {}", url);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| FetchError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;

    match (response.status(), resource) {
        (status, _) if status.is_success() => {}
        (StatusCode::NOT_FOUND, Resource::User(user_id)) => {
            return Err(FetchError::UserNotFound { user_id });
        }
        (status, _) => {
            return Err(FetchError::Status {
                url,
                code: status.as_u16(),
            });
        }
    }

    let body = response.bytes().await.map_err(|e| FetchError::Transport {
        url: url.clone(),
        message: e.to_string(),
    })?;
    serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
        url,
        message: e.to_string(),
    })
}

impl TodoService for HttpTodoApi {
    fn todos(&self) -> Effect<Vec<Todo>, FetchError> {
        self.get("todos".to_string(), Resource::Todos)
    }
}

impl UserService for HttpTodoApi {
    fn user(&self, id: UserId) -> Effect<User, FetchError> {
        self.get(format!("users/{id}"), Resource::User(id))
    }
}
