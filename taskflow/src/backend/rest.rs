//! PostgREST-style HTTP backend.
//!
//! Talks to `{base}/rest/v1/{table}` with `reqwest`. Rows are filtered with
//! PostgREST operators (`user_id=eq.{id}`), ordered server-side, and every
//! mutation asks for `Prefer: return=representation` so the stored row comes
//! back in the response. Requests carry the project key in `apikey` and a
//! bearer token (the session access token when present, else the key).
//!
//! The change feed goes through [`super::realtime`].

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use taskflow_proto::category::{Category, CategoryId, NewCategory};
use taskflow_proto::change::SubscribeRequest;
use taskflow_proto::task::{NewTask, Task, TaskId, TaskPatch};
use taskflow_proto::user::UserId;

use super::{Backend, BackendError, ChangeFeed, Operation, realtime};

/// Connection settings for [`RestBackend`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project base URL, e.g. `https://xyz.example.co`.
    pub base_url: Url,
    /// Project API key, sent as `apikey`.
    pub api_key: Option<String>,
    /// Session access token, sent as the bearer token.
    pub access_token: Option<String>,
    /// WebSocket endpoint for the change feed.
    pub realtime_url: Option<String>,
    /// Per-request timeout, also used for the feed handshake.
    pub request_timeout: Duration,
}

/// [`Backend`] over HTTP.
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    tasks_url: Url,
    categories_url: Url,
    api_key: Option<String>,
    access_token: Option<String>,
    realtime_url: Option<String>,
    timeout: Duration,
}

impl RestBackend {
    /// Builds the HTTP client and resolves the table endpoints.
    ///
    /// # Errors
    ///
    /// - [`BackendError::Http`] if the client cannot be built.
    /// - [`BackendError::Unsupported`] if the base URL cannot carry a path.
    pub fn new(config: RestConfig) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        let mut base = config.base_url;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = |table: &str| {
            base.join(&format!("rest/v1/{table}"))
                .map_err(|e| BackendError::Unsupported(format!("invalid base url: {e}")))
        };

        Ok(Self {
            client,
            tasks_url: endpoint("tasks")?,
            categories_url: endpoint("categories")?,
            api_key: config.api_key,
            access_token: config.access_token,
            realtime_url: config.realtime_url,
            timeout: config.request_timeout,
        })
    }

    /// The resolved tasks endpoint.
    #[must_use]
    pub const fn tasks_url(&self) -> &Url {
        &self.tasks_url
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        let mut req = self.client.request(method, url.clone());
        if let Some(key) = &self.api_key {
            req = req.header("apikey", key);
        }
        if let Some(token) = self.access_token.as_ref().or(self.api_key.as_ref()) {
            req = req.bearer_auth(token);
        }
        req
    }

    fn returning(&self, method: Method, url: &Url) -> RequestBuilder {
        self.request(method, url)
            .header("Prefer", "return=representation")
    }

    /// Sends `req`, checks the status and decodes the JSON body.
    async fn send<T: DeserializeOwned>(
        req: RequestBuilder,
        op: Operation,
    ) -> Result<T, BackendError> {
        let resp = req.send().await.map_err(|e| {
            tracing::warn!(%op, err = %e, "backend request failed");
            if e.is_timeout() {
                BackendError::Timeout
            } else {
                BackendError::Http(e)
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(%op, status = status.as_u16(), body = %body, "backend returned error");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| BackendError::Decode(format!("{op}: {e}")))
    }

    /// Like [`send`](Self::send) for representation responses, which arrive
    /// as an array. An empty array means no row matched.
    async fn send_one<T: DeserializeOwned>(
        req: RequestBuilder,
        op: Operation,
        what: impl FnOnce() -> String,
    ) -> Result<T, BackendError> {
        let rows: Vec<T> = Self::send(req, op).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(what()))
    }
}

impl Backend for RestBackend {
    async fn fetch_tasks(&self, user: &UserId) -> Result<Vec<Task>, BackendError> {
        let req = self.request(Method::GET, &self.tasks_url).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{user}")),
            ("order", "position.asc".to_string()),
        ]);
        let tasks: Vec<Task> = Self::send(req, Operation::FetchTasks).await?;
        tracing::debug!(user_id = %user, count = tasks.len(), "fetched tasks");
        Ok(tasks)
    }

    async fn fetch_categories(&self, user: &UserId) -> Result<Vec<Category>, BackendError> {
        let req = self.request(Method::GET, &self.categories_url).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{user}")),
            ("order", "name.asc".to_string()),
        ]);
        Self::send(req, Operation::FetchCategories).await
    }

    async fn insert_task(&self, task: &NewTask) -> Result<Task, BackendError> {
        let req = self.returning(Method::POST, &self.tasks_url).json(task);
        Self::send_one(req, Operation::InsertTask, || "inserted task".to_string()).await
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, BackendError> {
        let req = self
            .returning(Method::PATCH, &self.tasks_url)
            .query(&[("id", format!("eq.{id}"))])
            .json(patch);
        Self::send_one(req, Operation::UpdateTask, || format!("task {id}")).await
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), BackendError> {
        let req = self
            .returning(Method::DELETE, &self.tasks_url)
            .query(&[("id", format!("eq.{id}"))]);
        let _: Task = Self::send_one(req, Operation::DeleteTask, || format!("task {id}")).await?;
        Ok(())
    }

    async fn insert_category(&self, category: &NewCategory) -> Result<Category, BackendError> {
        let req = self
            .returning(Method::POST, &self.categories_url)
            .json(category);
        Self::send_one(req, Operation::InsertCategory, || {
            "inserted category".to_string()
        })
        .await
    }

    async fn delete_category(&self, id: &CategoryId) -> Result<(), BackendError> {
        let req = self
            .returning(Method::DELETE, &self.categories_url)
            .query(&[("id", format!("eq.{id}"))]);
        let _: Category =
            Self::send_one(req, Operation::DeleteCategory, || format!("category {id}")).await?;
        Ok(())
    }

    async fn subscribe(&self, user: &UserId) -> Result<ChangeFeed, BackendError> {
        let Some(url) = &self.realtime_url else {
            return Err(BackendError::Unsupported(
                "no realtime url configured".to_string(),
            ));
        };
        let token = self.access_token.clone().or_else(|| self.api_key.clone());
        let request = SubscribeRequest::tasks(user.clone(), token);
        realtime::connect(url, &request, self.timeout).await
    }
}
