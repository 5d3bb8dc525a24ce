// Typed client for the platform's REST API.
//
// Thin layer over reqwest: every method maps to one endpoint, attaches the
// bearer token from the `TokenProvider`, and turns non-2xx responses into
// `ApiError::Rejected` carrying the server's `detail` string. View refetches
// and mutations both go through here; the push connection lives elsewhere.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::challenge::{Challenge, ChallengeType, Distraction};
use crate::store::ViewId;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected request ({status}): {detail}")]
    Rejected { status: u16, detail: String },
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Source of the bearer token attached to every request. Token acquisition
/// and refresh live behind this seam; the client only asks for the current
/// value per request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// A fixed token (or none), as read from config or the environment.
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body for `POST /challenges/`. Detail fields are flat: the server selects
/// the details variant from `challenge_type`.
#[derive(Debug, Clone, Serialize)]
pub struct NewChallenge {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub challenge_type: ChallengeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distractions: Option<Vec<Distraction>>,
}

/// Body for `PATCH /challenges/{id}` (creator only). Omitted fields are
/// left unchanged server-side.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChallengeUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

/// Body for `PATCH /challenges/{id}/participation`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParticipationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

/// Paging window for list endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub skip: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Page { skip: 0, limit: 100 }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(ApiClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.tokens.access_token().await {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Send the request and decode the JSON body, mapping non-2xx responses
    /// to `Rejected` with the server's `detail` message when present.
    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.check(builder).await?;
        Ok(response.json().await?)
    }

    /// Like `send`, for endpoints whose success response carries no body.
    async fn send_no_body(&self, builder: reqwest::RequestBuilder) -> Result<(), ApiError> {
        self.check(builder).await?;
        Ok(())
    }

    async fn check(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| {
                    body.get("detail")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| status.to_string());
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(response)
    }

    // -- list endpoints --

    /// `GET /challenges/` with paging; `active_only` filters server-side.
    pub async fn list_challenges(
        &self,
        page: Page,
        active_only: bool,
    ) -> Result<Vec<Challenge>, ApiError> {
        let builder = self
            .request(reqwest::Method::GET, "/challenges/")
            .await
            .query(&[
                ("skip", page.skip.to_string()),
                ("limit", page.limit.to_string()),
                ("active_only", active_only.to_string()),
            ]);
        self.send(builder).await
    }

    /// `GET /challenges/my-challenges` with paging.
    pub async fn my_challenges(&self, page: Page) -> Result<Vec<Challenge>, ApiError> {
        let builder = self
            .request(reqwest::Method::GET, "/challenges/my-challenges")
            .await
            .query(&[
                ("skip", page.skip.to_string()),
                ("limit", page.limit.to_string()),
            ]);
        self.send(builder).await
    }

    /// `GET /challenges/my-created-challenges` with paging.
    pub async fn my_created_challenges(&self, page: Page) -> Result<Vec<Challenge>, ApiError> {
        let builder = self
            .request(reqwest::Method::GET, "/challenges/my-created-challenges")
            .await
            .query(&[
                ("skip", page.skip.to_string()),
                ("limit", page.limit.to_string()),
            ]);
        self.send(builder).await
    }

    /// Fetch the snapshot backing a cache view.
    pub async fn fetch_view(&self, view: ViewId, page: Page) -> Result<Vec<Challenge>, ApiError> {
        debug!(view = view.as_str(), "fetching view snapshot");
        match view {
            ViewId::All => self.list_challenges(page, false).await,
            ViewId::Joined => self.my_challenges(page).await,
            ViewId::Created => self.my_created_challenges(page).await,
        }
    }

    // -- single-entity endpoints --

    pub async fn get_challenge(&self, id: i64) -> Result<Challenge, ApiError> {
        let builder = self
            .request(reqwest::Method::GET, &format!("/challenges/{id}"))
            .await;
        self.send(builder).await
    }

    pub async fn create_challenge(&self, data: &NewChallenge) -> Result<Challenge, ApiError> {
        let builder = self
            .request(reqwest::Method::POST, "/challenges/")
            .await
            .json(data);
        self.send(builder).await
    }

    pub async fn join_challenge(&self, id: i64) -> Result<Challenge, ApiError> {
        let builder = self
            .request(reqwest::Method::POST, &format!("/challenges/{id}/join"))
            .await;
        self.send(builder).await
    }

    /// Flip a toggle challenge's active state; the response is the updated
    /// entity and confirms (or contradicts) the optimistic cache edit.
    pub async fn toggle_challenge(&self, id: i64) -> Result<Challenge, ApiError> {
        let builder = self
            .request(reqwest::Method::PATCH, &format!("/challenges/{id}/toggle"))
            .await;
        self.send(builder).await
    }

    pub async fn update_challenge(
        &self,
        id: i64,
        data: &ChallengeUpdate,
    ) -> Result<Challenge, ApiError> {
        let builder = self
            .request(reqwest::Method::PATCH, &format!("/challenges/{id}"))
            .await
            .json(data);
        self.send(builder).await
    }

    /// Update the caller's own participation state. The server answers with
    /// an empty success response, so nothing is decoded.
    pub async fn update_participation(
        &self,
        id: i64,
        data: &ParticipationUpdate,
    ) -> Result<(), ApiError> {
        let builder = self
            .request(
                reqwest::Method::PATCH,
                &format!("/challenges/{id}/participation"),
            )
            .await
            .json(data);
        self.send_no_body(builder).await
    }
}
