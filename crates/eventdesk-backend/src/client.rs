//! REST client for table reads/writes and the auth service.

use reqwest::{Client, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, trace};

use crate::{BackendConfig, BackendError};

/// Client for the backend's REST surface.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl RestClient {
    /// Build a client from the given config.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        config.validate()?;
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Base URL of the backend.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
        let token = bearer.unwrap_or(&self.api_key);
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    /// Turn a non-success response into a `BackendError`.
    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(BackendError::Auth(format!("{}: {}", status, body)));
        }
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Read rows from `table`, returning them untyped so callers can
    /// validate each row individually.
    ///
    /// `query` is passed through as URL query parameters, e.g.
    /// `[("event_id", "eq.<uuid>"), ("order", "last_name.asc")]`.
    pub async fn select_rows(
        &self,
        table: &str,
        query: &[(&str, String)],
        bearer: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        trace!(table, ?query, "selecting rows");

        let request = self.authorize(self.http.get(&url).query(query), bearer);
        let response = Self::check(request.send().await?).await?;
        let rows: Vec<serde_json::Value> = response.json().await?;

        debug!(table, rows = rows.len(), "selected rows");
        Ok(rows)
    }

    /// Patch every row of `table` matching `query` with `body`.
    pub async fn update_rows<B: Serialize + ?Sized>(
        &self,
        table: &str,
        query: &[(&str, String)],
        body: &B,
        bearer: Option<&str>,
    ) -> Result<(), BackendError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let request = self.authorize(
            self.http
                .patch(&url)
                .query(query)
                .header("Prefer", "return=minimal")
                .json(body),
            bearer,
        );
        Self::check(request.send().await?).await?;
        trace!(table, "updated rows");
        Ok(())
    }

    /// GET an auth endpoint, e.g. `/auth/v1/user`.
    pub async fn auth_get<T: DeserializeOwned>(
        &self,
        path: &str,
        bearer: Option<&str>,
    ) -> Result<T, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.authorize(self.http.get(&url), bearer);
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// POST a JSON body to an auth endpoint and decode the JSON reply.
    pub async fn auth_post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
        bearer: Option<&str>,
    ) -> Result<T, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.authorize(self.http.post(&url).query(query).json(body), bearer);
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// POST to an auth endpoint that replies without a body.
    pub async fn auth_post_empty(&self, path: &str, bearer: Option<&str>) -> Result<(), BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.authorize(self.http.post(&url), bearer);
        Self::check(request.send().await?).await?;
        Ok(())
    }
}
