//! Client for the remote submission endpoint.
//!
//! The endpoint lives at `{base_url}/form/submissions/` and speaks JSON:
//! `POST` creates, `GET` lists, `PUT {id}/` updates. [`SubmissionApi`] is the
//! seam the sync worker and the submission client talk through;
//! [`HttpSubmissionApi`] is the real implementation.

use std::time::Duration;

use reqwest::{Client, Response, Url};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::record::{Delivery, RemoteSubmission, Submission};

/// Path of the submission collection relative to the base URL.
const SUBMISSIONS_PATH: &str = "form/submissions/";

/// Header carrying the per-record idempotency token.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Longest response body kept in a [`Error::RemoteRejection`].
const MAX_ERROR_BODY: usize = 512;

/// Operations offered by the remote submission endpoint.
#[async_trait::async_trait]
pub trait SubmissionApi: Send + Sync + std::fmt::Debug {
    /// Create a submission.
    ///
    /// `idempotency_key` is forwarded to the endpoint when present; the
    /// endpoint is free to ignore it.
    ///
    /// # Errors
    ///
    /// [`Error::Network`] if no answer arrived, [`Error::RemoteRejection`] if
    /// the endpoint declined.
    async fn create(
        &self,
        submission: &Submission,
        idempotency_key: Option<&str>,
    ) -> Result<Delivery>;

    /// List every remote submission.
    ///
    /// # Errors
    ///
    /// [`Error::Network`], [`Error::RemoteRejection`], or [`Error::Json`] for
    /// an unreadable listing.
    async fn list(&self) -> Result<Vec<RemoteSubmission>>;

    /// Replace the fields of a delivered submission.
    ///
    /// # Errors
    ///
    /// Same as [`SubmissionApi::list`].
    async fn update(&self, id: i64, submission: &Submission) -> Result<RemoteSubmission>;
}

/// [`SubmissionApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSubmissionApi {
    client: Client,
    collection: Url,
}

impl HttpSubmissionApi {
    /// Build a client for the endpoint under `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] for an unusable URL, or
    /// [`Error::Network`] if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let collection = collection_url(base_url)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, collection })
    }

    fn item_url(&self, id: i64) -> Result<Url> {
        self.collection
            .join(&format!("{id}/"))
            .map_err(|e| Error::InvalidBaseUrl {
                url: self.collection.to_string(),
                message: e.to_string(),
            })
    }

    /// Turn a non-success status into [`Error::RemoteRejection`], otherwise
    /// return the body.
    async fn read_body(response: Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(Error::remote_rejection(status, truncate(&body, MAX_ERROR_BODY)))
        }
    }
}

#[async_trait::async_trait]
impl SubmissionApi for HttpSubmissionApi {
    async fn create(
        &self,
        submission: &Submission,
        idempotency_key: Option<&str>,
    ) -> Result<Delivery> {
        let mut request = self.client.post(self.collection.clone()).json(submission);
        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_HEADER, key);
        }

        debug!("POST {}", self.collection);
        let body = Self::read_body(request.send().await?).await?;
        Ok(parse_delivery(&body))
    }

    async fn list(&self) -> Result<Vec<RemoteSubmission>> {
        debug!("GET {}", self.collection);
        let response = self.client.get(self.collection.clone()).send().await?;
        let body = Self::read_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn update(&self, id: i64, submission: &Submission) -> Result<RemoteSubmission> {
        let url = self.item_url(id)?;
        debug!("PUT {}", url);
        let response = self.client.put(url).json(submission).send().await?;
        let body = Self::read_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// `{base_url}/form/submissions/`, tolerating a base URL with or without a
/// trailing slash.
fn collection_url(base_url: &str) -> Result<Url> {
    let invalid = |message: String| Error::InvalidBaseUrl {
        url: base_url.to_string(),
        message,
    };

    let mut base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    if base.cannot_be_a_base() {
        return Err(invalid("URL cannot be a base".to_string()));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(SUBMISSIONS_PATH)
        .map_err(|e| invalid(e.to_string()))
}

/// The endpoint accepted the submission; read what it tells us about it.
///
/// A body that is not the expected JSON still counts as delivered.
fn parse_delivery(body: &str) -> Delivery {
    if body.trim().is_empty() {
        return Delivery::default();
    }
    serde_json::from_str(body).unwrap_or_else(|e| {
        warn!("Delivery accepted but response body was unreadable: {}", e);
        Delivery::default()
    })
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
