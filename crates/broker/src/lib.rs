//! HTTP client for the presigned-url/telemetry broker service, shared by
//! the artifact publisher and the run-report assembler — both need the
//! same basic-auth GET/PUT/POST triad against the same base URL.

#![forbid(unsafe_code)]

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

const PUT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("request to broker failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("broker returned non-200 status {status}: {body}")]
    NonSuccess { status: u16, body: String },
}

#[derive(Clone)]
pub struct BrokerClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// `GET {base_url}/presigned-url?request_id={bucket_folder}&remote_filename={remote_filename}`,
    /// returning the presigned URL body as text.
    pub async fn presigned_upload_url(
        &self,
        bucket_folder: &str,
        remote_filename: &str,
    ) -> Result<String, BrokerError> {
        let response = self
            .http
            .get(format!("{}/presigned-url", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("request_id", bucket_folder), ("remote_filename", remote_filename)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::NonSuccess {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.text().await?)
    }

    /// `PUT` the raw file body to a presigned URL with a 5-second timeout.
    pub async fn put_file(&self, url: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        let response = self
            .http
            .put(url)
            .timeout(PUT_TIMEOUT)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::NonSuccess {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// `POST {base_url}/telemetry?request_id={request_id}&telemetry_group={group}`
    /// with the JSON-serialized run report as the body.
    pub async fn send_telemetry(
        &self,
        request_id: &str,
        telemetry_group: &str,
        json_body: String,
    ) -> Result<(), BrokerError> {
        let response = self
            .http
            .post(format!("{}/telemetry", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("request_id", request_id), ("telemetry_group", telemetry_group)])
            .header("Content-Type", "application/json")
            .header("Accept", "text/plain")
            .body(json_body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::NonSuccess {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
