//! `reqwest` implementation of the upload and report endpoints.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;

use crate::api::{
    AuthToken, EncodedImage, ImageUploader, RemoteReport, ReportApi, UploadCategory,
    UploadedImage,
};
use crate::config::ApiConfig;
use crate::error::FieldReportError;

/// Client for the report service.
///
/// - `POST {endpoint}/images` uploads one photo
/// - `POST {endpoint}/reports` creates a report
/// - `PUT {endpoint}/reports/{id}` replaces an existing report
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct UploadBody<'a> {
    #[serde(flatten)]
    image: &'a EncodedImage,
    category: UploadCategory,
    date: NaiveDate,
}

impl HttpClient {
    pub fn new(config: &ApiConfig) -> Result<Self, FieldReportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, FieldReportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FieldReportError::NotAuthenticated);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FieldReportError::Status { status, body })
    }
}

impl ImageUploader for HttpClient {
    async fn upload(
        &self,
        token: &AuthToken,
        image: &EncodedImage,
        category: UploadCategory,
        date: NaiveDate,
    ) -> Result<UploadedImage, FieldReportError> {
        tracing::debug!(file = %image.file_name, %category, %date, "uploading image");
        let body = UploadBody {
            image,
            category,
            date,
        };
        let response = self
            .client
            .post(self.url("images"))
            .bearer_auth(token.as_str())
            .json(&body)
            .send()
            .await?;
        let uploaded = Self::check(response).await?.json::<UploadedImage>().await?;
        Ok(uploaded)
    }
}

impl ReportApi for HttpClient {
    async fn create<P: Serialize + Sync>(
        &self,
        token: &AuthToken,
        payload: &P,
    ) -> Result<RemoteReport, FieldReportError> {
        let response = self
            .client
            .post(self.url("reports"))
            .bearer_auth(token.as_str())
            .json(payload)
            .send()
            .await?;
        let report = Self::check(response).await?.json::<RemoteReport>().await?;
        tracing::info!(id = %report.id, "report created");
        Ok(report)
    }

    async fn update<P: Serialize + Sync>(
        &self,
        token: &AuthToken,
        id: &str,
        payload: &P,
    ) -> Result<RemoteReport, FieldReportError> {
        let response = self
            .client
            .put(self.url(&format!("reports/{}", id)))
            .bearer_auth(token.as_str())
            .json(payload)
            .send()
            .await?;
        let report = Self::check(response).await?.json::<RemoteReport>().await?;
        tracing::info!(id = %report.id, "report updated");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let config = ApiConfig {
            endpoint: "https://reports.example/api/".into(),
            ..ApiConfig::default()
        };
        let client = HttpClient::new(&config).unwrap();
        assert_eq!(client.url("images"), "https://reports.example/api/images");
    }

    #[test]
    fn upload_body_flattens_image() {
        let image = EncodedImage {
            file_name: "a.jpg".into(),
            mime_type: "image/jpeg".into(),
            data: "AAAA".into(),
        };
        let body = UploadBody {
            image: &image,
            category: UploadCategory::Before,
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["file_name"], "a.jpg");
        assert_eq!(value["category"], "before");
        assert_eq!(value["date"], "2026-03-02");
    }
}
