use std::time::Duration;

use anyhow::Context;
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use roster_shared::ListQuery;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::transport::{Transport, TransportError};

const JSON_MIME: &str = "application/json";

/// `Transport` over the REST backend.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("invalid API base URL: {base_url}"))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building HTTP client for the admin API")?;

        debug!(base_url = %base_url, timeout_secs = timeout.as_secs(), "created HTTP transport");
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| TransportError::Request(format!("bad path {path}: {err}")))
    }

    pub fn list_url(&self, path: &str, query: &ListQuery) -> Result<Url, TransportError> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut().extend_pairs(query.pairs());
        Ok(url)
    }
}

fn network_error(path: &str, err: reqwest::Error) -> TransportError {
    TransportError::Network {
        path: path.to_string(),
        message: err.to_string(),
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, query), fields(page = query.page, limit = query.limit))]
    async fn get_list(&self, path: &str, query: &ListQuery) -> Result<Value, TransportError> {
        let url = self.list_url(path, query)?;
        let response = self
            .client
            .get(url)
            .header(ACCEPT, JSON_MIME)
            .send()
            .await
            .map_err(|err| network_error(path, err))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| network_error(path, err))?;

        if !status.is_success() {
            warn!(path, status = %status, "list endpoint returned non-success status");
            return Err(TransportError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        serde_json::from_str(&body).map_err(|err| TransportError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    #[instrument(skip(self, body))]
    async fn put_json(&self, path: &str, body: &Value) -> Result<(), TransportError> {
        let url = self.endpoint(path)?;
        let payload =
            serde_json::to_vec(body).map_err(|err| TransportError::Request(err.to_string()))?;

        let response = self
            .client
            .put(url)
            .header(ACCEPT, JSON_MIME)
            .header(CONTENT_TYPE, JSON_MIME)
            .body(payload)
            .send()
            .await
            .map_err(|err| network_error(path, err))?;

        let status = response.status();
        if !status.is_success() {
            warn!(path, status = %status, "write endpoint returned non-success status");
            return Err(TransportError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use roster_shared::ListQuery;

    use super::HttpTransport;

    #[test]
    fn list_url_keeps_base_path_and_encodes_filter() {
        let transport = HttpTransport::new("https://admin.example.com/api/v1", Duration::from_secs(5))
            .expect("transport");
        let query = ListQuery {
            page: 2,
            limit: 10,
            filter: Some(r#"{"where":{"status":"active"}}"#.to_string()),
        };

        let url = transport.list_url("/blog/list", &query).expect("url");
        assert_eq!(url.path(), "/api/v1/blog/list");

        let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![
                ("page".to_string(), "2".to_string()),
                ("limit".to_string(), "10".to_string()),
                ("filter".to_string(), r#"{"where":{"status":"active"}}"#.to_string()),
            ]
        );
    }

    #[test]
    fn unfiltered_list_url_has_no_filter_key() {
        let transport =
            HttpTransport::new("http://localhost:3000/", Duration::from_secs(5)).expect("transport");
        let query = ListQuery {
            page: 1,
            limit: 20,
            filter: None,
        };

        let url = transport.list_url("ticket/list", &query).expect("url");
        assert_eq!(url.as_str(), "http://localhost:3000/ticket/list?page=1&limit=20");
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(HttpTransport::new("not a url", Duration::from_secs(5)).is_err());
    }
}
