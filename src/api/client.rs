//! Node API client used by admin operations

use super::rest::{ApiErrorResponse, FORMAT_DEVICES_PATH, LIST_DEVICES_PATH};
use super::signer::{self, SignableRequest, HEADER_HOST};
use crate::admin::Credential;
use crate::error::{Error, Result};
use crate::node::{InitDevicesRequest, InitDevicesResponse, ListDevicesRequest, ListDevicesResponse};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Signed HTTP client for one node agent
#[derive(Clone, Debug)]
pub struct NodeApiClient {
    http: reqwest::Client,
    base_url: Url,
    host: String,
    credential: Credential,
}

impl NodeApiClient {
    /// `base_url` is the node agent address, e.g. `http://10.0.0.5:40443`
    pub fn new(base_url: &str, credential: Credential) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Validation(format!("invalid node API URL {}: {}", base_url, e)))?;
        let host = match (base_url.host_str(), base_url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(Error::Validation(format!("node API URL {} has no host", base_url)))
            }
        };
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            host,
            credential,
        })
    }

    pub async fn list_devices(&self, request: &ListDevicesRequest) -> Result<ListDevicesResponse> {
        self.post(LIST_DEVICES_PATH, request).await
    }

    pub async fn format_devices(&self, request: &InitDevicesRequest) -> Result<InitDevicesResponse> {
        self.post(FORMAT_DEVICES_PATH, request).await
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp> {
        let body = serde_json::to_vec(request)?;
        let mut headers = BTreeMap::new();
        headers.insert(HEADER_HOST.to_string(), self.host.clone());
        let signed = signer::sign(
            &SignableRequest {
                method: "POST",
                path,
                query: "",
                headers: &headers,
                body: &body,
            },
            &self.credential,
            chrono::Utc::now(),
        )?;

        let url = self
            .base_url
            .join(path)
            .map_err(|e| Error::Validation(format!("invalid path {}: {}", path, e)))?;
        debug!("POST {}", url);

        let mut builder = self
            .http
            .post(url)
            .header("content-type", "application/json")
            .header(HEADER_HOST, self.host.as_str());
        for (name, value) in &signed {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.body(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ApiErrorResponse>().await {
                Ok(err) => err.message,
                Err(_) => status.to_string(),
            };
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::rest::tests::{agent, credential};
    use crate::api::{NodeApiServer, NodeApiServerConfig};
    use crate::crd::InitDevice;
    use assert_matches::assert_matches;
    use tokio_util::sync::CancellationToken;

    async fn start_server() -> (String, CancellationToken) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = NodeApiServer::new(NodeApiServerConfig::default(), agent(), credential());
        let token = cancel.clone();
        tokio::spawn(async move { server.serve(listener, token).await });
        (format!("http://{}", addr), cancel)
    }

    #[tokio::test]
    async fn test_list_devices_over_http() {
        let (url, cancel) = start_server().await;
        let client = NodeApiClient::new(&url, credential()).unwrap();
        let response = client
            .list_devices(&ListDevicesRequest::default())
            .await
            .unwrap();
        assert_eq!(response.node_id, "n1");
        assert_eq!(response.devices.len(), 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_format_reports_per_device_errors() {
        let (url, cancel) = start_server().await;
        let client = NodeApiClient::new(&url, credential()).unwrap();
        let response = client
            .format_devices(&InitDevicesRequest {
                devices: vec![InitDevice {
                    id: "8:0$stale".into(),
                    name: "sda".into(),
                    force: false,
                }],
            })
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(response.results[0].error.contains("device state changed"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_bad_credential_is_api_error() {
        let (url, cancel) = start_server().await;
        let client = NodeApiClient::new(
            &url,
            Credential {
                access_key: "access".into(),
                secret_key: "wrong".into(),
            },
        )
        .unwrap();
        assert_matches!(
            client.list_devices(&ListDevicesRequest::default()).await,
            Err(Error::Api { status: 401, .. })
        );
        cancel.cancel();
    }

    #[test]
    fn test_new_rejects_bad_url() {
        assert_matches!(
            NodeApiClient::new("not a url", credential()),
            Err(Error::Validation(_))
        );
    }
}
