//! Azure Blob Storage backend.
//!
//! Talks to the Azure Blob REST API with `reqwest`.  Every blob lives in
//! the single container named at construction.
//!
//! Credentials come from a storage account connection string:
//!   - `AccountName` + `AccountKey` (Shared Key auth)
//!   - `SharedAccessSignature` (SAS token auth)
//!   - `UseDevelopmentStorage=true` (Azurite emulator defaults)
//!
//! `BlobEndpoint` overrides the service URL.  When that URL carries a path
//! (emulators use `http://host:port/{account}`), the path becomes part of
//! the canonicalized resource signed under Shared Key.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::Sha256;
use tracing::{debug, info};

use super::backend::{md5_etag, BlobBackend, BlobFuture};

/// Azure REST API version used for all requests.
const AZURE_API_VERSION: &str = "2023-11-03";

/// Well-known Azurite account.
const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Azure blob names keep `/` unencoded in the URL path.
const AZURE_BLOB_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Azure authentication method.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AzureAuth {
    /// Shared Key authentication using the decoded storage account key.
    SharedKey { key_bytes: Vec<u8> },
    /// SAS token authentication (appended as query string).
    SasToken { token: String },
}

/// The pieces of a connection string this backend needs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectionInfo {
    account: String,
    /// Service URL without trailing slash.
    base_url: String,
    auth: AzureAuth,
}

/// Parse a `Key=Value;Key=Value` storage connection string.
fn parse_connection_string(conn_str: &str) -> anyhow::Result<ConnectionInfo> {
    let mut account = None;
    let mut account_key = None;
    let mut sas = None;
    let mut blob_endpoint = None;
    let mut protocol = "https".to_string();
    let mut suffix = "core.windows.net".to_string();
    let mut dev_storage = false;

    for part in conn_str.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = part.split_once('=') else {
            anyhow::bail!("Malformed connection string segment: {part:?}");
        };
        match key {
            "AccountName" => account = Some(value.to_string()),
            "AccountKey" => account_key = Some(value.to_string()),
            "SharedAccessSignature" => sas = Some(value.trim_start_matches('?').to_string()),
            "BlobEndpoint" => blob_endpoint = Some(value.trim_end_matches('/').to_string()),
            "DefaultEndpointsProtocol" => protocol = value.to_string(),
            "EndpointSuffix" => suffix = value.to_string(),
            "UseDevelopmentStorage" => dev_storage = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    if dev_storage {
        account.get_or_insert_with(|| DEV_ACCOUNT_NAME.to_string());
        account_key.get_or_insert_with(|| DEV_ACCOUNT_KEY.to_string());
        blob_endpoint.get_or_insert_with(|| DEV_BLOB_ENDPOINT.to_string());
    }

    let auth = if let Some(key) = account_key {
        let key_bytes = BASE64_STANDARD
            .decode(key.trim())
            .map_err(|e| anyhow::anyhow!("Invalid AccountKey in connection string: {}", e))?;
        AzureAuth::SharedKey { key_bytes }
    } else if let Some(token) = sas {
        AzureAuth::SasToken { token }
    } else {
        anyhow::bail!("Connection string has neither AccountKey nor SharedAccessSignature");
    };

    let account = match (account, &blob_endpoint) {
        (Some(name), _) => name,
        // SAS-only strings may omit the account; take it from the host.
        (None, Some(endpoint)) => reqwest::Url::parse(endpoint)?
            .host_str()
            .and_then(|h| h.split('.').next())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Cannot derive account from BlobEndpoint"))?,
        (None, None) => anyhow::bail!("Connection string is missing AccountName"),
    };

    let base_url =
        blob_endpoint.unwrap_or_else(|| format!("{protocol}://{account}.blob.{suffix}"));

    Ok(ConnectionInfo {
        account,
        base_url,
        auth,
    })
}

/// Backend storing blobs in one Azure Blob Storage container.
pub struct AzureBlobBackend {
    client: reqwest::Client,
    container: String,
    account: String,
    base_url: String,
    /// Path component of `base_url` (empty for the public cloud).
    endpoint_path: String,
    auth: AzureAuth,
}

impl AzureBlobBackend {
    /// Build a backend for `container` from a storage connection string.
    pub fn new(connection_string: &str, container: &str) -> anyhow::Result<Self> {
        if connection_string.trim().is_empty() {
            anyhow::bail!("Azure blob backend requires a connection string");
        }
        let info = parse_connection_string(connection_string)?;

        let endpoint_path = reqwest::Url::parse(&info.base_url)?
            .path()
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        info!(
            "Azure blob backend initialized: account={} container={} endpoint={}",
            info.account, container, info.base_url
        );

        Ok(Self {
            client,
            container: container.to_string(),
            account: info.account,
            base_url: info.base_url,
            endpoint_path,
            auth: info.auth,
        })
    }

    /// URL of the container, or of a blob inside it.
    fn resource_url(&self, blob_name: Option<&str>) -> String {
        match blob_name {
            Some(name) => {
                let encoded = percent_encoding::utf8_percent_encode(name, &AZURE_BLOB_ENCODE_SET);
                format!("{}/{}/{}", self.base_url, self.container, encoded)
            }
            None => format!("{}/{}", self.base_url, self.container),
        }
    }

    /// Canonicalized resource for Shared Key signing.  Uses the un-encoded
    /// blob name and lists query parameters sorted by key.
    fn canonicalized_resource(&self, blob_name: Option<&str>, query: &[(&str, &str)]) -> String {
        let mut resource = format!("/{}{}/{}", self.account, self.endpoint_path, self.container);
        if let Some(name) = blob_name {
            resource.push('/');
            resource.push_str(name);
        }
        let mut sorted = query.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        for (k, v) in sorted {
            resource.push_str(&format!("\n{}:{}", k.to_lowercase(), v));
        }
        resource
    }

    /// Build the Shared Key string-to-sign.
    ///
    /// ```text
    /// VERB\nContent-Encoding\nContent-Language\nContent-Length\nContent-MD5\n
    /// Content-Type\nDate\nIf-Modified-Since\nIf-Match\nIf-None-Match\n
    /// If-Unmodified-Since\nRange\nCanonicalizedHeaders\nCanonicalizedResource
    /// ```
    fn string_to_sign(
        &self,
        method: &Method,
        blob_name: Option<&str>,
        query: &[(&str, &str)],
        content_length: usize,
        content_type: &str,
        ms_headers: &[(&str, &str)],
    ) -> String {
        // Content-Length is empty when zero.
        let content_length_str = match content_length {
            0 => String::new(),
            len => len.to_string(),
        };

        let mut headers: Vec<(String, &str)> = ms_headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), *v))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        let canonicalized_headers = headers
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}\n{}",
            method.as_str(),
            content_length_str,
            content_type,
            canonicalized_headers,
            self.canonicalized_resource(blob_name, query)
        )
    }

    /// Sign `string_to_sign` and return the Authorization header value.
    fn authorization(&self, key_bytes: &[u8], string_to_sign: &str) -> anyhow::Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(key_bytes)
            .map_err(|e| anyhow::anyhow!("HMAC key error: {}", e))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!("SharedKey {}:{}", self.account, signature))
    }

    /// Assemble a signed request against the container or one of its blobs.
    fn request(
        &self,
        method: Method,
        blob_name: Option<&str>,
        query: &[(&str, &str)],
        body: Option<Bytes>,
        extra_ms_headers: &[(&str, &str)],
    ) -> anyhow::Result<reqwest::RequestBuilder> {
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());
        let content_type = if body.is_some() {
            "application/octet-stream"
        } else {
            ""
        };
        let content_length = body.as_ref().map_or(0, |b| b.len());

        let mut ms_headers: Vec<(&str, &str)> =
            vec![("x-ms-date", date.as_str()), ("x-ms-version", AZURE_API_VERSION)];
        ms_headers.extend_from_slice(extra_ms_headers);

        let mut url = self.resource_url(blob_name);
        let mut separator = '?';
        for (k, v) in query {
            url.push_str(&format!("{separator}{k}={v}"));
            separator = '&';
        }
        if let AzureAuth::SasToken { token } = &self.auth {
            url.push_str(&format!("{separator}{token}"));
        }

        let mut req = self.client.request(method.clone(), &url);
        for (k, v) in &ms_headers {
            req = req.header(*k, *v);
        }
        if !content_type.is_empty() {
            req = req.header("Content-Type", content_type);
        }

        if let AzureAuth::SharedKey { key_bytes } = &self.auth {
            let to_sign = self.string_to_sign(
                &method,
                blob_name,
                query,
                content_length,
                content_type,
                &ms_headers,
            );
            req = req.header("Authorization", self.authorization(key_bytes, &to_sign)?);
        }

        if let Some(body) = body {
            req = req.body(body);
        } else if method == Method::PUT {
            req = req.header("Content-Length", "0");
        }
        Ok(req)
    }

    /// Map an Azure HTTP error to an anyhow error with context.
    async fn azure_error(context: &str, resp: reqwest::Response) -> anyhow::Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::anyhow!("Azure {}: HTTP {} - {}", context, status, body)
    }
}

impl BlobBackend for AzureBlobBackend {
    fn ensure_container(&self) -> BlobFuture<'_, ()> {
        Box::pin(async move {
            let resp = self
                .request(Method::PUT, None, &[("restype", "container")], None, &[])?
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Azure create container request failed: {}", e))?;

            match resp.status() {
                s if s.is_success() => {
                    info!("Created Azure container {}", self.container);
                    Ok(())
                }
                // ContainerAlreadyExists
                StatusCode::CONFLICT => {
                    debug!("Azure container {} already exists", self.container);
                    Ok(())
                }
                _ => Err(Self::azure_error("create container", resp).await),
            }
        })
    }

    fn put(&self, name: &str, data: Bytes) -> BlobFuture<'_, String> {
        let name = name.to_string();
        Box::pin(async move {
            let fallback_etag = md5_etag(&data);
            let resp = self
                .request(
                    Method::PUT,
                    Some(&name),
                    &[],
                    Some(data),
                    &[("x-ms-blob-type", "BlockBlob")],
                )?
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Azure upload request failed: {}", e))?;

            if !resp.status().is_success() {
                return Err(Self::azure_error("upload", resp).await);
            }

            let etag = resp
                .headers()
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or(fallback_etag);
            Ok(etag)
        })
    }

    fn get(&self, name: &str) -> BlobFuture<'_, Option<Bytes>> {
        let name = name.to_string();
        Box::pin(async move {
            let resp = self
                .request(Method::GET, Some(&name), &[], None, &[])?
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Azure download request failed: {}", e))?;

            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status().is_success() {
                return Err(Self::azure_error("download", resp).await);
            }

            let body = resp
                .bytes()
                .await
                .map_err(|e| anyhow::anyhow!("Azure download body read failed: {}", e))?;
            Ok(Some(body))
        })
    }

    fn delete(&self, name: &str) -> BlobFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(async move {
            let resp = self
                .request(Method::DELETE, Some(&name), &[], None, &[])?
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Azure delete request failed: {}", e))?;

            if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
                return Err(Self::azure_error("delete", resp).await);
            }
            Ok(())
        })
    }
}
