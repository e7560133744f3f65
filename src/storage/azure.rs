// src/storage/azure.rs
//! Azure Blob Storage over its REST API (Put Blob, Get Blob and Get Blob
//! Properties), authorised either with the account key (SharedKey signing)
//! or a SAS token.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode, Url};
use sha2::Sha256;

use super::{validate_key, BlobStore, StoreError};
use crate::error::IngestError;

const API_VERSION: &str = "2021-08-06";
const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    SharedKey { account: String, key: Vec<u8> },
    Sas(String),
}

// Keep secrets out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { account, .. } => write!(f, "SharedKey({account}, ***)"),
            Self::Sas(_) => f.write_str("Sas(***)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub blob_endpoint: Url,
    pub credentials: Credentials,
}

impl ConnectionString {
    pub fn parse(s: &str) -> Result<Self, IngestError> {
        let mut account = None;
        let mut key = None;
        let mut sas = None;
        let mut endpoint = None;
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();
        let mut dev = false;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| IngestError::Config(format!("malformed connection string segment `{}`", redact(part))))?;
            match k.to_ascii_lowercase().as_str() {
                "accountname" => account = Some(v.to_string()),
                "accountkey" => key = Some(v.to_string()),
                "sharedaccesssignature" => sas = Some(v.trim_start_matches('?').to_string()),
                "blobendpoint" => endpoint = Some(v.to_string()),
                "defaultendpointsprotocol" => protocol = v.to_ascii_lowercase(),
                "endpointsuffix" => suffix = v.to_string(),
                "usedevelopmentstorage" => dev = v.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if dev {
            account.get_or_insert_with(|| DEV_ACCOUNT.to_string());
            key.get_or_insert_with(|| DEV_KEY.to_string());
            endpoint.get_or_insert_with(|| DEV_ENDPOINT.to_string());
        }

        let endpoint = match (endpoint, &account) {
            (Some(e), _) => e,
            (None, Some(a)) => format!("{protocol}://{a}.blob.{suffix}"),
            (None, None) => {
                return Err(IngestError::Config(
                    "connection string needs AccountName or BlobEndpoint".into(),
                ))
            }
        };
        let blob_endpoint = Url::parse(endpoint.trim_end_matches('/'))
            .map_err(|e| IngestError::Config(format!("invalid blob endpoint: {e}")))?;

        let credentials = match (sas, account, key) {
            (Some(token), _, _) => Credentials::Sas(token),
            (None, Some(account), Some(key)) => {
                let key = STANDARD
                    .decode(key.trim())
                    .map_err(|e| IngestError::Config(format!("AccountKey is not base64: {e}")))?;
                Credentials::SharedKey { account, key }
            }
            _ => {
                return Err(IngestError::Config(
                    "connection string needs AccountKey or SharedAccessSignature".into(),
                ))
            }
        };

        Ok(Self {
            blob_endpoint,
            credentials,
        })
    }
}

fn redact(part: &str) -> String {
    part.chars().take(12).collect::<String>() + "…"
}

pub struct AzureBlobStore {
    client: Client,
    conn: ConnectionString,
    container: String,
}

impl AzureBlobStore {
    pub fn from_connection_string(conn_str: &str, container: &str) -> Result<Self, IngestError> {
        if container.trim().is_empty() {
            return Err(IngestError::Config("container name is empty".into()));
        }
        let conn = ConnectionString::parse(conn_str)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IngestError::Config(format!("building blob http client: {e}")))?;
        Ok(Self {
            client,
            conn,
            container: container.to_string(),
        })
    }

    fn blob_url(&self, key: &str) -> Result<Url, StoreError> {
        validate_key(key)?;
        let mut url = self.conn.blob_endpoint.clone();
        {
            let mut segs = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidKey(key.to_string()))?;
            segs.pop_if_empty().push(&self.container);
            for seg in key.split('/') {
                segs.push(seg);
            }
        }
        if let Credentials::Sas(token) = &self.conn.credentials {
            url.set_query(Some(token));
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        body: Option<(Vec<u8>, &str)>,
    ) -> Result<reqwest::Response, StoreError> {
        let url = self.blob_url(key)?;
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();

        let mut ms_headers: Vec<(&str, String)> = vec![
            ("x-ms-date", date),
            ("x-ms-version", API_VERSION.to_string()),
        ];
        if body.is_some() {
            ms_headers.push(("x-ms-blob-type", "BlockBlob".to_string()));
        }

        let mut req = self.client.request(method.clone(), url.clone());
        for (name, value) in &ms_headers {
            req = req.header(*name, value);
        }

        let (len, content_type) = match &body {
            Some((bytes, ct)) => (bytes.len(), *ct),
            None => (0, ""),
        };

        if let Credentials::SharedKey { account, key: secret } = &self.conn.credentials {
            let to_sign = string_to_sign(
                method.as_str(),
                len,
                content_type,
                &ms_headers,
                &format!("/{account}{}", url.path()),
            );
            let signature = sign(secret, &to_sign)?;
            req = req.header("Authorization", format!("SharedKey {account}:{signature}"));
        }

        if let Some((bytes, ct)) = body {
            req = req.header("Content-Type", ct).body(bytes);
        }

        Ok(req.send().await?)
    }
}

/// SharedKey string-to-sign for the Blob service (2009-09-19 and later).
fn string_to_sign(
    verb: &str,
    content_length: usize,
    content_type: &str,
    ms_headers: &[(&str, String)],
    canonical_resource: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut headers: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
        .collect();
    headers.sort();
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();

    // verb, encoding, language, length, md5, type, date, if-modified-since,
    // if-match, if-none-match, if-unmodified-since, range
    format!(
        "{verb}\n\n\n{length}\n\n{content_type}\n\n\n\n\n\n\n{canonical_headers}{canonical_resource}"
    )
}

fn sign(key: &[u8], payload: &str) -> Result<String, StoreError> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StoreError::Corrupt(format!("unusable account key: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

async fn status_error(resp: reqwest::Response) -> StoreError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    StoreError::Status {
        status,
        body: body.chars().take(512).collect(),
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let resp = self.send(Method::GET, key, None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.bytes().await?.to_vec())),
            _ => Err(status_error(resp).await),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let resp = self.send(Method::HEAD, key, None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(status_error(resp).await),
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        let resp = self.send(Method::PUT, key, Some((body, content_type))).await?;
        if resp.status().is_success() {
            tracing::debug!(target: "storage", key, "blob written");
            Ok(())
        } else {
            Err(status_error(resp).await)
        }
    }

    fn name(&self) -> &'static str {
        "azure"
    }
}
