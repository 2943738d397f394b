//! Table service REST client.
//!
//! Speaks the OData JSON protocol directly over reqwest and signs every
//! request with the account's shared key.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::auth::format_ms_date;
use super::endpoint::TableEndpoint;
use super::entity::decode_properties;
use super::{Entity, TableQuery, TableStore};
use crate::core::config::TransportConfig;
use crate::core::models::Row;
use crate::errors::TransportError;

pub const API_VERSION: &str = "2019-02-02";
const ACCEPT_JSON: &str = "application/json;odata=minimalmetadata";
const DATA_SERVICE_VERSION: &str = "3.0;NetFx";
/// Largest page the service returns for a single query request.
const MAX_PAGE_SIZE: usize = 1000;

const NEXT_PARTITION_HEADER: &str = "x-ms-continuation-nextpartitionkey";
const NEXT_ROW_HEADER: &str = "x-ms-continuation-nextrowkey";

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(default)]
    value: Vec<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "odata.error")]
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    value: String,
}

/// Continuation token for the next page of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub next_partition_key: String,
    pub next_row_key: Option<String>,
}

impl Continuation {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            next_partition_key: header(NEXT_PARTITION_HEADER)?,
            next_row_key: header(NEXT_ROW_HEADER),
        })
    }
}

/// [`TableStore`] backed by the table service REST API.
#[derive(Debug, Clone)]
pub struct HttpTableStore {
    client: Client,
    endpoint: TableEndpoint,
}

impl HttpTableStore {
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be resolved or the HTTP client cannot be built.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let endpoint = TableEndpoint::from_config(config)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::new(client, endpoint))
    }

    #[must_use]
    pub fn new(client: Client, endpoint: TableEndpoint) -> Self {
        Self { client, endpoint }
    }

    #[must_use]
    pub fn endpoint(&self) -> &TableEndpoint {
        &self.endpoint
    }

    fn signed(&self, method: Method, url: Url) -> RequestBuilder {
        let date = format_ms_date(Utc::now());
        let authorization = self
            .endpoint
            .credential()
            .authorization(&date, &self.endpoint.canonical_resource(&url));

        self.client
            .request(method, url)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("Authorization", authorization)
            .header("Accept", ACCEPT_JSON)
            .header("DataServiceVersion", DATA_SERVICE_VERSION)
            .header("MaxDataServiceVersion", DATA_SERVICE_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        request
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("Table service request failed: {e}")))
    }

    async fn fetch_page(
        &self,
        table: &str,
        query: &TableQuery,
        page_size: Option<usize>,
        continuation: Option<&Continuation>,
    ) -> Result<(Vec<Row>, Option<Continuation>), TransportError> {
        let mut url = self.endpoint.url(&format!("{table}()"))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(filter) = query.filter() {
                pairs.append_pair("$filter", &filter);
            }
            if let Some(select) = query.select.as_ref().filter(|s| !s.is_empty()) {
                pairs.append_pair("$select", &select.join(","));
            }
            if let Some(size) = page_size {
                pairs.append_pair("$top", &size.to_string());
            }
            if let Some(next) = continuation {
                pairs.append_pair("NextPartitionKey", &next.next_partition_key);
                if let Some(row) = &next.next_row_key {
                    pairs.append_pair("NextRowKey", row);
                }
            }
        }
        debug!("Querying table {} at {}", table, url);

        let response = self.send(self.signed(Method::GET, url)).await?;
        if !response.status().is_success() {
            return Err(service_error(response).await);
        }

        let next = Continuation::from_headers(response.headers());
        let page: QueryPage = response.json().await.map_err(|e| {
            TransportError::Serialization(format!("Failed to parse query response: {e}"))
        })?;

        Ok((page.value.iter().map(decode_properties).collect(), next))
    }
}

#[async_trait]
impl TableStore for HttpTableStore {
    async fn create_table_if_not_exists(&self, table: &str) -> Result<bool, TransportError> {
        let url = self.endpoint.url("Tables")?;
        let request = self
            .signed(Method::POST, url)
            .header("Prefer", "return-no-content")
            .json(&json!({ "TableName": table }));

        let response = self.send(request).await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => {
                info!("Created table {}", table);
                Ok(true)
            }
            StatusCode::CONFLICT => {
                let err = service_error(response).await;
                if err.service_code() == Some("TableAlreadyExists") {
                    debug!("Table {} already exists", table);
                    Ok(false)
                } else {
                    Err(err)
                }
            }
            _ => Err(service_error(response).await),
        }
    }

    async fn delete_table_if_exists(&self, table: &str) -> Result<bool, TransportError> {
        let url = self.endpoint.url(&format!("Tables('{table}')"))?;
        let response = self.send(self.signed(Method::DELETE, url)).await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => {
                info!("Deleted table {}", table);
                Ok(true)
            }
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(service_error(response).await),
        }
    }

    async fn insert_entity(&self, table: &str, entity: &Entity) -> Result<(), TransportError> {
        let url = self.endpoint.url(table)?;
        let request = self
            .signed(Method::POST, url)
            .header("Prefer", "return-no-content")
            .json(&entity.to_json());

        let response = self.send(request).await?;
        if response.status().is_success() {
            debug!(
                "Inserted entity {}/{} into {}",
                entity.partition_key, entity.row_key, table
            );
            Ok(())
        } else {
            Err(service_error(response).await)
        }
    }

    async fn query_entities(
        &self,
        table: &str,
        query: &TableQuery,
    ) -> Result<Vec<Row>, TransportError> {
        let mut rows = Vec::new();
        let mut continuation: Option<Continuation> = None;

        loop {
            let remaining = query.top.map(|top| top.saturating_sub(rows.len()));
            if remaining == Some(0) {
                break;
            }
            let page_size = remaining.map(|r| r.min(MAX_PAGE_SIZE));

            let (page, next) = self
                .fetch_page(table, query, page_size, continuation.as_ref())
                .await?;
            rows.extend(page);

            match next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        if let Some(top) = query.top {
            rows.truncate(top);
        }
        Ok(rows)
    }
}

/// Turns a non-success response into [`TransportError::Service`].
async fn service_error(response: Response) -> TransportError {
    let status = response.status();
    let text = response.text().await.unwrap_or_else(|e| {
        format!("Failed to read error response body (status {status}): {e}")
    });
    parse_service_error(status.as_u16(), &text)
}

/// Decodes an OData error body, falling back to the raw text.
#[must_use]
pub fn parse_service_error(status: u16, body: &str) -> TransportError {
    #[cfg(feature = "debug-logs")]
    debug!("Table service error body (status {}): {}", status, body);

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => TransportError::Service {
            status,
            code: parsed.error.code,
            message: parsed.error.message.value,
        },
        Err(_) => TransportError::Service {
            status,
            code: StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown")
                .to_string(),
            message: body.trim().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_odata_error() {
        let body = r#"{"odata.error":{"code":"TableAlreadyExists","message":{"lang":"en-US","value":"The table specified already exists."}}}"#;
        let err = parse_service_error(409, body);
        assert_eq!(err.service_code(), Some("TableAlreadyExists"));
        assert_eq!(
            err.to_string(),
            "Table service returned 409 (TableAlreadyExists): The table specified already exists."
        );
    }

    #[test]
    fn test_parse_non_json_error_falls_back_to_reason() {
        let err = parse_service_error(403, "forbidden\n");
        match err {
            TransportError::Service {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 403);
                assert_eq!(code, "Forbidden");
                assert_eq!(message, "forbidden");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_continuation_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(Continuation::from_headers(&headers).is_none());

        headers.insert(NEXT_PARTITION_HEADER, HeaderValue::from_static("1!8!cGs-"));
        headers.insert(NEXT_ROW_HEADER, HeaderValue::from_static("1!8!cms-"));
        assert_eq!(
            Continuation::from_headers(&headers),
            Some(Continuation {
                next_partition_key: "1!8!cGs-".to_string(),
                next_row_key: Some("1!8!cms-".to_string()),
            })
        );
    }

    #[test]
    fn test_signed_request_carries_auth_headers() {
        let store = HttpTableStore::from_config(&TransportConfig::dev_storage()).unwrap();
        let url = store.endpoint().url("Tables").unwrap();
        let request = store.signed(Method::POST, url).build().unwrap();

        let headers = request.headers();
        assert!(
            headers["Authorization"]
                .to_str()
                .unwrap()
                .starts_with("SharedKeyLite devstoreaccount1:")
        );
        assert_eq!(headers["x-ms-version"], API_VERSION);
        assert!(headers.contains_key("x-ms-date"));
        assert_eq!(headers["Accept"], ACCEPT_JSON);
    }
}
