use async_trait::async_trait;
use deepfreeze_core::{
    CoreError, CoreResult, DocType, RecordVersion, StatusRecord, StatusStore, Versioned,
};
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::client::{ElasticClient, EsResponse};

/// Hits fetched per scroll page.
const SCROLL_PAGE_SIZE: usize = 1000;
const SCROLL_KEEP_ALIVE: &str = "1m";

/// Attempts made by `update` before giving up on a contested document.
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Status store kept as documents in a cluster index.
///
/// Writes use `refresh=wait_for` so a following list sees them. Conditional
/// writes map onto `if_seq_no` / `if_primary_term`.
pub struct ElasticStatusStore {
    client: ElasticClient,
    index: String,
}

impl ElasticStatusStore {
    pub fn new(client: ElasticClient, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Create the status index with a keyword `doctype` if it does not exist.
    pub async fn ensure_index(&self) -> CoreResult<()> {
        let response = self
            .send(self.client.request(Method::HEAD, &self.index))
            .await?;
        if response.is_success() {
            return Ok(());
        }

        let body = json!({
            "mappings": {
                "properties": {
                    "doctype": {"type": "keyword"},
                    "name": {"type": "keyword"},
                    "request_id": {"type": "keyword"},
                    "state": {"type": "keyword"},
                    "status": {"type": "keyword"}
                }
            }
        });
        let response = self
            .send(self.client.request(Method::PUT, &self.index).json(&body))
            .await?;
        if response.is_success() || response.error_type() == Some("resource_already_exists_exception") {
            info!(index = %self.index, "Status index ready");
            return Ok(());
        }
        Err(CoreError::StoreUnavailable(response.reason()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> CoreResult<EsResponse> {
        self.client
            .send(request)
            .await
            .map_err(CoreError::StoreUnavailable)
    }

    fn doc_request(&self, method: Method, id: &str) -> reqwest::RequestBuilder {
        self.client
            .request_segments(method, &[self.index.as_str(), "_doc", id])
    }

    async fn put_document(
        &self,
        record: &StatusRecord,
        expected: Option<RecordVersion>,
    ) -> CoreResult<EsResponse> {
        let id = record.id();
        let document = record.to_document()?;
        let mut request = self
            .doc_request(Method::PUT, &id)
            .query(&[("refresh", "wait_for")]);
        if let Some(version) = expected {
            request = request.query(&[
                ("if_seq_no", version.seq_no),
                ("if_primary_term", version.primary_term),
            ]);
        }
        self.send(request.json(&document)).await
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        let request = self
            .client
            .request(Method::DELETE, "_search/scroll")
            .json(&json!({ "scroll_id": [scroll_id] }));
        match self.client.send(request).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => warn!(reason = %response.reason(), "Failed to clear scroll"),
            Err(e) => warn!(error = %e, "Failed to clear scroll"),
        }
    }
}

/// Reads `_seq_no` / `_primary_term` from a write or get response.
pub(crate) fn parse_version(body: &Value) -> CoreResult<RecordVersion> {
    let seq_no = body.get("_seq_no").and_then(Value::as_u64);
    let primary_term = body.get("_primary_term").and_then(Value::as_u64);
    match (seq_no, primary_term) {
        (Some(seq_no), Some(primary_term)) => Ok(RecordVersion {
            seq_no,
            primary_term,
        }),
        _ => Err(CoreError::StoreUnavailable(
            "response is missing _seq_no/_primary_term".to_string(),
        )),
    }
}

/// Parses a get-document response body.
pub(crate) fn parse_get(id: &str, body: Value) -> CoreResult<Versioned<StatusRecord>> {
    if body.get("found").and_then(Value::as_bool) == Some(false) {
        return Err(CoreError::not_found("record", id));
    }
    let version = parse_version(&body)?;
    let source = body
        .get("_source")
        .cloned()
        .ok_or_else(|| CoreError::DeserializationError(format!("document `{id}` has no _source")))?;
    Ok(Versioned {
        record: StatusRecord::from_document(id, source)?,
        version,
    })
}

/// Parses one search/scroll page into its scroll id and records.
pub(crate) fn parse_hits(body: &Value) -> CoreResult<(Option<String>, Vec<StatusRecord>)> {
    let scroll_id = body
        .get("_scroll_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let hits = body
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::StoreUnavailable("search response has no hits".to_string()))?;

    let mut records = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = hit.get("_id").and_then(Value::as_str).unwrap_or_default();
        let source = hit.get("_source").cloned().unwrap_or(Value::Null);
        records.push(StatusRecord::from_document(id, source)?);
    }
    Ok((scroll_id, records))
}

#[async_trait]
impl StatusStore for ElasticStatusStore {
    async fn save(&self, record: &StatusRecord) -> CoreResult<RecordVersion> {
        let response = self.put_document(record, None).await?;
        if !response.is_success() {
            return Err(CoreError::StoreUnavailable(response.reason()));
        }
        let version = parse_version(&response.body)?;
        debug!(id = %record.id(), doctype = %record.doctype(), seq_no = version.seq_no, "Saved record");
        Ok(version)
    }

    async fn save_if_version(
        &self,
        record: &StatusRecord,
        expected: RecordVersion,
    ) -> CoreResult<RecordVersion> {
        let response = self.put_document(record, Some(expected)).await?;
        if response.is_success() {
            return parse_version(&response.body);
        }
        if response.status == StatusCode::CONFLICT {
            // A conditional write against a missing document also reports 409.
            let id = record.id();
            return match self.get(&id).await {
                Ok(_) => Err(CoreError::conflict(id)),
                Err(e) => Err(e),
            };
        }
        Err(CoreError::StoreUnavailable(response.reason()))
    }

    async fn get(&self, id: &str) -> CoreResult<Versioned<StatusRecord>> {
        let response = self
            .send(self.doc_request(Method::GET, id))
            .await?;
        if response.status == StatusCode::NOT_FOUND {
            return Err(CoreError::not_found("record", id));
        }
        if !response.is_success() {
            return Err(CoreError::StoreUnavailable(response.reason()));
        }
        parse_get(id, response.body)
    }

    async fn update(&self, id: &str, fields: &Map<String, Value>) -> CoreResult<StatusRecord> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.get(id).await?;
            let merged = current.record.merged(fields)?;
            match self.save_if_version(&merged, current.version).await {
                Ok(_) => return Ok(merged),
                Err(CoreError::Conflict { .. }) => {
                    warn!(id = %id, attempt, "Concurrent modification during update, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::conflict(id))
    }

    async fn list(&self, doctype: DocType) -> CoreResult<Vec<StatusRecord>> {
        let query = json!({
            "size": SCROLL_PAGE_SIZE,
            "query": {"term": {"doctype": doctype.as_str()}},
            "sort": ["_doc"]
        });
        let response = self
            .send(
                self.client
                    .request(Method::POST, &format!("{}/_search", self.index))
                    .query(&[("scroll", SCROLL_KEEP_ALIVE)])
                    .json(&query),
            )
            .await?;

        if response.error_type() == Some("index_not_found_exception") {
            debug!(index = %self.index, "Status index does not exist yet");
            return Ok(Vec::new());
        }
        if !response.is_success() {
            return Err(CoreError::StoreUnavailable(response.reason()));
        }

        let (mut scroll_id, mut page) = parse_hits(&response.body)?;
        let mut records = Vec::new();

        let result = loop {
            let page_len = page.len();
            records.append(&mut page);
            if page_len < SCROLL_PAGE_SIZE {
                break Ok(());
            }
            let Some(current) = scroll_id.clone() else {
                break Ok(());
            };

            let response = match self
                .send(
                    self.client
                        .request(Method::POST, "_search/scroll")
                        .json(&json!({ "scroll": SCROLL_KEEP_ALIVE, "scroll_id": current })),
                )
                .await
            {
                Ok(response) if response.is_success() => response,
                Ok(response) => break Err(CoreError::StoreUnavailable(response.reason())),
                Err(e) => break Err(e),
            };

            match parse_hits(&response.body) {
                Ok((next_id, next_page)) => {
                    if next_id.is_some() {
                        scroll_id = next_id;
                    }
                    page = next_page;
                }
                Err(e) => break Err(e),
            }
        };

        if let Some(id) = scroll_id {
            self.clear_scroll(&id).await;
        }
        result.map(|()| records)
    }
}
