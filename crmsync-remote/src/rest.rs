//! REST implementation of [`RemoteConnection`].
//!
//! Talks to the `/services/data/<version>` API with an already-issued access
//! token. Small upserts go through the composite sobjects endpoint, large
//! ones through Bulk API 2.0 ingest jobs carrying CSV.

use crate::connection::{ApiUsage, FieldDescription, RecordResult, RemoteConnection};
use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use crmsync_types::{Fields, Patch, RecordType, RemoteRecord};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Value the bulk API reads as "set this field to null".
const BULK_NULL: &str = "#N/A";

/// REST connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// Instance base URL (e.g. `https://eu1.my.salesforce.com`).
    pub instance_url: String,
    /// OAuth access token.
    pub access_token: String,
    /// API version path segment.
    pub api_version: String,
    /// Timeout of a single HTTP request.
    pub request_timeout_secs: u64,
    /// Delay between two bulk job status polls.
    pub bulk_poll_interval_ms: u64,
    /// Maximum time a bulk job may take before giving up.
    pub bulk_timeout_secs: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            instance_url: String::new(),
            access_token: String::new(),
            api_version: "v58.0".to_string(),
            request_timeout_secs: 60,
            bulk_poll_interval_ms: 2000,
            bulk_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "searchRecords", default)]
    search_records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    records: Vec<Value>,
    #[serde(rename = "nextRecordsUrl")]
    next_records_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    fields: Vec<FieldDescription>,
}

#[derive(Debug, Deserialize)]
struct UpdatedResponse {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(rename = "errorCode", default)]
    error_code: String,
}

#[derive(Debug, Deserialize)]
struct CompositeResult {
    id: Option<String>,
    success: bool,
    #[serde(default)]
    created: bool,
    #[serde(default)]
    errors: Vec<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct IngestJob {
    id: String,
    state: String,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// [`RemoteConnection`] over the CRM's REST API.
pub struct RestConnection {
    config: RestConfig,
    client: Client,
    api_usage: Mutex<Option<ApiUsage>>,
}

impl RestConnection {
    /// Creates a connection. Fails when the instance URL or token is empty.
    pub fn new(config: RestConfig) -> RemoteResult<Self> {
        if config.instance_url.is_empty() {
            return Err(RemoteError::Config("instance_url is empty".to_string()));
        }
        if config.access_token.is_empty() {
            return Err(RemoteError::Config("access_token is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            api_usage: Mutex::new(None),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/services/data/{}{}",
            self.config.instance_url.trim_end_matches('/'),
            self.config.api_version,
            path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.access_token)
    }

    /// Sends a request, records API usage and maps error statuses.
    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        self.record_usage(response.headers());

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Vec<ApiErrorBody>>(&body)
            .ok()
            .and_then(|errors| errors.into_iter().next())
            .map(|e| format!("{}: {}", e.error_code, e.message))
            .unwrap_or(body);
        Err(RemoteError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> RemoteResult<T> {
        let response = self.send(self.request(Method::GET, url)).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_text(&self, url: &str) -> RemoteResult<String> {
        let response = self.send(self.request(Method::GET, url)).await?;
        Ok(response.text().await?)
    }

    /// Parses `Sforce-Limit-Info: api-usage=18/5000`.
    fn record_usage(&self, headers: &HeaderMap) {
        let usage = headers
            .get("sforce-limit-info")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_api_usage);
        if let Some(usage) = usage {
            if let Ok(mut guard) = self.api_usage.lock() {
                *guard = Some(usage);
            }
        }
    }

    async fn ingest_job_state(&self, job_id: &str) -> RemoteResult<IngestJob> {
        self.get_json(&self.data_url(&format!("/jobs/ingest/{job_id}/")))
            .await
    }

    /// Polls a job until it reaches a terminal state.
    async fn wait_for_job(&self, job_id: &str) -> RemoteResult<IngestJob> {
        let started = Instant::now();
        let timeout = Duration::from_secs(self.config.bulk_timeout_secs);
        let interval = Duration::from_millis(self.config.bulk_poll_interval_ms);

        loop {
            let job = self.ingest_job_state(job_id).await?;
            match job.state.as_str() {
                "JobComplete" => return Ok(job),
                "Failed" | "Aborted" => {
                    return Err(RemoteError::BulkJob {
                        job_id: job.id,
                        state: job.state,
                        message: job.error_message.unwrap_or_default(),
                    });
                }
                state => debug!(job_id, state, "bulk job in progress"),
            }

            if started.elapsed() >= timeout {
                return Err(RemoteError::Timeout(job_id.to_string()));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[async_trait]
impl RemoteConnection for RestConnection {
    async fn search(&self, query: &str) -> RemoteResult<Vec<RemoteRecord>> {
        let url = self.data_url(&format!("/search/?q={}", urlencoding::encode(query)));
        let response: SearchResponse = self.get_json(&url).await?;
        response
            .search_records
            .into_iter()
            .map(|v| RemoteRecord::from_value(v).map_err(RemoteError::from))
            .collect()
    }

    async fn query(&self, query: &str) -> RemoteResult<Vec<RemoteRecord>> {
        let mut url = self.data_url(&format!("/query/?q={}", urlencoding::encode(query)));
        let mut records = Vec::new();

        loop {
            let page: QueryResponse = self.get_json(&url).await?;
            for value in page.records {
                records.push(RemoteRecord::from_value(value)?);
            }
            match page.next_records_url {
                Some(next) if !page.done => {
                    url = format!("{}{next}", self.config.instance_url.trim_end_matches('/'));
                }
                _ => break,
            }
        }

        Ok(records)
    }

    async fn describe(&self, record_type: &RecordType) -> RemoteResult<Vec<FieldDescription>> {
        let url = self.data_url(&format!("/sobjects/{record_type}/describe/"));
        let response: DescribeResponse = self.get_json(&url).await?;
        Ok(response.fields)
    }

    async fn updated(
        &self,
        record_type: &RecordType,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RemoteResult<Vec<String>> {
        let url = self.data_url(&format!(
            "/sobjects/{record_type}/updated/?start={}&end={}",
            urlencoding::encode(&since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            urlencoding::encode(&until.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ));
        let response: UpdatedResponse = self.get_json(&url).await?;
        Ok(response.ids)
    }

    async fn upsert_single(
        &self,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>> {
        let url = self.data_url(&format!(
            "/composite/sobjects/{record_type}/{external_id_field}"
        ));
        let body = json!({
            "allOrNone": false,
            "records": records
                .iter()
                .map(|patch| {
                    let mut fields = Fields::new();
                    fields.insert("attributes".to_string(), json!({ "type": record_type.name() }));
                    fields.extend(patch.fields().clone());
                    Value::Object(fields)
                })
                .collect::<Vec<_>>(),
        });

        let response = self
            .send(self.request(Method::PATCH, &url).json(&body))
            .await?;
        let results: Vec<CompositeResult> = serde_json::from_slice(&response.bytes().await?)?;

        Ok(results
            .into_iter()
            .map(|r| RecordResult {
                id: r.id,
                success: r.success,
                created: r.created,
                errors: r
                    .errors
                    .into_iter()
                    .map(|e| format!("{}: {}", e.error_code, e.message))
                    .collect(),
            })
            .collect())
    }

    async fn upsert_bulk(
        &self,
        record_type: &RecordType,
        records: &[Patch],
        external_id_field: &str,
    ) -> RemoteResult<Vec<RecordResult>> {
        let (columns, csv_body) = patches_to_csv(records)?;

        let job: IngestJob = {
            let body = json!({
                "object": record_type.name(),
                "externalIdFieldName": external_id_field,
                "contentType": "CSV",
                "operation": "upsert",
                "lineEnding": "LF",
            });
            let response = self
                .send(
                    self.request(Method::POST, &self.data_url("/jobs/ingest/"))
                        .json(&body),
                )
                .await?;
            serde_json::from_slice(&response.bytes().await?)?
        };
        info!(job_id = %job.id, record_type = %record_type, records = records.len(), "bulk job created");

        self.send(
            self.request(
                Method::PUT,
                &self.data_url(&format!("/jobs/ingest/{}/batches/", job.id)),
            )
            .header(CONTENT_TYPE, "text/csv")
            .body(csv_body),
        )
        .await?;

        self.send(
            self.request(
                Method::PATCH,
                &self.data_url(&format!("/jobs/ingest/{}/", job.id)),
            )
            .json(&json!({ "state": "UploadComplete" })),
        )
        .await?;

        let job = self.wait_for_job(&job.id).await?;

        let successful = self
            .get_text(&self.data_url(&format!("/jobs/ingest/{}/successfulResults/", job.id)))
            .await?;
        let failed = self
            .get_text(&self.data_url(&format!("/jobs/ingest/{}/failedResults/", job.id)))
            .await?;

        let results = attribute_bulk_results(records, &columns, &successful, &failed)?;
        let failures = results.iter().filter(|r| !r.success).count();
        if failures > 0 {
            warn!(job_id = %job.id, failures, "bulk job finished with failed records");
        }
        Ok(results)
    }

    fn api_usage(&self) -> Option<ApiUsage> {
        self.api_usage.lock().ok().and_then(|guard| *guard)
    }
}

/// Parses the value of a `Sforce-Limit-Info` header.
pub fn parse_api_usage(header: &str) -> Option<ApiUsage> {
    let usage = header
        .split(',')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("api-usage="))?;
    let (used, max) = usage.split_once('/')?;
    Some(ApiUsage {
        used: used.trim().parse().ok()?,
        max: max.trim().parse().ok()?,
    })
}

fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::Null) => BULK_NULL.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Serializes patches as CSV. Columns are the union of patch fields in
/// first-seen order; a field absent from a patch is left empty, which the
/// bulk API treats as "unchanged".
pub fn patches_to_csv(records: &[Patch]) -> RemoteResult<(Vec<String>, String)> {
    let mut columns: Vec<String> = Vec::new();
    for name in records.iter().flat_map(Patch::field_names) {
        if !columns.iter().any(|c| c == name) {
            columns.push(name.to_string());
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(&columns)?;
    for patch in records {
        writer.write_record(columns.iter().map(|c| csv_cell(patch.get(c))))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    let body = String::from_utf8_lossy(&bytes).into_owned();

    Ok((columns, body))
}

/// Maps bulk result rows back to input positions.
///
/// Result rows echo the submitted columns, so a row is attributed to the
/// first unclaimed input with identical cells. Inputs with no result row are
/// reported as failed.
pub fn attribute_bulk_results(
    records: &[Patch],
    columns: &[String],
    successful_csv: &str,
    failed_csv: &str,
) -> RemoteResult<Vec<RecordResult>> {
    let mut positions: HashMap<Vec<String>, VecDeque<usize>> = HashMap::new();
    for (index, patch) in records.iter().enumerate() {
        let key = columns.iter().map(|c| csv_cell(patch.get(c))).collect();
        positions.entry(key).or_default().push_back(index);
    }

    let mut results: Vec<Option<RecordResult>> = vec![None; records.len()];

    for (body, success) in [(successful_csv, true), (failed_csv, false)] {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(body.as_bytes());
        let headers = reader.headers()?.clone();
        let column_at = |name: &str| headers.iter().position(|h| h == name);
        let id_at = column_at("sf__Id");
        let created_at = column_at("sf__Created");
        let error_at = column_at("sf__Error");
        let echo_at: Vec<Option<usize>> = columns.iter().map(|c| column_at(c)).collect();

        for row in reader.records() {
            let row = row?;
            let key: Vec<String> = echo_at
                .iter()
                .map(|at| at.and_then(|i| row.get(i)).unwrap_or_default().to_string())
                .collect();
            let Some(index) = positions.get_mut(&key).and_then(VecDeque::pop_front) else {
                debug!("bulk result row matches no submitted record");
                continue;
            };

            let field = |at: Option<usize>| {
                at.and_then(|i| row.get(i))
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };
            results[index] = Some(RecordResult {
                id: field(id_at),
                success,
                created: field(created_at).is_some_and(|v| v.eq_ignore_ascii_case("true")),
                errors: field(error_at).into_iter().collect(),
            });
        }
    }

    Ok(results
        .into_iter()
        .map(|r| r.unwrap_or_else(|| RecordResult::failed("record not processed by bulk job")))
        .collect())
}
