use async_trait::async_trait;
use reqwest::{Client, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

use crate::{auth::TokenSource, model::Batch};

use super::{RowError, SinkError, SinkReport, TableRef, WarehouseSink};

pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_POLLS: usize = 150;

/// Boundary for the hand-built `multipart/related` upload body.
const BOUNDARY: &str = "meteo_load_boundary";

/// Streaming-insert sink (`tabledata.insertAll`).
///
/// Rows are applied individually by the service; the response may name rows
/// that were rejected while the rest went through. Those show up in
/// [`SinkReport::row_errors`], never as an `Err`.
pub struct InsertAllSink {
    http: Client,
    base_url: String,
    table: TableRef,
    token: Arc<dyn TokenSource>,
}

impl InsertAllSink {
    pub fn new(table: TableRef, token: Arc<dyn TokenSource>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, table, token)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        table: TableRef,
        token: Arc<dyn TokenSource>,
    ) -> Self {
        Self { http: Client::new(), base_url: base_url.into(), table, token }
    }
}

#[derive(Debug, Serialize)]
struct InsertAllRequest {
    kind: &'static str,
    rows: Vec<InsertRow>,
}

#[derive(Debug, Serialize)]
struct InsertRow {
    json: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct InsertAllResponse {
    #[serde(default, rename = "insertErrors")]
    insert_errors: Vec<InsertErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct InsertErrorEntry {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[async_trait]
impl WarehouseSink for InsertAllSink {
    async fn append(&self, batch: &Batch) -> Result<SinkReport, SinkError> {
        let rows: Vec<InsertRow> =
            batch.to_rows()?.into_iter().map(|json| InsertRow { json }).collect();

        let url = format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
            self.base_url, self.table.project, self.table.dataset, self.table.table,
        );

        let token = self.token.access_token().await?;

        let res = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&InsertAllRequest { kind: "bigquery#tableDataInsertAllRequest", rows })
            .send()
            .await
            .map_err(SinkError::Request)?;

        let status = res.status();
        let body = res.text().await.map_err(SinkError::Request)?;

        if !status.is_success() {
            return Err(SinkError::Status { status, body: truncate_body(&body) });
        }

        let parsed: InsertAllResponse =
            serde_json::from_str(&body).map_err(SinkError::Decode)?;

        let row_errors: Vec<RowError> = parsed
            .insert_errors
            .into_iter()
            .map(|entry| RowError {
                index: entry.index,
                message: entry
                    .errors
                    .into_iter()
                    .next()
                    .map(|e| e.message)
                    .unwrap_or_else(|| "unspecified row error".to_string()),
            })
            .collect();

        let appended = batch.len().saturating_sub(row_errors.len());
        debug!(table = %self.table, appended, rejected = row_errors.len(), "insertAll finished");

        Ok(SinkReport { appended, row_errors })
    }
}

/// Bulk-load sink (`jobs.insert` with an inline NDJSON payload).
///
/// Creates a load job via a `multipart/related` upload, then polls the job
/// until it reports `DONE`. A job-level `errorResult` means no rows were
/// applied.
pub struct LoadJobSink {
    http: Client,
    base_url: String,
    table: TableRef,
    token: Arc<dyn TokenSource>,
    poll_interval: Duration,
    max_polls: usize,
}

impl LoadJobSink {
    pub fn new(table: TableRef, token: Arc<dyn TokenSource>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, table, token)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        table: TableRef,
        token: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            table,
            token,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn fetch_status(&self, reference: &JobReference) -> Result<Option<JobStatus>, SinkError> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/jobs/{}",
            self.base_url, self.table.project, reference.job_id,
        );

        let token = self.token.access_token().await?;

        let mut req = self.http.get(&url).bearer_auth(token);
        if let Some(location) = &reference.location {
            req = req.query(&[("location", location.as_str())]);
        }

        let res = req.send().await.map_err(SinkError::Request)?;

        let status = res.status();
        let body = res.text().await.map_err(SinkError::Request)?;

        if !status.is_success() {
            return Err(SinkError::Status { status, body: truncate_body(&body) });
        }

        let job: Job = serde_json::from_str(&body).map_err(SinkError::Decode)?;
        Ok(job.status)
    }
}

#[derive(Debug, Serialize)]
struct JobPayload<'a> {
    configuration: JobConfiguration<'a>,
}

#[derive(Debug, Serialize)]
struct JobConfiguration<'a> {
    load: LoadConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadConfiguration<'a> {
    destination_table: TableReference<'a>,
    source_format: &'static str,
    write_disposition: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

fn build_multipart(config_json: &str, ndjson: &str) -> String {
    format!(
        "--{BOUNDARY}\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\r\n\
         {config_json}\r\n\
         --{BOUNDARY}\r\n\
         Content-Type: application/octet-stream\r\n\r\n\
         {ndjson}\r\n\
         --{BOUNDARY}--\r\n"
    )
}

#[async_trait]
impl WarehouseSink for LoadJobSink {
    async fn append(&self, batch: &Batch) -> Result<SinkReport, SinkError> {
        let ndjson = batch.to_ndjson()?;

        let payload = JobPayload {
            configuration: JobConfiguration {
                load: LoadConfiguration {
                    destination_table: TableReference {
                        project_id: &self.table.project,
                        dataset_id: &self.table.dataset,
                        table_id: &self.table.table,
                    },
                    source_format: "NEWLINE_DELIMITED_JSON",
                    write_disposition: "WRITE_APPEND",
                },
            },
        };
        let config_json = serde_json::to_string(&payload)?;

        let url = format!(
            "{}/upload/bigquery/v2/projects/{}/jobs?uploadType=multipart",
            self.base_url, self.table.project,
        );

        let token = self.token.access_token().await?;

        let res = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, format!("multipart/related; boundary={BOUNDARY}"))
            .body(build_multipart(&config_json, &ndjson))
            .send()
            .await
            .map_err(SinkError::Request)?;

        let http_status = res.status();
        let body = res.text().await.map_err(SinkError::Request)?;

        if !http_status.is_success() {
            return Err(SinkError::Status { status: http_status, body: truncate_body(&body) });
        }

        let job: Job = serde_json::from_str(&body).map_err(SinkError::Decode)?;
        debug!(job_id = %job.job_reference.job_id, table = %self.table, "load job created");

        let mut status = job.status;
        let mut polls = 0;

        loop {
            if let Some(current) = &status {
                if current.state == "DONE" {
                    if let Some(err) = &current.error_result {
                        return Err(SinkError::Job(format!("{}: {}", err.reason, err.message)));
                    }
                    info!(
                        job_id = %job.job_reference.job_id,
                        rows = batch.len(),
                        "load job completed"
                    );
                    return Ok(SinkReport { appended: batch.len(), row_errors: Vec::new() });
                }
            }

            if polls >= self.max_polls {
                return Err(SinkError::JobTimeout(self.max_polls));
            }
            polls += 1;

            tokio::time::sleep(self.poll_interval).await;
            status = self.fetch_status(&job.job_reference).await?;
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::AuthError,
        model::WeatherRecord,
        sink::{SinkError, TableRef},
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, header, method, path, query_param},
    };

    #[derive(Debug)]
    struct StaticToken;

    #[async_trait]
    impl TokenSource for StaticToken {
        async fn access_token(&self) -> Result<String, AuthError> {
            Ok("test-token".to_string())
        }
    }

    fn test_table() -> TableRef {
        TableRef {
            project: "example-project".to_string(),
            dataset: "weather_data_raw".to_string(),
            table: "current_weather".to_string(),
        }
    }

    fn record(city: &str, temperature: f64, code: u16, description: &str) -> WeatherRecord {
        WeatherRecord {
            city: city.to_string(),
            temperature,
            wind_speed: None,
            weather_code: code,
            weather_description: description.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn sample_batch() -> Batch {
        let mut batch = Batch::new();
        batch.push(record("Moscow", -5.2, 71, "light snow"));
        batch.push(record("Kazan", -1.0, 3, "overcast"));
        batch
    }

    #[tokio::test]
    async fn insert_appends_whole_batch() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(
                "/bigquery/v2/projects/example-project/datasets/weather_data_raw/tables/current_weather/insertAll",
            ))
            .and(header("authorization", "Bearer test-token"))
            .and(body_string_contains("\"city\":\"Moscow\""))
            .and(body_string_contains("\"weather_description\":\"light snow\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let sink = InsertAllSink::with_base_url(server.uri(), test_table(), Arc::new(StaticToken));
        let report = sink.append(&sample_batch()).await.expect("insert should succeed");

        assert_eq!(report.appended, 2);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn insert_reports_rejected_rows() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "insertErrors": [
                    {
                        "index": 1,
                        "errors": [
                            {"reason": "invalid", "message": "no such field: extra"}
                        ]
                    }
                ]
            })))
            .mount(&server)
            .await;

        let sink = InsertAllSink::with_base_url(server.uri(), test_table(), Arc::new(StaticToken));
        let report = sink.append(&sample_batch()).await.expect("request itself should succeed");

        assert_eq!(report.appended, 1);
        assert_eq!(report.row_errors.len(), 1);
        assert_eq!(report.row_errors[0].index, 1);
        assert_eq!(report.row_errors[0].message, "no such field: extra");
    }

    #[tokio::test]
    async fn insert_surfaces_service_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let sink = InsertAllSink::with_base_url(server.uri(), test_table(), Arc::new(StaticToken));
        let err = sink.append(&sample_batch()).await.expect_err("403 should fail");

        match err {
            SinkError::Status { status, body } => {
                assert_eq!(status.as_u16(), 403);
                assert!(body.contains("permission denied"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn load_polls_job_until_done() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload/bigquery/v2/projects/example-project/jobs"))
            .and(query_param("uploadType", "multipart"))
            .and(body_string_contains("NEWLINE_DELIMITED_JSON"))
            .and(body_string_contains("\"city\":\"Moscow\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobReference": {"jobId": "job_1"},
                "status": {"state": "RUNNING"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/bigquery/v2/projects/example-project/jobs/job_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobReference": {"jobId": "job_1"},
                "status": {"state": "RUNNING"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/bigquery/v2/projects/example-project/jobs/job_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobReference": {"jobId": "job_1"},
                "status": {"state": "DONE"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sink = LoadJobSink::with_base_url(server.uri(), test_table(), Arc::new(StaticToken))
            .with_polling(Duration::from_millis(5), 10);
        let report = sink.append(&sample_batch()).await.expect("load should succeed");

        assert_eq!(report.appended, 2);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn load_job_error_fails_whole_batch() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobReference": {"jobId": "job_2"},
                "status": {
                    "state": "DONE",
                    "errorResult": {"reason": "invalid", "message": "Could not parse row 3"}
                }
            })))
            .mount(&server)
            .await;

        let sink = LoadJobSink::with_base_url(server.uri(), test_table(), Arc::new(StaticToken));
        let err = sink.append(&sample_batch()).await.expect_err("job error should fail");

        match err {
            SinkError::Job(message) => assert!(message.contains("Could not parse row 3")),
            other => panic!("expected job error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn load_gives_up_after_poll_budget() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobReference": {"jobId": "job_3"},
                "status": {"state": "RUNNING"}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobReference": {"jobId": "job_3"},
                "status": {"state": "RUNNING"}
            })))
            .mount(&server)
            .await;

        let sink = LoadJobSink::with_base_url(server.uri(), test_table(), Arc::new(StaticToken))
            .with_polling(Duration::from_millis(1), 3);
        let err = sink.append(&sample_batch()).await.expect_err("poll budget should run out");

        assert!(matches!(err, SinkError::JobTimeout(3)));
    }

    #[test]
    fn multipart_body_has_config_and_data_parts() {
        let body = build_multipart("{\"configuration\":{}}", "{\"city\":\"Moscow\"}\n");

        assert!(body.starts_with(&format!("--{BOUNDARY}\r\n")));
        assert!(body.contains("Content-Type: application/json; charset=UTF-8"));
        assert!(body.contains("{\"configuration\":{}}"));
        assert!(body.contains("Content-Type: application/octet-stream"));
        assert!(body.contains("{\"city\":\"Moscow\"}"));
        assert!(body.ends_with(&format!("--{BOUNDARY}--\r\n")));
    }
}
