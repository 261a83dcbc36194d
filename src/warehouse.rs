use crate::config::Config;
use crate::data::WarehouseRow;
use crate::error::Error;
use crate::schema::WATERMARK_COLUMN;
use chrono::NaiveDateTime;
use reqwest::{header::AUTHORIZATION, Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Destination table layout: column schema plus the partitioning and
/// clustering the create-table call must apply.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    pub schema: TableSchema,
    pub time_partitioning: TimePartitioning,
    pub clustering: Clustering,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TableSchema {
    pub fields: Vec<TableField>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TableField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<TableField>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimePartitioning {
    #[serde(rename = "type")]
    pub grain: String,
    pub field: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Clustering {
    pub fields: Vec<String>,
}

/// A row the warehouse rejected inside an otherwise-successful insert call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub index: u64,
    pub reason: String,
    pub message: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync + 'static {
    async fn dataset_exists(&self) -> Result<bool, Error>;

    async fn create_dataset(&self) -> Result<(), Error>;

    async fn table_exists(&self) -> Result<bool, Error>;

    async fn create_table(&self, spec: &TableSpec) -> Result<(), Error>;

    /// The maximum value of the watermark column, or None when the table is
    /// empty or absent.
    async fn max_inserted_at(&self) -> Result<Option<NaiveDateTime>, Error>;

    /// Inserts `rows` as one batch. An Ok result with a non-empty vector
    /// means the call succeeded but the listed rows were rejected.
    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<Vec<RowError>, Error>;
}

#[derive(Clone)]
pub struct BigQueryClient {
    client: Client,
    base_url: String,
    token: String,
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Deserialize)]
struct InsertAllResponse {
    #[serde(default, rename = "insertErrors")]
    insert_errors: Vec<InsertError>,
}

#[derive(Deserialize)]
struct InsertError {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    // When the query exceeds the request deadline the service answers with
    // `jobComplete: false` and no rows; that must not read as an empty table.
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    rows: Vec<QueryRow>,
}

#[derive(Deserialize)]
struct QueryRow {
    #[serde(default)]
    f: Vec<QueryCell>,
}

#[derive(Deserialize)]
struct QueryCell {
    v: Option<serde_json::Value>,
}

impl BigQueryClient {
    pub fn new(config: &Config) -> Self {
        BigQueryClient {
            client: Client::new(),
            base_url: config.warehouse_url.to_string(),
            token: config.warehouse_token.to_string(),
            project_id: config.project_id.to_string(),
            dataset_id: config.dataset_id.to_string(),
            table_id: config.table_id.to_string(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .extend(segments);
        Ok(url)
    }

    fn dataset_segments(&self) -> Vec<&str> {
        vec!["projects", &self.project_id, "datasets", &self.dataset_id]
    }

    async fn resource_exists(&self, url: Url) -> Result<bool, Error> {
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?;

        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(Error::WarehouseStatus {
                status,
                message: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    /// POSTs `body` and returns the response once the status is known to be
    /// a success; non-success statuses become [`Error::WarehouseStatus`].
    async fn post_json(
        &self,
        url: Url,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, Error> {
        let resp = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::WarehouseStatus {
                status,
                message: resp.text().await.unwrap_or_default(),
            });
        }

        Ok(resp)
    }

    fn watermark_query(&self) -> String {
        format!(
            "SELECT max({WATERMARK_COLUMN}) FROM `{}.{}.{}`",
            self.project_id, self.dataset_id, self.table_id
        )
    }
}

/// Extracts the watermark from a completed query response. An incomplete
/// job is an error; mapping it to "no watermark" would restart the load
/// from the backfill date and duplicate the whole history.
fn watermark_value(response: QueryResponse) -> Result<Option<NaiveDateTime>, Error> {
    if !response.job_complete {
        return Err(Error::UnexpectedResponse {
            message: "watermark query did not complete within the request deadline".to_string(),
        });
    }

    let value = response
        .rows
        .first()
        .and_then(|row| row.f.first())
        .and_then(|cell| cell.v.as_ref());

    match value {
        Some(serde_json::Value::String(raw)) => Ok(Some(parse_datetime(raw)?)),
        Some(serde_json::Value::Null) | None => Ok(None),
        Some(other) => Err(Error::UnexpectedResponse {
            message: format!("unexpected watermark cell {other}"),
        }),
    }
}

/// Invalid rows must not abort the whole batch; the service skips them and
/// names each one in `insertErrors`, which the loader reports per row.
fn insert_all_body(rows: &[WarehouseRow]) -> serde_json::Value {
    json!({
        "skipInvalidRows": true,
        "ignoreUnknownValues": false,
        "rows": rows
            .iter()
            .map(|row| json!({ "json": row }))
            .collect::<Vec<_>>(),
    })
}

fn parse_datetime(raw: &str) -> Result<NaiveDateTime, Error> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| Error::UnexpectedResponse {
            message: format!("unparseable watermark value '{raw}'"),
        })
}

#[async_trait::async_trait]
impl Warehouse for BigQueryClient {
    async fn dataset_exists(&self) -> Result<bool, Error> {
        let url = self.url(&self.dataset_segments())?;
        self.resource_exists(url).await
    }

    async fn create_dataset(&self) -> Result<(), Error> {
        let url = self.url(&["projects", &self.project_id, "datasets"])?;
        let body = json!({
            "datasetReference": {
                "projectId": self.project_id,
                "datasetId": self.dataset_id,
            },
            "location": "US",
        });
        self.post_json(url, &body).await?;
        Ok(())
    }

    async fn table_exists(&self) -> Result<bool, Error> {
        let mut segments = self.dataset_segments();
        segments.extend(["tables", &self.table_id]);
        let url = self.url(&segments)?;
        self.resource_exists(url).await
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<(), Error> {
        let mut segments = self.dataset_segments();
        segments.push("tables");
        let url = self.url(&segments)?;

        let mut body = serde_json::to_value(spec).map_err(|err| Error::UnexpectedResponse {
            message: format!("could not serialize table spec: {err}"),
        })?;
        body["tableReference"] = json!({
            "projectId": self.project_id,
            "datasetId": self.dataset_id,
            "tableId": self.table_id,
        });

        self.post_json(url, &body).await?;
        Ok(())
    }

    async fn max_inserted_at(&self) -> Result<Option<NaiveDateTime>, Error> {
        let url = self.url(&["projects", &self.project_id, "queries"])?;
        let body = json!({ "query": self.watermark_query(), "useLegacySql": false });

        let response: QueryResponse = match self.post_json(url, &body).await {
            Ok(resp) => resp.json().await?,
            // A missing table means a first run against a fresh dataset.
            Err(Error::WarehouseStatus { status, .. }) if status == StatusCode::NOT_FOUND => {
                return Ok(None)
            }
            Err(err) => return Err(err),
        };

        watermark_value(response)
    }

    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<Vec<RowError>, Error> {
        let mut segments = self.dataset_segments();
        segments.extend(["tables", &self.table_id, "insertAll"]);
        let url = self.url(&segments)?;

        let body = insert_all_body(rows);
        let response: InsertAllResponse = self.post_json(url, &body).await?.json().await?;

        Ok(response
            .insert_errors
            .into_iter()
            .map(|err| RowError {
                index: err.index,
                reason: err
                    .errors
                    .first()
                    .map(|detail| detail.reason.clone())
                    .unwrap_or_default(),
                message: err
                    .errors
                    .iter()
                    .map(|detail| detail.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn test_client(base_url: &str) -> BigQueryClient {
        let config = Config {
            api_url: "https://api.example.com".to_string(),
            access_token: "test_token".to_string(),
            account_id: "123456".to_string(),
            warehouse_url: base_url.to_string(),
            warehouse_token: "wh_token".to_string(),
            project_id: "test-project".to_string(),
            dataset_id: "ads".to_string(),
            table_id: "facebook_stats".to_string(),
            backfill_start: NaiveDate::from_str("2020-01-01").unwrap(),
        };
        BigQueryClient::new(&config)
    }

    #[tokio::test]
    async fn invalid_base_url_fails_with_parse_error() {
        let client = test_client("invalid_url");
        let result = client.table_exists().await;
        assert!(matches!(result.unwrap_err(), Error::UrlParsingFailed(_)));
    }

    #[test]
    fn parses_both_datetime_shapes() {
        let iso = parse_datetime("2024-01-02T10:15:30.123456").unwrap();
        let spaced = parse_datetime("2024-01-02 10:15:30.123456").unwrap();
        assert_eq!(iso, spaced);

        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn insert_errors_deserialize_and_flatten() {
        let raw = r#"{
            "kind": "bigquery#tableDataInsertAllResponse",
            "insertErrors": [
                {"index": 3, "errors": [
                    {"reason": "invalid", "message": "no such field: bogus"},
                    {"reason": "invalid", "message": "value out of range"}
                ]}
            ]
        }"#;

        let response: InsertAllResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.insert_errors.len(), 1);
        assert_eq!(response.insert_errors[0].index, 3);
        assert_eq!(response.insert_errors[0].errors.len(), 2);
    }

    #[test]
    fn completed_query_with_null_cell_is_empty_watermark() {
        let raw = r#"{"jobComplete": true, "rows": [{"f": [{"v": null}]}]}"#;
        let response: QueryResponse = serde_json::from_str(raw).unwrap();

        assert_eq!(watermark_value(response).unwrap(), None);
    }

    #[test]
    fn completed_query_yields_the_stored_watermark() {
        let raw = r#"{"jobComplete": true, "rows": [{"f": [{"v": "2024-01-02T10:15:30"}]}]}"#;
        let response: QueryResponse = serde_json::from_str(raw).unwrap();

        let expected = NaiveDateTime::from_str("2024-01-02T10:15:30").unwrap();
        assert_eq!(watermark_value(response).unwrap(), Some(expected));
    }

    #[test]
    fn incomplete_query_is_an_error_not_an_empty_table() {
        let raw = r#"{"kind": "bigquery#queryResponse", "jobComplete": false}"#;
        let response: QueryResponse = serde_json::from_str(raw).unwrap();

        let result = watermark_value(response);
        assert!(matches!(
            result.unwrap_err(),
            Error::UnexpectedResponse { .. }
        ));
    }

    #[test]
    fn watermark_query_selects_the_partition_column() {
        let client = test_client("https://warehouse.example.com");
        assert_eq!(
            client.watermark_query(),
            "SELECT max(inserted_at) FROM `test-project.ads.facebook_stats`"
        );
    }

    #[test]
    fn insert_body_skips_invalid_rows_instead_of_dropping_the_batch() {
        let record = crate::insights::InsightRecord {
            campaign_id: "1".to_string(),
            ..crate::insights::InsightRecord::default()
        };
        let stamp = NaiveDateTime::from_str("2024-01-02T10:15:30").unwrap();
        let rows = vec![crate::data::normalize(
            &record,
            &crate::campaigns::CampaignIndex::empty(),
            stamp,
        )];

        let body = insert_all_body(&rows);
        assert_eq!(body["skipInvalidRows"], true);
        assert_eq!(body["ignoreUnknownValues"], false);
        assert_eq!(body["rows"].as_array().unwrap().len(), 1);
        assert_eq!(body["rows"][0]["json"]["campaign_id"], "1");
    }
}
