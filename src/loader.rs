use crate::data::WarehouseRow;
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::warehouse::{RowError, Warehouse};
use crate::windows::TimeWindow;
use log::{info, warn};

/// Result of loading one window's rows.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub rows_loaded: usize,
    pub row_errors: Vec<RowError>,
}

/// Inserts `rows` for `window` as one batch, retrying transient failures.
///
/// Row-level rejections are reported back, not retried: resubmitting the
/// same batch would resubmit the same malformed rows. An empty input makes
/// no warehouse call at all. Exhausted retries surface as
/// [`Error::LoadFailed`] scoped to this window.
pub async fn load_window(
    warehouse: &dyn Warehouse,
    policy: &RetryPolicy,
    window: TimeWindow,
    rows: &[WarehouseRow],
) -> Result<LoadOutcome, Error> {
    if rows.is_empty() {
        return Ok(LoadOutcome::default());
    }

    let row_errors = policy
        .run(Error::is_transient, || warehouse.insert_rows(rows))
        .await
        .map_err(|err| Error::LoadFailed {
            since: window.since,
            until: window.until,
            rows: rows.len(),
            source: Box::new(err),
        })?;

    let rows_loaded = rows.len() - row_errors.len();

    if row_errors.is_empty() {
        info!("window {window}: loaded {rows_loaded} rows");
    } else {
        warn!(
            "window {window}: {} of {} rows rejected: {:?}",
            row_errors.len(),
            rows.len(),
            row_errors
        );
    }

    Ok(LoadOutcome {
        rows_loaded,
        row_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::MockWarehouse;
    use chrono::NaiveDate;
    use reqwest::StatusCode;
    use std::str::FromStr;

    fn window() -> TimeWindow {
        TimeWindow::day(NaiveDate::from_str("2024-01-02").unwrap())
    }

    fn row(campaign_id: &str) -> WarehouseRow {
        WarehouseRow {
            inserted_at: "2024-01-02 10:00:00.000000".to_string(),
            date_start: "2024-01-02".to_string(),
            date_stop: "2024-01-02".to_string(),
            campaign_id: campaign_id.to_string(),
            campaign_name: format!("campaign {campaign_id}"),
            created_time: String::new(),
            start_time: String::new(),
            end_time: String::new(),
            status: String::new(),
            objective: String::new(),
            clicks: 1,
            impressions: 2,
            reach: 3,
            cpc: 0.5,
            spend: 1.5,
            actions: vec![],
            conversions: vec![],
        }
    }

    #[tokio::test]
    async fn empty_input_makes_no_warehouse_call() {
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_insert_rows().times(0);

        let outcome = load_window(&warehouse, &RetryPolicy::immediate(1), window(), &[])
            .await
            .unwrap();
        assert_eq!(outcome.rows_loaded, 0);
        assert!(outcome.row_errors.is_empty());
    }

    #[tokio::test]
    async fn full_success_counts_all_rows() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_insert_rows()
            .withf(|rows| rows.len() == 2)
            .times(1)
            .returning(|_| Ok(vec![]));

        let rows = vec![row("1"), row("2")];
        let outcome = load_window(&warehouse, &RetryPolicy::immediate(1), window(), &rows)
            .await
            .unwrap();
        assert_eq!(outcome.rows_loaded, 2);
    }

    #[tokio::test]
    async fn row_level_errors_are_reported_not_retried() {
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_insert_rows().times(1).returning(|_| {
            Ok(vec![
                RowError {
                    index: 1,
                    reason: "invalid".to_string(),
                    message: "bad value".to_string(),
                },
                RowError {
                    index: 7,
                    reason: "invalid".to_string(),
                    message: "bad value".to_string(),
                },
            ])
        });

        let rows: Vec<WarehouseRow> = (0..10).map(|i| row(&i.to_string())).collect();
        let outcome = load_window(&warehouse, &RetryPolicy::immediate(6), window(), &rows)
            .await
            .unwrap();

        // The other eight rows are committed.
        assert_eq!(outcome.rows_loaded, 8);
        assert_eq!(outcome.row_errors.len(), 2);
        assert_eq!(outcome.row_errors[0].index, 1);
        assert_eq!(outcome.row_errors[1].index, 7);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_succeeds() {
        let mut warehouse = MockWarehouse::new();
        let mut calls = 0;
        warehouse.expect_insert_rows().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(Error::WarehouseStatus {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    message: "backend".to_string(),
                })
            } else {
                Ok(vec![])
            }
        });

        let rows = vec![row("1")];
        let outcome = load_window(&warehouse, &RetryPolicy::immediate(3), window(), &rows)
            .await
            .unwrap();
        assert_eq!(outcome.rows_loaded, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_become_window_scoped_failure() {
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_insert_rows().times(2).returning(|_| {
            Err(Error::WarehouseStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "backend".to_string(),
            })
        });

        let rows = vec![row("1"), row("2")];
        let result = load_window(&warehouse, &RetryPolicy::immediate(2), window(), &rows).await;

        match result.unwrap_err() {
            Error::LoadFailed {
                since,
                until,
                rows: attempted,
                ..
            } => {
                assert_eq!(since, window().since);
                assert_eq!(until, window().until);
                assert_eq!(attempted, 2);
            }
            other => panic!("expected LoadFailed, got {other}"),
        }
    }
}
