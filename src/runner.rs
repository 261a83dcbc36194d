use crate::api_client::{AdsApi, Throttle};
use crate::campaigns::CampaignIndex;
use crate::data::{normalize, WarehouseRow};
use crate::error::Error;
use crate::insights;
use crate::loader;
use crate::retry::RetryPolicy;
use crate::schema;
use crate::warehouse::{RowError, Warehouse};
use crate::watermark;
use crate::windows::{plan_windows, TimeWindow};
use chrono::{Days, NaiveDate, NaiveDateTime, Utc};
use log::{error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Retry schedules for the two call types a run makes.
pub struct RunPolicies {
    pub fetch: RetryPolicy,
    pub insert: RetryPolicy,
}

impl Default for RunPolicies {
    fn default() -> Self {
        RunPolicies {
            fetch: RetryPolicy::upstream_fetch(),
            insert: RetryPolicy::warehouse_write(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    PartialSuccess,
}

/// A window the run could not fully land, with enough context for manual
/// replay. A genuinely empty window is not an anomaly.
#[derive(Debug)]
pub struct WindowAnomaly {
    pub window: TimeWindow,
    pub kind: AnomalyKind,
}

#[derive(Debug)]
pub enum AnomalyKind {
    Fetch { error: String },
    Load { error: String, rows_attempted: usize },
    RejectedRows { errors: Vec<RowError>, rows_attempted: usize },
}

impl fmt::Display for WindowAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window {}: {}", self.window, self.kind)
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::Fetch { error } => write!(f, "fetch failed: {error}"),
            AnomalyKind::Load {
                error,
                rows_attempted,
            } => write!(f, "load of {rows_attempted} rows failed: {error}"),
            AnomalyKind::RejectedRows {
                errors,
                rows_attempted,
            } => {
                write!(f, "{} of {rows_attempted} rows rejected", errors.len())?;
                if let Some(first) = errors.first() {
                    write!(
                        f,
                        " (row {} {}: {})",
                        first.index, first.reason, first.message
                    )?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub rows_loaded: usize,
    pub anomalies: Vec<WindowAnomaly>,
}

/// One incremental run: ensure the destination table, resolve the
/// watermark, then fetch/normalize/load every day up to `today`.
pub async fn run_incremental(
    api: &dyn AdsApi,
    throttle: &dyn Throttle,
    warehouse: &dyn Warehouse,
    policies: &RunPolicies,
    backfill_start: NaiveDate,
    today: NaiveDate,
    stop: &AtomicBool,
) -> Result<RunReport, Error> {
    schema::ensure_table(warehouse).await?;

    let start = watermark::resolve_start_date(warehouse, &policies.insert, backfill_start).await?;

    run_range(api, throttle, warehouse, policies, start, today, stop).await
}

/// A manual backfill over an explicit day range, bypassing the watermark.
/// The destination table is still ensured first.
pub async fn run_backfill(
    api: &dyn AdsApi,
    throttle: &dyn Throttle,
    warehouse: &dyn Warehouse,
    policies: &RunPolicies,
    start: NaiveDate,
    end: NaiveDate,
    stop: &AtomicBool,
) -> Result<RunReport, Error> {
    if start > end {
        return Err(Error::StartDateAfterEndDate {
            start_date: start.to_string(),
            end_date: end.to_string(),
        });
    }

    schema::ensure_table(warehouse).await?;

    run_range(api, throttle, warehouse, policies, start, end, stop).await
}

async fn run_range(
    api: &dyn AdsApi,
    throttle: &dyn Throttle,
    warehouse: &dyn Warehouse,
    policies: &RunPolicies,
    start: NaiveDate,
    end: NaiveDate,
    stop: &AtomicBool,
) -> Result<RunReport, Error> {
    let campaigns = match CampaignIndex::build(api, &policies.fetch).await {
        Ok(index) => index,
        // Insights for unknown campaigns still load, just with blank
        // metadata, so a campaign listing outage does not block the run.
        Err(err) => {
            warn!("campaign fetch failed, loading without enrichment: {err}");
            CampaignIndex::empty()
        }
    };

    let mut rows_loaded = 0;
    let mut anomalies: Vec<WindowAnomaly> = Vec::new();
    // Once a window fails, later rows must not move the stored watermark
    // past it; their stamps are clamped to the day before the failure so
    // the next run resumes at the failed day.
    let mut stamp_ceiling: Option<NaiveDate> = None;

    for window in plan_windows(start, end) {
        if stop.load(Ordering::Relaxed) {
            info!("stop requested; halting before window {window}");
            break;
        }

        info!("processing window {window}");

        let records = match insights::fetch_window(api, throttle, &policies.fetch, window).await {
            Ok(records) => records,
            Err(err) => {
                error!("window {window}: fetch failed: {err}");
                anomalies.push(WindowAnomaly {
                    window,
                    kind: AnomalyKind::Fetch {
                        error: err.to_string(),
                    },
                });
                lower_ceiling(&mut stamp_ceiling, window);
                continue;
            }
        };

        if records.is_empty() {
            info!("window {window}: no insight records");
            continue;
        }

        let stamp = watermark_stamp(window, stamp_ceiling);
        let rows: Vec<WarehouseRow> = records
            .iter()
            .map(|record| normalize(record, &campaigns, stamp))
            .collect();

        match loader::load_window(warehouse, &policies.insert, window, &rows).await {
            Ok(outcome) => {
                rows_loaded += outcome.rows_loaded;
                if !outcome.row_errors.is_empty() {
                    anomalies.push(WindowAnomaly {
                        window,
                        kind: AnomalyKind::RejectedRows {
                            errors: outcome.row_errors,
                            rows_attempted: rows.len(),
                        },
                    });
                }
            }
            Err(err) => {
                error!("window {window}: load failed: {err}");
                anomalies.push(WindowAnomaly {
                    window,
                    kind: AnomalyKind::Load {
                        error: err.to_string(),
                        rows_attempted: rows.len(),
                    },
                });
                lower_ceiling(&mut stamp_ceiling, window);
            }
        }
    }

    let status = if anomalies.is_empty() {
        RunStatus::Success
    } else {
        RunStatus::PartialSuccess
    };

    if rows_loaded > 0 {
        info!(
            "run complete: {rows_loaded} rows loaded, {} anomalies",
            anomalies.len()
        );
    } else {
        warn!(
            "run complete: no rows loaded, {} anomalies",
            anomalies.len()
        );
    }

    Ok(RunReport {
        status,
        rows_loaded,
        anomalies,
    })
}

/// The watermark value for rows of `window`: the window's own day (with the
/// current time of day), or the clamp set by an earlier failed window.
fn watermark_stamp(window: TimeWindow, ceiling: Option<NaiveDate>) -> NaiveDateTime {
    let date = match ceiling {
        Some(clamped) => clamped.min(window.until),
        None => window.until,
    };
    NaiveDateTime::new(date, Utc::now().time())
}

fn lower_ceiling(ceiling: &mut Option<NaiveDate>, failed: TimeWindow) {
    if ceiling.is_none() {
        let day_before = failed
            .since
            .checked_sub_days(Days::new(1))
            .unwrap_or(failed.since);
        *ceiling = Some(day_before);
    }
}
