use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::warehouse::Warehouse;
use chrono::{Days, NaiveDate};
use log::info;

/// Resolves the first day this run still needs to extract: the day after
/// the stored watermark, or `backfill_start` when the table is empty or
/// absent. A query failure after retries is fatal for the run; without a
/// trustworthy watermark any load could duplicate or gap history.
pub async fn resolve_start_date(
    warehouse: &dyn Warehouse,
    policy: &RetryPolicy,
    backfill_start: NaiveDate,
) -> Result<NaiveDate, Error> {
    let stored = policy
        .run(Error::is_transient, || warehouse.max_inserted_at())
        .await
        .map_err(|err| Error::WatermarkUnavailable {
            source: Box::new(err),
        })?;

    let start = match stored {
        Some(max) => max
            .date()
            .checked_add_days(Days::new(1))
            .ok_or_else(|| Error::UnexpectedResponse {
                message: format!("watermark {max} is out of range"),
            })?,
        None => backfill_start,
    };

    info!("watermark resolved; extraction starts at {start}");

    Ok(start)
}
