use crate::error::Error;
use crate::warehouse::{Clustering, TableField, TableSchema, TableSpec, TimePartitioning, Warehouse};
use log::info;

/// Column the incremental watermark is read from; also the partition key.
pub const WATERMARK_COLUMN: &str = "inserted_at";

fn required(name: &str, field_type: &str) -> TableField {
    TableField {
        name: name.to_string(),
        field_type: field_type.to_string(),
        mode: "REQUIRED".to_string(),
        fields: Vec::new(),
    }
}

fn repeated_action_record(name: &str) -> TableField {
    let nullable = |field: &str| TableField {
        name: field.to_string(),
        field_type: "STRING".to_string(),
        mode: "NULLABLE".to_string(),
        fields: Vec::new(),
    };

    TableField {
        name: name.to_string(),
        field_type: "RECORD".to_string(),
        mode: "REPEATED".to_string(),
        fields: vec![nullable("action_type"), nullable("value")],
    }
}

/// The fixed destination layout: day partitioning on the watermark column
/// and clustering on the columns downstream queries filter and sort by.
pub fn table_spec() -> TableSpec {
    TableSpec {
        schema: TableSchema {
            fields: vec![
                required(WATERMARK_COLUMN, "DATETIME"),
                required("date_start", "STRING"),
                required("date_stop", "STRING"),
                required("campaign_id", "STRING"),
                required("campaign_name", "STRING"),
                required("created_time", "STRING"),
                required("start_time", "STRING"),
                required("end_time", "STRING"),
                required("status", "STRING"),
                required("objective", "STRING"),
                required("clicks", "INTEGER"),
                required("impressions", "INTEGER"),
                required("reach", "INTEGER"),
                required("cpc", "FLOAT"),
                required("spend", "FLOAT"),
                repeated_action_record("actions"),
                repeated_action_record("conversions"),
            ],
        },
        time_partitioning: TimePartitioning {
            grain: "DAY".to_string(),
            field: WATERMARK_COLUMN.to_string(),
        },
        clustering: Clustering {
            fields: vec!["campaign_id".to_string(), "campaign_name".to_string()],
        },
    }
}

/// Makes sure the destination dataset and table exist before any write.
/// Safe to call on every run; a create that fails because a concurrent run
/// won the race counts as success. Any other failure is fatal for the run.
pub async fn ensure_table(warehouse: &dyn Warehouse) -> Result<(), Error> {
    ensure_inner(warehouse)
        .await
        .map_err(|err| Error::SchemaSetupFailed {
            source: Box::new(err),
        })
}

async fn ensure_inner(warehouse: &dyn Warehouse) -> Result<(), Error> {
    if !warehouse.dataset_exists().await? {
        match warehouse.create_dataset().await {
            Ok(()) => info!("created destination dataset"),
            Err(err) => {
                if !matches!(warehouse.dataset_exists().await, Ok(true)) {
                    return Err(err);
                }
            }
        }
    }

    if !warehouse.table_exists().await? {
        match warehouse.create_table(&table_spec()).await {
            Ok(()) => info!("created destination table"),
            Err(err) => {
                if !matches!(warehouse.table_exists().await, Ok(true)) {
                    return Err(err);
                }
            }
        }
    }

    Ok(())
}
