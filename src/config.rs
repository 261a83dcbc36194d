use crate::error::Error;
use chrono::NaiveDate;
use clap::Args as ClapArgs;

const DEFAULT_API_URL: &str = "https://graph.facebook.com/v19.0";
const DEFAULT_WAREHOUSE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const DEFAULT_BACKFILL_START: &str = "2020-01-01";

#[derive(ClapArgs)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_API_URL, env = "FB_API_URL")]
    pub(crate) api_url: String,

    #[arg(long, env = "FB_ACCESS_TOKEN")]
    pub(crate) access_token: String,

    #[arg(long, env = "FB_ACCOUNT_ID")]
    pub(crate) account_id: String,

    #[arg(long, default_value = DEFAULT_WAREHOUSE_URL, env = "WAREHOUSE_URL")]
    pub(crate) warehouse_url: String,

    #[arg(long, env = "WAREHOUSE_TOKEN")]
    pub(crate) warehouse_token: String,

    #[arg(long, env = "GCP_PROJECT_ID")]
    pub(crate) project_id: String,

    #[arg(long, env = "DATASET_ID")]
    pub(crate) dataset_id: String,

    #[arg(long, env = "TABLE_ID")]
    pub(crate) table_id: String,

    #[arg(long, default_value = DEFAULT_BACKFILL_START, env = "BACKFILL_START")]
    pub(crate) backfill_start: NaiveDate,
}

impl Config {
    /// Rejects blank identifiers that clap's presence checks let through
    /// (e.g. an env var set to the empty string).
    pub fn validate(&self) -> Result<(), Error> {
        let required = [
            ("account id", &self.account_id),
            ("access token", &self.access_token),
            ("project id", &self.project_id),
            ("dataset id", &self.dataset_id),
            ("table id", &self.table_id),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Configuration {
                    message: format!("{name} must not be empty"),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    pub(crate) fn test_config() -> Config {
        Config {
            api_url: "https://api.example.com".to_string(),
            access_token: "test_token".to_string(),
            account_id: "123456".to_string(),
            warehouse_url: "https://warehouse.example.com".to_string(),
            warehouse_token: "wh_token".to_string(),
            project_id: "test-project".to_string(),
            dataset_id: "ads".to_string(),
            table_id: "facebook_stats".to_string(),
            backfill_start: NaiveDate::from_str("2020-01-01").unwrap(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn blank_account_id_is_rejected() {
        let mut config = test_config();
        config.account_id = "  ".to_string();

        let result = config.validate();
        assert!(matches!(
            result.unwrap_err(),
            Error::Configuration { message } if message.contains("account id")
        ));
    }
}
