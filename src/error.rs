use chrono::NaiveDate;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Could not resolve the load watermark: {source}")]
    WatermarkUnavailable {
        #[source]
        source: Box<Error>,
    },

    #[error("Could not ensure the destination table exists: {source}")]
    SchemaSetupFailed {
        #[source]
        source: Box<Error>,
    },

    #[error("Upstream unavailable for window {since}..{until}: {source}")]
    UpstreamUnavailable {
        since: NaiveDate,
        until: NaiveDate,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to load {rows} rows for window {since}..{until}: {source}")]
    LoadFailed {
        since: NaiveDate,
        until: NaiveDate,
        rows: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Ads API responded with {status}: {message}")]
    UpstreamStatus { status: StatusCode, message: String },

    #[error("Warehouse responded with {status}: {message}")]
    WarehouseStatus { status: StatusCode, message: String },

    #[error("Request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("Unexpected response shape: {message}")]
    UnexpectedResponse { message: String },
}

impl Error {
    /// Whether a retry of the same call could plausibly succeed.
    /// Connection-level failures and 429/5xx responses qualify; everything
    /// else (auth, malformed request, bad payload) does not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Api(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Error::UpstreamStatus { status, .. } | Error::WarehouseStatus { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}
