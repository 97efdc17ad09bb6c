use thiserror::Error;

/// A file reference (or a user-supplied date) does not carry a usable trading date.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("no trading date in file reference '{reference}'")]
    NoDateInReference { reference: String },
    #[error("'{value}' is not an 8-digit trading date")]
    InvalidDate { value: String },
}

impl FormatError {
    /// The offending href or value.
    pub fn subject(&self) -> &str {
        match self {
            FormatError::NoDateInReference { reference } => reference,
            FormatError::InvalidDate { value } => value,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("cannot resolve '{reference}' against {base}: {source}")]
    InvalidUrl {
        reference: String,
        base: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot decode workbook: {0}")]
    Decode(#[from] calamine::Error),
    #[error("workbook has no worksheets")]
    NoWorksheet,
    #[error("unit marker '{marker}' not found")]
    MarkerNotFound { marker: &'static str },
    #[error("no header row below the unit marker")]
    HeaderNotFound,
    #[error("column {position}: expected '{expected}', found '{found}'")]
    MissingColumn {
        position: usize,
        expected: &'static str,
        found: String,
    },
}

/// Row-level contract violation; drops the row only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("product code '{code}' is shorter than {min} characters")]
    ProductCodeTooShort { code: String, min: usize },
    #[error("{column} cell is empty")]
    MissingCell { column: &'static str },
    #[error("{column} cell '{value}' is not a number")]
    NotANumber { column: &'static str, value: String },
    #[error("{column} cell '{value}' is negative")]
    Negative { column: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("listing page {page} unavailable: {source}")]
    Listing {
        page: u32,
        #[source]
        source: FetchError,
    },
    #[error("discovery cancelled")]
    Cancelled,
}

/// Why one file reference contributed nothing to the batch.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("worker task failed: {0}")]
    Task(String),
}

impl ReferenceError {
    pub fn stage(&self) -> &'static str {
        match self {
            ReferenceError::Format(_) => "discover",
            ReferenceError::Fetch(_) => "fetch",
            ReferenceError::Extract(_) => "extract",
            ReferenceError::Task(_) => "task",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Setup(#[from] anyhow::Error),
    #[error(transparent)]
    Discovery(DiscoveryError),
    #[error("run cancelled before persistence; nothing was written")]
    Cancelled,
}

impl From<DiscoveryError> for PipelineError {
    fn from(e: DiscoveryError) -> Self {
        match e {
            DiscoveryError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Discovery(other),
        }
    }
}
