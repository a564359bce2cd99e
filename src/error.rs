use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{bank} export is missing required columns: {}", missing.join(", "))]
    MissingColumns { bank: String, missing: Vec<String> },

    #[error("Could not read {filename} as a {bank} export: {reason}")]
    Format {
        bank: String,
        filename: String,
        reason: String,
    },

    #[error("Unknown bank: {0}")]
    UnknownBank(String),

    #[error("Rejected {filename}: {reason}")]
    UnsupportedFile { filename: String, reason: String },

    #[error("Invalid period: {0} (expected YYYY-MM)")]
    InvalidPeriod(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("No rule with ID {0}")]
    UnknownRule(i64),

    #[error("No transaction with ID {0}")]
    UnknownTransaction(i64),

    #[error("No raw transactions found for period {0}")]
    NoRawTransactions(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TallyError>;
