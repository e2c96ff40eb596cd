//! Domain error types.

/// Top-level error type for bandtrader.
#[derive(Debug, thiserror::Error)]
pub enum BandtraderError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("{code}: missing required columns: {}", columns.join(", "))]
    MissingColumns { code: String, columns: Vec<String> },

    #[error("{code}: invalid indicator series: {reason}")]
    InvalidSeries { code: String, reason: String },

    #[error("invalid strategy parameter {name}: {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BandtraderError {
    /// True for errors that void a single security's run but not a batch.
    pub fn is_input_contract(&self) -> bool {
        matches!(
            self,
            BandtraderError::MissingColumns { .. } | BandtraderError::InvalidSeries { .. }
        )
    }
}

impl From<&BandtraderError> for std::process::ExitCode {
    fn from(err: &BandtraderError) -> Self {
        let code: u8 = match err {
            BandtraderError::Io(_) => 1,
            BandtraderError::ConfigParse { .. }
            | BandtraderError::ConfigMissing { .. }
            | BandtraderError::ConfigInvalid { .. }
            | BandtraderError::InvalidParam { .. } => 2,
            BandtraderError::DataSource { .. }
            | BandtraderError::MissingColumns { .. }
            | BandtraderError::InvalidSeries { .. } => 5,
            BandtraderError::Report { .. }
            | BandtraderError::Csv(_)
            | BandtraderError::Json(_) => 6,
        };
        std::process::ExitCode::from(code)
    }
}
