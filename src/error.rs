use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no egress movements found for taller {taller_id}")]
    NoMovements { taller_id: i64 },

    #[error("not enough distinct weeks: need at least {needed}, got {got}")]
    InsufficientWeeks { needed: usize, got: usize },

    #[error("external indicator {indicator} unavailable: {reason}")]
    ExternalSource { indicator: String, reason: String },

    #[error("no trained model for taller {taller_id}, segment {segment}")]
    ModelArtifactMissing { taller_id: i64, segment: String },

    #[error("model expects {expected} features, row has {got}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("training failed: {0}")]
    Training(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DataAbsence,
    ExternalSource,
    ModelArtifactMissing,
    Persistence,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DataAbsence => "data_absence",
            ErrorKind::ExternalSource => "external_source",
            ErrorKind::ModelArtifactMissing => "model_missing",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Internal => "internal",
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NoMovements { .. } | PipelineError::InsufficientWeeks { .. } => {
                ErrorKind::DataAbsence
            }
            PipelineError::ExternalSource { .. } => ErrorKind::ExternalSource,
            PipelineError::ModelArtifactMissing { .. } => ErrorKind::ModelArtifactMissing,
            PipelineError::Persistence(_)
            | PipelineError::Database(_)
            | PipelineError::Migration(_)
            | PipelineError::Io(_)
            | PipelineError::Json(_)
            | PipelineError::Csv(_) => ErrorKind::Persistence,
            PipelineError::FeatureMismatch { .. } | PipelineError::Training(_) => {
                ErrorKind::Internal
            }
        }
    }
}
