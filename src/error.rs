use thiserror::Error;

/// Errors surfaced by the core pipeline.
///
/// Missing auxiliary data (injuries, odds, match history) never shows up
/// here; those paths degrade to documented neutral defaults. Only missing
/// primary entities and store failures are hard errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("match {0} not found")]
    MatchNotFound(u64),

    #[error("team {0} not found")]
    TeamNotFound(u32),

    #[error("model '{0}' not found")]
    ModelNotFound(String),

    #[error("feature ordering mismatch: model expects {expected} features, vector has {got}")]
    FeatureMismatch { expected: usize, got: usize },

    // Defined for completeness of the taxonomy; no current code path raises
    // it -- documented no-data cases resolve to neutral defaults instead.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
