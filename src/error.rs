use serde::Serialize;
use thiserror::Error;

/// Fatal pipeline errors. Quality problems that do not stop the pipeline
/// are reported as [`QualityWarning`] values instead.
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient depth data: {valid} valid points, need at least {required}")]
    InsufficientData { valid: usize, required: usize },

    #[error("estimation cancelled")]
    Cancelled,
}

/// Non-fatal quality flags accumulated into the estimation report.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum QualityWarning {
    /// ICP exhausted its iteration budget with a poor fitness.
    FitDidNotConverge { fitness: f64, iterations: usize },
    /// Alignment fitness below the acceptance level.
    LowFitness { fitness: f64 },
    /// Alignment residual above the acceptance level.
    HighRmse { rmse_mm: f64 },
    /// No food-pixel ray intersected the fitted mesh; the volume is zero.
    RaycastDegenerate { rays: usize },
}
