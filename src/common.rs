use geo::Coord;
use thiserror::Error;

/// Spacing (pixels) between consecutive points of a subdivided edge.
pub static DEFAULT_SUBDIVIDE_RESOLUTION: f64 = 4.0;
/// Points closer than this to a crossover are never used as keypoint candidates.
pub static DEFAULT_CROSSOVER_EXCLUDE_RADIUS: f64 = 4.0;
/// Points within this radius of a junction or crossover are sampled more often.
pub static DEFAULT_INTERESTING_RADIUS: f64 = 32.0;
/// NMS score assigned to junctions and dead-ends; above any random score.
pub static ITSC_NMS_SCORE: f32 = 2.0;
/// Anchor sampling weight near junctions and crossovers.
pub static INTERESTING_SAMPLE_WEIGHT: f32 = 0.9;
/// Anchor sampling weight everywhere else.
pub static DEFAULT_SAMPLE_WEIGHT: f32 = 0.1;
/// Range of the random NMS scores; emulates different random configurations that share a
/// similar spacing between kept points.
pub static NMS_SCORE_RANGE: (f32, f32) = (0.9, 1.0);
/// Standard deviation (pixels) of the label jitter applied to output points.
pub static POINT_NOISE_SCALE: f64 = 1.0;
/// Upper bound on neighbour slots per anchor row.
pub static MAX_NEIGHBOR_SLOTS: usize = 4096;

/// Errors raised while building a graph index or generating labels.
#[derive(Debug, Error)]
pub enum LabelError {
    /// The graph description is malformed (dangling reference, self-loop, ...).
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),
    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// An internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LabelError>;

/// Validates that a radius or size is finite and strictly positive.
pub fn check_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(LabelError::InvalidConfig(format!(
            "'{}' must be a finite value greater than zero, got {}.",
            name, value
        )));
    }
    Ok(())
}

/// Validates that a count is at least one.
pub fn check_count(name: &str, value: usize) -> Result<()> {
    if value < 1 {
        return Err(LabelError::InvalidConfig(format!(
            "'{}' must be at least 1, got {}.",
            name, value
        )));
    }
    Ok(())
}

#[inline]
pub fn coord_to_array(coord: Coord<f64>) -> [f64; 2] {
    [coord.x, coord.y]
}

#[inline]
pub fn dist_2(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}
