use crate::common::{
    check_count, check_positive, LabelError, Result, DEFAULT_CROSSOVER_EXCLUDE_RADIUS,
    DEFAULT_INTERESTING_RADIUS, DEFAULT_SUBDIVIDE_RESOLUTION, MAX_NEIGHBOR_SLOTS,
};
use serde::Deserialize;

/// Parameters fixed when a tile's graph index is built.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub subdivide_resolution: f64,
    pub crossover_exclude_radius: f64,
    pub interesting_radius: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            subdivide_resolution: DEFAULT_SUBDIVIDE_RESOLUTION,
            crossover_exclude_radius: DEFAULT_CROSSOVER_EXCLUDE_RADIUS,
            interesting_radius: DEFAULT_INTERESTING_RADIUS,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("subdivide_resolution", self.subdivide_resolution)?;
        check_positive("crossover_exclude_radius", self.crossover_exclude_radius)?;
        check_positive("interesting_radius", self.interesting_radius)?;
        Ok(())
    }
}

/// Per-call patch sampling parameters. Every field is required.
///
/// Deserialises from the upper-case keys used by the training configuration files,
/// e.g. `PATCH_SIZE` or `TOPO_SAMPLE_NUM`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SampleConfig {
    /// Side length of the square patch in pixels.
    pub patch_size: f64,
    /// Minimum spacing between points kept by NMS.
    pub road_nms_radius: f64,
    /// Number of anchor rows produced per patch.
    pub topo_sample_num: usize,
    /// Radius of the neighbour search around each anchor.
    pub neighbor_radius: f64,
    /// Number of neighbour slots per anchor row.
    pub max_neighbor_queries: usize,
}

impl SampleConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("patch_size", self.patch_size)?;
        check_positive("road_nms_radius", self.road_nms_radius)?;
        check_count("topo_sample_num", self.topo_sample_num)?;
        check_positive("neighbor_radius", self.neighbor_radius)?;
        check_count("max_neighbor_queries", self.max_neighbor_queries)?;
        if self.max_neighbor_queries > MAX_NEIGHBOR_SLOTS {
            return Err(LabelError::InvalidConfig(format!(
                "'max_neighbor_queries' must be at most {}, got {}.",
                MAX_NEIGHBOR_SLOTS, self.max_neighbor_queries
            )));
        }
        Ok(())
    }
}
