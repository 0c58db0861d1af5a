//! Glue between tile graph indexes and a training dataset: tile splits, patch windows,
//! parallel batch generation and collation into dense arrays.

use crate::common::{check_count, LabelError, Result};
use crate::config::SampleConfig;
use crate::index::GraphIndex;
use crate::sampler::{LabelSample, Patch};
use ndarray::{Array3, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Side length (pixels) of a full imagery tile.
pub static IMAGE_SIZE: usize = 2048;
/// Border (pixels) kept clear of patch windows.
pub static SAMPLE_MARGIN: usize = 64;
/// Number of tiles in the city-scale dataset.
pub static CITYSCALE_TILE_COUNT: usize = 180;

/// Tile indices per split.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TilePartition {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

impl TilePartition {
    /// The city-scale split: 8 of every 10 tiles train, every 20th tile (offset 18)
    /// validates, and tiles ending in 9 plus every 20th tile (offset 8) test.
    pub fn cityscale(tile_count: usize) -> Self {
        let mut partition = Self::default();
        for tile in 0..tile_count {
            if tile % 10 < 8 {
                partition.train.push(tile);
            }
            if tile % 10 == 9 || tile % 20 == 8 {
                partition.test.push(tile);
            }
            if tile % 20 == 18 {
                partition.validation.push(tile);
            }
        }
        partition
    }

    /// Tiles used for training: the train split followed by the validation split.
    pub fn training_tiles(&self) -> Vec<usize> {
        self.train
            .iter()
            .chain(self.validation.iter())
            .copied()
            .collect()
    }
}

/// A square patch window on one tile, in integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchWindow {
    pub tile: usize,
    pub begin: [usize; 2],
    pub end: [usize; 2],
}

impl PatchWindow {
    pub fn new(tile: usize, x: usize, y: usize, patch_size: usize) -> Self {
        Self {
            tile,
            begin: [x, y],
            end: [x + patch_size, y + patch_size],
        }
    }

    pub fn patch(&self) -> Patch {
        Patch::from_corners(
            [self.begin[0] as f64, self.begin[1] as f64],
            [self.end[0] as f64, self.end[1] as f64],
        )
    }
}

// inclusive range of valid window origins along one axis
fn window_range(image_size: usize, margin: usize, patch_size: usize) -> Result<(usize, usize)> {
    check_count("patch_size", patch_size)?;
    let sample_max = image_size
        .checked_sub(patch_size + margin)
        .filter(|&max| max >= margin)
        .ok_or_else(|| {
            LabelError::InvalidConfig(format!(
                "A {} px patch with a {} px margin does not fit a {} px image.",
                patch_size, margin, image_size
            ))
        })?;
    Ok((margin, sample_max))
}

/// Number of evaluation windows per tile edge needed to cover the sampled area.
pub fn eval_patches_per_edge(image_size: usize, margin: usize, patch_size: usize) -> Result<usize> {
    check_count("patch_size", patch_size)?;
    let span = image_size.checked_sub(2 * margin).ok_or_else(|| {
        LabelError::InvalidConfig(format!(
            "Margin {} leaves no room in a {} px image.",
            margin, image_size
        ))
    })?;
    Ok(span.div_ceil(patch_size))
}

/// Evenly spaced evaluation windows for one tile, `per_edge` x `per_edge` of them,
/// iterating x in the outer loop.
pub fn eval_patch_grid(
    tile: usize,
    image_size: usize,
    margin: usize,
    patch_size: usize,
    per_edge: usize,
) -> Result<Vec<PatchWindow>> {
    check_count("patches_per_edge", per_edge)?;
    let (sample_min, sample_max) = window_range(image_size, margin, patch_size)?;
    let step = if per_edge > 1 {
        (sample_max - sample_min) as f64 / (per_edge - 1) as f64
    } else {
        0.0
    };
    // half-to-even rounding, as the dataset tooling rounds its linspace
    let offsets: Vec<usize> = (0..per_edge)
        .map(|i| (sample_min as f64 + step * i as f64).round_ties_even() as usize)
        .collect();
    let mut windows = Vec::with_capacity(per_edge * per_edge);
    for &x in offsets.iter() {
        for &y in offsets.iter() {
            windows.push(PatchWindow::new(tile, x, y, patch_size));
        }
    }
    Ok(windows)
}

/// Draws a random training window (uniform tile, uniform origin inside the margin) and a
/// random rotation index in `0..4`.
pub fn random_train_window<R: Rng>(
    rng: &mut R,
    tile_count: usize,
    image_size: usize,
    margin: usize,
    patch_size: usize,
) -> Result<(PatchWindow, usize)> {
    check_count("tile_count", tile_count)?;
    let (sample_min, sample_max) = window_range(image_size, margin, patch_size)?;
    let tile = rng.random_range(0..tile_count);
    let x = rng.random_range(sample_min..=sample_max);
    let y = rng.random_range(sample_min..=sample_max);
    let rot_index = rng.random_range(0..4);
    Ok((PatchWindow::new(tile, x, y, patch_size), rot_index))
}

/// One label generation job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchRequest {
    pub tile: usize,
    pub patch: Patch,
    pub rot_index: usize,
}

impl PatchRequest {
    pub fn from_window(window: &PatchWindow, rot_index: usize) -> Self {
        Self {
            tile: window.tile,
            patch: window.patch(),
            rot_index,
        }
    }
}

/// Holds the graph indexes of every tile in a split and generates labels for them.
#[derive(Debug)]
pub struct LabelGenerator {
    tiles: Vec<GraphIndex>,
    config: SampleConfig,
    pub progress: Arc<AtomicUsize>,
}

impl LabelGenerator {
    pub fn new(tiles: Vec<GraphIndex>, config: SampleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tiles,
            config,
            progress: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[inline]
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile(&self, tile: usize) -> Option<&GraphIndex> {
        self.tiles.get(tile)
    }

    #[inline]
    pub fn config(&self) -> &SampleConfig {
        &self.config
    }

    #[inline]
    pub fn progress_init(&self) {
        self.progress.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn progress(&self) -> usize {
        self.progress.load(Ordering::Relaxed)
    }

    fn patch_size(&self) -> usize {
        self.config.patch_size.round() as usize
    }

    pub fn sample<R: Rng>(&self, request: &PatchRequest, rng: &mut R) -> Result<LabelSample> {
        let index = self.tile(request.tile).ok_or_else(|| {
            LabelError::InvalidConfig(format!(
                "Tile {} requested but only {} tiles are loaded.",
                request.tile,
                self.tile_count()
            ))
        })?;
        index.sample_patch(&request.patch, request.rot_index, &self.config, rng)
    }

    /// Generates labels for every request on the rayon pool.
    ///
    /// Request `i` draws from its own generator seeded with `seed + i`, so results do not
    /// depend on scheduling. Without a seed, a base seed is drawn from the thread RNG.
    pub fn sample_batch(
        &self,
        requests: &[PatchRequest],
        random_seed: Option<u64>,
    ) -> Result<Vec<LabelSample>> {
        let seed = random_seed.unwrap_or_else(|| rand::rng().random());
        self.progress_init();
        requests
            .par_iter()
            .enumerate()
            .map(|(i, request)| {
                self.progress.fetch_add(1, Ordering::Relaxed);
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                self.sample(request, &mut rng)
            })
            .collect()
    }

    /// Random training requests over all loaded tiles.
    pub fn training_requests<R: Rng>(
        &self,
        rng: &mut R,
        count: usize,
        image_size: usize,
        margin: usize,
    ) -> Result<Vec<PatchRequest>> {
        (0..count)
            .map(|_| {
                let (window, rot_index) = random_train_window(
                    rng,
                    self.tile_count(),
                    image_size,
                    margin,
                    self.patch_size(),
                )?;
                Ok(PatchRequest::from_window(&window, rot_index))
            })
            .collect()
    }

    /// The unrotated evaluation grid over all loaded tiles.
    pub fn eval_requests(&self, image_size: usize, margin: usize) -> Result<Vec<PatchRequest>> {
        let patch_size = self.patch_size();
        let per_edge = eval_patches_per_edge(image_size, margin, patch_size)?;
        let mut requests = Vec::new();
        for tile in 0..self.tile_count() {
            for window in eval_patch_grid(tile, image_size, margin, patch_size, per_edge)? {
                requests.push(PatchRequest::from_window(&window, 0));
            }
        }
        Ok(requests)
    }
}

/// A batch of labels packed into dense arrays.
#[derive(Debug, Clone)]
pub struct LabelBatch {
    /// `[batch, max_points, 2]`, zero-padded past each item's point count.
    pub points: Array3<f32>,
    pub point_counts: Vec<usize>,
    /// `[batch, topo_sample_num, max_neighbor_queries, 2]`
    pub pairs: Array4<i32>,
    /// `[batch, topo_sample_num, max_neighbor_queries]`
    pub connected: Array3<bool>,
    /// `[batch, topo_sample_num, max_neighbor_queries]`
    pub valid: Array3<bool>,
}

/// Packs label samples into a [`LabelBatch`]. Every item must share the same row and
/// slot counts.
pub fn collate(batch: &[LabelSample]) -> Result<LabelBatch> {
    let first = batch
        .first()
        .ok_or_else(|| LabelError::InvalidConfig("Cannot collate an empty batch.".to_string()))?;
    let sample_num = first.samples.len();
    let slot_num = first.samples.first().map_or(0, |sample| sample.len());
    for (item_idx, item) in batch.iter().enumerate() {
        if item.samples.len() != sample_num || item.samples.iter().any(|s| s.len() != slot_num) {
            return Err(LabelError::InvalidConfig(format!(
                "Batch item {} does not match the {} x {} label shape of the first item.",
                item_idx, sample_num, slot_num
            )));
        }
    }
    let point_counts: Vec<usize> = batch.iter().map(|item| item.point_count()).collect();
    let max_points = point_counts.iter().copied().max().unwrap_or(0);

    let mut points = Array3::<f32>::zeros((batch.len(), max_points, 2));
    let mut pairs = Array4::<i32>::zeros((batch.len(), sample_num, slot_num, 2));
    let mut connected = Array3::<bool>::from_elem((batch.len(), sample_num, slot_num), false);
    let mut valid = Array3::<bool>::from_elem((batch.len(), sample_num, slot_num), false);
    for (b, item) in batch.iter().enumerate() {
        for (p, point) in item.points.iter().enumerate() {
            points[[b, p, 0]] = point[0] as f32;
            points[[b, p, 1]] = point[1] as f32;
        }
        for (s, sample) in item.samples.iter().enumerate() {
            for (n, &(src, tgt)) in sample.pairs.iter().enumerate() {
                pairs[[b, s, n, 0]] = src as i32;
                pairs[[b, s, n, 1]] = tgt as i32;
                connected[[b, s, n]] = sample.shall_connect[n];
                valid[[b, s, n]] = sample.valid[n];
            }
        }
    }
    Ok(LabelBatch {
        points,
        point_counts,
        pairs,
        connected,
        valid,
    })
}
