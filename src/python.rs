//! Python bindings for tile label generation.

use crate::common::{
    LabelError, DEFAULT_CROSSOVER_EXCLUDE_RADIUS, DEFAULT_INTERESTING_RADIUS,
    DEFAULT_SUBDIVIDE_RESOLUTION,
};
use crate::config::{IndexConfig, SampleConfig};
use crate::dataset::{self, LabelGenerator, PatchRequest, PatchWindow, TilePartition};
use crate::graph::GraphDescription;
use crate::index::GraphIndex;
use crate::sampler::{LabelSample, Patch};
use numpy::{IntoPyArray, PyArray1, PyArray2, PyArray3, PyArray4};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::Arc;

impl From<LabelError> for PyErr {
    fn from(err: LabelError) -> PyErr {
        match err {
            LabelError::InvalidGraph(_) | LabelError::InvalidConfig(_) => {
                PyValueError::new_err(err.to_string())
            }
            LabelError::Internal(_) => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

/// Adjacency as loaded from a pickled graph: `(row, col)` vertex keys mapped to their
/// neighbour lists.
type PyAdjacency = Vec<((f64, f64), Vec<(f64, f64)>)>;
type PyPatch = ((f64, f64), (f64, f64));
type PyTopoSample = (Vec<(usize, usize)>, Vec<bool>, Vec<bool>);
type PyWindow = (usize, (usize, usize), (usize, usize));

fn description_from_adjacency(adjacency: &PyAdjacency) -> Result<GraphDescription, LabelError> {
    let adjacency: Vec<([f64; 2], Vec<[f64; 2]>)> = adjacency
        .iter()
        .map(|((r, c), nbs)| ([*r, *c], nbs.iter().map(|(nr, nc)| [*nr, *nc]).collect()))
        .collect();
    GraphDescription::from_sat2graph(&adjacency)
}

fn seeded_rng(random_seed: Option<u64>) -> StdRng {
    if let Some(seed) = random_seed {
        StdRng::seed_from_u64(seed)
    } else {
        StdRng::from_rng(&mut rand::rng())
    }
}

fn patch_from_py(patch: PyPatch) -> Patch {
    let ((x0, y0), (x1, y1)) = patch;
    Patch::from_corners([x0, y0], [x1, y1])
}

fn window_to_py(window: &PatchWindow) -> PyWindow {
    (
        window.tile,
        (window.begin[0], window.begin[1]),
        (window.end[0], window.end[1]),
    )
}

fn request_to_py(request: &PatchRequest) -> (usize, PyPatch, usize) {
    let (min, max) = (request.patch.min(), request.patch.max());
    (
        request.tile,
        ((min[0], min[1]), (max[0], max[1])),
        request.rot_index,
    )
}

fn samples_to_py(label: LabelSample) -> Vec<PyTopoSample> {
    label
        .samples
        .into_iter()
        .map(|row| (row.pairs, row.shall_connect, row.valid))
        .collect()
}

fn points_to_array(points: &[[f64; 2]]) -> ndarray::Array2<f32> {
    let mut array = ndarray::Array2::<f32>::zeros((points.len(), 2));
    for (i, p) in points.iter().enumerate() {
        array[[i, 0]] = p[0] as f32;
        array[[i, 1]] = p[1] as f32;
    }
    array
}

/// Label generator over a single tile's road graph.
#[pyclass]
pub struct GraphLabelGenerator {
    index: Arc<GraphIndex>,
    config: SampleConfig,
}

#[pymethods]
impl GraphLabelGenerator {
    #[new]
    #[pyo3(signature = (
        adjacency,
        patch_size,
        road_nms_radius,
        topo_sample_num,
        neighbor_radius,
        max_neighbor_queries,
        subdivide_resolution=DEFAULT_SUBDIVIDE_RESOLUTION,
        crossover_exclude_radius=DEFAULT_CROSSOVER_EXCLUDE_RADIUS,
        interesting_radius=DEFAULT_INTERESTING_RADIUS
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adjacency: PyAdjacency,
        patch_size: f64,
        road_nms_radius: f64,
        topo_sample_num: usize,
        neighbor_radius: f64,
        max_neighbor_queries: usize,
        subdivide_resolution: f64,
        crossover_exclude_radius: f64,
        interesting_radius: f64,
        py: Python,
    ) -> PyResult<Self> {
        let config = SampleConfig {
            patch_size,
            road_nms_radius,
            topo_sample_num,
            neighbor_radius,
            max_neighbor_queries,
        };
        config.validate()?;
        let index_config = IndexConfig {
            subdivide_resolution,
            crossover_exclude_radius,
            interesting_radius,
        };
        let index = py.allow_threads(move || {
            let description = description_from_adjacency(&adjacency)?;
            GraphIndex::build(&description, index_config)
        })?;
        Ok(GraphLabelGenerator {
            index: Arc::new(index),
            config,
        })
    }

    #[getter]
    pub fn point_count(&self) -> usize {
        self.index.point_count()
    }

    #[getter]
    pub fn crossover_points(&self) -> Vec<(f64, f64)> {
        self.index
            .crossover_points()
            .iter()
            .map(|p| (p[0], p[1]))
            .collect()
    }

    #[getter]
    pub fn itsc_indices(&self) -> Vec<usize> {
        self.index.itsc_indices()
    }

    /// Returns `(points, samples)` for the patch spanning the two corners. `points` is a
    /// `[N, 2]` float32 array of patch-local `(x, y)` coordinates; each sample row is a
    /// `(pairs, shall_connect, valid)` tuple.
    #[pyo3(signature = (patch, rot_index=0, random_seed=None))]
    pub fn sample_patch<'py>(
        &self,
        patch: PyPatch,
        rot_index: usize,
        random_seed: Option<u64>,
        py: Python<'py>,
    ) -> PyResult<(Bound<'py, PyArray2<f32>>, Vec<PyTopoSample>)> {
        let patch = patch_from_py(patch);
        let index = Arc::clone(&self.index);
        let config = self.config;
        let label = py.allow_threads(move || {
            let mut rng = seeded_rng(random_seed);
            index.sample_patch(&patch, rot_index, &config, &mut rng)
        })?;
        let points = points_to_array(&label.points).into_pyarray(py);
        Ok((points, samples_to_py(label)))
    }
}

/// Label generator over every tile of a dataset split.
#[pyclass]
pub struct TileLabelDataset {
    generator: LabelGenerator,
}

#[pymethods]
impl TileLabelDataset {
    #[new]
    #[pyo3(signature = (
        adjacencies,
        patch_size,
        road_nms_radius,
        topo_sample_num,
        neighbor_radius,
        max_neighbor_queries,
        subdivide_resolution=DEFAULT_SUBDIVIDE_RESOLUTION,
        crossover_exclude_radius=DEFAULT_CROSSOVER_EXCLUDE_RADIUS,
        interesting_radius=DEFAULT_INTERESTING_RADIUS
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adjacencies: Vec<PyAdjacency>,
        patch_size: f64,
        road_nms_radius: f64,
        topo_sample_num: usize,
        neighbor_radius: f64,
        max_neighbor_queries: usize,
        subdivide_resolution: f64,
        crossover_exclude_radius: f64,
        interesting_radius: f64,
        py: Python,
    ) -> PyResult<Self> {
        let config = SampleConfig {
            patch_size,
            road_nms_radius,
            topo_sample_num,
            neighbor_radius,
            max_neighbor_queries,
        };
        let index_config = IndexConfig {
            subdivide_resolution,
            crossover_exclude_radius,
            interesting_radius,
        };
        let tiles = py.allow_threads(move || {
            adjacencies
                .par_iter()
                .map(|adjacency| {
                    let description = description_from_adjacency(adjacency)?;
                    GraphIndex::build(&description, index_config)
                })
                .collect::<Result<Vec<GraphIndex>, LabelError>>()
        })?;
        Ok(TileLabelDataset {
            generator: LabelGenerator::new(tiles, config)?,
        })
    }

    #[getter]
    pub fn tile_count(&self) -> usize {
        self.generator.tile_count()
    }

    pub fn progress(&self) -> usize {
        self.generator.progress()
    }

    /// Random training requests as `(tile, ((x0, y0), (x1, y1)), rot_index)` tuples.
    #[pyo3(signature = (count, random_seed=None, image_size=dataset::IMAGE_SIZE, margin=dataset::SAMPLE_MARGIN))]
    pub fn training_requests(
        &self,
        count: usize,
        random_seed: Option<u64>,
        image_size: usize,
        margin: usize,
    ) -> PyResult<Vec<(usize, PyPatch, usize)>> {
        let mut rng = seeded_rng(random_seed);
        let requests = self
            .generator
            .training_requests(&mut rng, count, image_size, margin)?;
        Ok(requests.iter().map(request_to_py).collect())
    }

    #[pyo3(signature = (image_size=dataset::IMAGE_SIZE, margin=dataset::SAMPLE_MARGIN))]
    pub fn eval_requests(
        &self,
        image_size: usize,
        margin: usize,
    ) -> PyResult<Vec<(usize, PyPatch, usize)>> {
        let requests = self.generator.eval_requests(image_size, margin)?;
        Ok(requests.iter().map(request_to_py).collect())
    }

    /// Generates and collates labels for a batch of requests. Returns
    /// `(points, point_counts, pairs, connected, valid)` arrays.
    #[pyo3(signature = (requests, random_seed=None))]
    #[allow(clippy::type_complexity)]
    pub fn sample_batch<'py>(
        &self,
        requests: Vec<(usize, PyPatch, usize)>,
        random_seed: Option<u64>,
        py: Python<'py>,
    ) -> PyResult<(
        Bound<'py, PyArray3<f32>>,
        Bound<'py, PyArray1<usize>>,
        Bound<'py, PyArray4<i32>>,
        Bound<'py, PyArray3<bool>>,
        Bound<'py, PyArray3<bool>>,
    )> {
        let requests: Vec<PatchRequest> = requests
            .into_iter()
            .map(|(tile, patch, rot_index)| PatchRequest {
                tile,
                patch: patch_from_py(patch),
                rot_index,
            })
            .collect();
        let generator = &self.generator;
        let batch = py.allow_threads(move || {
            let labels = generator.sample_batch(&requests, random_seed)?;
            dataset::collate(&labels)
        })?;
        Ok((
            batch.points.into_pyarray(py),
            batch.point_counts.into_pyarray(py),
            batch.pairs.into_pyarray(py),
            batch.connected.into_pyarray(py),
            batch.valid.into_pyarray(py),
        ))
    }
}

/// Returns the `(train, validation, test)` tile indices of the city-scale split.
#[pyfunction]
#[pyo3(signature = (tile_count=dataset::CITYSCALE_TILE_COUNT))]
pub fn cityscale_partition(tile_count: usize) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let partition = TilePartition::cityscale(tile_count);
    (partition.train, partition.validation, partition.test)
}

/// Evaluation windows for one tile as `(tile, (x0, y0), (x1, y1))` tuples.
#[pyfunction]
#[pyo3(signature = (tile, patch_size, image_size=dataset::IMAGE_SIZE, margin=dataset::SAMPLE_MARGIN, patches_per_edge=None))]
pub fn eval_patch_grid(
    tile: usize,
    patch_size: usize,
    image_size: usize,
    margin: usize,
    patches_per_edge: Option<usize>,
) -> PyResult<Vec<PyWindow>> {
    let per_edge = match patches_per_edge {
        Some(per_edge) => per_edge,
        None => dataset::eval_patches_per_edge(image_size, margin, patch_size)?,
    };
    let windows = dataset::eval_patch_grid(tile, image_size, margin, patch_size, per_edge)?;
    Ok(windows.iter().map(window_to_py).collect())
}
