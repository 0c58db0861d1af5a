//! Road-graph label generation for satellite patch training: spatial indexing over a
//! subdivided road graph, NMS point resampling, bounded connectivity labels and the
//! rotation-consistent point transform. Python bindings are behind the `python` feature.

#[cfg(feature = "python")]
use pyo3::prelude::*;

// Module imports (alphabetical for clarity)
pub mod common;
pub mod config;
pub mod dataset;
pub mod graph;
pub mod index;
#[cfg(feature = "python")]
mod python;
pub mod reachability;
pub mod sampler;
pub mod spatial;

pub use common::{LabelError, Result};
pub use config::{IndexConfig, SampleConfig};
pub use dataset::{LabelBatch, LabelGenerator, PatchRequest, PatchWindow, TilePartition};
pub use graph::{GraphDescription, RoadGraph};
pub use index::GraphIndex;
pub use sampler::{LabelSample, Patch, TopoSample};

/// Road-graph label generation exposed to Python.
#[cfg(feature = "python")]
#[pymodule]
fn roadgraph_labels(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    register_sampler_module(py_module)?;
    register_dataset_module(py_module)?;

    py_module.add(
        "__doc__",
        "Road-graph label generation for satellite patch training, implemented in Rust.",
    )?;

    Ok(())
}

/// Registers the single-tile label generator.
#[cfg(feature = "python")]
fn register_sampler_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "sampler")?;
    submodule.add(
        "__doc__",
        "Point and connectivity labels for patches of one tile's road graph.",
    )?;
    submodule.add_class::<python::GraphLabelGenerator>()?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}

/// Registers dataset splits, patch windows and batch generation.
#[cfg(feature = "python")]
fn register_dataset_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let submodule = PyModule::new(py_module.py(), "dataset")?;
    submodule.add(
        "__doc__",
        "Tile splits, evaluation windows and batched label generation.",
    )?;
    submodule.add_class::<python::TileLabelDataset>()?;
    submodule.add_function(wrap_pyfunction!(python::cityscale_partition, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(python::eval_patch_grid, &submodule)?)?;
    submodule.add("IMAGE_SIZE", dataset::IMAGE_SIZE)?;
    submodule.add("SAMPLE_MARGIN", dataset::SAMPLE_MARGIN)?;
    py_module.add_submodule(&submodule)?;
    Ok(())
}
