//! snaphu: statistical-cost network-flow phase unwrapping
//!
//! Recovers absolute phase from a wrapped interferogram and its coherence.
//! Per-arc costs derived from coherence and the number of looks define a
//! nonlinear minimum-cost flow problem on the dual of the pixel grid; a fast
//! initializer (spanning tree or linearized min-cost flow) produces a
//! feasible integer flow, which a negative-cycle canceling optimizer then
//! improves until no cheaper flow exists.

pub mod types;
pub mod io;
pub mod core;
pub mod unwrap;

// Re-export main types and functions for easier access
pub use types::{
    Interferogram, IgramSample, LabelRaster, MaskRaster, Pixel, RealRaster, Shape,
    UnwrapError, UnwrapResult,
};

pub use crate::core::{
    ConnCompParams, CostMode, CostParams, InitMethod, SolverParams, TileParams,
};
pub use io::{unwrap_rasters, RasterData};
pub use unwrap::{unwrap, SolverStats, UnwrapConfig, UnwrapOutput, Unwrapper};

#[cfg(feature = "python")]
mod python {
    use crate::io::{unwrap_rasters, RasterData};
    use crate::types::{Shape, UnwrapError};
    use numpy::{Complex32, Complex64, PyArray2, PyReadonlyArray2, PyUntypedArray, ToPyArray};
    use pyo3::exceptions::{PyTypeError, PyValueError};
    use pyo3::prelude::*;

    fn to_py_err(err: UnwrapError) -> PyErr {
        match err {
            UnwrapError::InvalidDtype { .. } => PyTypeError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }

    /// Copy a 2-D numpy array into a dtype-tagged raster
    fn extract_raster(obj: &PyAny) -> PyResult<RasterData> {
        if let Ok(a) = obj.extract::<PyReadonlyArray2<f32>>() {
            return Ok(RasterData::Float32(a.as_array().to_owned()));
        }
        if let Ok(a) = obj.extract::<PyReadonlyArray2<f64>>() {
            return Ok(RasterData::Float64(a.as_array().to_owned()));
        }
        if let Ok(a) = obj.extract::<PyReadonlyArray2<Complex32>>() {
            return Ok(RasterData::Complex64(a.as_array().to_owned()));
        }
        if let Ok(a) = obj.extract::<PyReadonlyArray2<Complex64>>() {
            return Ok(RasterData::Complex128(a.as_array().to_owned()));
        }

        let untyped: &PyUntypedArray = obj.downcast()?;
        let shape = untyped.shape();
        if shape.len() != 2 {
            return Err(PyValueError::new_err(format!(
                "expected a 2-D array, instead got ndim={}",
                shape.len()
            )));
        }
        let dtype = untyped.dtype().str()?.to_str()?.to_owned();
        Ok(RasterData::Other {
            dtype,
            shape: Shape(shape[0], shape[1]),
        })
    }

    /// Unwrap an interferogram; returns (unwrapped phase, component labels)
    #[pyfunction]
    #[pyo3(name = "unwrap", signature = (igram, corr, nlooks, mask=None, cost="smooth", init="mcf"))]
    fn py_unwrap<'py>(
        py: Python<'py>,
        igram: &PyAny,
        corr: &PyAny,
        nlooks: f64,
        mask: Option<PyReadonlyArray2<bool>>,
        cost: &str,
        init: &str,
    ) -> PyResult<(&'py PyArray2<f32>, &'py PyArray2<u32>)> {
        let igram = extract_raster(igram)?;
        let corr = extract_raster(corr)?;
        let mask = mask.map(|m| m.as_array().to_owned());

        let (unwrapped, labels) = py
            .allow_threads(|| unwrap_rasters(igram, corr, nlooks, mask.as_ref(), cost, init))
            .map_err(to_py_err)?;
        Ok((unwrapped.to_pyarray(py), labels.to_pyarray(py)))
    }

    /// Python module definition
    #[pymodule]
    fn _snaphu(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(py_unwrap, m)?)?;
        Ok(())
    }
}
