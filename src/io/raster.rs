use crate::core::{CostMode, InitMethod};
use crate::types::{
    Interferogram, LabelRaster, MaskRaster, RealRaster, Shape, UnwrapError, UnwrapResult,
};
use ndarray::Array2;
use num_complex::Complex;
use num_traits::ToPrimitive;

/// A raster as handed over by a caller that does not know its element type
/// statically (e.g. a numpy array). Dtype names follow numpy.
#[derive(Debug, Clone)]
pub enum RasterData {
    Float32(Array2<f32>),
    Float64(Array2<f64>),
    Complex64(Array2<Complex<f32>>),
    Complex128(Array2<Complex<f64>>),
    /// Any other element type; only its name and shape are known
    Other { dtype: String, shape: Shape },
}

impl RasterData {
    pub fn dtype(&self) -> &str {
        match self {
            RasterData::Float32(_) => "float32",
            RasterData::Float64(_) => "float64",
            RasterData::Complex64(_) => "complex64",
            RasterData::Complex128(_) => "complex128",
            RasterData::Other { dtype, .. } => dtype,
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            RasterData::Float32(a) => Shape::of(a),
            RasterData::Float64(a) => Shape::of(a),
            RasterData::Complex64(a) => Shape::of(a),
            RasterData::Complex128(a) => Shape::of(a),
            RasterData::Other { shape, .. } => *shape,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, RasterData::Complex64(_) | RasterData::Complex128(_))
    }

    fn into_interferogram(self, name: &'static str) -> UnwrapResult<Interferogram> {
        match self {
            RasterData::Complex64(a) => Ok(a),
            RasterData::Complex128(a) => Ok(a.mapv(|c| Complex::new(to_f32(c.re), to_f32(c.im)))),
            other => Err(UnwrapError::InvalidDtype {
                name,
                expected: "complex-valued",
                dtype: other.dtype().to_string(),
            }),
        }
    }

    fn into_real(self, name: &'static str) -> UnwrapResult<RealRaster> {
        match self {
            RasterData::Float32(a) => Ok(a),
            RasterData::Float64(a) => Ok(a.mapv(to_f32)),
            other => Err(UnwrapError::InvalidDtype {
                name,
                expected: "real-valued",
                dtype: other.dtype().to_string(),
            }),
        }
    }
}

#[inline]
fn to_f32<T: ToPrimitive>(value: T) -> f32 {
    value.to_f32().unwrap_or(f32::NAN)
}

impl From<Array2<f32>> for RasterData {
    fn from(a: Array2<f32>) -> Self {
        RasterData::Float32(a)
    }
}

impl From<Array2<f64>> for RasterData {
    fn from(a: Array2<f64>) -> Self {
        RasterData::Float64(a)
    }
}

impl From<Array2<Complex<f32>>> for RasterData {
    fn from(a: Array2<Complex<f32>>) -> Self {
        RasterData::Complex64(a)
    }
}

impl From<Array2<Complex<f64>>> for RasterData {
    fn from(a: Array2<Complex<f64>>) -> Self {
        RasterData::Complex128(a)
    }
}

/// Validate loosely typed inputs, then unwrap
///
/// Checks run in a fixed order so callers see the first problem: shape of
/// `corr`, dtype of `igram`, dtype of `corr`, `nlooks`, cost mode, init
/// method, shape of `mask`.
pub fn unwrap_rasters(
    igram: RasterData,
    corr: RasterData,
    nlooks: f64,
    mask: Option<&MaskRaster>,
    cost: &str,
    init: &str,
) -> UnwrapResult<(RealRaster, LabelRaster)> {
    UnwrapError::check_shape("corr", corr.shape(), "igram", igram.shape())?;
    let shape = igram.shape();
    let igram = igram.into_interferogram("igram")?;
    let corr = corr.into_real("corr")?;

    if !(nlooks >= 1.0) {
        return Err(UnwrapError::InvalidValue {
            name: "nlooks",
            constraint: ">= 1",
            value: format!("{}", nlooks),
        });
    }

    let cost: CostMode = cost.parse()?;
    let init: InitMethod = init.parse()?;
    if let Some(mask) = mask {
        UnwrapError::check_shape("mask", Shape::of(mask), "igram", shape)?;
    }

    crate::unwrap::unwrap(&igram, &corr, nlooks, mask, cost, init)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_names() {
        let real: RasterData = Array2::<f64>::zeros((2, 3)).into();
        assert_eq!(real.dtype(), "float64");
        assert_eq!(real.shape(), Shape(2, 3));
        assert!(!real.is_complex());

        let other = RasterData::Other {
            dtype: "int16".to_string(),
            shape: Shape(4, 4),
        };
        assert_eq!(other.dtype(), "int16");
    }

    #[test]
    fn test_complex128_narrowed() {
        let data: RasterData = Array2::from_elem((2, 2), Complex::new(0.5f64, -1.5)).into();
        let igram = data.into_interferogram("igram").unwrap();
        assert_eq!(igram[[1, 1]], Complex::new(0.5f32, -1.5));
    }

    #[test]
    fn test_integer_igram_rejected() {
        let igram = RasterData::Other {
            dtype: "int32".to_string(),
            shape: Shape(3, 3),
        };
        let corr: RasterData = Array2::<f32>::zeros((3, 3)).into();
        let err = unwrap_rasters(igram, corr, 1.0, None, "smooth", "mcf").unwrap_err();
        assert_eq!(err.to_string(), "igram must be a complex-valued array, instead got dtype=int32");
    }
}
