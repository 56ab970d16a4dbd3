use ndarray::Array2;
use num_complex::Complex;
use std::fmt;

/// Complex interferogram sample (I + jQ)
pub type IgramSample = Complex<f32>;

/// 2D complex interferogram (rows x cols)
pub type Interferogram = Array2<IgramSample>;

/// 2D real-valued raster (coherence, phase)
pub type RealRaster = Array2<f32>;

/// 2D validity mask, `true` = valid
pub type MaskRaster = Array2<bool>;

/// 2D connected component labels, 0 = background
pub type LabelRaster = Array2<u32>;

/// Raster shape as (rows, cols)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape(pub usize, pub usize);

impl Shape {
    pub fn of<T>(array: &Array2<T>) -> Self {
        let (rows, cols) = array.dim();
        Shape(rows, cols)
    }

    pub fn rows(&self) -> usize {
        self.0
    }

    pub fn cols(&self) -> usize {
        self.1
    }
}

impl From<(usize, usize)> for Shape {
    fn from(dim: (usize, usize)) -> Self {
        Shape(dim.0, dim.1)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// A grid cell addressed by (row, col)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pixel {
    pub row: usize,
    pub col: usize,
}

impl Pixel {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Pixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Orientation of an arc between two 4-adjacent pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// (row, col) -> (row, col + 1)
    Horizontal,
    /// (row, col) -> (row + 1, col)
    Vertical,
}

/// Error types for phase unwrapping
#[derive(Debug, thiserror::Error)]
pub enum UnwrapError {
    #[error("shape mismatch: {name} and {reference} must have the same shape, instead got {name}.shape={shape} and {reference}.shape={reference_shape}")]
    ShapeMismatch {
        name: &'static str,
        shape: Shape,
        reference: &'static str,
        reference_shape: Shape,
    },

    #[error("{name} must be a {expected} array, instead got dtype={dtype}")]
    InvalidDtype {
        name: &'static str,
        expected: &'static str,
        dtype: String,
    },

    #[error("{name} must be {constraint}, instead got {value}")]
    InvalidValue {
        name: &'static str,
        constraint: &'static str,
        value: String,
    },

    #[error("{what} must be in {{{allowed}}}, instead got '{got}'")]
    InvalidOption {
        what: &'static str,
        allowed: String,
        got: String,
    },

    #[error("Processing error: {0}")]
    Processing(String),
}

impl UnwrapError {
    /// Shape check between a named raster and the reference raster
    pub fn check_shape(
        name: &'static str,
        shape: Shape,
        reference: &'static str,
        reference_shape: Shape,
    ) -> UnwrapResult<()> {
        if shape != reference_shape {
            return Err(UnwrapError::ShapeMismatch {
                name,
                shape,
                reference,
                reference_shape,
            });
        }
        Ok(())
    }

    /// Rejection of a string option, listing the allowed values sorted and quoted
    pub fn invalid_option(what: &'static str, allowed: &[&str], got: &str) -> Self {
        let mut allowed = allowed.to_vec();
        allowed.sort_unstable();
        let allowed = allowed
            .iter()
            .map(|name| format!("'{}'", name))
            .collect::<Vec<_>>()
            .join(", ");
        UnwrapError::InvalidOption {
            what,
            allowed,
            got: got.to_string(),
        }
    }
}

/// Result type for unwrapping operations
pub type UnwrapResult<T> = Result<T, UnwrapError>;
