use crate::types::{Interferogram, MaskRaster, Pixel, RealRaster, Shape, UnwrapError, UnwrapResult};
use ndarray::{Array2, Zip};

/// Per-pixel validity used by every stage of the solver
///
/// A pixel is valid when the caller's mask (if any) marks it valid and both
/// its interferogram sample and its coherence are finite. The mask is fixed
/// once the graph is built.
#[derive(Debug, Clone)]
pub struct ValidityMask {
    valid: Array2<bool>,
    valid_count: usize,
}

impl ValidityMask {
    /// Wrap an existing boolean raster
    pub fn from_raster(valid: MaskRaster) -> Self {
        let valid_count = valid.iter().filter(|&&v| v).count();
        Self { valid, valid_count }
    }

    /// Combine the optional caller mask with finiteness of the inputs
    pub fn from_inputs(
        igram: &Interferogram,
        corr: &RealRaster,
        mask: Option<&MaskRaster>,
    ) -> UnwrapResult<Self> {
        let shape = Shape::of(igram);
        UnwrapError::check_shape("corr", Shape::of(corr), "igram", shape)?;
        if let Some(mask) = mask {
            UnwrapError::check_shape("mask", Shape::of(mask), "igram", shape)?;
        }

        let mut valid = match mask {
            Some(mask) => mask.clone(),
            None => Array2::from_elem(igram.dim(), true),
        };

        let mut non_finite = 0usize;
        Zip::from(&mut valid)
            .and(igram)
            .and(corr)
            .for_each(|v, sample, &gamma| {
                if *v && !(sample.re.is_finite() && sample.im.is_finite() && gamma.is_finite()) {
                    *v = false;
                    non_finite += 1;
                }
            });

        if non_finite > 0 {
            log::warn!("Masking {} pixels with non-finite phase or coherence", non_finite);
        }

        let mask = Self::from_raster(valid);
        log::debug!(
            "Validity mask: {} of {} pixels valid",
            mask.valid_count,
            mask.valid.len()
        );
        Ok(mask)
    }

    #[inline]
    pub fn is_valid(&self, pixel: Pixel) -> bool {
        self.valid[[pixel.row, pixel.col]]
    }

    /// An arc takes part in cost accounting only if both endpoints are valid
    #[inline]
    pub fn is_valid_pair(&self, a: Pixel, b: Pixel) -> bool {
        self.is_valid(a) && self.is_valid(b)
    }

    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    /// Sub-window of the mask, used by the tile solver
    pub fn window(&self, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> Self {
        Self::from_raster(self.valid.slice(ndarray::s![rows, cols]).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IgramSample;

    #[test]
    fn test_no_mask_all_valid() {
        let igram = Array2::from_elem((4, 6), IgramSample::new(1.0, 0.0));
        let corr = Array2::from_elem((4, 6), 0.8f32);
        let mask = ValidityMask::from_inputs(&igram, &corr, None).unwrap();
        assert_eq!(mask.valid_count(), 24);
        assert!(mask.is_valid(Pixel::new(3, 5)));
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let igram = Array2::from_elem((4, 6), IgramSample::new(1.0, 0.0));
        let corr = Array2::from_elem((4, 6), 0.8f32);
        let user_mask = Array2::from_elem((4, 5), true);
        let err = ValidityMask::from_inputs(&igram, &corr, Some(&user_mask)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "shape mismatch: mask and igram must have the same shape, instead got \
             mask.shape=(4, 5) and igram.shape=(4, 6)"
        );
    }

    #[test]
    fn test_non_finite_samples_invalid() {
        let mut igram = Array2::from_elem((3, 3), IgramSample::new(0.0, 1.0));
        let mut corr = Array2::from_elem((3, 3), 1.0f32);
        igram[[0, 1]] = IgramSample::new(f32::NAN, 0.0);
        corr[[2, 2]] = f32::INFINITY;

        let mask = ValidityMask::from_inputs(&igram, &corr, None).unwrap();
        assert_eq!(mask.valid_count(), 7);
        assert!(!mask.is_valid(Pixel::new(0, 1)));
        assert!(!mask.is_valid(Pixel::new(2, 2)));
        assert!(!mask.is_valid_pair(Pixel::new(0, 0), Pixel::new(0, 1)));
        assert!(mask.is_valid_pair(Pixel::new(0, 0), Pixel::new(1, 0)));
    }
}
