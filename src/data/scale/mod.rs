/*!
Input data scaling
*/
use crate::CpuFloat;
use num::Float;

/// A scaler mapping the range of the data it was fitted on onto `[0, 1]`
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MinMaxScaler<F = CpuFloat> {
    /// The smallest value seen while fitting
    pub min: F,
    /// The largest value seen while fitting
    pub max: F,
}

impl<F> MinMaxScaler<F>
where
    F: Copy + Float,
{
    /// Fit a scaler to the finite values of a series.
    ///
    /// Returns `None` if the series has no finite values.
    pub fn fit(series: &[F]) -> Option<MinMaxScaler<F>> {
        let mut finite = series.iter().copied().filter(|val| val.is_finite());
        let first = finite.next()?;
        let (min, max) = finite.fold((first, first), |(min, max), val| {
            (min.min(val), max.max(val))
        });
        Some(MinMaxScaler { min, max })
    }
    /// The width of the fitted range
    #[inline]
    pub fn range(&self) -> F {
        self.max - self.min
    }
    /// Scale a value. A degenerate (zero-width) range maps everything to zero
    #[inline]
    pub fn scale(&self, val: F) -> F {
        let range = self.range();
        if range == F::zero() {
            return F::zero();
        }
        (val - self.min) / range
    }
    /// Undo scaling on a value
    #[inline]
    pub fn unscale(&self, val: F) -> F {
        val * self.range() + self.min
    }
    /// Scale an entire series
    pub fn transform(&self, series: &[F]) -> Vec<F> {
        series.iter().map(|val| self.scale(*val)).collect()
    }
    /// Undo scaling on an entire series
    pub fn inverse_transform(&self, series: &[F]) -> Vec<F> {
        series.iter().map(|val| self.unscale(*val)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_roundtrip() {
        let series = [40.0, 42.5, 39.0, 45.0];
        let scaler = MinMaxScaler::fit(&series).unwrap();
        assert_eq!(scaler.min, 39.0);
        assert_eq!(scaler.max, 45.0);
        let scaled = scaler.transform(&series);
        assert_eq!(scaled[2], 0.0);
        assert_eq!(scaled[3], 1.0);
        for (orig, back) in series.iter().zip(scaler.inverse_transform(&scaled)) {
            assert!((orig - back).abs() < 1e-12);
        }
    }

    #[test]
    fn constant_series_scales_to_zero() {
        let scaler = MinMaxScaler::fit(&[3.0f32, 3.0, 3.0]).unwrap();
        assert_eq!(scaler.transform(&[3.0, 4.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn nothing_to_fit() {
        assert_eq!(MinMaxScaler::<f64>::fit(&[]), None);
        assert_eq!(MinMaxScaler::fit(&[f64::NAN]), None);
    }

    #[test]
    fn out_of_range_values_are_not_clipped() {
        let scaler = MinMaxScaler::fit(&[0.0, 10.0]).unwrap();
        assert_eq!(scaler.scale(20.0), 2.0);
        assert_eq!(scaler.scale(-10.0), -1.0);
    }
}
