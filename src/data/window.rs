/*!
Sliding windows over a price series.

A series of length `S` with window length `L` yields exactly `S - L` examples: the `i`th input is
`series[i..i + L]` and its target is `series[i + L]`. Shorter series yield nothing.
*/
use crate::util::fraction_of;
use crate::CpuFloat;

/// Iterate over the `(window, target)` pairs of a series, in order.
///
/// Empty if `series.len() <= len`.
pub fn sliding_windows<F: Copy>(series: &[F], len: usize) -> impl Iterator<Item = (&[F], F)> + '_ {
    series.windows(len.saturating_add(1)).map(move |w| (&w[..len], w[len]))
}

/// The number of windows of length `len` in a series of length `series_len`
#[inline]
pub fn window_count(series_len: usize, len: usize) -> usize {
    series_len.saturating_sub(len)
}

/// An owned set of windows and their targets
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset<F = CpuFloat> {
    window_len: usize,
    /// Windows laid out back to back, `window_len` values each
    inputs: Vec<F>,
    targets: Vec<F>,
}

impl<F: Copy> Dataset<F> {
    /// An empty dataset of a given window length
    pub fn empty(window_len: usize) -> Dataset<F> {
        Dataset {
            window_len,
            inputs: Vec::new(),
            targets: Vec::new(),
        }
    }
    /// Build a dataset containing every window of a series
    pub fn from_series(series: &[F], window_len: usize) -> Dataset<F> {
        let count = window_count(series.len(), window_len);
        let mut inputs = Vec::with_capacity(count * window_len);
        let mut targets = Vec::with_capacity(count);
        for (window, target) in sliding_windows(series, window_len) {
            inputs.extend_from_slice(window);
            targets.push(target);
        }
        Dataset {
            window_len,
            inputs,
            targets,
        }
    }
    /// The length of each window
    #[inline]
    pub fn window_len(&self) -> usize {
        self.window_len
    }
    /// The number of windows
    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }
    /// Whether there are no windows
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
    /// Get the `i`th window and its target
    pub fn get(&self, i: usize) -> Option<(&[F], F)> {
        let target = *self.targets.get(i)?;
        let start = i * self.window_len;
        Some((&self.inputs[start..start + self.window_len], target))
    }
    /// All targets, in order
    #[inline]
    pub fn targets(&self) -> &[F] {
        &self.targets
    }
    /// Iterate over windows and targets, in order
    pub fn iter(&self) -> impl Iterator<Item = (&[F], F)> + '_ {
        let window_len = self.window_len;
        (0..self.len()).map(move |i| {
            let start = i * window_len;
            (&self.inputs[start..start + window_len], self.targets[i])
        })
    }
    /// Split at window `at` into a prefix and a suffix, clamping `at` to the dataset length
    pub fn split_at(&self, at: usize) -> (Dataset<F>, Dataset<F>) {
        let at = at.min(self.len());
        let cut = at * self.window_len;
        let head = Dataset {
            window_len: self.window_len,
            inputs: self.inputs[..cut].to_vec(),
            targets: self.targets[..at].to_vec(),
        };
        let tail = Dataset {
            window_len: self.window_len,
            inputs: self.inputs[cut..].to_vec(),
            targets: self.targets[at..].to_vec(),
        };
        (head, tail)
    }
    /// Split into a training prefix of `floor(fraction * len)` windows and a validation suffix of the rest
    pub fn split(&self, fraction: f64) -> (Dataset<F>, Dataset<F>) {
        self.split_at(fraction_of(self.len(), fraction))
    }
    /// Gather the windows at a set of indices into a flat input buffer and a target buffer.
    ///
    /// Indices out of range are ignored.
    pub fn gather(&self, indices: &[usize], inputs: &mut Vec<F>, targets: &mut Vec<F>) {
        inputs.clear();
        targets.clear();
        for &i in indices {
            if let Some((window, target)) = self.get(i) {
                inputs.extend_from_slice(window);
                targets.push(target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seven_days_window_three() {
        let series = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let data = Dataset::from_series(&series, 3);
        assert_eq!(data.len(), 4);
        let windows: Vec<Vec<f64>> = data.iter().map(|(w, _)| w.to_vec()).collect();
        assert_eq!(
            windows,
            vec![
                vec![1.0, 2.0, 3.0],
                vec![2.0, 3.0, 4.0],
                vec![3.0, 4.0, 5.0],
                vec![4.0, 5.0, 6.0]
            ]
        );
        assert_eq!(data.targets(), &[4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn window_counts_and_targets() {
        let series: Vec<f64> = (0..50).map(|i| (i * i) as f64).collect();
        for len in 1..50 {
            let data = Dataset::from_series(&series, len);
            assert_eq!(data.len(), series.len() - len);
            for (i, (window, target)) in data.iter().enumerate() {
                assert_eq!(window.len(), len);
                assert_eq!(window, &series[i..i + len]);
                assert_eq!(target, series[i + len]);
            }
        }
    }

    #[test]
    fn short_series_yield_nothing() {
        let series = [1.0, 2.0, 3.0];
        assert_eq!(sliding_windows(&series, 3).count(), 0);
        assert_eq!(sliding_windows(&series, 10).count(), 0);
        assert!(Dataset::from_series(&series, 3).is_empty());
        assert!(Dataset::<f64>::from_series(&[], 1).is_empty());
        assert_eq!(window_count(3, 10), 0);
    }

    #[test]
    fn consecutive_windows_advance_by_one() {
        let series: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let windows: Vec<_> = sliding_windows(&series, 5).collect();
        for pair in windows.windows(2) {
            assert_eq!(pair[1].0[0], pair[0].0[0] + 1.0);
            assert_eq!(pair[1].1, pair[0].1 + 1.0);
        }
    }

    #[test]
    fn split_preserves_order_and_counts() {
        let series: Vec<f64> = (0..23).map(|i| i as f64).collect();
        let data = Dataset::from_series(&series, 3);
        assert_eq!(data.len(), 20);
        let (train, val) = data.split(0.8);
        assert_eq!(train.len(), 16);
        assert_eq!(val.len(), 4);
        assert_eq!(train.len() + val.len(), data.len());
        assert_eq!(train.targets(), &data.targets()[..16]);
        assert_eq!(val.targets(), &data.targets()[16..]);
        assert_eq!(val.get(0), data.get(16));

        let (train, val) = data.split(0.33);
        assert_eq!(train.len(), 6);
        assert_eq!(val.len(), 14);
    }

    #[test]
    fn split_of_empty_dataset() {
        let (train, val) = Dataset::<f64>::empty(4).split(0.8);
        assert!(train.is_empty());
        assert!(val.is_empty());
        assert_eq!(train.window_len(), 4);
    }

    #[test]
    fn gather_batches() {
        let data = Dataset::from_series(&[1.0, 2.0, 3.0, 4.0, 5.0], 2);
        let mut inputs = Vec::new();
        let mut targets = Vec::new();
        data.gather(&[2, 0, 7], &mut inputs, &mut targets);
        assert_eq!(inputs, vec![3.0, 4.0, 1.0, 2.0]);
        assert_eq!(targets, vec![5.0, 3.0]);
    }
}
