/*!
Miscellaneous utilities for `stocktrials`
*/

use num::{Float, NumCast};

/// Convert a count to a floating point value
pub fn count_as<F: Float>(n: usize) -> F {
    NumCast::from(n).expect("Floating type F cannot hold a usize count")
}

/// The arithmetic mean of an iterator of values, or `None` if it is empty
pub fn mean<F, I>(values: I) -> Option<F>
where
    F: Float,
    I: IntoIterator<Item = F>,
{
    let mut sum = F::zero();
    let mut n = 0;
    for value in values {
        sum = sum + value;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some(sum / count_as(n))
    }
}

/// The number of leading items selected by a fraction of `total`, rounded down and clamped to `[0, total]`
pub fn fraction_of(total: usize, fraction: f64) -> usize {
    let fraction = if fraction.is_nan() {
        0.0
    } else {
        fraction.max(0.0).min(1.0)
    };
    ((total as f64 * fraction).floor() as usize).min(total)
}
