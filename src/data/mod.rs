/*!
Data processing and IO functions
*/
use crate::*;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod fake;
pub mod history;
pub mod scale;
pub mod window;

/// A day's closing price for a stock
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct DailyClose<D = NaiveDate, F = CpuFloat> {
    /// The trading day
    pub t: D,
    /// The closing price on that day
    pub c: F,
}

/// Extract the closing prices of a price history, in order
pub fn closes<D, F: Copy>(history: &[DailyClose<D, F>]) -> Vec<F> {
    history.iter().map(|day| day.c).collect()
}

/// Check that a price history is in strictly increasing chronological order.
///
/// On failure, return the index of the first day which does not come after its predecessor.
pub fn check_order<D: PartialOrd, F>(history: &[DailyClose<D, F>]) -> Result<(), usize> {
    match history
        .windows(2)
        .position(|pair| !(pair[0].t < pair[1].t))
    {
        Some(ix) => Err(ix + 1),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32, c: f64) -> DailyClose {
        DailyClose {
            t: NaiveDate::from_ymd_opt(2020, 6, d).unwrap(),
            c,
        }
    }

    #[test]
    fn order_checking() {
        assert_eq!(check_order::<NaiveDate, f64>(&[]), Ok(()));
        assert_eq!(check_order(&[day(1, 1.0), day(2, 2.0), day(5, 3.0)]), Ok(()));
        assert_eq!(check_order(&[day(1, 1.0), day(3, 2.0), day(2, 3.0)]), Err(2));
        assert_eq!(check_order(&[day(1, 1.0), day(1, 2.0)]), Err(1));
    }

    #[test]
    fn closes_preserve_order() {
        assert_eq!(closes(&[day(1, 4.0), day(2, 5.0)]), vec![4.0, 5.0]);
    }
}
