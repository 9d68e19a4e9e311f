/*!
Generate fake daily price data, for testing purposes
*/
use super::DailyClose;
use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, NormalError};

/// A trait implemented by price generators
pub trait PriceGen {
    /// Generate the next day's closing price
    fn next_price(&mut self) -> f64;
}

/// Generate fake prices using a geometric random walk: each day's log return is normally distributed
#[derive(Debug, Copy, Clone)]
pub struct PriceRandomWalk<R> {
    /// The RNG used by this random walk
    pub rng: R,
    /// The last generated price
    pub price: f64,
    /// The distribution of daily log returns
    pub returns: Normal<f64>,
}

impl PriceRandomWalk<StdRng> {
    /// A seeded random walk starting at `price`, with a given daily drift and volatility
    pub fn seeded(
        seed: u64,
        price: f64,
        drift: f64,
        volatility: f64,
    ) -> Result<PriceRandomWalk<StdRng>, NormalError> {
        Ok(PriceRandomWalk {
            rng: StdRng::seed_from_u64(seed),
            price,
            returns: Normal::new(drift, volatility)?,
        })
    }
}

impl<R: Rng> PriceGen for PriceRandomWalk<R> {
    fn next_price(&mut self) -> f64 {
        let ret = self.returns.sample(&mut self.rng);
        self.price *= ret.exp();
        self.price
    }
}

/// Iterate over weekdays starting from a given date, inclusive
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TradingDays(pub NaiveDate);

impl Iterator for TradingDays {
    type Item = NaiveDate;
    fn next(&mut self) -> Option<NaiveDate> {
        while let Weekday::Sat | Weekday::Sun = self.0.weekday() {
            self.0 = self.0.succ_opt()?;
        }
        let day = self.0;
        self.0 = self.0.succ_opt()?;
        Some(day)
    }
}

/// Generate daily closes by pairing trading days with a price generator
#[derive(Debug, Clone)]
pub struct HistoryGen<P> {
    /// The day generator in use
    pub days: TradingDays,
    /// The price generator in use
    pub prices: P,
}

impl<P: PriceGen> Iterator for HistoryGen<P> {
    type Item = DailyClose;
    fn next(&mut self) -> Option<DailyClose> {
        let t = self.days.next()?;
        Some(DailyClose {
            t,
            c: self.prices.next_price(),
        })
    }
}
