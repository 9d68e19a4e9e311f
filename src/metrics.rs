/*!
Per-epoch training metrics: computation, persistence and aggregation across workers
*/
use crate::config::LengthPolicy;
use crate::error::TrialError;
use crate::util::{count_as, mean};
use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::warn;

/// The metrics recorded at the end of a training epoch
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Mean squared error on the training set
    pub loss: f64,
    /// Mean squared error on the validation set
    pub val_loss: f64,
    /// Mean absolute error on the training set
    pub error: f64,
    /// Mean absolute error on the validation set
    pub val_error: f64,
}

/// One worker's metrics, one row per completed epoch
pub type MetricsTable = Vec<EpochMetrics>;

/// Accumulates squared and absolute errors over a sequence of batches
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct ErrorAccumulator {
    squared: f64,
    absolute: f64,
    n: usize,
}

impl ErrorAccumulator {
    /// Record a prediction and its target
    #[inline]
    pub fn push(&mut self, prediction: f64, target: f64) {
        let diff = prediction - target;
        self.squared += diff * diff;
        self.absolute += diff.abs();
        self.n += 1;
    }
    /// Record a batch of summed errors
    #[inline]
    pub fn push_sums(&mut self, squared: f64, absolute: f64, n: usize) {
        self.squared += squared;
        self.absolute += absolute;
        self.n += n;
    }
    /// The mean squared error so far
    pub fn mse(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.squared / count_as::<f64>(self.n)
        }
    }
    /// The mean absolute error so far
    pub fn mae(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.absolute / count_as::<f64>(self.n)
        }
    }
}

/// Write a metrics table to a Writer.
/// On success, return how many epochs were written
pub fn write_table<W: Write>(wtr: W, table: &[EpochMetrics]) -> Result<usize, csv::Error> {
    let mut wtr = csv::Writer::from_writer(wtr);
    for row in table {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(table.len())
}

/// Read a metrics table from a Reader
pub fn read_table<R: Read>(rdr: R) -> Result<MetricsTable, csv::Error> {
    csv::Reader::from_reader(rdr).into_deserialize().collect()
}

/// Write a metrics table to a file
pub fn save_table(path: &Path, table: &[EpochMetrics]) -> Result<(), TrialError> {
    let file = File::create(path).map_err(|err| TrialError::io(path, err))?;
    write_table(file, table)?;
    Ok(())
}

/// Read the metrics table persisted by a worker
pub fn load_worker_table(path: &Path, worker: usize) -> Result<MetricsTable, TrialError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(TrialError::WorkerResultMissing {
                worker,
                path: path.to_path_buf(),
            })
        }
        Err(err) => return Err(TrialError::io(path, err)),
    };
    Ok(read_table(file)?)
}

/// Average a set of metrics tables epoch by epoch.
///
/// Tables of unequal length are handled according to `policy`.
pub fn aggregate(tables: &[MetricsTable], policy: LengthPolicy) -> Result<MetricsTable, TrialError> {
    let epochs = match tables.iter().map(|table| table.len()).minmax() {
        MinMaxResult::NoElements => return Err(TrialError::NoResults),
        MinMaxResult::OneElement(len) => len,
        MinMaxResult::MinMax(shortest, longest) if shortest == longest => shortest,
        MinMaxResult::MinMax(shortest, longest) => match policy {
            LengthPolicy::FailFast => return Err(TrialError::LengthMismatch { shortest, longest }),
            LengthPolicy::Truncate => {
                warn!(shortest, longest, "Truncating metric tables to the shortest");
                shortest
            }
        },
    };
    let column = |epoch: usize, field: fn(&EpochMetrics) -> f64| {
        mean(tables.iter().map(|table| field(&table[epoch]))).unwrap_or(0.0)
    };
    Ok((0..epochs)
        .map(|epoch| EpochMetrics {
            loss: column(epoch, |m| m.loss),
            val_loss: column(epoch, |m| m.val_loss),
            error: column(epoch, |m| m.error),
            val_error: column(epoch, |m| m.val_error),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(loss: f64, val_loss: f64, error: f64, val_error: f64) -> EpochMetrics {
        EpochMetrics {
            loss,
            val_loss,
            error,
            val_error,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn losses_average_across_workers() {
        let tables = vec![
            vec![row(0.2, 1.0, 0.1, 2.0), row(0.1, 0.5, 0.05, 1.0)],
            vec![row(0.4, 3.0, 0.3, 4.0), row(0.3, 1.5, 0.15, 2.0)],
        ];
        let mean = aggregate(&tables, LengthPolicy::FailFast).unwrap();
        assert_eq!(mean.len(), 2);
        assert!(close(mean[0].loss, 0.3));
        assert!(close(mean[0].val_loss, 2.0));
        assert!(close(mean[0].error, 0.2));
        assert!(close(mean[0].val_error, 3.0));
        assert!(close(mean[1].loss, 0.2));
        assert!(close(mean[1].val_error, 1.5));
    }

    #[test]
    fn single_worker_is_its_own_mean() {
        let table = vec![row(1.0, 2.0, 3.0, 4.0)];
        assert_eq!(
            aggregate(&[table.clone()], LengthPolicy::FailFast).unwrap(),
            table
        );
    }

    #[test]
    fn nothing_to_aggregate() {
        match aggregate(&[], LengthPolicy::Truncate) {
            Err(TrialError::NoResults) => {}
            other => panic!("Expected no results, got {:?}", other),
        }
    }

    #[test]
    fn length_mismatch_policies() {
        let tables = vec![
            vec![row(1.0, 1.0, 1.0, 1.0); 3],
            vec![row(3.0, 3.0, 3.0, 3.0); 2],
        ];
        match aggregate(&tables, LengthPolicy::FailFast) {
            Err(TrialError::LengthMismatch { shortest, longest }) => {
                assert_eq!((shortest, longest), (2, 3))
            }
            other => panic!("Expected length mismatch, got {:?}", other),
        }
        let mean = aggregate(&tables, LengthPolicy::Truncate).unwrap();
        assert_eq!(mean, vec![row(2.0, 2.0, 2.0, 2.0); 2]);
    }

    #[test]
    fn errors() {
        let predictions = [1.0, 2.0, 3.0];
        let targets = [1.0, 4.0, 2.0];
        let mut acc = ErrorAccumulator::default();
        for (p, t) in predictions.iter().zip(targets.iter()) {
            acc.push(*p, *t);
        }
        assert!(close(acc.mse(), 5.0 / 3.0));
        assert!(close(acc.mae(), 1.0));
        assert_eq!(ErrorAccumulator::default().mse(), 0.0);

        let mut batched = ErrorAccumulator::default();
        batched.push_sums(4.0, 2.0, 2);
        batched.push(2.0, 1.0);
        assert_eq!(batched, acc);
    }

    #[test]
    fn tables_survive_csv() {
        let table = vec![row(0.5, 0.25, 0.125, 1.5), row(0.25, 0.125, 0.0625, 0.75)];
        let mut buf = Vec::new();
        assert_eq!(write_table(&mut buf, &table).unwrap(), 2);
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("loss,val_loss,error,val_error\n"));
        assert_eq!(read_table(&buf[..]).unwrap(), table);
    }
}
