/*!
Daily price history in CSV form.

Histories exported by market data services differ in how they name their columns, so the date and closing
price columns are located by header name. Rows whose date or price cannot be parsed are skipped.
*/
use super::{check_order, DailyClose};
use crate::error::TrialError;
use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// The default date format
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// The polygon DateTime format, accepted as a fallback for date columns
pub const POLYGON_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Accepted names for the date column, in order of preference
pub const DATE_COLUMNS: &[&str] = &["t", "date", "timestamp"];

/// Accepted names for the closing price column, in order of preference
pub const CLOSE_COLUMNS: &[&str] = &["c", "close", "adj close"];

/// Find the first of a set of column names present in a header row, ignoring case
pub fn find_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    names.iter().find_map(|name| {
        headers
            .iter()
            .position(|header| header.trim().eq_ignore_ascii_case(name))
    })
}

fn parse_date(field: &str, date_format: &str) -> Option<NaiveDate> {
    let field = field.trim();
    NaiveDate::parse_from_str(field, date_format)
        .or_else(|_| NaiveDateTime::parse_from_str(field, POLYGON_DATETIME).map(|dt| dt.date()))
        .ok()
}

/// Read a daily price history from a Reader.
///
/// The history must be in strictly increasing date order.
pub fn read_closes<R: Read>(rdr: R, date_format: Option<&str>) -> Result<Vec<DailyClose>, TrialError> {
    let date_format = date_format.unwrap_or(DATE_FORMAT);
    let mut rdr = csv::Reader::from_reader(rdr);
    let headers = rdr.headers()?.clone();
    let date_ix = find_column(&headers, DATE_COLUMNS)
        .ok_or_else(|| TrialError::MissingColumn("date".into()))?;
    let close_ix = find_column(&headers, CLOSE_COLUMNS)
        .ok_or_else(|| TrialError::MissingColumn("close".into()))?;

    let mut history = Vec::new();
    let mut skipped = 0;
    for record in rdr.records() {
        let record = record?;
        let t = record
            .get(date_ix)
            .and_then(|field| parse_date(field, date_format));
        let c = record
            .get(close_ix)
            .and_then(|field| f64::from_str(field.trim()).ok())
            .filter(|c| c.is_finite());
        match (t, c) {
            (Some(t), Some(c)) => history.push(DailyClose { t, c }),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "Skipped unparseable rows in price history");
    }
    check_order(&history).map_err(|index| TrialError::UnorderedSeries { index })?;
    debug!(days = history.len(), "Read price history");
    Ok(history)
}

/// Read a daily price history from a file
pub fn load_closes(path: &Path, date_format: Option<&str>) -> Result<Vec<DailyClose>, TrialError> {
    let file = File::open(path).map_err(|err| TrialError::io(path, err))?;
    read_closes(file, date_format)
}

/// Write a daily price history to a Writer, with columns `t,c`.
/// On success, return how many days were written
pub fn write_closes<W, I>(wtr: W, history: I) -> Result<usize, csv::Error>
where
    W: Write,
    I: Iterator<Item = DailyClose>,
{
    let mut wtr = csv::Writer::from_writer(wtr);
    let mut written = 0;
    for day in history {
        wtr.serialize(day)?;
        written += 1;
    }
    wtr.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yahoo_style_columns() {
        let input = "Date,Open,High,Low,Close,Adj Close,Volume\n\
                     2020-06-01,10,11,9,10.5,10.4,100\n\
                     2020-06-02,10.5,12,10,11.5,11.4,200\n";
        let history = read_closes(input.as_bytes(), None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].t, NaiveDate::from_ymd_opt(2020, 6, 1).unwrap());
        assert_eq!(history[0].c, 10.5);
        assert_eq!(history[1].c, 11.5);
    }

    #[test]
    fn polygon_style_columns() {
        let input = "t,v,vw,o,c,h,l,n\n\
                     2020-06-22 00:00:00,300,39.5,40,40.5,41,39,2\n\
                     2020-06-23 00:00:00,500,40.25,40.5,40,41.5,38,4\n";
        let history = read_closes(input.as_bytes(), None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].t, NaiveDate::from_ymd_opt(2020, 6, 23).unwrap());
        assert_eq!(history[1].c, 40.0);
    }

    #[test]
    fn bad_rows_are_skipped() {
        let input = "date,close\n2020-06-01,1\nnot a date,2\n2020-06-03,NaN\n2020-06-04,4\n";
        let history = read_closes(input.as_bytes(), None).unwrap();
        assert_eq!(history.iter().map(|d| d.c).collect::<Vec<_>>(), vec![1.0, 4.0]);
    }

    #[test]
    fn missing_close_column() {
        let input = "date,open\n2020-06-01,1\n";
        match read_closes(input.as_bytes(), None) {
            Err(TrialError::MissingColumn(column)) => assert_eq!(column, "close"),
            other => panic!("Expected missing column, got {:?}", other),
        }
    }

    #[test]
    fn unordered_history_is_rejected() {
        let input = "date,close\n2020-06-02,1\n2020-06-01,2\n";
        match read_closes(input.as_bytes(), None) {
            Err(TrialError::UnorderedSeries { index }) => assert_eq!(index, 1),
            other => panic!("Expected unordered series, got {:?}", other),
        }
    }

    #[test]
    fn custom_date_format() {
        let input = "date,close\n06/01/2020,1\n06/02/2020,2\n";
        let history = read_closes(input.as_bytes(), Some("%m/%d/%Y")).unwrap();
        assert_eq!(history.len(), 2);
    }
}
