//! # Report Descriptor
//!
//! A report describes a data point (`@q` pull response or `#q` push):
//!
//! ```text
//! key;desc;dtype;min;max;units;tolerance_ms;aux_csv[;last_writer;rate_min;rate_max;rate_avg;rate_stdev;sample_count]
//! ```
//!
//! Older servers only send the first eight fields. Missing or empty extended
//! fields fall back to `None` / `0`.

use crate::error::ProtocolError;
use crate::protocol::value::DataType;

const BASE_FIELDS: usize = 8;

/// Write-rate statistics kept by the server per key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RateStats {
    pub last_writer: Option<String>,
    pub rate_min: Option<f64>,
    pub rate_max: Option<f64>,
    pub rate_avg: Option<f64>,
    pub rate_stdev: Option<f64>,
    pub sample_count: u64,
}

/// A decoded report.
///
/// `min`, `max` and `tolerance` stay textual: they are converted by the data
/// point with its own type, and a bad bound only affects that bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub key: String,
    pub desc: String,
    pub dtype: DataType,
    pub min: String,
    pub max: String,
    pub units: String,
    pub tolerance: String,
    pub aux: Vec<String>,
    pub stats: RateStats,
}

impl Report {
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = payload.split(';').collect();
        Self::from_fields(&fields)
    }

    pub fn from_fields(fields: &[&str]) -> Result<Self, ProtocolError> {
        if fields.len() < BASE_FIELDS {
            return Err(ProtocolError::ShortReport {
                found: fields.len(),
                expected: BASE_FIELDS,
            });
        }
        let extra = |i: usize| {
            fields
                .get(BASE_FIELDS + i)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        };
        let float = |i: usize| extra(i).and_then(|s| s.parse::<f64>().ok());

        Ok(Report {
            key: fields[0].to_string(),
            desc: fields[1].to_string(),
            dtype: DataType::from_wire(fields[2])?,
            min: fields[3].to_string(),
            max: fields[4].to_string(),
            units: fields[5].to_string(),
            tolerance: fields[6].to_string(),
            aux: fields[7]
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from)
                .collect(),
            stats: RateStats {
                last_writer: extra(0).map(String::from),
                rate_min: float(1),
                rate_max: float(2),
                rate_avg: float(3),
                rate_stdev: float(4),
                sample_count: extra(5).and_then(|s| s.parse().ok()).unwrap_or(0),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_report_defaults_extended_fields() {
        let rep = Report::parse("AOA;Angle of Attack;float;-180.0;180.0;deg;200;Min,Max,0g").unwrap();
        assert_eq!(rep.key, "AOA");
        assert_eq!(rep.dtype, DataType::Float);
        assert_eq!(rep.aux, vec!["Min", "Max", "0g"]);
        assert_eq!(rep.stats, RateStats::default());
    }

    #[test]
    fn extended_report_fields() {
        let rep = Report::parse("AOA;Angle;float;0;100;deg;200;;writer-1;9.5;10.5;10.0;0.2;42").unwrap();
        assert!(rep.aux.is_empty());
        assert_eq!(rep.stats.last_writer.as_deref(), Some("writer-1"));
        assert_eq!(rep.stats.rate_avg, Some(10.0));
        assert_eq!(rep.stats.sample_count, 42);
    }

    #[test]
    fn empty_extended_fields_never_fail() {
        let rep = Report::parse("AOA;Angle;float;0;100;deg;200;;;;;;;").unwrap();
        assert_eq!(rep.stats.last_writer, None);
        assert_eq!(rep.stats.rate_min, None);
        assert_eq!(rep.stats.sample_count, 0);
    }

    #[test]
    fn short_report_is_rejected() {
        assert!(matches!(
            Report::parse("AOA;Angle;float"),
            Err(ProtocolError::ShortReport { found: 3, .. })
        ));
    }
}
