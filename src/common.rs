use std::collections::BTreeMap;
use std::io;
use std::ops::Index;
use std::path::PathBuf;

use thiserror::Error;

/// Stratum 0 (everyone not captured) plus the 32 ESI strata.
pub const STRATUM_COUNT: usize = 33;

#[derive(Error, Debug)]
pub enum MepsError {
    #[error("schema parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("failed to decode {field} on record {line}: {reason}")]
    Decode { line: usize, field: String, reason: String },

    #[error("failed to read line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", .path.display())]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<MepsError>,
    },

    #[error("variable {name} is not present in the schema")]
    MissingVariable { name: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to write report: {0}")]
    Report(#[from] csv::Error),
}

impl MepsError {
    /// Attaches the file being processed to a parse or decode failure.
    pub fn in_file<P: Into<PathBuf>>(self, path: P) -> MepsError {
        match self {
            MepsError::Io { .. } | MepsError::InFile { .. } => self,
            other => MepsError::InFile {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }
}

/// Summed survey weight per stratum for one year.
#[derive(Debug, Clone, PartialEq)]
pub struct StratumVector {
    totals: [f64; STRATUM_COUNT],
}

impl StratumVector {
    pub fn new() -> StratumVector {
        StratumVector {
            totals: [0.0; STRATUM_COUNT],
        }
    }

    pub fn add(&mut self, stratum: usize, weight: f64) {
        self.totals[stratum] += weight;
    }

    /// Element-wise sum, used when a year is aggregated in pieces.
    #[cfg(test)]
    pub fn merge(&mut self, other: &StratumVector) {
        for (total, value) in self.totals.iter_mut().zip(other.totals.iter()) {
            *total += value;
        }
    }

    pub fn total(&self) -> f64 {
        self.totals.iter().sum()
    }
}

impl Default for StratumVector {
    fn default() -> Self {
        StratumVector::new()
    }
}

impl Index<usize> for StratumVector {
    type Output = f64;

    fn index(&self, stratum: usize) -> &f64 {
        &self.totals[stratum]
    }
}

/// Completed years only; a year is inserted once its file was fully consumed.
#[derive(Debug, Default)]
pub struct YearlyResults {
    years: BTreeMap<i32, StratumVector>,
}

impl YearlyResults {
    pub fn new() -> YearlyResults {
        YearlyResults {
            years: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, year: i32, totals: StratumVector) {
        self.years.insert(year, totals);
    }

    #[cfg(test)]
    pub fn get(&self, year: i32) -> Option<&StratumVector> {
        self.years.get(&year)
    }

    /// Years in ascending order.
    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.years.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &StratumVector)> + '_ {
        self.years.iter().map(|(year, totals)| (*year, totals))
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }
}

#[test]
fn test_stratum_vector_merge() {
    let mut first = StratumVector::new();
    first.add(3, 10.5);
    first.add(32, 1.0);

    let mut second = StratumVector::new();
    second.add(3, 4.5);
    second.add(0, 2.0);

    first.merge(&second);
    assert_eq!(first[3], 15.0);
    assert_eq!(first[32], 1.0);
    assert_eq!(first[0], 2.0);
    assert_eq!(first.total(), 18.0);
}

#[test]
fn test_yearly_results_ordering() {
    let mut results = YearlyResults::new();
    results.insert(2011, StratumVector::new());
    results.insert(2009, StratumVector::new());
    results.insert(2010, StratumVector::new());

    assert_eq!(results.years().collect::<Vec<_>>(), vec![2009, 2010, 2011]);
    assert_eq!(results.len(), 3);
    assert!(results.get(2012).is_none());
}

#[test]
fn test_error_file_context() {
    let error = MepsError::Parse { line: 4, reason: "expected 3 tokens".to_owned() }.in_file("h129su.txt");
    assert_eq!(error.to_string(), "h129su.txt: schema parse error on line 4: expected 3 tokens");
}
