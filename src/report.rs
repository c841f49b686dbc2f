use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::Writer;

use crate::common::{MepsError, YearlyResults, STRATUM_COUNT};

/// Writes one column per year and one row per stratum (0 to 32), weights rounded to whole people.
pub fn write_report<W: Write>(results: &YearlyResults, output: W) -> Result<(), MepsError> {
    let mut writer = Writer::from_writer(output);

    let header: Vec<String> = results.years().map(|year| year.to_string()).collect();
    writer.write_record(&header)?;

    for stratum in 0..STRATUM_COUNT {
        let row: Vec<String> = results.iter().map(|(_, totals)| format!("{:.0}", totals[stratum])).collect();
        writer.write_record(&row)?;
    }

    writer.flush().map_err(|e| MepsError::Report(e.into()))?;
    Ok(())
}

pub fn write_report_file(results: &YearlyResults, path: &Path) -> Result<(), MepsError> {
    let file = File::create(path).map_err(|source| MepsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    write_report(results, file)
}

#[test]
fn test_write_report() {
    use crate::common::StratumVector;

    let mut first = StratumVector::new();
    first.add(0, 10.4);
    first.add(10, 1750.25);
    first.add(32, 99.6);

    let mut second = StratumVector::new();
    second.add(1, 1234567.25);

    let mut results = YearlyResults::new();
    results.insert(2010, second);
    results.insert(2009, first);

    let mut output = Vec::new();
    write_report(&results, &mut output).unwrap();
    let text = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 1 + STRATUM_COUNT);
    assert_eq!(lines[0], "2009,2010");
    assert_eq!(lines[1], "10,0");
    assert_eq!(lines[2], "0,1234567");
    assert_eq!(lines[11], "1750,0");
    assert_eq!(lines[33], "100,0");
}

#[test]
fn test_write_report_file() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("meps_totals.csv");

    let mut results = YearlyResults::new();
    results.insert(2009, crate::common::StratumVector::new());
    write_report_file(&results, &path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("2009\n0\n"));
    assert_eq!(text.lines().count(), 34);

    let missing = directory.path().join("no/such/dir/out.csv");
    assert!(matches!(write_report_file(&results, &missing), Err(MepsError::Io { .. })));
}
