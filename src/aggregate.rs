use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str;

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::classify::{classify, Attributes, Stratum};
use crate::common::{MepsError, StratumVector, STRATUM_COUNT};
use crate::config::YearConfig;
use crate::schema::{read_schema, FieldSpec, SchemaMap};

/// Where the six required variables sit in one year's records, in the order
/// insurance, birth year, sex, region, employment relation, weight.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    names: Vec<String>,
    fields: Vec<FieldSpec>,
    record_length: usize,
}

impl RecordLayout {
    /// Resolves the year-suffixed variable names against the schema.
    pub fn new(year: &YearConfig, schema: &SchemaMap) -> Result<RecordLayout, MepsError> {
        let suffix = year.suffix();
        let names = vec![
            format!("PEGJA{}", suffix),
            "DOBYY".to_owned(),
            "SEX".to_owned(),
            format!("REGION{}", suffix),
            format!("HPEJA{}", suffix),
            year.weight_variable.to_owned(),
        ];

        let mut fields: Vec<FieldSpec> = Vec::with_capacity(names.len());
        for name in &names {
            match schema.get(name) {
                Some(field) => fields.push(field),
                None => return Err(MepsError::MissingVariable { name: name.to_owned() }),
            }
        }

        let record_length = fields.iter().map(FieldSpec::end).max().unwrap_or(0);

        Ok(RecordLayout { names, fields, record_length })
    }

    fn decode(&self, record: &[u8], line: usize) -> Result<Attributes, MepsError> {
        if record.len() < self.record_length {
            return Err(MepsError::Decode {
                line,
                field: "record".to_owned(),
                reason: format!("record is {} bytes, layout needs {}", record.len(), self.record_length),
            });
        }

        // every range ends within record_length, checked above
        let number = |index: usize| -> Result<f64, MepsError> {
            let field = self.fields[index];
            let bytes = &record[field.offset..field.end()];
            let invalid = || MepsError::Decode {
                line,
                field: self.names[index].to_owned(),
                reason: format!("'{}' is not numeric", String::from_utf8_lossy(bytes)),
            };

            let text = str::from_utf8(bytes).map_err(|_| invalid())?;
            text.trim().parse::<f64>().map_err(|_| invalid())
        };

        Ok(Attributes {
            insurance: number(0)?,
            dob_year: number(1)?,
            sex: number(2)?,
            region: number(3)?,
            employment_relation: number(4)?,
            weight: number(5)?,
        })
    }
}

/// Sums survey weights per stratum over a stream of decompressed records.
pub fn aggregate<R: BufRead>(layout: &RecordLayout, reference_year: i32, reader: R) -> Result<StratumVector, MepsError> {
    let mut totals = StratumVector::new();
    let mut records = 0usize;
    let mut included = 0usize;

    for (number, row) in reader.split(b'\n').enumerate() {
        let mut row = row.map_err(|source| MepsError::Read { line: number + 1, source })?;
        if row.last() == Some(&b'\r') {
            row.pop();
        }

        let attributes = layout.decode(&row, number + 1)?;
        records += 1;

        match classify(&attributes, reference_year) {
            Ok(stratum) => {
                totals.add(stratum.index(), attributes.weight);
                included += 1;
            }
            Err(reason) => {
                debug!("record {} excluded: {}", number + 1, reason);
            }
        }
    }

    info!("{} records read, {} in ESI strata, total weight {:.0}", records, included, totals.total());
    Ok(totals)
}

/// Aggregates one gzip-compressed data file.
pub fn aggregate_gz<R: Read>(layout: &RecordLayout, reference_year: i32, compressed: R) -> Result<StratumVector, MepsError> {
    aggregate(layout, reference_year, BufReader::new(GzDecoder::new(compressed)))
}

/// Reads the year's schema and data file from `<data_dir>/<year>/`.
pub fn aggregate_year(year: &YearConfig, data_dir: &Path) -> Result<StratumVector, MepsError> {
    let schema_path = year.schema_path(data_dir);
    let schema = read_schema(&schema_path)?;
    info!("{}: {} variables in {}", year.year, schema.len(), schema_path.display());

    let layout = RecordLayout::new(year, &schema).map_err(|e| e.in_file(&schema_path))?;

    let data_path = year.data_path(data_dir);
    let file = File::open(&data_path).map_err(|source| MepsError::Io {
        path: data_path.to_owned(),
        source,
    })?;

    let totals = aggregate_gz(&layout, year.reference_year(), file).map_err(|e| e.in_file(&data_path))?;

    for index in 1..STRATUM_COUNT as u8 {
        if let Some(stratum) = Stratum::new(index) {
            let profile = stratum.decode();
            debug!(
                "{} stratum {} (female={} emprel={} age={} region={}): {:.0}",
                year.year, index, profile.female, profile.emprel, profile.age, profile.region, totals[stratum.index()]
            );
        }
    }

    Ok(totals)
}

#[cfg(test)]
const TEST_SCHEMA: &str = "DATA H129;\nINPUT @1    PEGJA09    2.0\n      @3    DOBYY      4.0\n      @7    SEX        1.0\n      @8    REGION09   2.0\n      @10   HPEJA09    2.0\n      @12   PERWT09F   12.6\n;\n";

#[cfg(test)]
fn test_layout() -> RecordLayout {
    let schema = crate::schema::extract_schema(TEST_SCHEMA.as_bytes()).unwrap();
    RecordLayout::new(&YearConfig::new(2009, 129, "PERWT09F"), &schema).unwrap()
}

#[cfg(test)]
fn record(insurance: i32, dob_year: i32, sex: i32, region: i32, employment_relation: i32, weight: f64) -> String {
    format!("{:>2}{:>4}{:>1}{:>2}{:>2}{:>12.6}\n", insurance, dob_year, sex, region, employment_relation, weight)
}

#[cfg(test)]
fn gzip(text: &str) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

#[cfg(test)]
fn test_records() -> Vec<String> {
    vec![
        record(1, 1980, 2, 2, 1, 1500.0),    // stratum 10
        record(1, 1980, 2, 2, 1, 250.5),     // stratum 10
        record(2, 1980, 2, 2, 1, 9999.0),    // not covered
        record(1, 1950, 1, 4, 2, 300.25),    // stratum 31
        record(1, 1930, 1, 1, 1, 800.0),     // too old
        record(1, 2005, 1, 1, 1, 700.0),     // too young
        record(1, 1975, 1, -1, 1, 600.0),    // region missing
        record(1, 1975, 1, 3, -1, 500.0),    // inapplicable
        record(1, 1990, 1, 1, 1, 42.0),      // stratum 1
    ]
}

#[test]
fn test_decode_record() {
    let layout = test_layout();
    let line = record(1, 1980, 2, 2, 1, 1500.0);
    assert_eq!(line.len(), 24);

    let attributes = layout.decode(line.trim_end().as_bytes(), 1).unwrap();
    assert_eq!(
        attributes,
        Attributes {
            insurance: 1.0,
            dob_year: 1980.0,
            sex: 2.0,
            region: 2.0,
            employment_relation: 1.0,
            weight: 1500.0,
        }
    );
}

#[test]
fn test_aggregate() {
    let layout = test_layout();
    let text: String = test_records().concat();

    let totals = aggregate(&layout, 2009, text.as_bytes()).unwrap();
    assert_eq!(totals[10], 1750.5);
    assert_eq!(totals[31], 300.25);
    assert_eq!(totals[1], 42.0);
    assert_eq!(totals[0], 0.0);
    assert_eq!(totals.total(), 1750.5 + 300.25 + 42.0);
}

#[test]
fn test_aggregate_gz() {
    let layout = test_layout();
    let text: String = test_records().concat();

    let totals = aggregate_gz(&layout, 2009, gzip(&text).as_slice()).unwrap();
    assert_eq!(totals, aggregate(&layout, 2009, text.as_bytes()).unwrap());
}

#[test]
fn test_aggregate_is_additive() {
    let layout = test_layout();
    let records = test_records();
    let whole = aggregate(&layout, 2009, records.concat().as_bytes()).unwrap();

    for split in 0..=records.len() {
        let mut first = aggregate(&layout, 2009, records[..split].concat().as_bytes()).unwrap();
        let second = aggregate(&layout, 2009, records[split..].concat().as_bytes()).unwrap();
        first.merge(&second);
        assert_eq!(first, whole, "split at {}", split);
    }
}

#[test]
fn test_crlf_records() {
    let layout = test_layout();
    let text = record(1, 1980, 2, 2, 1, 1500.0).replace('\n', "\r\n");
    let totals = aggregate(&layout, 2009, text.as_bytes()).unwrap();
    assert_eq!(totals[10], 1500.0);
}

#[test]
fn test_non_numeric_field() {
    let layout = test_layout();
    let mut text = record(1, 1980, 2, 2, 1, 1500.0);
    text.push_str(" 1198X2 2 1      1500.0\n");

    match aggregate(&layout, 2009, text.as_bytes()) {
        Err(MepsError::Decode { line, field, .. }) => {
            assert_eq!(line, 2);
            assert_eq!(field, "DOBYY");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_fields_sliced_at_schema_offsets() {
    let layout = test_layout();

    // bytes past the last required field are never looked at
    let mut row = record(1, 1950, 1, 4, 2, 300.25).trim_end().as_bytes().to_vec();
    row.extend_from_slice(&[0xff, 0xfe]);
    let attributes = layout.decode(&row, 7).unwrap();
    assert_eq!(attributes.dob_year, 1950.0);
    assert_eq!(attributes.region, 4.0);
    assert_eq!(attributes.weight, 300.25);

    // the same layout decodes every record of a file
    let second = layout.decode(record(1, 1990, 2, 1, 1, 42.0).trim_end().as_bytes(), 8).unwrap();
    assert_eq!(second.sex, 2.0);

    let mut row = record(1, 1950, 1, 4, 2, 300.25).into_bytes();
    row[6] = 0xff;
    match layout.decode(&row, 9) {
        Err(MepsError::Decode { line, field, .. }) => {
            assert_eq!(line, 9);
            assert_eq!(field, "SEX");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_short_record() {
    let layout = test_layout();
    let text = " 11980 2 2 1\n";
    assert!(matches!(aggregate(&layout, 2009, text.as_bytes()), Err(MepsError::Decode { line: 1, .. })));
}

#[test]
fn test_missing_variable() {
    let schema = crate::schema::extract_schema(TEST_SCHEMA.as_bytes()).unwrap();
    let result = RecordLayout::new(&YearConfig::new(2010, 138, "PERWT10F"), &schema);
    match result {
        Err(e @ MepsError::MissingVariable { .. }) => {
            assert_eq!(e.to_string(), "variable PEGJA10 is not present in the schema");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_corrupt_stream() {
    let layout = test_layout();
    let garbage: &[u8] = b"this is not gzip data";
    assert!(matches!(aggregate_gz(&layout, 2009, garbage), Err(MepsError::Read { .. })));
}

#[test]
fn test_aggregate_year() {
    use std::fs;

    let data_dir = tempfile::tempdir().unwrap();
    let year_dir = data_dir.path().join("2009");
    fs::create_dir_all(&year_dir).unwrap();
    fs::write(year_dir.join("h129su.txt"), TEST_SCHEMA).unwrap();
    fs::write(year_dir.join("h129.dat.gz"), gzip(&test_records().concat())).unwrap();

    let year = YearConfig::new(2009, 129, "PERWT09F");
    let totals = aggregate_year(&year, data_dir.path()).unwrap();
    assert_eq!(totals[10], 1750.5);

    fs::remove_file(year_dir.join("h129.dat.gz")).unwrap();
    assert!(matches!(aggregate_year(&year, data_dir.path()), Err(MepsError::Io { .. })));
}
