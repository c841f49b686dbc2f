use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use regex::Regex;

use crate::common::MepsError;

/// Byte range of one variable inside a fixed-width record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub offset: usize, // 0-based
    pub width: usize,
}

impl FieldSpec {
    pub fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Variable name to byte layout, as recovered from a SAS programming statements file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaMap {
    fields: HashMap<String, FieldSpec>,
}

impl SchemaMap {
    pub fn get(&self, name: &str) -> Option<FieldSpec> {
        self.fields.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    fn insert(&mut self, name: String, field: FieldSpec) {
        self.fields.insert(name, field);
    }
}

/// Parses one `@<pos> <name> <width>` descriptor.
/// Width may carry a `$` (character) prefix and a `.<decimals>` suffix, only the integer part is kept.
fn parse_descriptor(text: &str, line: usize) -> Result<(String, FieldSpec), MepsError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let (position, name, width) = match tokens.as_slice() {
        [position, name, width] => (*position, *name, *width),
        _ => {
            return Err(MepsError::Parse {
                line,
                reason: format!("expected 3 tokens in field descriptor, found {}: '{}'", tokens.len(), text.trim()),
            })
        }
    };

    let position = position.trim_start_matches('@');
    let position: usize = match position.parse() {
        Ok(p) if p >= 1 => p,
        _ => {
            return Err(MepsError::Parse {
                line,
                reason: format!("invalid position '{}' for {}", position, name),
            })
        }
    };

    let width = width.trim_start_matches('$');
    let width = match width.find('.') {
        Some(point) => &width[..point],
        None => width,
    };
    let width: usize = match width.parse() {
        Ok(w) if w > 0 => w,
        _ => {
            return Err(MepsError::Parse {
                line,
                reason: format!("invalid width '{}' for {}", width, name),
            })
        }
    };

    Ok((name.to_owned(), FieldSpec { offset: position - 1, width }))
}

/// Reads the `INPUT` section of a SAS programming statements file.
///
/// Everything before the line containing `INPUT @1` is ignored. That line carries the first
/// descriptor after the keyword, and each following line is one descriptor until a line starting
/// with `;`. Hitting end of input before the terminator returns what was collected.
pub fn extract_schema<R: BufRead>(reader: R) -> Result<SchemaMap, MepsError> {
    lazy_static! {
        static ref RE_INPUT_START: Regex = Regex::new(r"INPUT\s+(?P<first>@1\b.*)$").unwrap();
    }

    let mut lines = reader.lines().enumerate();
    let mut schema = SchemaMap::default();
    let mut found = false;

    while let Some((number, line)) = lines.next() {
        let line = line.map_err(|source| MepsError::Read { line: number + 1, source })?;

        if let Some(x) = RE_INPUT_START.captures(&line) {
            let (name, field) = parse_descriptor(&x["first"], number + 1)?;
            schema.insert(name, field);
            found = true;
            break;
        }
    }

    if !found {
        return Err(MepsError::Parse {
            line: 0,
            reason: "no INPUT section found".to_owned(),
        });
    }

    for (number, line) in lines {
        let line = line.map_err(|source| MepsError::Read { line: number + 1, source })?;

        if line.starts_with(';') {
            break;
        }

        let (name, field) = parse_descriptor(&line, number + 1)?;
        schema.insert(name, field);
    }

    Ok(schema)
}

pub fn read_schema(path: &Path) -> Result<SchemaMap, MepsError> {
    let file = File::open(path).map_err(|source| MepsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    extract_schema(BufReader::new(file)).map_err(|e| e.in_file(path))
}

#[cfg(test)]
const TEST_DOCUMENT: &str = r#"FILENAME IN1 'C:\MEPS\H129.DAT';

DATA H129;
  INFILE IN1 LRECL=23;
INPUT @1    PEGJA09    2.0
      @3    DOBYY      4.0
      @7    SEX        1.0
      @8    REGION09   2.0
      @10   HPEJA09    2.0
      @12   PERWT09F   12.6
;
FORMAT DOBYY 4.0;
      @99   IGNORED    1.0
"#;

#[test]
fn test_single_descriptor() {
    let (name, field) = parse_descriptor("@10 FOO $5", 1).unwrap();
    assert_eq!(name, "FOO");
    assert_eq!(field, FieldSpec { offset: 9, width: 5 });
}

#[test]
fn test_extract_schema() {
    let schema = extract_schema(TEST_DOCUMENT.as_bytes()).unwrap();

    assert_eq!(schema.len(), 6);
    assert_eq!(schema.get("PEGJA09"), Some(FieldSpec { offset: 0, width: 2 }));
    assert_eq!(schema.get("DOBYY"), Some(FieldSpec { offset: 2, width: 4 }));
    assert_eq!(schema.get("SEX"), Some(FieldSpec { offset: 6, width: 1 }));
    assert_eq!(schema.get("PERWT09F"), Some(FieldSpec { offset: 11, width: 12 }));
    assert_eq!(schema.get("PERWT09F").unwrap().end(), 23);
    assert_eq!(schema.get("IGNORED"), None);
}

#[test]
fn test_extract_schema_idempotent() {
    let first = extract_schema(TEST_DOCUMENT.as_bytes()).unwrap();
    let second = extract_schema(TEST_DOCUMENT.as_bytes()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_character_widths() {
    let document = "INPUT @1 DUID $8.\n      @9 PID $CHAR3 3.\n;\n";
    let result = extract_schema(document.as_bytes());
    assert!(matches!(result, Err(MepsError::Parse { line: 2, .. })));

    let document = "INPUT @1 DUID $8.\n      @9 DUPERSID $10.\n;\n";
    let schema = extract_schema(document.as_bytes()).unwrap();
    assert_eq!(schema.get("DUID"), Some(FieldSpec { offset: 0, width: 8 }));
    assert_eq!(schema.get("DUPERSID"), Some(FieldSpec { offset: 8, width: 10 }));
}

#[test]
fn test_duplicate_name_overwrites() {
    let document = "INPUT @1 SEX 1.0\n @5 SEX 2.0\n;\n";
    let schema = extract_schema(document.as_bytes()).unwrap();
    assert_eq!(schema.len(), 1);
    assert_eq!(schema.get("SEX"), Some(FieldSpec { offset: 4, width: 2 }));
}

#[test]
fn test_missing_terminator() {
    let document = "INPUT @1 SEX 1.0\n @2 AGE 2.0\n";
    let schema = extract_schema(document.as_bytes()).unwrap();
    assert_eq!(schema.len(), 2);
}

#[test]
fn test_missing_marker() {
    let document = "DATA H129;\n @1 SEX 1.0\n;\n";
    let result = extract_schema(document.as_bytes());
    assert!(matches!(result, Err(MepsError::Parse { line: 0, .. })));

    // @10 is not the start of the section
    let document = "INPUT @10 SEX 1.0\n;\n";
    assert!(extract_schema(document.as_bytes()).is_err());
}

#[test]
fn test_malformed_descriptors() {
    let bad_position = "INPUT @1 SEX 1.0\n @X AGE 2.0\n;\n";
    assert!(matches!(extract_schema(bad_position.as_bytes()), Err(MepsError::Parse { line: 2, .. })));

    let bad_width = "INPUT @1 SEX 1.0\n @2 AGE two\n;\n";
    assert!(matches!(extract_schema(bad_width.as_bytes()), Err(MepsError::Parse { line: 2, .. })));

    let zero_width = "INPUT @1 SEX 0.0\n;\n";
    assert!(matches!(extract_schema(zero_width.as_bytes()), Err(MepsError::Parse { line: 1, .. })));

    let zero_position = "INPUT @1 SEX 1.0\n @0 AGE 2.0\n;\n";
    assert!(extract_schema(zero_position.as_bytes()).is_err());

    let too_many = "INPUT @1 SEX 1.0 EXTRA\n;\n";
    assert!(extract_schema(too_many.as_bytes()).is_err());

    let blank = "INPUT @1 SEX 1.0\n\n;\n";
    assert!(matches!(extract_schema(blank.as_bytes()), Err(MepsError::Parse { line: 2, .. })));
}

#[test]
fn test_read_schema_missing_file() {
    let result = read_schema(Path::new("does/not/exist/h129su.txt"));
    assert!(matches!(result, Err(MepsError::Io { .. })));
}
