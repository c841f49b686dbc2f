use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::MepsError;

/// Age bands are cut relative to this year unless a year overrides it.
pub const DEFAULT_REFERENCE_YEAR: i32 = 2009;

#[derive(Deserialize, Debug, Clone)]
pub struct YearEntry {
    pub file_code: u32,          // release number, i.e.: 129 for h129.dat.gz
    pub weight_variable: String, // overall person weight, PERWTyyF
    pub reference_year: Option<i32>,
}

#[derive(Deserialize, Debug, Default)]
pub struct MepsConfig {
    #[serde(default)]
    pub years: BTreeMap<String, YearEntry>,
}

/// One validated survey year.
#[derive(Debug, Clone, PartialEq)]
pub struct YearConfig {
    pub year: i32,
    pub file_code: u32,
    pub weight_variable: String,
    pub reference_year: Option<i32>,
}

impl YearConfig {
    #[cfg(test)]
    pub fn new(year: i32, file_code: u32, weight_variable: &str) -> YearConfig {
        YearConfig {
            year,
            file_code,
            weight_variable: weight_variable.to_owned(),
            reference_year: None,
        }
    }

    /// Two digit year used in variable names, i.e.: REGION09.
    pub fn suffix(&self) -> String {
        format!("{:02}", self.year % 100)
    }

    pub fn reference_year(&self) -> i32 {
        self.reference_year.unwrap_or(DEFAULT_REFERENCE_YEAR)
    }

    pub fn schema_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(self.year.to_string()).join(format!("h{}su.txt", self.file_code))
    }

    pub fn data_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(self.year.to_string()).join(format!("h{}.dat.gz", self.file_code))
    }
}

impl MepsConfig {
    /// The 2009-2015 full year consolidated files.
    pub fn builtin() -> MepsConfig {
        let mut years = BTreeMap::new();
        for (year, file_code, weight_variable) in &[
            (2009, 129, "PERWT09F"),
            (2010, 138, "PERWT10F"),
            (2011, 147, "PERWT11F"),
            (2012, 155, "PERWT12F"),
            (2013, 163, "PERWT13F"),
            (2014, 171, "PERWT14F"),
            (2015, 174, "PERWT15P"),
        ] {
            years.insert(
                year.to_string(),
                YearEntry {
                    file_code: *file_code,
                    weight_variable: weight_variable.to_string(),
                    reference_year: None,
                },
            );
        }

        MepsConfig { years }
    }

    pub fn from_toml(text: &str) -> Result<MepsConfig, MepsError> {
        toml::from_str(text).map_err(|e| MepsError::Config(format!("invalid TOML: {}", e)))
    }

    /// Reads the year table. A missing file is an error.
    pub fn load(path: &Path) -> Result<MepsConfig, MepsError> {
        let text = fs::read_to_string(path).map_err(|source| MepsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        MepsConfig::from_toml(&text).map_err(|e| e.in_file(path))
    }

    /// Like `load`, but falls back to the built-in table when the file does not exist.
    /// Only for the default location, an explicitly named file must exist.
    pub fn load_or_builtin(path: &Path) -> Result<MepsConfig, MepsError> {
        if !path.exists() {
            return Ok(MepsConfig::builtin());
        }

        MepsConfig::load(path)
    }

    /// Validated years in ascending order.
    pub fn years(&self) -> Result<Vec<YearConfig>, MepsError> {
        let mut result = Vec::with_capacity(self.years.len());

        for (key, entry) in &self.years {
            let year = match key.parse::<i32>() {
                Ok(y) if key.len() == 4 && y > 0 => y,
                _ => return Err(MepsError::Config(format!("'{}' is not a four digit year", key))),
            };

            if entry.file_code == 0 {
                return Err(MepsError::Config(format!("{}: file_code must be positive", key)));
            }

            if entry.weight_variable.trim().is_empty() {
                return Err(MepsError::Config(format!("{}: weight_variable is empty", key)));
            }

            result.push(YearConfig {
                year,
                file_code: entry.file_code,
                weight_variable: entry.weight_variable.trim().to_owned(),
                reference_year: entry.reference_year,
            });
        }

        result.sort_by_key(|y| y.year);
        Ok(result)
    }

    /// Restricts to the requested years, every requested year must be configured.
    pub fn select(&self, requested: &[i32]) -> Result<Vec<YearConfig>, MepsError> {
        let years = self.years()?;
        if requested.is_empty() {
            return Ok(years);
        }

        for year in requested {
            if !years.iter().any(|y| y.year == *year) {
                return Err(MepsError::Config(format!("no configuration for year {}", year)));
            }
        }

        Ok(years.into_iter().filter(|y| requested.contains(&y.year)).collect())
    }
}

#[test]
fn test_builtin_table() {
    let years = MepsConfig::builtin().years().unwrap();
    assert_eq!(years.len(), 7);
    assert_eq!(years[0], YearConfig::new(2009, 129, "PERWT09F"));
    assert_eq!(years[6], YearConfig::new(2015, 174, "PERWT15P"));
}

#[test]
fn test_from_toml() {
    let config = MepsConfig::from_toml(
        r#"
        [years.2010]
        file_code = 138
        weight_variable = "PERWT10F"

        [years.2009]
        file_code = 129
        weight_variable = "PERWT09F"
        reference_year = 2008
    "#,
    )
    .unwrap();

    let years = config.years().unwrap();
    assert_eq!(years.iter().map(|y| y.year).collect::<Vec<_>>(), vec![2009, 2010]);
    assert_eq!(years[0].reference_year(), 2008);
    assert_eq!(years[1].reference_year(), DEFAULT_REFERENCE_YEAR);
}

#[test]
fn test_invalid_config() {
    let config = MepsConfig::from_toml("[years.209]\nfile_code = 1\nweight_variable = \"W\"\n").unwrap();
    assert!(matches!(config.years(), Err(MepsError::Config(_))));

    let config = MepsConfig::from_toml("[years.2009]\nfile_code = 0\nweight_variable = \"W\"\n").unwrap();
    assert!(matches!(config.years(), Err(MepsError::Config(_))));

    let config = MepsConfig::from_toml("[years.2009]\nfile_code = 129\nweight_variable = \" \"\n").unwrap();
    assert!(matches!(config.years(), Err(MepsError::Config(_))));

    assert!(MepsConfig::from_toml("[years.2009]\nfile_code = \"abc\"\n").is_err());
}

#[test]
fn test_select_years() {
    let config = MepsConfig::builtin();
    let years = config.select(&[2012, 2010]).unwrap();
    assert_eq!(years.iter().map(|y| y.year).collect::<Vec<_>>(), vec![2010, 2012]);
    assert_eq!(config.select(&[]).unwrap().len(), 7);
    assert!(config.select(&[2020]).is_err());
}

#[test]
fn test_file_layout() {
    let year = YearConfig::new(2009, 129, "PERWT09F");
    let data_dir = Path::new("/data/meps");
    assert_eq!(year.suffix(), "09");
    assert_eq!(year.schema_path(data_dir), PathBuf::from("/data/meps/2009/h129su.txt"));
    assert_eq!(year.data_path(data_dir), PathBuf::from("/data/meps/2009/h129.dat.gz"));
}

#[test]
fn test_load_missing_file_uses_builtin() {
    let config = MepsConfig::load_or_builtin(Path::new("does/not/exist.toml")).unwrap();
    assert_eq!(config.years().unwrap().len(), 7);
}

#[test]
fn test_load_named_file_must_exist() {
    let result = MepsConfig::load(Path::new("config/mesp.toml"));
    assert!(matches!(result, Err(MepsError::Io { .. })));
}

#[test]
fn test_load_file() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("meps.toml");
    fs::write(&path, "[years.2011]\nfile_code = 147\nweight_variable = \"PERWT11F\"\n").unwrap();

    let years = MepsConfig::load(&path).unwrap().years().unwrap();
    assert_eq!(years, vec![YearConfig::new(2011, 147, "PERWT11F")]);

    fs::write(&path, "[years.2011\n").unwrap();
    assert!(matches!(MepsConfig::load(&path), Err(MepsError::InFile { .. })));
}

#[test]
fn test_every_year_shares_reference_year() {
    for year in MepsConfig::builtin().years().unwrap() {
        assert_eq!(year.reference_year(), 2009);
    }
}
