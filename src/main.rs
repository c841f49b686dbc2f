use std::path::Path;
use std::process;

#[macro_use]
extern crate lazy_static;

use clap::{App, Arg, ArgMatches};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod classify;
mod common;
mod config;
mod report;
mod schema;

use common::{MepsError, YearlyResults};
use config::{MepsConfig, YearConfig};

fn command_usage<'a, 'b>() -> App<'a, 'b> {
    const DEFAULT_DATA_DIR: &str = "data";
    const DEFAULT_CONFIG: &str = "config/meps.toml";
    const DEFAULT_OUTPUT: &str = "meps_totals.csv";

    App::new("meps-strata")
    .author("Matthew Scheffel <matt@dataheck.com>")
    .about("Sums MEPS person weights into 32 strata of the employer-sponsored insurance population")
    .arg(
        Arg::with_name("data-dir")
            .short("d")
            .long("data-dir")
            .takes_value(true)
            .default_value(DEFAULT_DATA_DIR)
            .help("Directory holding one folder per year, each with h<code>.dat.gz and h<code>su.txt")
    )
    .arg(
        Arg::with_name("config")
            .short("c")
            .long("config")
            .takes_value(true)
            .default_value(DEFAULT_CONFIG)
            .help("Year table (file codes and weight variables). The built-in 2009-2015 table is used when the default file is missing.")
    )
    .arg(
        Arg::with_name("output")
            .short("o")
            .long("output")
            .takes_value(true)
            .default_value(DEFAULT_OUTPUT)
            .help("CSV file to write, one column per year and one row per stratum")
    )
    .arg(
        Arg::with_name("year")
            .short("y")
            .long("year")
            .takes_value(true)
            .multiple(true)
            .number_of_values(1)
            .help("Only process this year. May be repeated.")
    )
}

/// Aggregates every year in order. The first failure aborts the run, so a year is only present
/// in the result when its whole file was consumed.
fn run_years(years: &[YearConfig], data_dir: &Path) -> Result<YearlyResults, MepsError> {
    let mut results = YearlyResults::new();

    for year in years {
        info!("processing {} (h{})", year.year, year.file_code);
        let totals = aggregate::aggregate_year(year, data_dir)?;
        results.insert(year.year, totals);
    }

    Ok(results)
}

fn run(matches: &ArgMatches) -> Result<(), MepsError> {
    let config_path = Path::new(matches.value_of("config").unwrap_or("config/meps.toml"));
    let config = if matches.occurrences_of("config") > 0 {
        MepsConfig::load(config_path)?
    } else {
        MepsConfig::load_or_builtin(config_path)?
    };

    let requested = match matches.values_of("year") {
        Some(values) => values
            .map(|v| v.parse::<i32>().map_err(|_| MepsError::Config(format!("invalid year: '{}'", v))))
            .collect::<Result<Vec<i32>, MepsError>>()?,
        None => Vec::new(),
    };

    let years = config.select(&requested)?;
    if years.is_empty() {
        return Err(MepsError::Config("no years configured".to_owned()));
    }

    let data_dir = Path::new(matches.value_of("data-dir").unwrap_or("data"));
    let results = run_years(&years, data_dir)?;

    let output = Path::new(matches.value_of("output").unwrap_or("meps_totals.csv"));
    report::write_report_file(&results, output)?;
    info!("wrote {} years to {}", results.len(), output.display());

    Ok(())
}

fn main() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env).init();

    let matches = command_usage().get_matches();

    if let Err(e) = run(&matches) {
        error!("{}", e);
        process::exit(1);
    }
}

#[cfg(test)]
fn write_year(data_dir: &Path, year: &YearConfig, schema: &str, records: &str) {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs;
    use std::io::Write;

    let year_dir = data_dir.join(year.year.to_string());
    fs::create_dir_all(&year_dir).unwrap();
    fs::write(year.schema_path(data_dir), schema).unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(records.as_bytes()).unwrap();
    fs::write(year.data_path(data_dir), encoder.finish().unwrap()).unwrap();
}

#[cfg(test)]
fn schema_for(suffix: &str, weight: &str) -> String {
    format!(
        "DATA X;\nINPUT @1 PEGJA{0} 2.0\n @3 DOBYY 4.0\n @7 SEX 1.0\n @8 REGION{0} 2.0\n @10 HPEJA{0} 2.0\n @12 {1} 12.6\n;\n",
        suffix, weight
    )
}

#[test]
fn test_run_years() {
    let data_dir = tempfile::tempdir().unwrap();
    let y2009 = YearConfig::new(2009, 129, "PERWT09F");
    let y2015 = YearConfig::new(2015, 174, "PERWT15P");

    write_year(data_dir.path(), &y2009, &schema_for("09", "PERWT09F"), " 119802 2 1 1500.000000\n");
    write_year(data_dir.path(), &y2015, &schema_for("15", "PERWT15P"), " 119691 1 1  200.000000\n 119801 1 1  100.000000\n");

    let results = run_years(&[y2009, y2015], data_dir.path()).unwrap();
    assert_eq!(results.years().collect::<Vec<_>>(), vec![2009, 2015]);
    assert_eq!(results.get(2009).unwrap()[10], 1500.0);
    assert_eq!(results.get(2015).unwrap()[1], 300.0);
}

#[test]
fn test_later_years_use_2009_age_bands() {
    let data_dir = tempfile::tempdir().unwrap();
    let years = MepsConfig::builtin().select(&[2015]).unwrap();

    // born 1946 is 45-64 and born 1998 is under 18, whatever the survey year
    write_year(data_dir.path(), &years[0], &schema_for("15", "PERWT15P"), " 119461 1 1  100.000000\n 119981 1 1   50.000000\n");

    let results = run_years(&years, data_dir.path()).unwrap();
    let totals = results.get(2015).unwrap();
    assert_eq!(totals[5], 100.0);
    assert_eq!(totals[1], 0.0);
    assert_eq!(totals.total(), 100.0);
}

#[test]
fn test_failed_year_aborts_run() {
    let data_dir = tempfile::tempdir().unwrap();
    let y2009 = YearConfig::new(2009, 129, "PERWT09F");
    let y2010 = YearConfig::new(2010, 138, "PERWT10F");

    write_year(data_dir.path(), &y2009, &schema_for("09", "PERWT09F"), " 119802 2 1 1500.000000\n");
    write_year(data_dir.path(), &y2010, "no input section here\n", "");

    match run_years(&[y2009, y2010], data_dir.path()) {
        Err(MepsError::InFile { path, source }) => {
            assert!(path.ends_with("2010/h138su.txt"));
            assert!(matches!(*source, MepsError::Parse { .. }));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_command_line() {
    let matches = command_usage()
        .get_matches_from_safe(vec!["meps-strata", "-d", "/tmp/meps", "-y", "2009", "--year", "2011"])
        .unwrap();
    assert_eq!(matches.value_of("data-dir"), Some("/tmp/meps"));
    assert_eq!(matches.value_of("output"), Some("meps_totals.csv"));
    assert_eq!(matches.values_of("year").unwrap().collect::<Vec<_>>(), vec!["2009", "2011"]);
    assert_eq!(matches.occurrences_of("config"), 0);
}

#[test]
fn test_named_config_must_exist() {
    let matches = command_usage()
        .get_matches_from_safe(vec!["meps-strata", "--config", "config/mesp.toml"])
        .unwrap();

    match run(&matches) {
        Err(MepsError::Io { path, .. }) => assert!(path.ends_with("config/mesp.toml")),
        other => panic!("unexpected result: {:?}", other),
    }
}
