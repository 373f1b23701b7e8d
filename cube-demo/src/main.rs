//! FILENAME: cube-demo/src/main.rs
//! Sample reports over a synthetic personnel table.
//!
//! Usage: `cube-demo [config.json]`
//!
//! Environment:
//! - `CUBE_LOG`: log level (default info)
//! - `CUBE_LOG_FILE`: also write log lines to this file
//! - `CUBE_PERSONS`: number of generated persons (default 100000)

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use cube_engine::{
    CubeConfig, CubeEngine, CubeError, CubeResult, Dimension, DimensionBuilder, Measure, Query,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

const OFFICES: [&str; 6] = ["Vienna", "Graz", "Linz", "Salzburg", "Innsbruck", "Klagenfurt"];

#[derive(Debug, Clone)]
struct Person {
    gender: &'static str,
    birthday: NaiveDate,
    salary: Decimal,
    office: &'static str,
    employment_start: NaiveDate,
    employment_end: Option<NaiveDate>,
}

// ============================================================================
// FACT SOURCE
// ============================================================================

fn generate_persons(count: usize, seed: u64) -> Vec<Person> {
    let mut rng = StdRng::seed_from_u64(seed);
    let epoch = NaiveDate::from_ymd_opt(1978, 1, 1).unwrap_or_default();
    let hiring_start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default();

    (0..count)
        .map(|_| {
            let birthday = epoch + Duration::days(rng.random_range(0..12_400));
            let employment_start = hiring_start + Duration::days(rng.random_range(0..4_380));
            let employment_end = if rng.random_bool(0.3) {
                Some(employment_start + Duration::days(rng.random_range(30..3_000)))
            } else {
                None
            };
            Person {
                gender: if rng.random_bool(0.5) { "M" } else { "F" },
                birthday,
                salary: Decimal::new(rng.random_range(30_000..400_000), 2),
                office: OFFICES[rng.random_range(0..OFFICES.len())],
                employment_start,
                employment_end,
            }
        })
        .collect()
}

fn load_config(path: Option<PathBuf>) -> Result<CubeConfig, String> {
    let Some(path) = path else {
        return Ok(CubeConfig::default());
    };
    let text = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read config {:?}: {}", path, e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid config {:?}: {}", path, e))
}

// ============================================================================
// MODEL
// ============================================================================

struct Model {
    time: Arc<Dimension<NaiveDate, Person>>,
    time_empstart: Arc<Dimension<NaiveDate, Person>>,
    time_employment: Arc<Dimension<NaiveDate, Person>>,
    gender: Arc<Dimension<String, Person>>,
    salary: Arc<Dimension<Decimal, Person>>,
    offices: Arc<Dimension<String, Person>>,
    count_all: Arc<Measure<Person>>,
    count_full_month: Arc<Measure<Person>>,
    sum_salary: Arc<Measure<Person>>,
}

impl Model {
    fn build() -> Result<Self, CubeError> {
        let time = DimensionBuilder::new("Time", |p: &Person| p.birthday)
            .build_year(1978, 2012)?
            .build_months()?
            .build()?;

        // Only January to September of each year.
        let time_empstart =
            DimensionBuilder::new("Time employment start", |p: &Person| p.employment_start)
                .build_year_slice(2001, 2011, 1, None, 9, None)?
                .build_months()?
                .build()?;

        let time_employment = DimensionBuilder::interval(
            "Time employment",
            |p: &Person| p.employment_start,
            |p: &Person| p.employment_end.unwrap_or(NaiveDate::MAX),
        )
        .build_year(2001, 2011)?
        .build()?;

        let gender = DimensionBuilder::new("Gender", |p: &Person| p.gender.to_string())
            .build_enum(["M", "F"])?
            .build()?;

        let salary = DimensionBuilder::new("Salary", |p: &Person| p.salary)
            .build_partition([500, 1000, 2500])?
            .build_partition_step(Decimal::from(100))?
            .build()?;

        let offices = DimensionBuilder::new("Office", |p: &Person| p.office.to_string())
            .build_enum(OFFICES)?
            .build()?;

        let count_all = Measure::count_all("Count");
        let count_full_month = Measure::filtered(
            "Count full month",
            |p: &Person| p.employment_start.day() == 1,
            &count_all,
        );
        let sum_salary = Measure::sum("Sum of Salaries", |p: &Person| p.salary);

        Ok(Model {
            time,
            time_empstart,
            time_employment,
            gender,
            salary,
            offices,
            count_all,
            count_full_month,
            sum_salary,
        })
    }
}

// ============================================================================
// REPORTS
// ============================================================================

struct Reports {
    gender_age: Query<Person>,
    salary: Query<Person>,
    count_by_office: Query<Person>,
}

impl Reports {
    fn build(model: &Model) -> Result<Self, CubeError> {
        let gender_age = Query::new("gender over birthday")
            .with_dimension(&model.time)?
            .with_dimension(&model.gender)?
            .with_measure(&model.count_all)?;

        let salary = Query::new("salary over gender and date of employment")
            .with_dimension(&model.time_empstart)?
            .with_dimension(&model.gender)?
            .with_dimension(&model.salary)?
            .with_measure(&model.count_all)?
            .with_measure(&model.count_full_month)?
            .with_measure(&model.sum_salary)?;

        let count_by_office = Query::new("count currently employed by office")
            .with_dimension(&model.time_employment)?
            .with_dimension(&model.offices)?
            .with_measure(&model.count_all)?;

        Ok(Reports {
            gender_age,
            salary,
            count_by_office,
        })
    }

    fn batch(&self) -> [&Query<Person>; 3] {
        [&self.gender_age, &self.salary, &self.count_by_office]
    }

    fn print(&self, model: &Model, result: &CubeResult<Person>) -> Result<(), CubeError> {
        print_gender_report(model, result, &self.gender_age)?;
        print_salary_report(model, result, &self.salary)?;
        print_office_report(model, result, &self.count_by_office)
    }
}

fn print_header(query: &Query<Person>) {
    println!("{}", query.name());
    println!("==================");
    println!();
}

fn print_gender_report(
    model: &Model,
    result: &CubeResult<Person>,
    query: &Query<Person>,
) -> Result<(), CubeError> {
    print_header(query);
    for year in model.time.children() {
        let cell = result.query(query)?.node(year)?;
        let men = cell.clone().dimension_key(&model.gender, "M")?.measure(&model.count_all)?;
        let women = cell.dimension_key(&model.gender, "F")?.measure(&model.count_all)?;
        println!("{}: M: {:5} W: {:5}", year.label(), men, women);
    }
    println!();
    Ok(())
}

fn print_salary_report(
    model: &Model,
    result: &CubeResult<Person>,
    query: &Query<Person>,
) -> Result<(), CubeError> {
    print_header(query);
    for year in model.time_empstart.children() {
        println!("{}", year.label());
        println!("==================");
        for band in model.salary.children() {
            for step in model.salary.children_of(band) {
                let cell = result.query(query)?.node(year)?.node(step)?;
                let men = cell.clone().dimension_key(&model.gender, "M")?;
                let women = cell.clone().dimension_key(&model.gender, "F")?;
                println!(
                    "{}: {:>12}, M: {:3} W: {:3}, monthStart: {:3}, sum: {:>12}",
                    model.salary.name(),
                    step.label(),
                    men.measure(&model.count_all)?,
                    women.measure(&model.count_all)?,
                    cell.measure(&model.count_full_month)?,
                    cell.measure(&model.sum_salary)?
                );
            }
        }
        println!();
    }
    Ok(())
}

fn print_office_report(
    model: &Model,
    result: &CubeResult<Person>,
    query: &Query<Person>,
) -> Result<(), CubeError> {
    print_header(query);

    let years: Vec<_> = model.time_employment.children().collect();
    let header: Vec<String> = years.iter().map(|y| format!(" {:>6} ", y.label())).collect();
    println!("{:>10}|{}", "", header.join("|"));
    let rule: Vec<&str> = std::iter::once("----------")
        .chain(years.iter().map(|_| "--------"))
        .collect();
    println!("{}", rule.join("+"));

    for office in model.offices.children() {
        let office_counts = result.query(query)?.node(office)?;
        let mut cells = Vec::with_capacity(years.len());
        for year in &years {
            let count = office_counts.clone().node(*year)?.measure(&model.count_all)?;
            cells.push(format!(" {:>6} ", count));
        }
        println!("{:>10}|{}", office.label(), cells.join("|"));
    }
    println!();
    Ok(())
}

// ============================================================================
// ENTRY POINT
// ============================================================================

fn run() -> Result<(), String> {
    let config = load_config(std::env::args().nth(1).map(PathBuf::from))?;
    let persons: usize = std::env::var("CUBE_PERSONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100_000);

    log_enter_info!("DEMO", "build_model");
    let model = Model::build().map_err(|e| e.to_string())?;
    let reports = Reports::build(&model).map_err(|e| e.to_string())?;
    log_exit_info!("DEMO", "build_model");

    log_enter_info!("DEMO", "generate_persons", "count={}", persons);
    let facts = generate_persons(persons, 0x5EED);
    log_exit_info!("DEMO", "generate_persons");

    let engine = CubeEngine::new(config).map_err(|e| e.to_string())?;
    log_enter_info!("DEMO", "execute");
    let result = engine
        .execute_slice(&facts, &reports.batch())
        .map_err(|e| e.to_string())?;
    log_exit_info!("DEMO", "execute", "facts={}", result.fact_count());

    for (name, error) in result.errors() {
        log::error!(target: "DEMO", "query '{}' failed: {}", name, error);
    }

    reports.print(&model, &result).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let log_file = std::env::var_os("CUBE_LOG_FILE").map(PathBuf::from);
    if let Err(e) = logging::init(log_file.as_deref()) {
        eprintln!("[LOG_INIT] {}", e);
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!(target: "DEMO", "{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_persons_are_deterministic() {
        let a = generate_persons(50, 7);
        let b = generate_persons(50, 7);
        assert_eq!(a.len(), 50);
        assert!(a.iter().zip(&b).all(|(x, y)| x.birthday == y.birthday && x.salary == y.salary));
        assert!(a.iter().all(|p| p.employment_end.map_or(true, |end| end > p.employment_start)));
    }

    #[test]
    fn test_model_builds() {
        let model = Model::build().unwrap();
        assert_eq!(model.time.children().count(), 35);
        assert_eq!(model.time_empstart.children().count(), 11);
        assert_eq!(model.offices.children().count(), OFFICES.len());
    }

    #[test]
    fn test_reports_over_small_population() {
        let model = Model::build().unwrap();
        let reports = Reports::build(&model).unwrap();
        let facts = generate_persons(500, 3);
        let engine = CubeEngine::new(CubeConfig::sequential()).unwrap();

        let result = engine.execute_slice(&facts, &reports.batch()).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.fact_count(), 500);
        reports.print(&model, &result).unwrap();

        let total = result.query(&reports.gender_age).unwrap().measure(&model.count_all).unwrap();
        assert_eq!(total.as_i64().unwrap(), 500);
        for year in model.time.children() {
            let cell = result.query(&reports.gender_age).unwrap().node(year).unwrap();
            let year_count = cell.measure(&model.count_all).unwrap().as_i64().unwrap();
            let by_gender: i64 = ["M", "F"]
                .into_iter()
                .map(|g| {
                    let split = cell.clone().dimension_key(&model.gender, g).unwrap();
                    split.measure(&model.count_all).unwrap().as_i64().unwrap()
                })
                .sum();
            assert_eq!(by_gender, year_count);
        }
    }

    #[test]
    fn test_missing_config_is_default() {
        assert_eq!(load_config(None).unwrap(), CubeConfig::default());
        assert!(load_config(Some(PathBuf::from("/nonexistent/cube.json"))).is_err());
    }
}
