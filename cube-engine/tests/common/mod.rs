//! FILENAME: tests/common/mod.rs
//! Fixtures for cube-engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use cube_engine::{Dimension, DimensionBuilder, Measure};
use rust_decimal::Decimal;

pub const OFFICES: [&str; 3] = ["Vienna", "Graz", "Linz"];

/// One employee record.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub gender: String,
    pub birthday: NaiveDate,
    pub salary: Decimal,
    pub office: String,
    pub employment_start: NaiveDate,
    pub employment_end: Option<NaiveDate>,
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub struct PersonFixture;

impl PersonFixture {
    pub fn person(name: &str, gender: &str, birthday: NaiveDate, salary: i64) -> Person {
        Person {
            name: name.to_string(),
            gender: gender.to_string(),
            birthday,
            salary: Decimal::from(salary),
            office: OFFICES[0].to_string(),
            employment_start: date(2005, 1, 1),
            employment_end: None,
        }
    }

    /// Twelve people born in 2000, one per month, alternating gender.
    pub fn birthdays_2000() -> Vec<Person> {
        (1..=12u32)
            .map(|month| {
                let gender = if month % 2 == 0 { "F" } else { "M" };
                Self::person(&format!("p{}", month), gender, date(2000, month, 15), 1000)
            })
            .collect()
    }

    /// Three salaries landing in three different bands.
    pub fn salaries() -> Vec<Person> {
        vec![
            Self::person("low", "M", date(1980, 1, 1), 450),
            Self::person("mid", "F", date(1981, 1, 1), 900),
            Self::person("high", "M", date(1982, 1, 1), 2600),
        ]
    }

    /// Deterministic mixed population for batch and property checks.
    pub fn population(size: usize) -> Vec<Person> {
        (0..size)
            .map(|i| {
                let year = 1978 + (i % 35) as i32;
                let month = (i % 12) as u32 + 1;
                let day = (i % 28) as u32 + 1;
                let start_year = 2001 + (i % 11) as i32;
                let start_day = if i % 3 == 0 { 1 } else { 10 };
                let start = date(start_year, (i * 7 % 12) as u32 + 1, start_day);
                Person {
                    name: format!("person{}", i),
                    gender: if i % 2 == 0 { "M" } else { "F" }.to_string(),
                    birthday: date(year, month, day),
                    salary: Decimal::new((i as i64 * 137) % 400_000, 2),
                    office: OFFICES[i % OFFICES.len()].to_string(),
                    employment_start: start,
                    employment_end: (i % 4 == 0).then(|| date(start_year + 2, 6, 30)),
                }
            })
            .collect()
    }
}

pub fn birthday_dimension() -> Arc<Dimension<NaiveDate, Person>> {
    DimensionBuilder::new("Time", |p: &Person| p.birthday)
        .build_year(1978, 2012)
        .unwrap()
        .build_months()
        .unwrap()
        .build()
        .unwrap()
}

pub fn gender_dimension() -> Arc<Dimension<String, Person>> {
    DimensionBuilder::new("Gender", |p: &Person| p.gender.clone())
        .build_enum(["M", "F"])
        .unwrap()
        .build()
        .unwrap()
}

pub fn salary_dimension() -> Arc<Dimension<Decimal, Person>> {
    DimensionBuilder::new("Salary", |p: &Person| p.salary)
        .build_partition([500, 1000, 2500])
        .unwrap()
        .build_partition_step(Decimal::from(100))
        .unwrap()
        .build()
        .unwrap()
}

pub fn office_dimension() -> Arc<Dimension<String, Person>> {
    DimensionBuilder::new("Office", |p: &Person| p.office.clone())
        .build_enum(OFFICES)
        .unwrap()
        .build()
        .unwrap()
}

pub fn employment_dimension() -> Arc<Dimension<NaiveDate, Person>> {
    DimensionBuilder::interval(
        "Time employment",
        |p: &Person| p.employment_start,
        |p: &Person| p.employment_end.unwrap_or(NaiveDate::MAX),
    )
    .build_year(2001, 2011)
    .unwrap()
    .build()
    .unwrap()
}

pub fn count_all() -> Arc<Measure<Person>> {
    Measure::count_all("Count")
}

pub fn sum_salary() -> Arc<Measure<Person>> {
    Measure::sum("Sum of Salaries", |p: &Person| p.salary)
}
