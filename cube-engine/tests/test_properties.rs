//! FILENAME: tests/test_properties.rs
//! Property tests for classification and aggregation invariants.

mod common;

use chrono::NaiveDate;
use common::{count_all, date, sum_salary, Person, PersonFixture};
use cube_engine::{CubeConfig, CubeEngine, DimensionBuilder, Query};
use proptest::prelude::*;
use rust_decimal::Decimal;

// =============================================================================
// Strategies
// =============================================================================

fn birthday() -> impl Strategy<Value = NaiveDate> {
    (1995i32..2006, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| date(y, m, d))
}

fn salary() -> impl Strategy<Value = Decimal> {
    (0i64..500_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn person() -> impl Strategy<Value = Person> {
    (birthday(), salary(), prop_oneof![Just("M"), Just("F"), Just("X")]).prop_map(
        |(birthday, salary, gender)| {
            let mut p = PersonFixture::person("p", gender, birthday, 0);
            p.salary = salary;
            p
        },
    )
}

fn facts(max: usize) -> impl Strategy<Value = Vec<Person>> {
    prop::collection::vec(person(), 0..max)
}

/// Strictly ascending breakpoints.
fn breakpoints() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(1i64..5_000, 1..6).prop_map(|set| set.into_iter().collect())
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    /// A point key matches at most one sibling at every level.
    #[test]
    fn classification_is_disjoint(
        people in facts(50),
        points in breakpoints(),
    ) {
        let time = DimensionBuilder::new("Time", |p: &Person| p.birthday)
            .build_year(1998, 2003).unwrap()
            .build_months().unwrap()
            .build().unwrap();
        let band = DimensionBuilder::new("Band", |p: &Person| p.salary)
            .build_partition(points.iter().map(|&c| Decimal::new(c, 0))).unwrap()
            .build().unwrap();
        let gender = DimensionBuilder::new("Gender", |p: &Person| p.gender.clone())
            .build_enum(["M", "F"]).unwrap()
            .build().unwrap();

        for p in &people {
            prop_assert!(time.children().filter(|n| n.contains(&p.birthday)).count() <= 1);
            prop_assert!(band.children().filter(|n| n.contains(&p.salary)).count() <= 1);
            prop_assert!(gender.children().filter(|n| n.contains(&p.gender)).count() <= 1);
            // Partitions without bounds are exhaustive.
            prop_assert_eq!(band.classify(p).len(), 1);
            for year in time.children() {
                let months = time.children_of(year).filter(|m| m.contains(&p.birthday)).count();
                prop_assert!(months <= 1);
                if year.contains(&p.birthday) {
                    prop_assert_eq!(months, 1);
                }
            }
        }
    }

    /// Month cells of a year add up to the year cell.
    #[test]
    fn months_roll_up_to_year(people in facts(120)) {
        let time = DimensionBuilder::new("Time", |p: &Person| p.birthday)
            .build_year(1995, 2005).unwrap()
            .build_months().unwrap()
            .build().unwrap();
        let count = count_all();
        let total = sum_salary();
        let query = Query::new("q")
            .with_dimension(&time).unwrap()
            .with_measure(&count).unwrap()
            .with_measure(&total).unwrap();

        let result = cube_engine::execute(&people, &[&query]).unwrap();
        for year in time.children() {
            let year_view = result.query(&query).unwrap().node(year).unwrap();
            let mut months_count = 0i64;
            let mut months_total = Decimal::ZERO;
            for month in time.children_of(year) {
                let cell = year_view.clone().node(month).unwrap();
                months_count += cell.measure(&count).unwrap().as_i64().unwrap();
                months_total += cell.measure(&total).unwrap().as_decimal().unwrap();
            }
            prop_assert_eq!(months_count, year_view.measure(&count).unwrap().as_i64().unwrap());
            prop_assert_eq!(months_total, year_view.measure(&total).unwrap().as_decimal().unwrap());
        }
    }

    /// A query run alone equals the same query run in a batch.
    #[test]
    fn batching_is_transparent(people in facts(80), points in breakpoints()) {
        let band = DimensionBuilder::new("Band", |p: &Person| p.salary)
            .build_partition(points.iter().map(|&c| Decimal::new(c, 0))).unwrap()
            .build().unwrap();
        let gender = DimensionBuilder::new("Gender", |p: &Person| p.gender.clone())
            .build_enum(["M", "F"]).unwrap()
            .build().unwrap();
        let count = count_all();
        let total = sum_salary();
        let target = Query::new("target")
            .with_dimension(&band).unwrap()
            .with_dimension(&gender).unwrap()
            .with_measure(&total).unwrap();
        let sibling = Query::new("sibling")
            .with_dimension(&gender).unwrap()
            .with_measure(&count).unwrap()
            .with_measure(&total).unwrap();

        let alone = cube_engine::execute(&people, &[&target]).unwrap();
        let batched = cube_engine::execute(&people, &[&sibling, &target]).unwrap();
        for b in band.children() {
            for g in gender.children() {
                let x = alone.query(&target).unwrap().node(b).unwrap().node(g).unwrap();
                let y = batched.query(&target).unwrap().node(b).unwrap().node(g).unwrap();
                prop_assert_eq!(x.measures(), y.measures());
            }
        }
    }

    /// Fact order and partitioning never change a value.
    #[test]
    fn order_and_partition_independent(
        people in facts(200),
        morsel in 1usize..64,
        seed in any::<u64>(),
    ) {
        let gender = DimensionBuilder::new("Gender", |p: &Person| p.gender.clone())
            .build_enum(["M", "F"]).unwrap()
            .build().unwrap();
        let count = count_all();
        let total = sum_salary();
        let query = Query::new("q")
            .with_dimension(&gender).unwrap()
            .with_measure(&count).unwrap()
            .with_measure(&total).unwrap();

        let mut shuffled = people.clone();
        let len = shuffled.len();
        if len > 1 {
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                shuffled.swap(i, (state >> 33) as usize % (i + 1));
            }
        }

        let sequential = CubeEngine::new(CubeConfig::sequential()).unwrap();
        let partitioned = CubeEngine::new(CubeConfig {
            parallel_threshold: 0,
            morsel_size: morsel,
            ..CubeConfig::default()
        }).unwrap();

        let a = sequential.execute(&people, &[&query]).unwrap();
        let b = partitioned.execute_slice(&shuffled, &[&query]).unwrap();
        prop_assert_eq!(
            a.query(&query).unwrap().measures(),
            b.query(&query).unwrap().measures()
        );
        for g in gender.children() {
            prop_assert_eq!(
                a.query(&query).unwrap().node(g).unwrap().measures(),
                b.query(&query).unwrap().node(g).unwrap().measures()
            );
        }
    }
}
