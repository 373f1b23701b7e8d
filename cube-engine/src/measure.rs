//! FILENAME: cube-engine/src/measure.rs
//! Measures - named aggregate functions over facts.
//!
//! A `Measure` is a stateless definition. The running value for one cell is
//! an `Accumulator`, created fresh for every cell and frozen into a
//! `MeasureValue` once the scan is done.
//!
//! Kinds:
//! - `Count`: +1 per fact where the predicate holds
//! - `Sum`: adds a decimal selected from each fact
//! - `Filtered`: forwards to an inner measure only for facts passing a
//!   predicate; nests arbitrarily

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CubeError, Result};

static NEXT_MEASURE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeasureId(u64);

pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub type Selector<T> = Arc<dyn Fn(&T) -> Decimal + Send + Sync>;

// ============================================================================
// DEFINITION
// ============================================================================

pub enum MeasureKind<T> {
    Count(Predicate<T>),
    Sum(Selector<T>),
    Filtered {
        predicate: Predicate<T>,
        inner: Arc<Measure<T>>,
    },
}

pub struct Measure<T> {
    id: MeasureId,
    name: String,
    kind: MeasureKind<T>,
}

impl<T> fmt::Debug for Measure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            MeasureKind::Count(_) => "Count".to_string(),
            MeasureKind::Sum(_) => "Sum".to_string(),
            MeasureKind::Filtered { inner, .. } => format!("Filtered({})", inner.name),
        };
        f.debug_struct("Measure")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

impl<T> Measure<T> {
    fn new(name: impl Into<String>, kind: MeasureKind<T>) -> Arc<Self> {
        Arc::new(Measure {
            id: MeasureId(NEXT_MEASURE_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            kind,
        })
    }

    /// Counts facts where `predicate` holds.
    pub fn count<P>(name: impl Into<String>, predicate: P) -> Arc<Self>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::new(name, MeasureKind::Count(Arc::new(predicate)))
    }

    /// Counts every fact.
    pub fn count_all(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, MeasureKind::Count(Arc::new(|_: &T| true)))
    }

    /// Sums a decimal selected from each fact.
    pub fn sum<S>(name: impl Into<String>, selector: S) -> Arc<Self>
    where
        S: Fn(&T) -> Decimal + Send + Sync + 'static,
    {
        Self::new(name, MeasureKind::Sum(Arc::new(selector)))
    }

    /// `inner` restricted to facts where `predicate` holds.
    pub fn filtered<P>(name: impl Into<String>, predicate: P, inner: &Arc<Measure<T>>) -> Arc<Self>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::new(
            name,
            MeasureKind::Filtered {
                predicate: Arc::new(predicate),
                inner: Arc::clone(inner),
            },
        )
    }

    pub fn id(&self) -> MeasureId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &MeasureKind<T> {
        &self.kind
    }

    /// Zero-initialized accumulator for one cell.
    pub(crate) fn empty(&self) -> Accumulator {
        match &self.kind {
            MeasureKind::Count(_) => Accumulator::Count(0),
            MeasureKind::Sum(_) => Accumulator::Sum(DecimalSum::ZERO),
            MeasureKind::Filtered { inner, .. } => inner.empty(),
        }
    }

    /// What one fact adds to every cell it lands in, if anything.
    pub(crate) fn contribution(&self, fact: &T) -> Option<Accumulator> {
        match &self.kind {
            MeasureKind::Count(predicate) => predicate(fact).then_some(Accumulator::Count(1)),
            MeasureKind::Sum(selector) => Some(Accumulator::Sum(DecimalSum::of(selector(fact)))),
            MeasureKind::Filtered { predicate, inner } => {
                if predicate(fact) {
                    inner.contribution(fact)
                } else {
                    None
                }
            }
        }
    }

    /// Aggregates the measure directly over a fact sequence, without a cube.
    pub fn evaluate<'a, I>(&self, facts: I) -> MeasureValue
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let mut acc = self.empty();
        for fact in facts {
            if let Some(c) = self.contribution(fact) {
                acc.add(&c);
            }
        }
        acc.finish()
    }
}

// ============================================================================
// ACCUMULATION
// ============================================================================

/// Running value of one measure in one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Accumulator {
    Count(i64),
    Sum(DecimalSum),
}

impl Accumulator {
    /// Adds a contribution or a partial result of the same measure.
    pub(crate) fn add(&mut self, other: &Accumulator) {
        match (self, other) {
            (Accumulator::Count(a), Accumulator::Count(b)) => *a = a.saturating_add(*b),
            (Accumulator::Sum(a), Accumulator::Sum(b)) => a.add(b),
            // kinds are fixed per measure
            _ => {}
        }
    }

    pub(crate) fn finish(&self) -> MeasureValue {
        match *self {
            Accumulator::Count(n) => MeasureValue::Count(n),
            Accumulator::Sum(s) => s.finish(),
        }
    }
}

/// Exact decimal sum. Positive and negative terms are kept apart so that
/// overflow depends only on the multiset of terms, never on their order.
/// Once overflowed the sum stays overflowed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DecimalSum {
    positive: Decimal,
    negative: Decimal,
    overflowed: bool,
}

impl DecimalSum {
    pub(crate) const ZERO: DecimalSum = DecimalSum {
        positive: Decimal::ZERO,
        negative: Decimal::ZERO,
        overflowed: false,
    };

    pub(crate) fn of(value: Decimal) -> Self {
        if value.is_sign_negative() {
            DecimalSum { negative: value, ..Self::ZERO }
        } else {
            DecimalSum { positive: value, ..Self::ZERO }
        }
    }

    fn add(&mut self, other: &DecimalSum) {
        if self.overflowed || other.overflowed {
            self.overflowed = true;
            return;
        }
        match (
            self.positive.checked_add(other.positive),
            self.negative.checked_add(other.negative),
        ) {
            (Some(positive), Some(negative)) => {
                self.positive = positive;
                self.negative = negative;
            }
            _ => self.overflowed = true,
        }
    }

    fn finish(&self) -> MeasureValue {
        if self.overflowed {
            return MeasureValue::Overflow;
        }
        self.positive
            .checked_add(self.negative)
            .map_or(MeasureValue::Overflow, MeasureValue::Decimal)
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Final aggregate of one measure in one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasureValue {
    Count(i64),
    Decimal(Decimal),
    /// A decimal sum whose terms exceed the decimal range.
    Overflow,
}

impl MeasureValue {
    fn kind_name(&self) -> &'static str {
        match self {
            MeasureValue::Count(_) => "count",
            MeasureValue::Decimal(_) => "decimal",
            MeasureValue::Overflow => "overflowed",
        }
    }

    /// Integer value; decimals are truncated toward zero.
    pub fn as_i64(&self) -> Result<i64> {
        match *self {
            MeasureValue::Count(n) => Ok(n),
            MeasureValue::Decimal(d) => d.trunc().to_i64().ok_or(CubeError::TypeMismatch {
                expected: "integer",
                actual: self.kind_name(),
            }),
            MeasureValue::Overflow => Err(CubeError::Overflow),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match *self {
            MeasureValue::Count(n) => Ok(n as f64),
            MeasureValue::Decimal(d) => d.to_f64().ok_or(CubeError::TypeMismatch {
                expected: "float",
                actual: self.kind_name(),
            }),
            MeasureValue::Overflow => Err(CubeError::Overflow),
        }
    }

    pub fn as_decimal(&self) -> Result<Decimal> {
        match *self {
            MeasureValue::Count(n) => Ok(Decimal::from(n)),
            MeasureValue::Decimal(d) => Ok(d),
            MeasureValue::Overflow => Err(CubeError::Overflow),
        }
    }

    /// No measure produces points in time.
    pub fn as_datetime(&self) -> Result<NaiveDateTime> {
        Err(CubeError::TypeMismatch {
            expected: "datetime",
            actual: self.kind_name(),
        })
    }

    /// No measure produces durations.
    pub fn as_duration(&self) -> Result<Duration> {
        Err(CubeError::TypeMismatch {
            expected: "duration",
            actual: self.kind_name(),
        })
    }

    pub fn is_zero(&self) -> bool {
        match self {
            MeasureValue::Count(n) => *n == 0,
            MeasureValue::Decimal(d) => d.is_zero(),
            MeasureValue::Overflow => false,
        }
    }
}

impl fmt::Display for MeasureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasureValue::Count(n) => fmt::Display::fmt(n, f),
            MeasureValue::Decimal(d) => fmt::Display::fmt(d, f),
            MeasureValue::Overflow => f.pad("overflow"),
        }
    }
}

/// A measure value together with the name of the measure that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasureResult<'a> {
    name: &'a str,
    value: MeasureValue,
}

impl<'a> MeasureResult<'a> {
    pub(crate) fn new(name: &'a str, value: MeasureValue) -> Self {
        MeasureResult { name, value }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn value(&self) -> MeasureValue {
        self.value
    }

    pub fn as_i64(&self) -> Result<i64> {
        self.value.as_i64()
    }

    pub fn as_f64(&self) -> Result<f64> {
        self.value.as_f64()
    }

    pub fn as_decimal(&self) -> Result<Decimal> {
        self.value.as_decimal()
    }

    pub fn as_datetime(&self) -> Result<NaiveDateTime> {
        self.value.as_datetime()
    }

    pub fn as_duration(&self) -> Result<Duration> {
        self.value.as_duration()
    }
}

impl fmt::Display for MeasureResult<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}
