//! FILENAME: cube-engine/src/dimension.rs
//! Dimensions - hierarchical classification of facts by a derived key.
//!
//! A `DimensionBuilder` turns declarative rules into a tree of nodes, one
//! hierarchy level per builder call (left-to-right = outer-to-inner).
//! `build()` freezes the tree into an immutable, shareable `Dimension`.
//!
//! Every node owns a key range `(Bound<K>, Bound<K>)`:
//! - Year / slice / quarter / month / day nodes: half-open date ranges
//! - Enumeration nodes: the closed point range `[v, v]`
//! - Partition buckets: half-open numeric ranges
//!
//! A child's range is always the intersection of its rule's range with the
//! parent's range, so siblings stay disjoint and nesting never widens.
//!
//! Interval dimensions (start/end extractors) classify a fact into every node
//! whose range intersects the half-open fact interval `[start, end)`.

use std::any::Any;
use std::fmt::{self, Display};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use num_traits::CheckedAdd;
use smallvec::SmallVec;

use crate::error::{CubeError, Result};

// ============================================================================
// IDENTITY
// ============================================================================

static NEXT_DIMENSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DimensionId(u64);

impl DimensionId {
    fn next() -> Self {
        DimensionId(NEXT_DIMENSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Index of a node inside its dimension's node arena.
pub type NodeId = u32;

/// Handle to one node of one dimension. Used to address cube cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub dimension: DimensionId,
    pub node: NodeId,
}

impl<K> From<&Node<K>> for NodeRef {
    fn from(node: &Node<K>) -> Self {
        node.handle
    }
}

/// Key extractor over a fact record.
pub type KeyFn<T, K> = Arc<dyn Fn(&T) -> K + Send + Sync>;

/// Scratch buffer for classification results.
pub(crate) type NodePath = SmallVec<[NodeId; 8]>;

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun",
    "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

// ============================================================================
// CALENDAR KEYS
// ============================================================================

/// Keys that can be placed on a calendar (year/month/day builders).
pub trait Temporal: Clone + PartialOrd {
    /// The first instant of the given calendar day, if it exists.
    fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self>;
}

impl Temporal for NaiveDate {
    fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

impl Temporal for NaiveDateTime {
    fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).and_then(|d| d.and_hms_opt(0, 0, 0))
    }
}

/// First day of `month` in `year`; month 13 rolls into the next year.
fn month_start<K: Temporal>(year: i32, month: u32) -> Result<K> {
    let (year, month) = if month > 12 {
        let next = year
            .checked_add(1)
            .ok_or_else(|| CubeError::InvalidRange(format!("year {} overflows", year)))?;
        (next, month - 12)
    } else {
        (year, month)
    };
    K::from_ymd(year, month, 1).ok_or_else(|| {
        CubeError::InvalidRange(format!("{}-{:02} is not representable", year, month))
    })
}

/// The day following `year-month-day`.
fn day_after<K: Temporal>(year: i32, month: u32, day: u32) -> Result<K> {
    match K::from_ymd(year, month, day + 1) {
        Some(next) => Ok(next),
        None => month_start(year, month + 1),
    }
}

/// Clamps `day` to the last valid day of the month (Feb 29 in common years).
fn clamp_day<K: Temporal>(year: i32, month: u32, day: u32) -> Result<u32> {
    let mut day = day;
    while day > 28 && K::from_ymd(year, month, day).is_none() {
        day -= 1;
    }
    if K::from_ymd(year, month, day).is_none() {
        return Err(CubeError::InvalidRange(format!(
            "{}-{:02}-{:02} is not representable",
            year, month, day
        )));
    }
    Ok(day)
}

fn check_month(month: u32) -> Result<()> {
    if (1..=12).contains(&month) {
        Ok(())
    } else {
        Err(CubeError::InvalidRange(format!("month {} is outside 1..=12", month)))
    }
}

fn check_day(day: Option<u32>) -> Result<()> {
    match day {
        Some(d) if !(1..=31).contains(&d) => {
            Err(CubeError::InvalidRange(format!("day {} is outside 1..=31", d)))
        }
        _ => Ok(()),
    }
}

// ============================================================================
// RANGE HELPERS
// ============================================================================

fn satisfies_lower<K: PartialOrd>(bound: Bound<&K>, key: &K) -> bool {
    match bound {
        Bound::Unbounded => true,
        Bound::Included(b) => key >= b,
        Bound::Excluded(b) => key > b,
    }
}

fn satisfies_upper<K: PartialOrd>(bound: Bound<&K>, key: &K) -> bool {
    match bound {
        Bound::Unbounded => true,
        Bound::Included(b) => key <= b,
        Bound::Excluded(b) => key < b,
    }
}

/// The tighter of two lower bounds.
fn max_lower<'a, K: PartialOrd>(a: Bound<&'a K>, b: Bound<&'a K>) -> Bound<&'a K> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other,
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(if x >= y { x } else { y }),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(if x >= y { x } else { y }),
        (Bound::Included(x), Bound::Excluded(y)) | (Bound::Excluded(y), Bound::Included(x)) => {
            if x > y {
                Bound::Included(x)
            } else {
                Bound::Excluded(y)
            }
        }
    }
}

/// The tighter of two upper bounds.
fn min_upper<'a, K: PartialOrd>(a: Bound<&'a K>, b: Bound<&'a K>) -> Bound<&'a K> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other,
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(if x <= y { x } else { y }),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(if x <= y { x } else { y }),
        (Bound::Included(x), Bound::Excluded(y)) | (Bound::Excluded(y), Bound::Included(x)) => {
            if x < y {
                Bound::Included(x)
            } else {
                Bound::Excluded(y)
            }
        }
    }
}

fn range_is_empty<K: PartialOrd>(lower: Bound<&K>, upper: Bound<&K>) -> bool {
    match (lower, upper) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
        (Bound::Included(a), Bound::Included(b)) => !(a <= b),
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => !(a < b),
    }
}

/// Display label for a partition bucket.
fn range_label<K: Display>(lower: Bound<&K>, upper: Bound<&K>) -> String {
    match (lower, upper) {
        (Bound::Unbounded, Bound::Unbounded) => "All".to_string(),
        (Bound::Unbounded, Bound::Excluded(h)) => format!("< {}", h),
        (Bound::Unbounded, Bound::Included(h)) => format!("<= {}", h),
        (Bound::Included(l), Bound::Unbounded) => format!(">= {}", l),
        (Bound::Excluded(l), Bound::Unbounded) => format!("> {}", l),
        (Bound::Included(l) | Bound::Excluded(l), Bound::Included(h) | Bound::Excluded(h)) => {
            format!("{} - {}", l, h)
        }
    }
}

/// Splits `[lower, upper)` at the given ascending cut points.
/// Points outside the open interior of the range are ignored.
fn split_range<K>(lower: Bound<K>, upper: Bound<K>, points: &[K]) -> Vec<NodeSpec<K>>
where
    K: Clone + PartialOrd + Display,
{
    let inner: Vec<&K> = points
        .iter()
        .filter(|p| {
            let above = match lower.as_ref() {
                Bound::Unbounded => true,
                Bound::Included(l) | Bound::Excluded(l) => *p > l,
            };
            let below = match upper.as_ref() {
                Bound::Unbounded => true,
                Bound::Included(h) | Bound::Excluded(h) => *p < h,
            };
            above && below
        })
        .collect();

    let mut specs = Vec::with_capacity(inner.len() + 1);
    let mut current = lower;
    for point in inner {
        let bucket_upper = Bound::Excluded(point.clone());
        specs.push(NodeSpec {
            label: range_label(current.as_ref(), bucket_upper.as_ref()),
            lower: current,
            upper: bucket_upper,
            period: Period::Other,
        });
        current = Bound::Included(point.clone());
    }
    specs.push(NodeSpec {
        label: range_label(current.as_ref(), upper.as_ref()),
        lower: current,
        upper,
        period: Period::Other,
    });
    specs
}

// ============================================================================
// NODES
// ============================================================================

/// One classification bucket at one hierarchy level.
#[derive(Debug, Clone)]
pub struct Node<K> {
    handle: NodeRef,
    label: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    depth: usize,
    lower: Bound<K>,
    upper: Bound<K>,
}

impl<K: PartialOrd> Node<K> {
    pub fn handle(&self) -> NodeRef {
        self.handle
    }

    pub fn id(&self) -> NodeId {
        self.handle.node
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Arena index of the parent node (None for top-level nodes).
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn child_ids(&self) -> &[NodeId] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Hierarchy level, 0 = top level.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn lower(&self) -> Bound<&K> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Bound<&K> {
        self.upper.as_ref()
    }

    /// Point membership test.
    pub fn contains(&self, key: &K) -> bool {
        satisfies_lower(self.lower.as_ref(), key) && satisfies_upper(self.upper.as_ref(), key)
    }

    /// Interval membership test: does `[start, end)` intersect this node's range?
    pub fn overlaps(&self, start: &K, end: &K) -> bool {
        let lower = max_lower(self.lower.as_ref(), Bound::Included(start));
        let upper = min_upper(self.upper.as_ref(), Bound::Excluded(end));
        !range_is_empty(lower, upper)
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Calendar meaning of a leaf, used by the nested calendar builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Year(i32),
    Quarter(i32, u32),
    Month(i32, u32),
    Other,
}

/// One node produced by a builder rule, before narrowing to its parent.
struct NodeSpec<K> {
    label: String,
    lower: Bound<K>,
    upper: Bound<K>,
    period: Period,
}

/// Declarative construction of a `Dimension`.
///
/// ```rust,ignore
/// let time = DimensionBuilder::new("Time", |p: &Person| p.birthday)
///     .build_year(1978, 2012)?
///     .build_months()?
///     .build()?;
/// ```
pub struct DimensionBuilder<K, T> {
    id: DimensionId,
    name: String,
    key_of: KeyFn<T, K>,
    key_end: Option<KeyFn<T, K>>,
    nodes: Vec<Node<K>>,
    roots: Vec<NodeId>,
    /// Nodes of the most recent level, with their calendar meaning.
    leaves: Vec<(NodeId, Period)>,
    levels: usize,
    finalized: bool,
}

impl<K, T> DimensionBuilder<K, T>
where
    K: Clone + PartialOrd,
{
    /// Dimension classifying each fact by a single point key.
    pub fn new<F>(name: impl Into<String>, key_of: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::with_extractors(name.into(), Arc::new(key_of), None)
    }

    /// Dimension classifying each fact by the half-open interval `[start, end)`.
    pub fn interval<F, G>(name: impl Into<String>, start: F, end: G) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
        G: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::with_extractors(name.into(), Arc::new(start), Some(Arc::new(end)))
    }

    fn with_extractors(name: String, key_of: KeyFn<T, K>, key_end: Option<KeyFn<T, K>>) -> Self {
        DimensionBuilder {
            id: DimensionId::next(),
            name,
            key_of,
            key_end,
            nodes: Vec::new(),
            roots: Vec::new(),
            leaves: Vec::new(),
            levels: 0,
            finalized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of levels declared so far.
    pub fn levels(&self) -> usize {
        self.levels
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finalized {
            Err(CubeError::BuilderFinalized(self.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Appends one hierarchy level. `expand` is called once for the top level
    /// (with no parent) or once per leaf of the previous level.
    fn push_level<F>(&mut self, rule: &str, mut expand: F) -> Result<&mut Self>
    where
        F: FnMut(Option<(&Node<K>, Period)>) -> Result<Vec<NodeSpec<K>>>,
    {
        self.ensure_open()?;

        let mut created: Vec<(Option<NodeId>, NodeSpec<K>)> = Vec::new();
        if self.levels == 0 {
            for spec in expand(None)? {
                created.push((None, spec));
            }
        } else {
            for &(leaf, period) in &self.leaves {
                let parent = &self.nodes[leaf as usize];
                for spec in expand(Some((parent, period)))? {
                    let lower = max_lower(spec.lower.as_ref(), parent.lower.as_ref()).cloned();
                    let upper = min_upper(spec.upper.as_ref(), parent.upper.as_ref()).cloned();
                    if range_is_empty(lower.as_ref(), upper.as_ref()) {
                        continue;
                    }
                    created.push((Some(leaf), NodeSpec { lower, upper, ..spec }));
                }
            }
        }

        if created.is_empty() {
            return Err(CubeError::InvalidRange(format!(
                "{} on dimension '{}' produces no nodes",
                rule, self.name
            )));
        }

        let mut leaves = Vec::with_capacity(created.len());
        for (parent, spec) in created {
            let id = self.nodes.len() as NodeId;
            self.nodes.push(Node {
                handle: NodeRef { dimension: self.id, node: id },
                label: spec.label,
                parent,
                children: Vec::new(),
                depth: self.levels,
                lower: spec.lower,
                upper: spec.upper,
            });
            match parent {
                Some(p) => self.nodes[p as usize].children.push(id),
                None => self.roots.push(id),
            }
            leaves.push((id, spec.period));
        }
        self.leaves = leaves;
        self.levels += 1;
        Ok(self)
    }

    /// One node per supplied value; membership is exact equality.
    pub fn build_enum<I, V>(&mut self, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<K>,
        K: Display,
    {
        self.ensure_open()?;
        let values: Vec<K> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(CubeError::InvalidRange(format!(
                "build_enum on dimension '{}' has no values",
                self.name
            )));
        }
        for (i, a) in values.iter().enumerate() {
            if values[i + 1..].iter().any(|b| b == a) {
                return Err(CubeError::InvalidRange(format!(
                    "build_enum on dimension '{}' repeats value {}",
                    self.name, a
                )));
            }
        }

        self.push_level("build_enum", |_| {
            Ok(values
                .iter()
                .map(|v| NodeSpec {
                    label: v.to_string(),
                    lower: Bound::Included(v.clone()),
                    upper: Bound::Included(v.clone()),
                    period: Period::Other,
                })
                .collect())
        })
    }

    /// Ordered buckets split at ascending breakpoints, e.g. `[500, 1000, 2500]`
    /// gives `< 500`, `500 - 1000`, `1000 - 2500`, `>= 2500`. On a nested level
    /// each existing bucket is split by the breakpoints inside its own range.
    pub fn build_partition<I, V>(&mut self, thresholds: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<K>,
        K: Display,
    {
        self.ensure_open()?;
        let points: Vec<K> = thresholds.into_iter().map(Into::into).collect();
        if points.is_empty() {
            return Err(CubeError::InvalidRange(format!(
                "build_partition on dimension '{}' has no breakpoints",
                self.name
            )));
        }
        if points.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(CubeError::InvalidRange(format!(
                "build_partition on dimension '{}' needs strictly ascending breakpoints",
                self.name
            )));
        }

        self.push_level("build_partition", |parent| {
            Ok(match parent {
                Some((node, _)) => split_range(node.lower.clone(), node.upper.clone(), &points),
                None => split_range(Bound::Unbounded, Bound::Unbounded, &points),
            })
        })
    }

    /// Splits every bounded bucket of the previous level into `step`-wide
    /// sub-buckets. Unbounded buckets get a single child spanning the same range.
    /// A step that overflows the key type inside a bucket is an `InvalidRange`.
    pub fn build_partition_step(&mut self, step: K) -> Result<&mut Self>
    where
        K: Display + Default + CheckedAdd,
    {
        self.ensure_open()?;
        if !(step > K::default()) {
            return Err(CubeError::InvalidRange(format!(
                "build_partition_step on dimension '{}' needs a positive step",
                self.name
            )));
        }
        if self.levels == 0 {
            return Err(CubeError::InvalidRange(format!(
                "build_partition_step on dimension '{}' needs a preceding level",
                self.name
            )));
        }

        self.push_level("build_partition_step", |parent| {
            let Some((node, _)) = parent else {
                return Ok(Vec::new());
            };
            let overflow = || {
                CubeError::InvalidRange(format!(
                    "step {} overflows the key range of bucket '{}'",
                    step, node.label
                ))
            };
            let mut points = Vec::new();
            if let (
                Bound::Included(lo) | Bound::Excluded(lo),
                Bound::Included(hi) | Bound::Excluded(hi),
            ) = (node.lower.as_ref(), node.upper.as_ref())
            {
                let mut point = lo.checked_add(&step).ok_or_else(overflow)?;
                while point < *hi {
                    let next = point.checked_add(&step).ok_or_else(overflow)?;
                    let advanced = next > point;
                    points.push(point);
                    if !advanced {
                        break;
                    }
                    point = next;
                }
            }
            Ok(split_range(node.lower.clone(), node.upper.clone(), &points))
        })
    }

    /// Finalizes the tree. Any later builder call fails with `BuilderFinalized`.
    pub fn build(&mut self) -> Result<Arc<Dimension<K, T>>> {
        self.ensure_open()?;
        if self.levels == 0 {
            return Err(CubeError::InvalidRange(format!(
                "dimension '{}' has no levels",
                self.name
            )));
        }
        self.finalized = true;

        let dimension = Dimension {
            id: self.id,
            name: self.name.clone(),
            key_of: Arc::clone(&self.key_of),
            key_end: self.key_end.clone(),
            nodes: std::mem::take(&mut self.nodes),
            roots: std::mem::take(&mut self.roots),
            levels: self.levels,
        };
        self.leaves.clear();

        log::debug!(
            target: "CUBE_BUILD",
            "dimension '{}' built: levels={} nodes={} interval={}",
            dimension.name,
            dimension.levels,
            dimension.nodes.len(),
            dimension.key_end.is_some()
        );
        Ok(Arc::new(dimension))
    }
}

impl<K, T> DimensionBuilder<K, T>
where
    K: Temporal,
{
    /// One node per calendar year in `start_year..=end_year`.
    pub fn build_year(&mut self, start_year: i32, end_year: i32) -> Result<&mut Self> {
        self.ensure_open()?;
        if start_year > end_year {
            return Err(CubeError::InvalidRange(format!(
                "year range {}..={} is empty",
                start_year, end_year
            )));
        }
        self.push_level("build_year", |_| {
            (start_year..=end_year)
                .map(|year| -> Result<NodeSpec<K>> {
                    Ok(NodeSpec {
                        label: year.to_string(),
                        lower: Bound::Included(month_start(year, 1)?),
                        upper: Bound::Excluded(month_start(year, 13)?),
                        period: Period::Year(year),
                    })
                })
                .collect()
        })
    }

    /// Like `build_year`, but each year only covers the window from
    /// `month_from/day_from` to `month_to/day_to` (inclusive). A missing day
    /// means the whole month.
    pub fn build_year_slice(
        &mut self,
        start_year: i32,
        end_year: i32,
        month_from: u32,
        day_from: Option<u32>,
        month_to: u32,
        day_to: Option<u32>,
    ) -> Result<&mut Self> {
        self.ensure_open()?;
        if start_year > end_year {
            return Err(CubeError::InvalidRange(format!(
                "year range {}..={} is empty",
                start_year, end_year
            )));
        }
        check_month(month_from)?;
        check_month(month_to)?;
        check_day(day_from)?;
        check_day(day_to)?;

        self.push_level("build_year_slice", |_| {
            (start_year..=end_year)
                .map(|year| -> Result<NodeSpec<K>> {
                    let first = clamp_day::<K>(year, month_from, day_from.unwrap_or(1))?;
                    let lower: K = K::from_ymd(year, month_from, first).ok_or_else(|| {
                        CubeError::InvalidRange(format!(
                            "{}-{:02}-{:02} is not representable",
                            year, month_from, first
                        ))
                    })?;
                    let upper: K = match day_to {
                        Some(day) => {
                            day_after(year, month_to, clamp_day::<K>(year, month_to, day)?)?
                        }
                        None => month_start(year, month_to + 1)?,
                    };
                    if !(lower < upper) {
                        return Err(CubeError::InvalidRange(format!(
                            "slice {:02}/{:?}..{:02}/{:?} is empty in {}",
                            month_from, day_from, month_to, day_to, year
                        )));
                    }
                    Ok(NodeSpec {
                        label: year.to_string(),
                        lower: Bound::Included(lower),
                        upper: Bound::Excluded(upper),
                        period: Period::Year(year),
                    })
                })
                .collect()
        })
    }

    /// Four quarter nodes under every year node.
    pub fn build_quarters(&mut self) -> Result<&mut Self> {
        self.ensure_open()?;
        let name = self.name.clone();
        self.push_level("build_quarters", |parent| match parent {
            Some((_, Period::Year(year))) => (1..=4u32)
                .map(|q| -> Result<NodeSpec<K>> {
                    Ok(NodeSpec {
                        label: format!("Q{}", q),
                        lower: Bound::Included(month_start(year, q * 3 - 2)?),
                        upper: Bound::Excluded(month_start(year, q * 3 + 1)?),
                        period: Period::Quarter(year, q),
                    })
                })
                .collect(),
            _ => Err(CubeError::InvalidRange(format!(
                "build_quarters on dimension '{}' needs a preceding year level",
                name
            ))),
        })
    }

    /// Month nodes under every year (12) or quarter (3) node.
    pub fn build_months(&mut self) -> Result<&mut Self> {
        self.ensure_open()?;
        let name = self.name.clone();
        self.push_level("build_months", |parent| {
            let (year, months) = match parent {
                Some((_, Period::Year(year))) => (year, 1..=12u32),
                Some((_, Period::Quarter(year, q))) => (year, q * 3 - 2..=q * 3),
                _ => {
                    return Err(CubeError::InvalidRange(format!(
                        "build_months on dimension '{}' needs a preceding year or quarter level",
                        name
                    )))
                }
            };
            months
                .map(|month| -> Result<NodeSpec<K>> {
                    Ok(NodeSpec {
                        label: MONTH_NAMES[(month - 1) as usize].to_string(),
                        lower: Bound::Included(month_start(year, month)?),
                        upper: Bound::Excluded(month_start(year, month + 1)?),
                        period: Period::Month(year, month),
                    })
                })
                .collect()
        })
    }

    /// Day nodes under every month node.
    pub fn build_days(&mut self) -> Result<&mut Self> {
        self.ensure_open()?;
        let name = self.name.clone();
        self.push_level("build_days", |parent| {
            let (year, month) = match parent {
                Some((_, Period::Month(year, month))) => (year, month),
                _ => {
                    return Err(CubeError::InvalidRange(format!(
                        "build_days on dimension '{}' needs a preceding month level",
                        name
                    )))
                }
            };
            let mut specs = Vec::with_capacity(31);
            for day in 1..=31u32 {
                let Some(start) = K::from_ymd(year, month, day) else {
                    break;
                };
                specs.push(NodeSpec {
                    label: day.to_string(),
                    lower: Bound::Included(start),
                    upper: Bound::Excluded(day_after(year, month, day)?),
                    period: Period::Other,
                });
            }
            Ok(specs)
        })
    }
}

// ============================================================================
// DIMENSION TREE
// ============================================================================

/// The compiled, immutable hierarchy produced by `DimensionBuilder::build`.
pub struct Dimension<K, T> {
    id: DimensionId,
    name: String,
    key_of: KeyFn<T, K>,
    key_end: Option<KeyFn<T, K>>,
    /// Node arena. Parents precede their children.
    nodes: Vec<Node<K>>,
    roots: Vec<NodeId>,
    levels: usize,
}

impl<K, T> fmt::Debug for Dimension<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dimension")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("levels", &self.levels)
            .field("nodes", &self.nodes.len())
            .field("interval", &self.key_end.is_some())
            .finish()
    }
}

impl<K: PartialOrd, T> Dimension<K, T> {
    pub fn id(&self) -> DimensionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of hierarchy levels.
    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Total node count across all levels.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_interval(&self) -> bool {
        self.key_end.is_some()
    }

    /// All nodes, parents before children.
    pub fn nodes(&self) -> &[Node<K>] {
        &self.nodes
    }

    /// Top-level nodes in declaration order.
    pub fn children(&self) -> impl Iterator<Item = &Node<K>> + '_ {
        self.roots.iter().map(move |&id| &self.nodes[id as usize])
    }

    /// Children of `node`; empty if the node belongs to another dimension.
    pub fn children_of<'a>(
        &'a self,
        node: &'a Node<K>,
    ) -> impl Iterator<Item = &'a Node<K>> + 'a {
        let ids: &[NodeId] = if node.handle.dimension == self.id {
            &node.children
        } else {
            &[]
        };
        ids.iter().filter_map(move |&id| self.nodes.get(id as usize))
    }

    /// Parent of `node`; `None` for top-level nodes and foreign nodes.
    pub fn parent_of(&self, node: &Node<K>) -> Option<&Node<K>> {
        if node.handle.dimension != self.id {
            return None;
        }
        node.parent.and_then(|id| self.nodes.get(id as usize))
    }

    /// Looks up a node handle; `None` if it belongs to another dimension.
    pub fn node(&self, handle: NodeRef) -> Option<&Node<K>> {
        if handle.dimension != self.id {
            return None;
        }
        self.nodes.get(handle.node as usize)
    }

    /// Resolves a key against the top level; exactly one node must match.
    pub fn resolve_key(&self, key: &K) -> Result<&Node<K>> {
        self.resolve_among(&self.roots, key)
    }

    pub(crate) fn resolve_among(&self, ids: &[NodeId], key: &K) -> Result<&Node<K>> {
        let mut found = None;
        for &id in ids {
            let node = &self.nodes[id as usize];
            if node.contains(key) {
                if found.is_some() {
                    return Err(CubeError::NoMatch(format!(
                        "key matches more than one node of dimension '{}'",
                        self.name
                    )));
                }
                found = Some(node);
            }
        }
        found.ok_or_else(|| {
            CubeError::NoMatch(format!("key matches no node of dimension '{}'", self.name))
        })
    }

    /// Every node the fact belongs to, top level first.
    pub fn classify(&self, fact: &T) -> Vec<NodeRef> {
        let mut path = NodePath::new();
        self.collect_path(fact, &mut path);
        path.iter().map(|&id| self.nodes[id as usize].handle).collect()
    }

    /// Point keys descend one matching node per level and stop at the first
    /// level without a match. Interval keys collect every intersecting node.
    pub(crate) fn collect_path(&self, fact: &T, out: &mut NodePath) {
        match &self.key_end {
            None => {
                let key = (self.key_of)(fact);
                let mut level = self.roots.as_slice();
                while let Some(node) = level
                    .iter()
                    .map(|&id| &self.nodes[id as usize])
                    .find(|n| n.contains(&key))
                {
                    out.push(node.handle.node);
                    level = &node.children;
                }
            }
            Some(key_end) => {
                let start = (self.key_of)(fact);
                let end = key_end(fact);
                if start < end {
                    self.collect_overlaps(&self.roots, &start, &end, out);
                }
            }
        }
    }

    fn collect_overlaps(&self, level: &[NodeId], start: &K, end: &K, out: &mut NodePath) {
        for &id in level {
            let node = &self.nodes[id as usize];
            if node.overlaps(start, end) {
                out.push(id);
                self.collect_overlaps(&node.children, start, end, out);
            }
        }
    }
}

// ============================================================================
// TYPE-ERASED VIEW FOR QUERIES
// ============================================================================

/// What queries, the engine and results need from a dimension, independent
/// of its key type.
pub(crate) trait DimensionModel<T>: Send + Sync {
    fn id(&self) -> DimensionId;
    fn name(&self) -> &str;
    fn node_count(&self) -> usize;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn classify_into(&self, fact: &T, out: &mut NodePath);
    fn as_any(&self) -> &dyn Any;
}

impl<K, T> DimensionModel<T> for Dimension<K, T>
where
    K: PartialOrd + Send + Sync + 'static,
    T: 'static,
{
    fn id(&self) -> DimensionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node as usize).and_then(|n| n.parent)
    }

    fn classify_into(&self, fact: &T, out: &mut NodePath) {
        self.collect_path(fact, out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
