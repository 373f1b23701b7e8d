//! FILENAME: cube-engine/src/result.rs
//! CubeResult - per-query cell grids produced by one engine run, and the
//! `CubeView` cursor used to address a single cell.
//!
//! Addressing is chained:
//!
//! ```rust,ignore
//! let births = result
//!     .query(&by_year)?
//!     .key(date(2000, 1, 1))?          // year node of the first dimension
//!     .node(march)?                    // drill down to a month node
//!     .measure(&count)?;
//! ```
//!
//! A dimension that is never addressed stands for "all" of its facts.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::dimension::{Dimension, DimensionModel, NodeId, NodeRef};
use crate::error::{CubeError, Result};
use crate::measure::{Measure, MeasureResult, MeasureValue};
use crate::query::{Query, QueryId};

// ============================================================================
// QUERY CUBE
// ============================================================================

/// Frozen cell grid of one query.
///
/// Each dimension contributes `node_count + 1` coordinates: slot 0 is the
/// "all" coordinate, slot `n + 1` is node `n`. Cells are laid out row-major
/// in query dimension order, measures innermost.
pub(crate) struct QueryCube<T> {
    pub(crate) name: String,
    pub(crate) dimensions: Vec<Arc<dyn DimensionModel<T>>>,
    pub(crate) strides: Vec<usize>,
    pub(crate) measures: Vec<Arc<Measure<T>>>,
    pub(crate) values: Vec<MeasureValue>,
}

impl<T> QueryCube<T> {
    fn dimension_position(&self, handle: NodeRef) -> Option<usize> {
        self.dimensions.iter().position(|d| d.id() == handle.dimension)
    }

    fn cell_index(&self, slots: &[Option<NodeId>]) -> usize {
        slots
            .iter()
            .zip(&self.strides)
            .map(|(slot, stride)| slot.map_or(0, |n| n as usize + 1) * stride)
            .sum()
    }
}

// ============================================================================
// CUBE RESULT
// ============================================================================

/// Outcome of one `CubeEngine::execute` call, keyed by query identity.
///
/// Queries that failed at execution start (`EmptyQuery`, `CapacityExceeded`)
/// keep their error; looking them up returns it again.
pub struct CubeResult<T> {
    entries: Vec<Result<QueryCube<T>>>,
    names: Vec<String>,
    index: FxHashMap<QueryId, usize>,
    fact_count: usize,
}

impl<T> std::fmt::Debug for CubeResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubeResult")
            .field("queries", &self.names)
            .field("failed", &self.errors().len())
            .field("fact_count", &self.fact_count)
            .finish()
    }
}

impl<T> CubeResult<T> {
    pub(crate) fn new(
        ids: Vec<QueryId>,
        names: Vec<String>,
        entries: Vec<Result<QueryCube<T>>>,
        fact_count: usize,
    ) -> Self {
        let index = ids.into_iter().enumerate().map(|(i, id)| (id, i)).collect();
        CubeResult { entries, names, index, fact_count }
    }

    /// Number of facts visited by the scan.
    pub fn fact_count(&self) -> usize {
        self.fact_count
    }

    /// Number of queries in the batch, failed ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queries that failed at execution start, by name.
    pub fn errors(&self) -> Vec<(&str, &CubeError)> {
        self.entries
            .iter()
            .zip(&self.names)
            .filter_map(|(entry, name)| entry.as_ref().err().map(|e| (name.as_str(), e)))
            .collect()
    }

    /// True if the query was part of this run and executed successfully.
    pub fn is_ok(&self, query: &Query<T>) -> bool {
        matches!(self.index.get(&query.id()).map(|&i| &self.entries[i]), Some(Ok(_)))
    }

    /// Cursor at the query's grand-total cell.
    pub fn query(&self, query: &Query<T>) -> Result<CubeView<'_, T>> {
        let position = self
            .index
            .get(&query.id())
            .ok_or_else(|| CubeError::UnknownQuery(query.name().to_string()))?;
        match &self.entries[*position] {
            Ok(cube) => Ok(CubeView {
                cube,
                slots: SmallVec::from_elem(None, cube.dimensions.len()),
            }),
            Err(e) => Err(e.clone()),
        }
    }
}

// ============================================================================
// CELL ADDRESSING
// ============================================================================

/// One coordinate: a raw key or a node handle. Both resolve to the same node.
#[derive(Debug, Clone, PartialEq)]
pub enum Coord<K> {
    Key(K),
    Node(NodeRef),
}

impl<K> From<NodeRef> for Coord<K> {
    fn from(handle: NodeRef) -> Self {
        Coord::Node(handle)
    }
}

/// Cursor into one query's cells. Cheap to clone; every step returns a new
/// cursor so partially addressed views can be reused.
pub struct CubeView<'a, T> {
    cube: &'a QueryCube<T>,
    slots: SmallVec<[Option<NodeId>; 4]>,
}

impl<T> Clone for CubeView<'_, T> {
    fn clone(&self) -> Self {
        CubeView { cube: self.cube, slots: self.slots.clone() }
    }
}

impl<T> std::fmt::Debug for CubeView<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CubeView")
            .field("query", &self.cube.name)
            .field("slots", &self.slots)
            .finish()
    }
}

impl<'a, T: 'static> CubeView<'a, T> {
    pub fn query_name(&self) -> &'a str {
        &self.cube.name
    }

    /// Currently selected node per dimension, `None` meaning "all".
    pub fn selection(&self) -> Vec<Option<NodeRef>> {
        self.slots
            .iter()
            .zip(&self.cube.dimensions)
            .map(|(slot, d)| slot.map(|node| NodeRef { dimension: d.id(), node }))
            .collect()
    }

    /// Addresses the next dimension by key or node handle.
    pub fn at<K>(self, coord: Coord<K>) -> Result<Self>
    where
        K: PartialOrd + Send + Sync + 'static,
    {
        match coord {
            Coord::Key(key) => self.key(key),
            Coord::Node(handle) => self.node(handle),
        }
    }

    /// Resolves `key` against the top level of the first dimension that is
    /// not addressed yet.
    pub fn key<K>(mut self, key: K) -> Result<Self>
    where
        K: PartialOrd + Send + Sync + 'static,
    {
        let position = self.slots.iter().position(Option::is_none).ok_or_else(|| {
            CubeError::DimensionMismatch(format!(
                "every dimension of query '{}' is already addressed",
                self.cube.name
            ))
        })?;
        let dimension = self.typed_dimension::<K>(position)?;
        let node = dimension.resolve_key(&key)?.id();
        self.slots[position] = Some(node);
        Ok(self)
    }

    /// Addresses a dimension by one of its node handles. If the dimension
    /// already has a selected node, the new node must be that node or lie
    /// beneath it.
    pub fn node(mut self, handle: impl Into<NodeRef>) -> Result<Self> {
        let handle = handle.into();
        let position = self.cube.dimension_position(handle).ok_or_else(|| {
            CubeError::DimensionMismatch(format!(
                "node does not belong to any dimension of query '{}'",
                self.cube.name
            ))
        })?;
        let model = &self.cube.dimensions[position];
        if handle.node as usize >= model.node_count() {
            return Err(CubeError::DimensionMismatch(format!(
                "node {} is outside dimension '{}'",
                handle.node,
                model.name()
            )));
        }
        if let Some(current) = self.slots[position] {
            if handle.node != current && !is_descendant(model.as_ref(), handle.node, current) {
                return Err(CubeError::DimensionMismatch(format!(
                    "node {} is not beneath the selected node of dimension '{}'",
                    handle.node,
                    model.name()
                )));
            }
        }
        self.slots[position] = Some(handle.node);
        Ok(self)
    }

    /// Addresses a specific dimension by key, out of declared order. With a
    /// node already selected on that dimension the key picks one of its children.
    pub fn dimension_key<K>(
        mut self,
        dimension: &Dimension<K, T>,
        key: impl Into<K>,
    ) -> Result<Self>
    where
        K: PartialOrd + Send + Sync + 'static,
    {
        let position = self
            .cube
            .dimensions
            .iter()
            .position(|d| d.id() == dimension.id())
            .ok_or_else(|| {
                CubeError::DimensionMismatch(format!(
                    "dimension '{}' is not part of query '{}'",
                    dimension.name(),
                    self.cube.name
                ))
            })?;
        let key = key.into();
        let node = match self.slots[position] {
            Some(current) => {
                let children = dimension.nodes()[current as usize].child_ids();
                dimension.resolve_among(children, &key)?.id()
            }
            None => dimension.resolve_key(&key)?.id(),
        };
        self.slots[position] = Some(node);
        Ok(self)
    }

    /// Value of `measure` at the addressed cell.
    pub fn measure(&self, measure: &Measure<T>) -> Result<MeasureResult<'a>> {
        let cube = self.cube;
        let j = cube
            .measures
            .iter()
            .position(|m| m.id() == measure.id())
            .ok_or_else(|| CubeError::UnknownMeasure {
                query: cube.name.clone(),
                measure: measure.name().to_string(),
            })?;
        let cell = cube.cell_index(&self.slots);
        let value = cube.values[cell * cube.measures.len() + j];
        Ok(MeasureResult::new(cube.measures[j].name(), value))
    }

    /// Every measure of the query at the addressed cell, in declared order.
    pub fn measures(&self) -> Vec<MeasureResult<'a>> {
        let cube = self.cube;
        let base = cube.cell_index(&self.slots) * cube.measures.len();
        cube.measures
            .iter()
            .enumerate()
            .map(|(j, m)| MeasureResult::new(m.name(), cube.values[base + j]))
            .collect()
    }

    fn typed_dimension<K>(&self, position: usize) -> Result<&'a Dimension<K, T>>
    where
        K: PartialOrd + Send + Sync + 'static,
    {
        let model: &'a dyn DimensionModel<T> = self.cube.dimensions[position].as_ref();
        model.as_any().downcast_ref::<Dimension<K, T>>().ok_or_else(|| {
            CubeError::DimensionMismatch(format!(
                "key type {} does not match dimension '{}'",
                std::any::type_name::<K>(),
                model.name()
            ))
        })
    }
}

fn is_descendant<T>(model: &dyn DimensionModel<T>, node: NodeId, ancestor: NodeId) -> bool {
    let mut current = model.parent(node);
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        current = model.parent(id);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionBuilder;
    use crate::engine::execute;
    use chrono::NaiveDate;

    struct Person {
        born: NaiveDate,
        gender: &'static str,
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn people() -> Vec<Person> {
        vec![
            Person { born: date(2000, 1, 10), gender: "M" },
            Person { born: date(2000, 3, 5), gender: "F" },
            Person { born: date(2000, 3, 20), gender: "F" },
            Person { born: date(2001, 7, 1), gender: "M" },
            Person { born: date(1990, 1, 1), gender: "X" },
        ]
    }

    #[test]
    fn test_unaddressed_dimension_is_all() {
        let time = DimensionBuilder::new("Time", |p: &Person| p.born)
            .build_year(2000, 2001)
            .unwrap()
            .build_months()
            .unwrap()
            .build()
            .unwrap();
        let count = Measure::<Person>::count_all("Count");
        let query = Query::new("births")
            .with_dimension(&time)
            .unwrap()
            .with_measure(&count)
            .unwrap();

        let result = execute(people(), &[&query]).unwrap();
        let view = result.query(&query).unwrap();
        // Grand total includes the 1990 birth that matches no year.
        assert_eq!(view.measure(&count).unwrap().as_i64().unwrap(), 5);
        let year = view.clone().key(date(2000, 6, 1)).unwrap();
        assert_eq!(year.measure(&count).unwrap().as_i64().unwrap(), 3);
    }

    #[test]
    fn test_node_must_descend_from_selection() {
        let time = DimensionBuilder::new("Time", |p: &Person| p.born)
            .build_year(2000, 2001)
            .unwrap()
            .build_months()
            .unwrap()
            .build()
            .unwrap();
        let count = Measure::<Person>::count_all("Count");
        let query = Query::new("births")
            .with_dimension(&time)
            .unwrap()
            .with_measure(&count)
            .unwrap();
        let result = execute(people(), &[&query]).unwrap();

        let y2000 = time.resolve_key(&date(2000, 1, 1)).unwrap();
        let y2001 = time.resolve_key(&date(2001, 1, 1)).unwrap();
        let march_2000 = time.children_of(y2000).nth(2).unwrap();

        let march = result.query(&query).unwrap().node(y2000).unwrap().node(march_2000).unwrap();
        assert_eq!(march.measure(&count).unwrap().as_i64().unwrap(), 2);

        let err = result.query(&query).unwrap().node(y2001).unwrap().node(march_2000).unwrap_err();
        assert!(matches!(err, CubeError::DimensionMismatch(_)));
    }

    #[test]
    fn test_reselecting_same_node_is_noop() {
        let time = DimensionBuilder::new("Time", |p: &Person| p.born)
            .build_year(2000, 2001)
            .unwrap()
            .build_months()
            .unwrap()
            .build()
            .unwrap();
        let count = Measure::<Person>::count_all("Count");
        let query = Query::new("births")
            .with_dimension(&time)
            .unwrap()
            .with_measure(&count)
            .unwrap();
        let result = execute(people(), &[&query]).unwrap();

        let y2000 = time.resolve_key(&date(2000, 1, 1)).unwrap();
        let march_2000 = time.children_of(y2000).nth(2).unwrap();

        let twice = result.query(&query).unwrap().node(y2000).unwrap().node(y2000).unwrap();
        assert_eq!(twice.measure(&count).unwrap().as_i64().unwrap(), 3);

        let march = twice.node(march_2000).unwrap().node(march_2000).unwrap();
        assert_eq!(march.measure(&count).unwrap().as_i64().unwrap(), 2);
        // Going back up stays rejected.
        assert!(matches!(march.node(y2000), Err(CubeError::DimensionMismatch(_))));
    }

    #[test]
    fn test_dimension_key_out_of_order_and_drill_down() {
        let time = DimensionBuilder::new("Time", |p: &Person| p.born)
            .build_year(2000, 2001)
            .unwrap()
            .build_months()
            .unwrap()
            .build()
            .unwrap();
        let gender = DimensionBuilder::new("Gender", |p: &Person| p.gender.to_string())
            .build_enum(["M", "F"])
            .unwrap()
            .build()
            .unwrap();
        let count = Measure::<Person>::count_all("Count");
        let query = Query::new("q")
            .with_dimension(&time)
            .unwrap()
            .with_dimension(&gender)
            .unwrap()
            .with_measure(&count)
            .unwrap();
        let result = execute(people(), &[&query]).unwrap();

        let women = result.query(&query).unwrap().dimension_key(&gender, "F").unwrap();
        assert_eq!(women.measure(&count).unwrap().as_i64().unwrap(), 2);

        let march_women = women
            .dimension_key(&time, date(2000, 3, 1))
            .unwrap()
            .dimension_key(&time, date(2000, 3, 1))
            .unwrap();
        let selection = march_women.selection();
        assert_eq!(time.node(selection[0].unwrap()).unwrap().label(), "Mar");
        assert_eq!(march_women.measure(&count).unwrap().as_i64().unwrap(), 2);
    }

    #[test]
    fn test_key_type_mismatch_and_exhausted_dimensions() {
        let gender = DimensionBuilder::new("Gender", |p: &Person| p.gender.to_string())
            .build_enum(["M", "F"])
            .unwrap()
            .build()
            .unwrap();
        let count = Measure::<Person>::count_all("Count");
        let query = Query::new("q").with_dimension(&gender).unwrap().with_measure(&count).unwrap();
        let result = execute(people(), &[&query]).unwrap();

        let wrong = result.query(&query).unwrap().key(42u32).unwrap_err();
        assert!(matches!(wrong, CubeError::DimensionMismatch(_)));

        let full = result.query(&query).unwrap().key("M".to_string()).unwrap();
        assert!(matches!(full.key("F".to_string()), Err(CubeError::DimensionMismatch(_))));

        let missing = result.query(&query).unwrap().key("X".to_string()).unwrap_err();
        assert!(matches!(missing, CubeError::NoMatch(_)));
    }

    #[test]
    fn test_unknown_query_and_measure() {
        let gender = DimensionBuilder::new("Gender", |p: &Person| p.gender.to_string())
            .build_enum(["M", "F"])
            .unwrap()
            .build()
            .unwrap();
        let count = Measure::<Person>::count_all("Count");
        let other = Measure::<Person>::count_all("Other");
        let query = Query::new("q").with_dimension(&gender).unwrap().with_measure(&count).unwrap();
        let stranger = Query::new("stranger").with_measure(&count).unwrap();
        let result = execute(people(), &[&query]).unwrap();

        assert!(matches!(result.query(&stranger), Err(CubeError::UnknownQuery(_))));
        assert!(!result.is_ok(&stranger));
        assert!(matches!(
            result.query(&query).unwrap().measure(&other),
            Err(CubeError::UnknownMeasure { .. })
        ));
        assert_eq!(result.fact_count(), 5);
    }

    #[test]
    fn test_coord_forms_are_equivalent() {
        let gender = DimensionBuilder::new("Gender", |p: &Person| p.gender.to_string())
            .build_enum(["M", "F"])
            .unwrap()
            .build()
            .unwrap();
        let count = Measure::<Person>::count_all("Count");
        let query = Query::new("q").with_dimension(&gender).unwrap().with_measure(&count).unwrap();
        let result = execute(people(), &[&query]).unwrap();

        for node in gender.children() {
            let view = result.query(&query).unwrap();
            let by_node = view.clone().at(Coord::<String>::from(node.handle())).unwrap();
            let by_key = view.at(Coord::Key(node.label().to_string())).unwrap();
            assert_eq!(by_node.selection(), by_key.selection());
            assert_eq!(by_node.measure(&count).unwrap(), by_key.measure(&count).unwrap());
        }
    }
}
