//! FILENAME: cube-engine/src/query.rs
//! Query - a named combination of dimensions and measures.
//!
//! Dimension order is the nesting order used when addressing results.
//! Measures are siblings at every addressed cell.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::dimension::{Dimension, DimensionId, DimensionModel};
use crate::error::{CubeError, Result};
use crate::measure::{Measure, MeasureId};

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

pub struct Query<T> {
    id: QueryId,
    name: String,
    dimensions: Vec<Arc<dyn DimensionModel<T>>>,
    measures: Vec<Arc<Measure<T>>>,
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dimensions", &self.dimension_names())
            .field("measures", &self.measures.iter().map(|m| m.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl<T: 'static> Query<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Query {
            id: QueryId(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            dimensions: Vec::new(),
            measures: Vec::new(),
        }
    }

    /// Appends a dimension as the next nesting level.
    pub fn with_dimension<K>(mut self, dimension: &Arc<Dimension<K, T>>) -> Result<Self>
    where
        K: PartialOrd + Send + Sync + 'static,
    {
        if self.dimensions.iter().any(|d| d.id() == dimension.id()) {
            return Err(CubeError::DuplicateDimension {
                query: self.name.clone(),
                dimension: dimension.name().to_string(),
            });
        }
        let model: Arc<dyn DimensionModel<T>> = Arc::clone(dimension) as Arc<dyn DimensionModel<T>>;
        self.dimensions.push(model);
        Ok(self)
    }

    pub fn with_measure(mut self, measure: &Arc<Measure<T>>) -> Result<Self> {
        if self.measures.iter().any(|m| m.id() == measure.id()) {
            return Err(CubeError::DuplicateMeasure {
                query: self.name.clone(),
                measure: measure.name().to_string(),
            });
        }
        self.measures.push(Arc::clone(measure));
        Ok(self)
    }
}

impl<T> Query<T> {
    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    pub fn dimension_names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name()).collect()
    }

    pub fn dimension_ids(&self) -> Vec<DimensionId> {
        self.dimensions.iter().map(|d| d.id()).collect()
    }

    pub fn measures(&self) -> &[Arc<Measure<T>>] {
        &self.measures
    }

    pub fn has_measure(&self, id: MeasureId) -> bool {
        self.measures.iter().any(|m| m.id() == id)
    }

    pub(crate) fn dimension_models(&self) -> &[Arc<dyn DimensionModel<T>>] {
        &self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionBuilder;

    struct Row {
        group: u32,
    }

    #[test]
    fn test_query_declares_in_order() {
        let a = DimensionBuilder::new("A", |r: &Row| r.group)
            .build_partition([1u32])
            .unwrap()
            .build()
            .unwrap();
        let b = DimensionBuilder::new("B", |r: &Row| r.group)
            .build_enum([1u32, 2])
            .unwrap()
            .build()
            .unwrap();
        let count = Measure::<Row>::count_all("Count");

        let query = Query::new("q")
            .with_dimension(&b)
            .unwrap()
            .with_dimension(&a)
            .unwrap()
            .with_measure(&count)
            .unwrap();

        assert_eq!(query.name(), "q");
        assert_eq!(query.dimension_names(), vec!["B", "A"]);
        assert_eq!(query.dimension_ids(), vec![b.id(), a.id()]);
        assert!(query.has_measure(count.id()));
    }

    #[test]
    fn test_duplicate_dimension_rejected() {
        let a = DimensionBuilder::new("A", |r: &Row| r.group)
            .build_enum([1u32])
            .unwrap()
            .build()
            .unwrap();
        let err = Query::new("q").with_dimension(&a).unwrap().with_dimension(&a).unwrap_err();
        assert_eq!(
            err,
            CubeError::DuplicateDimension { query: "q".to_string(), dimension: "A".to_string() }
        );
    }

    #[test]
    fn test_duplicate_measure_rejected() {
        let count = Measure::<Row>::count_all("Count");
        let err = Query::new("q").with_measure(&count).unwrap().with_measure(&count).unwrap_err();
        assert!(matches!(err, CubeError::DuplicateMeasure { .. }));
    }

    #[test]
    fn test_equal_names_are_distinct_identities() {
        let first = Measure::<Row>::count_all("Count");
        let second = Measure::<Row>::count_all("Count");
        let query = Query::new("q").with_measure(&first).unwrap().with_measure(&second).unwrap();
        assert_eq!(query.measures().len(), 2);
        assert_ne!(Query::<Row>::new("q").id(), query.id());
    }
}
