//! FILENAME: cube-engine/src/engine.rs
//! Shared-scan cube execution.
//!
//! One pass over the facts serves every query of a batch:
//! 1. Plan: collect the distinct dimensions and measures of all queries and
//!    pre-allocate one zeroed accumulator per (cell, measure) of each query.
//! 2. Scan: per fact, classify it once per distinct dimension and evaluate
//!    each distinct measure once, then add the contributions to every cell
//!    the fact reaches in every query (all ancestor levels plus the "all"
//!    coordinate of each dimension).
//! 3. Freeze accumulators into `MeasureValue`s and assemble the `CubeResult`.
//!
//! Slice sources above `parallel_threshold` are scanned in `morsel_size`
//! partitions with rayon; each worker fills its own accumulator arena and
//! the arenas are merged pairwise. Accumulation is exact, so the merge order
//! does not affect any value.

use std::borrow::Borrow;
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::config::CubeConfig;
use crate::dimension::{DimensionId, DimensionModel, NodePath};
use crate::error::{CubeError, Result};
use crate::measure::{Accumulator, Measure, MeasureId};
use crate::query::Query;
use crate::result::{CubeResult, QueryCube};

/// Coordinates of one dimension touched by a fact: 0 ("all") plus node + 1.
type SlotList = SmallVec<[usize; 9]>;

// ============================================================================
// EXECUTION PLAN
// ============================================================================

/// Cell layout of one executable query.
struct PlannedQuery {
    /// Position of the query's entry in the result.
    entry: usize,
    /// Indices into `ExecutionPlan::dimensions`, in query order.
    dimensions: Vec<usize>,
    /// Indices into `ExecutionPlan::measures`, in query order.
    measures: Vec<usize>,
    strides: Vec<usize>,
    cells: usize,
}

struct ExecutionPlan<T> {
    dimensions: Vec<Arc<dyn DimensionModel<T>>>,
    measures: Vec<Arc<Measure<T>>>,
    queries: Vec<PlannedQuery>,
}

/// Accumulator arenas of every planned query, for one partition of the facts.
struct ScanState {
    arenas: Vec<Vec<Accumulator>>,
    facts: usize,
}

/// Per-fact buffers, reused across facts.
struct Scratch {
    paths: Vec<NodePath>,
    contributions: Vec<Option<Accumulator>>,
    slots: Vec<SlotList>,
    active: SmallVec<[(usize, Accumulator); 8]>,
}

impl<T: 'static> ExecutionPlan<T> {
    /// Plans the batch. Per-query failures become error entries; the returned
    /// entries line up with `queries`.
    fn new(
        queries: &[&Query<T>],
        config: &CubeConfig,
    ) -> (Self, Vec<Result<QueryCube<T>>>) {
        let mut plan = ExecutionPlan {
            dimensions: Vec::new(),
            measures: Vec::new(),
            queries: Vec::with_capacity(queries.len()),
        };
        let mut dimension_index: FxHashMap<DimensionId, usize> = FxHashMap::default();
        let mut measure_index: FxHashMap<MeasureId, usize> = FxHashMap::default();
        let mut entries = Vec::with_capacity(queries.len());

        for (entry, query) in queries.iter().enumerate() {
            match Self::layout(query, config) {
                Ok((strides, cells)) => {
                    let dimensions = query
                        .dimension_models()
                        .iter()
                        .map(|d| {
                            *dimension_index.entry(d.id()).or_insert_with(|| {
                                plan.dimensions.push(Arc::clone(d));
                                plan.dimensions.len() - 1
                            })
                        })
                        .collect();
                    let measures = query
                        .measures()
                        .iter()
                        .map(|m| {
                            *measure_index.entry(m.id()).or_insert_with(|| {
                                plan.measures.push(Arc::clone(m));
                                plan.measures.len() - 1
                            })
                        })
                        .collect();

                    entries.push(Ok(QueryCube {
                        name: query.name().to_string(),
                        dimensions: query.dimension_models().to_vec(),
                        strides: strides.clone(),
                        measures: query.measures().to_vec(),
                        values: Vec::new(),
                    }));
                    plan.queries.push(PlannedQuery { entry, dimensions, measures, strides, cells });
                }
                Err(e) => {
                    log::warn!(target: "CUBE", "query '{}' skipped: {}", query.name(), e);
                    entries.push(Err(e));
                }
            }
        }

        (plan, entries)
    }

    /// Row-major strides and total cell count of a query's grid.
    fn layout(query: &Query<T>, config: &CubeConfig) -> Result<(Vec<usize>, usize)> {
        if query.measures().is_empty() {
            return Err(CubeError::EmptyQuery(query.name().to_string()));
        }

        let radices: Vec<usize> = query
            .dimension_models()
            .iter()
            .map(|d| d.node_count() + 1)
            .collect();
        let cells = radices.iter().try_fold(1usize, |acc, &r| acc.checked_mul(r));
        let cells = match cells {
            Some(cells)
                if cells <= config.max_cells_per_query
                    && cells.checked_mul(query.measures().len()).is_some() =>
            {
                cells
            }
            _ => {
                return Err(CubeError::CapacityExceeded {
                    query: query.name().to_string(),
                    cells: cells.unwrap_or(usize::MAX),
                    limit: config.max_cells_per_query,
                })
            }
        };

        let mut strides = vec![1usize; radices.len()];
        for i in (0..radices.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * radices[i + 1];
        }
        Ok((strides, cells))
    }

    fn empty_state(&self) -> ScanState {
        let arenas = self
            .queries
            .iter()
            .map(|q| {
                let template: Vec<Accumulator> =
                    q.measures.iter().map(|&m| self.measures[m].empty()).collect();
                let mut arena = Vec::with_capacity(q.cells * template.len());
                for _ in 0..q.cells {
                    arena.extend_from_slice(&template);
                }
                arena
            })
            .collect();
        ScanState { arenas, facts: 0 }
    }

    fn scratch(&self) -> Scratch {
        let widest = self.queries.iter().map(|q| q.dimensions.len()).max().unwrap_or(0);
        Scratch {
            paths: vec![NodePath::new(); self.dimensions.len()],
            contributions: vec![None; self.measures.len()],
            slots: vec![SlotList::new(); widest],
            active: SmallVec::new(),
        }
    }

    /// Adds one fact to every cell it reaches.
    fn accumulate(&self, fact: &T, state: &mut ScanState, scratch: &mut Scratch) {
        state.facts += 1;

        for (dimension, path) in self.dimensions.iter().zip(scratch.paths.iter_mut()) {
            path.clear();
            dimension.classify_into(fact, path);
        }
        for (measure, contribution) in self.measures.iter().zip(scratch.contributions.iter_mut()) {
            *contribution = measure.contribution(fact);
        }

        for (query, arena) in self.queries.iter().zip(state.arenas.iter_mut()) {
            scratch.active.clear();
            for (j, &m) in query.measures.iter().enumerate() {
                if let Some(c) = scratch.contributions[m] {
                    scratch.active.push((j, c));
                }
            }
            if scratch.active.is_empty() {
                continue;
            }

            let width = query.dimensions.len();
            for (slots, &d) in scratch.slots.iter_mut().zip(&query.dimensions) {
                slots.clear();
                slots.push(0);
                slots.extend(scratch.paths[d].iter().map(|&node| node as usize + 1));
            }

            let measure_count = query.measures.len();
            let active = &scratch.active;
            for_each_cell(&scratch.slots[..width], &query.strides, 0, &mut |cell| {
                let base = cell * measure_count;
                for (j, c) in active.iter() {
                    arena[base + j].add(c);
                }
            });
        }
    }

    fn scan<I>(&self, facts: I) -> ScanState
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let mut state = self.empty_state();
        let mut scratch = self.scratch();
        for fact in facts {
            self.accumulate(fact.borrow(), &mut state, &mut scratch);
        }
        state
    }

    fn finish(&self, state: ScanState, entries: &mut [Result<QueryCube<T>>]) {
        for (query, arena) in self.queries.iter().zip(state.arenas) {
            if let Ok(cube) = &mut entries[query.entry] {
                cube.values = arena.iter().map(Accumulator::finish).collect();
            }
        }
    }
}

impl ScanState {
    /// Adds another partition's accumulators cell by cell.
    fn merge(&mut self, other: &ScanState) {
        for (target, source) in self.arenas.iter_mut().zip(&other.arenas) {
            for (a, b) in target.iter_mut().zip(source) {
                a.add(b);
            }
        }
        self.facts += other.facts;
    }
}

/// Calls `f` with the index of every cell in the cartesian product of the
/// per-dimension slot lists.
fn for_each_cell<F: FnMut(usize)>(slots: &[SlotList], strides: &[usize], base: usize, f: &mut F) {
    match slots.split_first() {
        None => f(base),
        Some((first, rest)) => {
            let stride = strides[0];
            for &slot in first {
                for_each_cell(rest, &strides[1..], base + slot * stride, f);
            }
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Executes query batches over fact sources.
#[derive(Debug, Clone, Default)]
pub struct CubeEngine {
    config: CubeConfig,
}

impl CubeEngine {
    pub fn new(config: CubeConfig) -> Result<Self> {
        config.validate()?;
        Ok(CubeEngine { config })
    }

    pub fn config(&self) -> &CubeConfig {
        &self.config
    }

    /// Runs every query over `facts` in one forward pass. The source is
    /// drained completely; it must not change while being read.
    pub fn execute<T, I>(&self, facts: I, queries: &[&Query<T>]) -> Result<CubeResult<T>>
    where
        T: 'static,
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        check_batch(queries)?;
        let (plan, entries) = ExecutionPlan::new(queries, &self.config);
        log_plan(&plan, queries.len(), false);

        let state = plan.scan(facts);
        Ok(self.assemble(plan, state, queries, entries))
    }

    /// Like `execute`, but large slices are scanned in parallel partitions.
    /// Results are identical to the sequential scan.
    pub fn execute_slice<T>(&self, facts: &[T], queries: &[&Query<T>]) -> Result<CubeResult<T>>
    where
        T: Sync + 'static,
    {
        check_batch(queries)?;
        let (plan, entries) = ExecutionPlan::new(queries, &self.config);

        let parallel = self.config.parallel
            && facts.len() >= self.config.parallel_threshold
            && facts.len() > self.config.morsel_size;
        log_plan(&plan, queries.len(), parallel);

        let state = if parallel {
            let morsel_size = self.config.morsel_size;
            facts
                .par_chunks(morsel_size)
                .fold(
                    || (plan.empty_state(), plan.scratch()),
                    |(mut state, mut scratch), morsel| {
                        log::trace!(target: "CUBE", "morsel of {} facts", morsel.len());
                        for fact in morsel {
                            plan.accumulate(fact, &mut state, &mut scratch);
                        }
                        (state, scratch)
                    },
                )
                .map(|(state, _)| state)
                .reduce(
                    || plan.empty_state(),
                    |mut left, right| {
                        left.merge(&right);
                        left
                    },
                )
        } else {
            plan.scan(facts)
        };

        Ok(self.assemble(plan, state, queries, entries))
    }

    fn assemble<T: 'static>(
        &self,
        plan: ExecutionPlan<T>,
        state: ScanState,
        queries: &[&Query<T>],
        mut entries: Vec<Result<QueryCube<T>>>,
    ) -> CubeResult<T> {
        let fact_count = state.facts;
        plan.finish(state, &mut entries);
        log::info!(
            target: "CUBE",
            "executed {} queries over {} facts ({} failed)",
            queries.len(),
            fact_count,
            queries.len() - plan.queries.len()
        );

        CubeResult::new(
            queries.iter().map(|q| q.id()).collect(),
            queries.iter().map(|q| q.name().to_string()).collect(),
            entries,
            fact_count,
        )
    }
}

/// Runs a batch with the default configuration.
pub fn execute<T, I>(facts: I, queries: &[&Query<T>]) -> Result<CubeResult<T>>
where
    T: 'static,
    I: IntoIterator,
    I::Item: Borrow<T>,
{
    CubeEngine::default().execute(facts, queries)
}

fn check_batch<T>(queries: &[&Query<T>]) -> Result<()> {
    if queries.is_empty() {
        return Err(CubeError::InvalidInput("no queries to execute".to_string()));
    }
    for (i, query) in queries.iter().enumerate() {
        if queries[..i].iter().any(|q| q.id() == query.id()) {
            return Err(CubeError::InvalidInput(format!(
                "query '{}' appears more than once in the batch",
                query.name()
            )));
        }
    }
    Ok(())
}

fn log_plan<T>(plan: &ExecutionPlan<T>, requested: usize, parallel: bool) {
    log::debug!(
        target: "CUBE",
        "plan: {} of {} queries, {} dimensions, {} measures, {} cells, parallel={}",
        plan.queries.len(),
        requested,
        plan.dimensions.len(),
        plan.measures.len(),
        plan.queries.iter().map(|q| q.cells).sum::<usize>(),
        parallel
    );
}
