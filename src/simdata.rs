//! Per-run mutable simulation state (§3, §4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array2;

use crate::grid::{Grid, GridPair};
use crate::rule::{AuxValue, GridName};
use crate::ruleset::Ruleset;

/// Per-run mutable state: named grids, current time/frame, the (possibly
/// pre-computed) ruleset, and the cancellation flag.
///
/// Constructed at simulation start, mutated by the driver between frames,
/// dropped (or reset) when the run terminates. A frame's double buffering
/// is a swap of buffer identifiers inside each `GridPair`, never a copy.
pub struct SimData<T> {
    pub(crate) grids: HashMap<GridName, GridPair<T>>,
    pub(crate) aux: HashMap<GridName, Array2<AuxValue>>,
    pub(crate) replicates: Option<Vec<HashMap<GridName, GridPair<T>>>>,
    pub(crate) aggregate: Option<Arc<dyn Fn(&[&T]) -> T + Send + Sync>>,
    pub frame: u64,
    pub time: f64,
    pub ruleset: Ruleset<T>,
    cancelled: Arc<AtomicBool>,
}

impl<T> SimData<T> {
    pub fn new(init: HashMap<GridName, Grid<T>>, ruleset: Ruleset<T>) -> Self
    where
        T: Clone,
    {
        let grids = init
            .into_iter()
            .map(|(name, grid)| (name, GridPair::from_init(grid)))
            .collect();
        SimData {
            grids,
            aux: HashMap::new(),
            replicates: None,
            aggregate: None,
            frame: 0,
            time: 0.0,
            ruleset,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set up `n` independent replicate grid pairs, each cloned from the
    /// same init grids, plus the reduction used to collapse them into the
    /// single grid delivered to the sink each frame (§5, "implementation-
    /// defined; default is the mean" — generic `T` has no default mean, so
    /// the caller supplies one, e.g. `|vs| vs.iter().map(|v| **v).sum::<f64>() / vs.len() as f64`).
    pub fn with_replicates(
        mut self,
        n: usize,
        aggregate: Arc<dyn Fn(&[&T]) -> T + Send + Sync>,
    ) -> Self
    where
        T: Clone,
    {
        if n <= 1 {
            self.replicates = None;
            self.aggregate = None;
            return self;
        }
        let replicates = (0..n).map(|_| self.grids.clone()).collect();
        self.replicates = Some(replicates);
        self.aggregate = Some(aggregate);
        self
    }

    pub fn replicate_count(&self) -> usize {
        self.replicates.as_ref().map(Vec::len).unwrap_or(1)
    }

    pub fn grid(&self, name: &GridName) -> Option<&GridPair<T>> {
        self.grids.get(name)
    }

    pub fn grid_mut(&mut self, name: &GridName) -> Option<&mut GridPair<T>> {
        self.grids.get_mut(name)
    }

    pub fn grids(&self) -> &HashMap<GridName, GridPair<T>> {
        &self.grids
    }

    pub fn set_aux(&mut self, name: GridName, values: Array2<AuxValue>) {
        self.aux.insert(name, values);
    }

    pub fn aux(&self) -> &HashMap<GridName, Array2<AuxValue>> {
        &self.aux
    }

    /// A handle that can be shared with the sink to request a cooperative
    /// stop without needing `&mut SimData`.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Elementwise mean across replicate grids, a ready-made `aggregate` closure
/// body for `f64`-valued simulations (§5).
pub fn replicate_mean(values: &[&f64]) -> f64 {
    values.iter().map(|v| **v).sum::<f64>() / values.len() as f64
}
