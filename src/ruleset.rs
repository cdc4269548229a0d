//! The ordered, immutable sequence of rules/chains applied per time step,
//! plus the simulation parameters that travel with it (§3, §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use crate::grid::{Grid, OverflowPolicy};
use crate::rule::{GridName, PrecomputeContext, RuleSpec};

/// An ordered sequence of rules (plain rules and/or `Chain`s, both stored
/// uniformly as `Arc<dyn RuleSpec<T>>` since a `Chain` is itself a rule —
/// see §9) plus the simulation's timestep and default overflow policy.
pub struct Ruleset<T> {
    entries: Vec<Arc<dyn RuleSpec<T>>>,
    /// Simulation timestep size (`Δt`), used to convert a `tspan` into an
    /// integer frame count (§4.5).
    pub dt: f64,
    /// Default overflow policy for grids that don't set their own.
    pub overflow: OverflowPolicy,
    /// An init grid carried by the ruleset itself; an explicit argument to
    /// `Driver::start` takes precedence over this (§4.5, §9).
    pub init: Option<HashMap<GridName, Grid<T>>>,
}

impl<T> Ruleset<T> {
    pub fn new(entries: Vec<Arc<dyn RuleSpec<T>>>, dt: f64, overflow: OverflowPolicy) -> Self {
        Ruleset {
            entries,
            dt,
            overflow,
            init: None,
        }
    }

    pub fn with_init(mut self, init: HashMap<GridName, Grid<T>>) -> Self {
        self.init = Some(init);
        self
    }

    pub fn entries(&self) -> &[Arc<dyn RuleSpec<T>>] {
        &self.entries
    }

    /// Pre-compute every entry against the current simulation metadata
    /// (§4.2). Returns a new `Ruleset` with replaced entries where
    /// pre-computation produced one; entries that declined to precompute
    /// are shared (via `Arc::clone`), not duplicated.
    pub fn precompute(&self, ctx: &PrecomputeContext<'_>) -> Ruleset<T> {
        let entries = self
            .entries
            .iter()
            .map(|entry| entry.precompute(ctx).unwrap_or_else(|| Arc::clone(entry)))
            .collect();
        Ruleset {
            entries,
            dt: self.dt,
            overflow: self.overflow,
            init: None,
        }
    }
}
