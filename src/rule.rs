//! Rule capabilities, the `RuleSpec` object-safe rule contract, and the
//! read-only `Context` handed to every rule application.

use std::collections::HashMap;
use std::sync::Arc;

use ndarray::Array2;

use crate::neighborhood::{Neighborhood, Reduction};

/// Name of a named grid or aux array. Single-grid simulations use the
/// implicit `_default_` name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridName(pub String);

impl GridName {
    pub fn default_grid() -> Self {
        GridName("_default_".to_string())
    }
}

impl From<&str> for GridName {
    fn from(s: &str) -> Self {
        GridName(s.to_string())
    }
}

impl std::fmt::Display for GridName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A read-only auxiliary value made available to rules through [`Context`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AuxValue {
    F64(f64),
    I64(i64),
    Bool(bool),
}

/// One of the three orthogonal rule capabilities of §4.2, plus `Chain` as
/// the fused-sequence variant of §4.4. The driver switches on this value
/// to dispatch a rule without any inheritance hierarchy (§9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    /// Reads only the center cell.
    Cell,
    /// Reads the cell and a neighborhood reduction over its stencil.
    Neighborhood,
    /// Writes zero, one, or many arbitrary cells in the destination grid.
    Manual,
    /// A fused sequence of `Cell`/`Neighborhood` rules sharing one sweep.
    Chain,
}

/// Per-run, time-dependent data a rule's pre-computation hook may consult.
pub struct PrecomputeContext<'a> {
    pub time: f64,
    pub dt: f64,
    pub frame: u64,
    pub aux: &'a HashMap<GridName, Array2<AuxValue>>,
}

/// The read-only view handed to a rule's `apply_*` method: simulation
/// metadata, the neighborhood reduction (when applicable), and named aux
/// arrays indexed identically to grids.
pub struct Context<'a> {
    pub time: f64,
    pub dt: f64,
    reduction: Option<f64>,
    aux: &'a HashMap<GridName, Array2<AuxValue>>,
    index: (usize, usize),
}

impl<'a> Context<'a> {
    pub fn new(
        time: f64,
        dt: f64,
        reduction: Option<f64>,
        aux: &'a HashMap<GridName, Array2<AuxValue>>,
        index: (usize, usize),
    ) -> Self {
        Context {
            time,
            dt,
            reduction,
            aux,
            index,
        }
    }

    /// The reduction computed over the rule's declared neighborhood. `None`
    /// for cell and manual rules.
    pub fn reduction(&self) -> Option<f64> {
        self.reduction
    }

    /// The current cell index `(i, j)` being processed.
    pub fn index(&self) -> (usize, usize) {
        self.index
    }

    /// Look up a named auxiliary array's value at the current cell's index.
    pub fn aux(&self, name: &GridName) -> Option<&AuxValue> {
        self.aux.get(name).map(|a| &a[self.index])
    }

    /// Look up a named auxiliary array's value at an explicit index.
    pub fn aux_at(&self, name: &GridName, i: usize, j: usize) -> Option<&AuxValue> {
        self.aux.get(name).map(|a| &a[(i, j)])
    }
}

/// The rule contract of §6: an immutable configuration object implementing
/// one rule capability, with a statically declared read/write grid set.
///
/// `RuleSpec` is intentionally object-safe (`Arc<dyn RuleSpec<T>>`) rather
/// than generic-per-rule, following §9's "polymorphic rule dispatch without
/// inheritance": the driver switches on `capability()` and calls exactly one
/// of `apply_cell`/`apply_neighborhood`/`apply_manual`; the other two are
/// never invoked for a given rule and default to `unreachable!()`.
pub trait RuleSpec<T>: Send + Sync {
    /// A short, stable name used in error messages and logs.
    fn name(&self) -> &str;

    fn capability(&self) -> Capability;

    /// Grids this rule reads from. Empty means "the implicit default grid".
    fn reads(&self) -> Vec<GridName> {
        vec![GridName::default_grid()]
    }

    /// Grids this rule writes to. Empty means "the implicit default grid".
    fn writes(&self) -> Vec<GridName> {
        vec![GridName::default_grid()]
    }

    /// The stencil this rule reads over, for `Capability::Neighborhood` rules.
    fn neighborhood(&self) -> Option<&Neighborhood> {
        None
    }

    /// The reduction kernel applied over `neighborhood()`.
    fn reduction(&self) -> Option<&(dyn Reduction<T, Output = f64> + Send + Sync)> {
        None
    }

    /// `Capability::Cell` rules: pure `(context, cell) -> cell`.
    fn apply_cell(&self, _ctx: &Context<'_>, _cell: &T) -> T {
        unreachable!("apply_cell called on a rule that does not declare Capability::Cell")
    }

    /// `Capability::Neighborhood` rules: pure `(context, cell) -> cell`,
    /// where `context.reduction()` carries the neighborhood reduction.
    fn apply_neighborhood(&self, _ctx: &Context<'_>, _cell: &T) -> T {
        unreachable!(
            "apply_neighborhood called on a rule that does not declare Capability::Neighborhood"
        )
    }

    /// `Capability::Chain` rules: thread the intermediate cell value
    /// through a fused sequence of inner rules without materialising it to
    /// the grid (§4.4).
    fn apply_chain(&self, _ctx: &Context<'_>, _cell: &T) -> T {
        unreachable!("apply_chain called on a rule that does not declare Capability::Chain")
    }

    /// `Capability::Manual` rules: may write zero, one, or many arbitrary
    /// cells into `dst` directly. `dst` is pre-initialised with `src`'s
    /// values for this time step (§4.2), so an omitted write defaults to
    /// the source value.
    fn apply_manual(&self, _ctx: &Context<'_>, _src: &Array2<T>, _dst: &mut Array2<T>) {
        unreachable!("apply_manual called on a rule that does not declare Capability::Manual")
    }

    /// Whether `apply_manual`'s writes are safe to run in an arbitrary
    /// (e.g. parallel) cell order. Defaults to `false`, which forces the
    /// driver to run this rule's sweep sequentially (§5).
    fn manual_writes_commute(&self) -> bool {
        false
    }

    /// Pre-computation (§4.2): given the current simulation metadata,
    /// optionally return a replacement rule. Called before the first sweep
    /// and whenever time-dependent data changes. The original rule is left
    /// untouched; the driver rebinds the ruleset to the replacement. Rules
    /// are shared via `Arc` rather than owned by value so that a `Chain` (or
    /// a `Ruleset`) can cheaply keep the links that declined to precompute
    /// instead of needing to clone them.
    fn precompute(&self, _ctx: &PrecomputeContext<'_>) -> Option<Arc<dyn RuleSpec<T>>> {
        None
    }
}
