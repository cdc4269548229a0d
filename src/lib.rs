//! Gridsim is a library for running cellular-automaton-style simulations on
//! rectangular grids: rule-driven cell transitions, reduction-based
//! neighborhood access with a buffered incremental sweep, fused rule
//! chains, replicate simulation, and a pluggable output sink.
//!
//! A simulation is built from three pieces:
//!
//! - One or more named [`Grid`]s of cells, each with its own boundary
//!   [`OverflowPolicy`] and optional mask.
//! - A [`Ruleset`] — an ordered sequence of [`RuleSpec`]s (and/or
//!   [`Chain`]s, which are themselves rules) applied every time step.
//! - A [`Sink`] that receives each completed frame and owns the run's
//!   lifecycle flags.
//!
//! [`driver::start`]/[`driver::resume`] tie these together and run the
//! per-frame procedure; [`driver::start_async`]/[`driver::resume_async`] run
//! the same loop on a background thread for sinks that declare
//! [`Sink::is_async`].

pub mod chain;
pub mod driver;
pub mod error;
pub mod grid;
pub mod life;
pub mod neighborhood;
pub mod rule;
pub mod ruleset;
pub mod simdata;
pub mod sink;

pub use chain::Chain;
pub use error::SimError;
pub use grid::{Grid, GridPair, GridShape, OverflowPolicy};
pub use life::GameOfLife;
pub use neighborhood::{Count, CountF64, Custom, Neighborhood, NeighborhoodKind, Offset, Reduction, Sum};
pub use rule::{AuxValue, Capability, Context, GridName, PrecomputeContext, RuleSpec};
pub use ruleset::Ruleset;
pub use simdata::{replicate_mean, SimData};
pub use sink::{Frame, MemorySink, Sink, TerminalSink};
