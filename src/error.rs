use crate::grid::GridShape;

/// Errors surfaced by the driver and its collaborators.
///
/// None of these are recovered silently: a `Result::Err` here always means
/// the current run is over, the sink has already been set to not-running
/// and finalized, and the caller decides what happens next.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("start/resume called on a sink that is already running")]
    AlreadyRunning,

    #[error("no init grid: neither the ruleset nor the start() argument supplied one")]
    NoInit,

    #[error("resume() called on a sink with no stored frames")]
    NoHistory,

    #[error("sink refused the running-flag transition")]
    SinkRejectedStart,

    /// Covers both ways a grid can "disagree with the init grid shape"
    /// (§7): `found: Some(shape)` for a grid that exists but is the wrong
    /// size (e.g. a mask, or a second named grid), `found: None` for a
    /// grid a rule declares in `reads()`/`writes()` that isn't present in
    /// the run at all. `context` names what was being checked (e.g. a mask,
    /// or `rule \`name\` grid \`grid\``).
    #[error("grid shape mismatch ({context}): expected {expected:?}, found {found:?}")]
    GridShapeMismatch {
        context: String,
        expected: GridShape,
        found: Option<GridShape>,
    },

    #[error("rule `{rule}` returned a value incompatible with its declared write-grid element type: expected {expected}, found {found}")]
    RuleReturnTypeMismatch {
        rule: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid chain: {0}")]
    InvalidChain(String),

    /// Not really an error: a cooperative stop requested through the sink's
    /// running flag. Returned as a distinct terminal state so callers can
    /// tell a graceful stop apart from an actual failure.
    #[error("run was cancelled")]
    Cancelled,
}
