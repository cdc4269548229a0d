//! The driver (§4.5, §5): owns the per-frame procedure and the sync/async
//! entry points that run it against a [`Sink`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::parallel::prelude::*;
use ndarray::{Array2, Zip};
use rayon::prelude::*;

use crate::error::SimError;
use crate::grid::{Grid, GridPair, GridShape};
use crate::rule::{AuxValue, Capability, Context, GridName, PrecomputeContext, RuleSpec};
use crate::ruleset::Ruleset;
use crate::simdata::SimData;
use crate::sink::{Frame, Sink};

/// Replicate count plus the aggregation used to collapse them into the
/// single grid delivered to the sink each frame. See
/// [`SimData::with_replicates`].
pub type Replicates<T> = (usize, Arc<dyn Fn(&[&T]) -> T + Send + Sync>);

/// Start a new run. Errors with [`SimError::AlreadyRunning`] if `sink` is
/// already running, or [`SimError::NoInit`] if neither `init` nor
/// `ruleset.init` supplies a starting grid set (§4.5, §9).
pub fn start<T>(
    sink: &mut dyn Sink<T>,
    ruleset: Ruleset<T>,
    init: Option<HashMap<GridName, Grid<T>>>,
    tspan: (f64, f64),
    fps: f64,
    replicates: Option<Replicates<T>>,
) -> Result<SimData<T>, SimError>
where
    T: Clone + Send + Sync + 'static,
{
    let resolved_init = resolve_init(sink, &ruleset, init)?;
    validate_rule_grids(&ruleset, &resolved_init)?;
    let mut sim = SimData::new(resolved_init, ruleset);
    if let Some((n, aggregate)) = replicates {
        sim = sim.with_replicates(n, aggregate);
    }
    run_loop(sink, sim, tspan, fps, 1, false, false)
}

/// Run [`start`] on a background thread with a cooperative yield after each
/// frame, for sinks that declare [`Sink::is_async`]. Validation that would
/// make `start` fail synchronously (`AlreadyRunning`, `NoInit`) still runs
/// before the thread is spawned, so the caller sees it immediately.
pub fn start_async<T>(
    mut sink: Box<dyn Sink<T> + Send>,
    ruleset: Ruleset<T>,
    init: Option<HashMap<GridName, Grid<T>>>,
    tspan: (f64, f64),
    fps: f64,
    replicates: Option<Replicates<T>>,
) -> Result<std::thread::JoinHandle<Result<(SimData<T>, Box<dyn Sink<T> + Send>), SimError>>, SimError>
where
    T: Clone + Send + Sync + 'static,
{
    if !sink.is_async() {
        log::warn!("start_async called on a sink whose is_async() returns false");
    }
    let resolved_init = resolve_init(sink.as_ref(), &ruleset, init)?;
    validate_rule_grids(&ruleset, &resolved_init)?;
    let mut sim = SimData::new(resolved_init, ruleset);
    if let Some((n, aggregate)) = replicates {
        sim = sim.with_replicates(n, aggregate);
    }
    Ok(std::thread::spawn(move || {
        run_loop(sink.as_mut(), sim, tspan, fps, 1, false, true).map(|sim| (sim, sink))
    }))
}

/// Resume a run from the sink's last stored frame. Errors with
/// [`SimError::AlreadyRunning`] or [`SimError::NoHistory`] (zero stored
/// frames). Frame numbering continues from the previous run (§4.5).
pub fn resume<T>(
    sink: &mut dyn Sink<T>,
    ruleset: Ruleset<T>,
    tstop: f64,
    fps: f64,
    replicates: Option<Replicates<T>>,
) -> Result<SimData<T>, SimError>
where
    T: Clone + Send + Sync + 'static,
{
    let (sim, tstart) = resolve_resume(sink, ruleset, replicates)?;
    let frame_no_start = sink.length() as u64 + 1;
    run_loop(sink, sim, (tstart, tstop), fps, frame_no_start, true, false)
}

/// The async counterpart of [`resume`]; see [`start_async`].
pub fn resume_async<T>(
    mut sink: Box<dyn Sink<T> + Send>,
    ruleset: Ruleset<T>,
    tstop: f64,
    fps: f64,
    replicates: Option<Replicates<T>>,
) -> Result<std::thread::JoinHandle<Result<(SimData<T>, Box<dyn Sink<T> + Send>), SimError>>, SimError>
where
    T: Clone + Send + Sync + 'static,
{
    if !sink.is_async() {
        log::warn!("resume_async called on a sink whose is_async() returns false");
    }
    let (sim, tstart) = resolve_resume(sink.as_mut(), ruleset, replicates)?;
    let frame_no_start = sink.length() as u64 + 1;
    Ok(std::thread::spawn(move || {
        run_loop(sink.as_mut(), sim, (tstart, tstop), fps, frame_no_start, true, true)
            .map(|sim| (sim, sink))
    }))
}

fn resolve_init<T>(
    sink: &dyn Sink<T>,
    ruleset: &Ruleset<T>,
    init: Option<HashMap<GridName, Grid<T>>>,
) -> Result<HashMap<GridName, Grid<T>>, SimError>
where
    T: Clone,
{
    if sink.is_running() {
        log::error!("start(): sink is already running");
        return Err(SimError::AlreadyRunning);
    }
    match (init, ruleset.init.clone()) {
        (Some(arg_init), Some(rs_init)) => {
            if !shapes_match(&arg_init, &rs_init) {
                log::warn!(
                    "start(): both an explicit init and a ruleset-carried init were supplied \
                     and differ in shape; using the explicit argument"
                );
            }
            Ok(arg_init)
        }
        (Some(arg_init), None) => Ok(arg_init),
        (None, Some(rs_init)) => Ok(rs_init),
        (None, None) => {
            log::error!("start(): neither an explicit init nor ruleset.init supplied a grid set");
            Err(SimError::NoInit)
        }
    }
}

fn resolve_resume<T>(
    sink: &dyn Sink<T>,
    ruleset: Ruleset<T>,
    replicates: Option<Replicates<T>>,
) -> Result<(SimData<T>, f64), SimError>
where
    T: Clone + Send + Sync + 'static,
{
    if sink.is_running() {
        log::error!("resume(): sink is already running");
        return Err(SimError::AlreadyRunning);
    }
    if sink.length() == 0 {
        log::error!("resume(): sink has no stored frames");
        return Err(SimError::NoHistory);
    }
    let last = sink
        .at(sink.length() - 1)
        .expect("length() > 0 implies at(length() - 1) is Some");
    let tstart = last.time;
    let overflow = ruleset.overflow;
    let init: HashMap<GridName, Grid<T>> = last
        .grids
        .iter()
        .map(|(name, arr)| (name.clone(), Grid::from_array(arr.clone(), overflow)))
        .collect();

    validate_rule_grids(&ruleset, &init)?;
    let mut sim = SimData::new(init, ruleset);
    if let Some((n, aggregate)) = replicates {
        sim = sim.with_replicates(n, aggregate);
    }
    Ok((sim, tstart))
}

/// Checks every rule's declared read/write grids against the run's actual
/// grid set (§7: "rule read/write sets... disagree with the init grid
/// shape"): every declared name must be present, and every grid present in
/// the run must share one shape (§3, "width x height constant"). Called
/// once up front by `start`/`start_async`/`resume`/`resume_async`, before
/// the sink ever transitions to running, so a missing or mismatched grid
/// surfaces as a `Result`, never as a mid-sweep panic.
fn validate_rule_grids<T>(ruleset: &Ruleset<T>, grids: &HashMap<GridName, Grid<T>>) -> Result<(), SimError> {
    let mut reference: Option<(GridName, GridShape)> = None;
    for (name, grid) in grids {
        let shape = grid.shape();
        match &reference {
            None => reference = Some((name.clone(), shape)),
            Some((ref_name, expected)) if *expected != shape => {
                log::error!("grid `{name}` has shape {shape:?}, grid `{ref_name}` has shape {expected:?}");
                return Err(SimError::GridShapeMismatch {
                    context: format!("grid `{name}` vs. grid `{ref_name}`"),
                    expected: *expected,
                    found: Some(shape),
                });
            }
            _ => {}
        }
    }

    for rule in ruleset.entries() {
        for name in rule.reads().into_iter().chain(rule.writes()) {
            if !grids.contains_key(&name) {
                log::error!("rule `{}` declares grid `{name}`, which is absent from this run", rule.name());
                return Err(SimError::GridShapeMismatch {
                    context: format!("rule `{}` declares grid `{name}`", rule.name()),
                    expected: reference.as_ref().map(|(_, s)| *s).unwrap_or_else(|| GridShape::new(0, 0)),
                    found: None,
                });
            }
        }
    }
    Ok(())
}

fn shapes_match<T>(a: &HashMap<GridName, Grid<T>>, b: &HashMap<GridName, Grid<T>>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(name, grid)| b.get(name).map(Grid::shape) == Some(grid.shape()))
}

/// The shared per-frame procedure behind `start`/`resume` and their async
/// counterparts (§4.5).
///
/// `frame_no_start` is the number assigned to the first frame this call
/// pushes (1 for a fresh `start`, `sink.length() + 1` for a `resume`).
/// `skip_initial_frame` is `true` for `resume`, which doesn't re-push the
/// frame already sitting in the sink. `cooperative_yield` is `true` only
/// when running on the background thread spawned by `start_async`/
/// `resume_async`.
fn run_loop<T>(
    sink: &mut dyn Sink<T>,
    mut sim: SimData<T>,
    tspan: (f64, f64),
    fps: f64,
    frame_no_start: u64,
    skip_initial_frame: bool,
    cooperative_yield: bool,
) -> Result<SimData<T>, SimError>
where
    T: Clone + Send + Sync + 'static,
{
    if !sink.set_running(true) {
        log::error!("sink refused the running-flag transition");
        return Err(SimError::SinkRejectedStart);
    }
    sink.set_start_time(Some(Instant::now()));
    sink.set_fps(fps);

    let dt = sim.ruleset.dt;
    let step_count = (((tspan.1 - tspan.0) / dt).round() as u64) + 1;
    let frame_start = Instant::now();
    let mut last_pace = frame_start;
    let mut frame_no = frame_no_start;

    if !skip_initial_frame {
        sim.frame = frame_no;
        sim.time = tspan.0;
        sink.push_frame(build_frame(&sim));
        log::debug!(
            "frame {} pushed (t={:.6}, elapsed since last pace point {:?})",
            sim.frame,
            sim.time,
            last_pace.elapsed()
        );
        if cooperative_yield {
            std::thread::yield_now();
        }
        if step_count == 1 {
            finalize_run(sink, &sim);
            return Ok(sim);
        }
        frame_no += 1;
    }

    for step in 2..=step_count {
        sim.time = tspan.0 + (step - 1) as f64 * dt;
        sim.frame = frame_no;

        let pctx = PrecomputeContext {
            time: sim.time,
            dt,
            frame: sim.frame,
            aux: &sim.aux,
        };
        sim.ruleset = sim.ruleset.precompute(&pctx);

        let ruleset_ref = &sim.ruleset;
        let aux_ref = &sim.aux;
        let time = sim.time;
        if let Some(reps) = sim.replicates.as_mut() {
            reps.par_iter_mut()
                .for_each(|rep| sweep_ruleset(ruleset_ref, rep, aux_ref, time, dt));
        } else {
            sweep_ruleset(ruleset_ref, &mut sim.grids, aux_ref, time, dt);
        }

        sink.push_frame(build_frame(&sim));
        log::debug!(
            "frame {} pushed (t={:.6}, elapsed since last pace point {:?})",
            sim.frame,
            sim.time,
            last_pace.elapsed()
        );
        if cooperative_yield {
            std::thread::yield_now();
        }

        let cancelled = sim.is_cancelled() || !sink.is_running();
        if cancelled {
            log::warn!("run cancelled after frame {}; stopping gracefully", sim.frame);
        }
        if cancelled || step == step_count {
            finalize_run(sink, &sim);
            return if cancelled && step != step_count {
                Err(SimError::Cancelled)
            } else {
                Ok(sim)
            };
        }

        frame_no += 1;
        let target = frame_start + Duration::from_secs_f64((step - 1) as f64 / fps);
        let now = Instant::now();
        if target > now {
            std::thread::sleep(target - now);
        }
    }
    unreachable!("the step == step_count branch above always returns")
}

fn finalize_run<T>(sink: &mut dyn Sink<T>, _sim: &SimData<T>) {
    sink.set_running(false);
    sink.set_stop_time(Some(Instant::now()));
    sink.finalize();
}

/// Snapshot the current grid state (aggregated across replicates, if any)
/// into a [`Frame`] for delivery to the sink.
fn build_frame<T: Clone>(sim: &SimData<T>) -> Frame<T> {
    let mut grids = HashMap::new();
    match &sim.replicates {
        None => {
            for (name, pair) in &sim.grids {
                grids.insert(name.clone(), pair.src.cells().clone());
            }
        }
        Some(reps) => {
            let aggregate = sim
                .aggregate
                .as_ref()
                .expect("replicates is Some implies an aggregate was set by with_replicates");
            let first = reps.first().expect("replicates is never an empty vec");
            for name in first.keys() {
                let shape = first[name].src.shape();
                let mut data = Vec::with_capacity(shape.rows * shape.cols);
                for i in 0..shape.rows {
                    for j in 0..shape.cols {
                        let values: Vec<&T> = reps.iter().map(|rep| rep[name].src.get(i, j)).collect();
                        data.push(aggregate(&values));
                    }
                }
                let arr = Array2::from_shape_vec((shape.rows, shape.cols), data)
                    .expect("data.len() == rows * cols by construction");
                grids.insert(name.clone(), arr);
            }
        }
    }
    Frame { time: sim.time, grids }
}

/// Sweep every ruleset entry in order against one grid set, swapping each
/// entry's written grid(s) between sweeps so the next entry reads the
/// result of the previous one (§4.5).
fn sweep_ruleset<T>(
    ruleset: &Ruleset<T>,
    grids: &mut HashMap<GridName, GridPair<T>>,
    aux: &HashMap<GridName, Array2<AuxValue>>,
    time: f64,
    dt: f64,
) where
    T: Clone + Send + Sync,
{
    for rule in ruleset.entries() {
        sweep_rule(rule.as_ref(), grids, aux, time, dt);
        for name in rule.writes() {
            if let Some(pair) = grids.get_mut(&name) {
                pair.swap();
            }
        }
    }
}

fn sweep_rule<T>(
    rule: &dyn RuleSpec<T>,
    grids: &mut HashMap<GridName, GridPair<T>>,
    aux: &HashMap<GridName, Array2<AuxValue>>,
    time: f64,
    dt: f64,
) where
    T: Clone + Send + Sync,
{
    log::trace!("sweeping rule `{}` ({:?})", rule.name(), rule.capability());
    match rule.capability() {
        Capability::Manual => sweep_manual(rule, grids, aux, time, dt),
        Capability::Cell | Capability::Neighborhood | Capability::Chain => {
            sweep_functional(rule, grids, aux, time, dt)
        }
    }
}

fn sweep_functional<T>(
    rule: &dyn RuleSpec<T>,
    grids: &mut HashMap<GridName, GridPair<T>>,
    aux: &HashMap<GridName, Array2<AuxValue>>,
    time: f64,
    dt: f64,
) where
    T: Clone + Send + Sync,
{
    let read_name = rule.reads().into_iter().next().expect("reads() is never empty");
    let write_name = rule.writes().into_iter().next().expect("writes() is never empty");
    let capability = rule.capability();

    if read_name == write_name {
        let pair = grids
            .get_mut(&write_name)
            .expect("validate_rule_grids checked every declared grid is present before the run started");
        apply_functional_sweep(rule, capability, &pair.src, &mut pair.dst, aux, time, dt);
    } else {
        let read_pair = grids
            .remove(&read_name)
            .expect("validate_rule_grids checked every declared grid is present before the run started");
        let mut write_pair = grids
            .remove(&write_name)
            .expect("validate_rule_grids checked every declared grid is present before the run started");
        apply_functional_sweep(rule, capability, &read_pair.src, &mut write_pair.dst, aux, time, dt);
        grids.insert(write_name, write_pair);
        grids.insert(read_name, read_pair);
    }
}

/// The parallel cell sweep shared by `Cell`/`Neighborhood`/`Chain` rules:
/// masked cells are carried through unchanged, everything else is the
/// rule's declared reduction (when any) plus `apply_*` dispatched on
/// `capability` (§4.2, §4.3).
fn apply_functional_sweep<T>(
    rule: &dyn RuleSpec<T>,
    capability: Capability,
    src: &Grid<T>,
    dst: &mut Grid<T>,
    aux: &HashMap<GridName, Array2<AuxValue>>,
    time: f64,
    dt: f64,
) where
    T: Clone + Send + Sync,
{
    let reduction_owned: Option<Array2<f64>> = rule.neighborhood().map(|nb| {
        crate::neighborhood::sweep(
            src,
            nb,
            rule.reduction()
                .expect("a rule declaring a neighborhood must also declare its reduction"),
        )
    });
    let reduction_view = reduction_owned.as_ref();

    Zip::indexed(dst.cells_mut()).and(src.cells()).par_for_each(|(i, j), d, s| {
        if src.is_masked_out(i, j) {
            *d = s.clone();
            return;
        }
        let reduction = reduction_view.map(|r| r[(i, j)]);
        let ctx = Context::new(time, dt, reduction, aux, (i, j));
        *d = match capability {
            Capability::Cell => rule.apply_cell(&ctx, s),
            Capability::Neighborhood => rule.apply_neighborhood(&ctx, s),
            Capability::Chain => rule.apply_chain(&ctx, s),
            Capability::Manual => unreachable!("manual rules are dispatched by sweep_manual"),
        };
    });
}

/// Manual rules first copy source to destination, then get full read/write
/// access to both arrays (§4.2); they always run sequentially unless
/// `manual_writes_commute()` says otherwise.
fn sweep_manual<T>(
    rule: &dyn RuleSpec<T>,
    grids: &mut HashMap<GridName, GridPair<T>>,
    aux: &HashMap<GridName, Array2<AuxValue>>,
    time: f64,
    dt: f64,
) where
    T: Clone + Send + Sync,
{
    let read_name = rule.reads().into_iter().next().expect("reads() is never empty");
    let write_name = rule.writes().into_iter().next().expect("writes() is never empty");
    let ctx = Context::new(time, dt, None, aux, (0, 0));

    if read_name == write_name {
        let pair = grids
            .get_mut(&write_name)
            .expect("validate_rule_grids checked every declared grid is present before the run started");
        pair.dst.cells_mut().assign(pair.src.cells());
        rule.apply_manual(&ctx, pair.src.cells(), pair.dst.cells_mut());
    } else {
        let read_pair = grids
            .remove(&read_name)
            .expect("validate_rule_grids checked every declared grid is present before the run started");
        let mut write_pair = grids
            .remove(&write_name)
            .expect("validate_rule_grids checked every declared grid is present before the run started");
        write_pair.dst.cells_mut().assign(read_pair.src.cells());
        rule.apply_manual(&ctx, read_pair.src.cells(), write_pair.dst.cells_mut());
        grids.insert(write_name, write_pair);
        grids.insert(read_name, read_pair);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::OverflowPolicy;
    use crate::sink::MemorySink;

    struct Increment;
    impl RuleSpec<u8> for Increment {
        fn name(&self) -> &str {
            "increment"
        }
        fn capability(&self) -> Capability {
            Capability::Cell
        }
        fn apply_cell(&self, _ctx: &Context<'_>, cell: &u8) -> u8 {
            cell.wrapping_add(1)
        }
    }

    fn single_grid_init(shape: GridShape, fill: u8) -> HashMap<GridName, Grid<u8>> {
        let mut init = HashMap::new();
        init.insert(GridName::default_grid(), Grid::new(shape, fill, OverflowPolicy::Wrap));
        init
    }

    #[test]
    fn start_rejects_when_sink_already_running() {
        let mut sink: MemorySink<u8> = MemorySink::new();
        sink.set_running(true);
        let ruleset = Ruleset::new(vec![Arc::new(Increment)], 1.0, OverflowPolicy::Wrap);
        let init = single_grid_init(GridShape::new(2, 2), 0);
        let err = start(&mut sink, ruleset, Some(init), (0.0, 3.0), 1000.0, None).unwrap_err();
        assert!(matches!(err, SimError::AlreadyRunning));
    }

    #[test]
    fn start_rejects_with_no_init() {
        let mut sink: MemorySink<u8> = MemorySink::new();
        let ruleset: Ruleset<u8> = Ruleset::new(vec![Arc::new(Increment)], 1.0, OverflowPolicy::Wrap);
        let err = start(&mut sink, ruleset, None, (0.0, 3.0), 1000.0, None).unwrap_err();
        assert!(matches!(err, SimError::NoInit));
    }

    #[test]
    fn start_delivers_the_expected_frame_count() {
        let mut sink: MemorySink<u8> = MemorySink::new();
        let ruleset = Ruleset::new(vec![Arc::new(Increment)], 1.0, OverflowPolicy::Wrap);
        let init = single_grid_init(GridShape::new(2, 2), 0);
        let sim = start(&mut sink, ruleset, Some(init), (0.0, 3.0), 1_000_000.0, None).unwrap();
        assert_eq!(sink.length(), 4);
        assert_eq!(sim.frame, 4);
        assert!(!sink.is_running());
    }

    #[test]
    fn every_cell_advances_by_one_per_step() {
        let mut sink: MemorySink<u8> = MemorySink::new();
        let ruleset = Ruleset::new(vec![Arc::new(Increment)], 1.0, OverflowPolicy::Wrap);
        let init = single_grid_init(GridShape::new(2, 2), 10);
        start(&mut sink, ruleset, Some(init), (0.0, 2.0), 1_000_000.0, None).unwrap();
        let last = sink.at(2).unwrap().default_grid().unwrap();
        assert!(last.iter().all(|&v| v == 12));
    }

    #[test]
    fn resume_rejects_with_no_history() {
        let mut sink: MemorySink<u8> = MemorySink::new();
        let ruleset: Ruleset<u8> = Ruleset::new(vec![Arc::new(Increment)], 1.0, OverflowPolicy::Wrap);
        let err = resume(&mut sink, ruleset, 3.0, 1000.0, None).unwrap_err();
        assert!(matches!(err, SimError::NoHistory));
    }

    #[test]
    fn resume_continues_from_the_last_frame() {
        let mut sink: MemorySink<u8> = MemorySink::new();
        let ruleset = Ruleset::new(vec![Arc::new(Increment)], 1.0, OverflowPolicy::Wrap);
        let init = single_grid_init(GridShape::new(2, 2), 0);
        start(&mut sink, ruleset, Some(init), (0.0, 1.0), 1_000_000.0, None).unwrap();
        assert_eq!(sink.length(), 2);

        let ruleset2 = Ruleset::new(vec![Arc::new(Increment)], 1.0, OverflowPolicy::Wrap);
        resume(&mut sink, ruleset2, 3.0, 1_000_000.0, None).unwrap();
        assert_eq!(sink.length(), 4);
        let last = sink.at(3).unwrap().default_grid().unwrap();
        assert!(last.iter().all(|&v| v == 3));
    }
}
