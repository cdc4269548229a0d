//! The output sink contract (§6) and two reference sinks: an in-memory
//! store and a minimal terminal renderer.

use std::collections::HashMap;
use std::time::Instant;

use ndarray::Array2;

use crate::rule::GridName;

/// A complete grid state at one simulation step, as emitted to a sink.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame<T> {
    pub time: f64,
    pub grids: HashMap<GridName, Array2<T>>,
}

impl<T> Frame<T> {
    /// The frame's single grid, for simulations that only ever use the
    /// implicit `_default_` grid.
    pub fn default_grid(&self) -> Option<&Array2<T>> {
        self.grids.get(&GridName::default_grid())
    }
}

/// A passive collaborator that receives completed frames (§6).
///
/// Implementations are owned exclusively by the driver for the duration of
/// a run (§5): the driver is the only writer of `running`/`start_time`/
/// `stop_time`/`fps`, and the only reader of stored frames during a run.
pub trait Sink<T>: Send {
    fn push_frame(&mut self, frame: Frame<T>);
    fn length(&self) -> usize;
    fn at(&self, i: usize) -> Option<&Frame<T>>;

    fn is_running(&self) -> bool;
    /// Attempt to transition the running flag. Returns `false` if the sink
    /// refuses (driver surfaces this as `SimError::SinkRejectedStart`).
    fn set_running(&mut self, running: bool) -> bool;

    fn start_time(&self) -> Option<Instant>;
    fn set_start_time(&mut self, t: Option<Instant>);
    fn stop_time(&self) -> Option<Instant>;
    fn set_stop_time(&mut self, t: Option<Instant>);

    fn fps(&self) -> f64;
    fn set_fps(&mut self, fps: f64);

    /// Whether the driver should run this sink's loop on a background
    /// thread with a cooperative yield after each frame (§4.5).
    fn is_async(&self) -> bool {
        false
    }

    /// Called once when a run ends, after the running flag is cleared and
    /// the stop time is recorded.
    fn finalize(&mut self) {}
}

/// In-memory frame store. The default, synchronous sink: always accepts a
/// running-flag transition.
pub struct MemorySink<T> {
    frames: Vec<Frame<T>>,
    running: bool,
    start_time: Option<Instant>,
    stop_time: Option<Instant>,
    fps: f64,
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        MemorySink {
            frames: Vec::new(),
            running: false,
            start_time: None,
            stop_time: None,
            fps: 30.0,
        }
    }
}

impl<T> MemorySink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[Frame<T>] {
        &self.frames
    }
}

impl<T: Send> Sink<T> for MemorySink<T> {
    fn push_frame(&mut self, frame: Frame<T>) {
        self.frames.push(frame);
    }

    fn length(&self) -> usize {
        self.frames.len()
    }

    fn at(&self, i: usize) -> Option<&Frame<T>> {
        self.frames.get(i)
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn set_running(&mut self, running: bool) -> bool {
        self.running = running;
        true
    }

    fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    fn set_start_time(&mut self, t: Option<Instant>) {
        self.start_time = t;
    }

    fn stop_time(&self) -> Option<Instant> {
        self.stop_time
    }

    fn set_stop_time(&mut self, t: Option<Instant>) {
        self.stop_time = t;
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn set_fps(&mut self, fps: f64) {
        self.fps = fps;
    }
}

/// Renders each frame's default grid as a block of glyphs to stdout via a
/// user-supplied mapping, while still keeping the frame history so
/// `resume()` has something to pick up from.
///
/// This is a reference implementation exercising the sink contract, not a
/// real terminal UI — a concrete renderer is an external collaborator
/// (§1, §6).
pub struct TerminalSink<T, F> {
    inner: MemorySink<T>,
    glyph: F,
}

impl<T, F> TerminalSink<T, F>
where
    F: Fn(&T) -> char,
{
    pub fn new(glyph: F) -> Self {
        TerminalSink {
            inner: MemorySink::new(),
            glyph,
        }
    }

    fn render(&self, frame: &Frame<T>) {
        if let Some(grid) = frame.default_grid() {
            let (rows, cols) = grid.dim();
            let mut out = String::with_capacity(rows * (cols + 1));
            for r in 0..rows {
                for c in 0..cols {
                    out.push((self.glyph)(&grid[(r, c)]));
                }
                out.push('\n');
            }
            print!("{out}");
        }
    }
}

impl<T: Send, F: Fn(&T) -> char + Send> Sink<T> for TerminalSink<T, F> {
    fn push_frame(&mut self, frame: Frame<T>) {
        self.render(&frame);
        self.inner.push_frame(frame);
    }

    fn length(&self) -> usize {
        self.inner.length()
    }

    fn at(&self, i: usize) -> Option<&Frame<T>> {
        self.inner.at(i)
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    fn set_running(&mut self, running: bool) -> bool {
        self.inner.set_running(running)
    }

    fn start_time(&self) -> Option<Instant> {
        self.inner.start_time()
    }

    fn set_start_time(&mut self, t: Option<Instant>) {
        self.inner.set_start_time(t)
    }

    fn stop_time(&self) -> Option<Instant> {
        self.inner.stop_time()
    }

    fn set_stop_time(&mut self, t: Option<Instant>) {
        self.inner.set_stop_time(t)
    }

    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn set_fps(&mut self, fps: f64) {
        self.inner.set_fps(fps)
    }

    fn finalize(&mut self) {
        log::debug!("terminal sink finalized after {} frames", self.length());
    }
}
