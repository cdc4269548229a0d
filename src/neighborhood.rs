//! Stencils around a cell, reduction kernels over them, and the buffered
//! sweep that evaluates a neighborhood reduction at every cell of a grid.

use ndarray::Array2;

use crate::grid::Grid;

/// A relative offset `(di, dj)` from a center cell.
pub type Offset = (i32, i32);

/// How a [`Neighborhood`]'s offsets were generated. Only `Radial` stencils
/// are eligible for the incremental row/column-buffered sweep; every other
/// shape falls back to the generic per-cell reduction (§4.3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NeighborhoodKind {
    /// All offsets within Chebyshev distance `r`, excluding the center.
    Radial(u32),
    /// All offsets within Manhattan distance `r`, excluding the center.
    VonNeumann(u32),
    /// An arbitrary, user-supplied offset list.
    Custom,
}

/// An immutable stencil of offsets around a cell.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Neighborhood {
    offsets: Vec<Offset>,
    kind: NeighborhoodKind,
}

impl Neighborhood {
    pub fn from_offsets(offsets: Vec<Offset>) -> Self {
        Neighborhood {
            offsets,
            kind: NeighborhoodKind::Custom,
        }
    }

    /// The radial (Moore-style) neighborhood of radius `r`: every offset
    /// within Chebyshev distance `r`, excluding `(0, 0)`.
    pub fn radial(r: u32) -> Self {
        let r = r as i32;
        let mut offsets = Vec::with_capacity(((2 * r + 1) * (2 * r + 1) - 1).max(0) as usize);
        for di in -r..=r {
            for dj in -r..=r {
                if (di, dj) != (0, 0) {
                    offsets.push((di, dj));
                }
            }
        }
        Neighborhood {
            offsets,
            kind: NeighborhoodKind::Radial(r as u32),
        }
    }

    /// The Moore (8-neighbor) stencil: `radial(1)`.
    pub fn moore() -> Self {
        Self::radial(1)
    }

    /// The von Neumann neighborhood of radius `r`: every offset within
    /// Manhattan distance `r`, excluding `(0, 0)`.
    pub fn von_neumann(r: u32) -> Self {
        let ri = r as i32;
        let mut offsets = Vec::new();
        for di in -ri..=ri {
            for dj in -ri..=ri {
                if (di, dj) != (0, 0) && di.abs() + dj.abs() <= ri {
                    offsets.push((di, dj));
                }
            }
        }
        Neighborhood {
            offsets,
            kind: NeighborhoodKind::VonNeumann(r),
        }
    }

    /// The 4-neighbor cross stencil: `von_neumann(1)`.
    pub fn cross() -> Self {
        Self::von_neumann(1)
    }

    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }

    pub fn kind(&self) -> NeighborhoodKind {
        self.kind
    }
}

/// A reduction kernel over the values a [`Neighborhood`] selects.
///
/// Implementations that declare `is_incremental() == true` must also
/// implement `add`/`remove` so the buffered sweep can maintain a running
/// accumulator instead of recomputing `reduce` at every cell.
pub trait Reduction<T>: Send + Sync {
    type Output: Clone + Send + Sync;

    /// The reduction over zero values (the accumulator's starting point).
    fn empty(&self) -> Self::Output;

    /// Recompute the reduction from scratch over an explicit list of
    /// neighbor values. `None` entries are cells that were excluded under
    /// `OverflowPolicy::Skip` — they must be treated as absent, not as a
    /// zero-valued neighbor.
    fn reduce(&self, values: &[Option<&T>]) -> Self::Output;

    /// Whether this reduction is associative-with-inverse and can be
    /// maintained incrementally as the sweep's window slides.
    fn is_incremental(&self) -> bool {
        false
    }

    /// Fold one more value into the accumulator. Only called when
    /// `is_incremental()` is true.
    fn add(&self, _acc: &mut Self::Output, _value: Option<&T>) {
        unimplemented!("Reduction::add must be overridden when is_incremental() returns true")
    }

    /// Remove a value previously folded in by `add`. Only called when
    /// `is_incremental()` is true.
    fn remove(&self, _acc: &mut Self::Output, _value: Option<&T>) {
        unimplemented!("Reduction::remove must be overridden when is_incremental() returns true")
    }
}

/// Counts neighbors for which `predicate` holds. The canonical life-style
/// "count of live neighbors" reduction.
#[derive(Clone, Copy, Default)]
pub struct Count<F> {
    pub predicate: F,
}

impl<T, F> Reduction<T> for Count<F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    type Output = usize;

    fn empty(&self) -> usize {
        0
    }

    fn reduce(&self, values: &[Option<&T>]) -> usize {
        values
            .iter()
            .filter(|v| v.map(|c| (self.predicate)(c)).unwrap_or(false))
            .count()
    }

    fn is_incremental(&self) -> bool {
        true
    }

    fn add(&self, acc: &mut usize, value: Option<&T>) {
        if value.map(|c| (self.predicate)(c)).unwrap_or(false) {
            *acc += 1;
        }
    }

    fn remove(&self, acc: &mut usize, value: Option<&T>) {
        if value.map(|c| (self.predicate)(c)).unwrap_or(false) {
            *acc -= 1;
        }
    }
}

/// Counts neighbors for which `predicate` holds, same as [`Count`] but with
/// an `f64` output so it can be used directly as a rule's declared
/// reduction: `RuleSpec::reduction` standardizes on `Output = f64` so that
/// heterogeneous rules can share one object-safe signature (§4.2, §9).
#[derive(Clone, Copy, Default)]
pub struct CountF64<F> {
    pub predicate: F,
}

impl<T, F> Reduction<T> for CountF64<F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    type Output = f64;

    fn empty(&self) -> f64 {
        0.0
    }

    fn reduce(&self, values: &[Option<&T>]) -> f64 {
        values
            .iter()
            .filter(|v| v.map(|c| (self.predicate)(c)).unwrap_or(false))
            .count() as f64
    }

    fn is_incremental(&self) -> bool {
        true
    }

    fn add(&self, acc: &mut f64, value: Option<&T>) {
        if value.map(|c| (self.predicate)(c)).unwrap_or(false) {
            *acc += 1.0;
        }
    }

    fn remove(&self, acc: &mut f64, value: Option<&T>) {
        if value.map(|c| (self.predicate)(c)).unwrap_or(false) {
            *acc -= 1.0;
        }
    }
}

/// Sums neighbor values in place, for cell types that are themselves the
/// accumulator (numeric grids).
#[derive(Clone, Copy, Default)]
pub struct Sum;

impl<T> Reduction<T> for Sum
where
    T: Copy + Send + Sync + Default + std::ops::Add<Output = T> + std::ops::Sub<Output = T>,
{
    type Output = T;

    fn empty(&self) -> T {
        T::default()
    }

    fn reduce(&self, values: &[Option<&T>]) -> T {
        values
            .iter()
            .fold(T::default(), |acc, v| if let Some(v) = v { acc + *v } else { acc })
    }

    fn is_incremental(&self) -> bool {
        true
    }

    fn add(&self, acc: &mut T, value: Option<&T>) {
        if let Some(v) = value {
            *acc = *acc + *v;
        }
    }

    fn remove(&self, acc: &mut T, value: Option<&T>) {
        if let Some(v) = value {
            *acc = *acc - *v;
        }
    }
}

/// Wraps an arbitrary function as a one-off reduction. Always recomputed
/// per cell — never incremental.
pub struct Custom<F> {
    pub f: F,
}

impl<T, R, F> Reduction<T> for Custom<F>
where
    F: Fn(&[Option<&T>]) -> R + Send + Sync,
    R: Clone + Send + Sync,
{
    type Output = R;

    fn empty(&self) -> R {
        (self.f)(&[])
    }

    fn reduce(&self, values: &[Option<&T>]) -> R {
        (self.f)(values)
    }
}

/// Evaluates a [`Reduction`] over a [`Neighborhood`] at every cell of a grid.
///
/// For a `Radial` neighborhood whose reduction opts into incremental
/// maintenance, this resolves each row's window once (the "row buffering"
/// of §4.3 point 1) and then slides a running accumulator across columns,
/// adding the incoming column and subtracting the outgoing one (§4.3 point
/// 2), instead of re-reducing the full stencil at every cell. Any other
/// combination falls back to the generic per-cell reduction.
pub fn sweep<T, Red>(grid: &Grid<T>, neighborhood: &Neighborhood, reduction: &Red) -> Array2<Red::Output>
where
    Red: Reduction<T> + ?Sized,
{
    if let NeighborhoodKind::Radial(r) = neighborhood.kind() {
        if reduction.is_incremental() {
            return radial_incremental(grid, r, reduction);
        }
    }
    generic(grid, neighborhood, reduction)
}

fn generic<T, Red>(grid: &Grid<T>, neighborhood: &Neighborhood, reduction: &Red) -> Array2<Red::Output>
where
    Red: Reduction<T> + ?Sized,
{
    let shape = grid.shape();
    let mut out = Array2::from_elem((shape.rows, shape.cols), reduction.empty());
    let mut values = Vec::with_capacity(neighborhood.offsets().len());
    for i in 0..shape.rows {
        for j in 0..shape.cols {
            values.clear();
            for &(di, dj) in neighborhood.offsets() {
                values.push(grid.read_offset(i, j, di, dj));
            }
            out[(i, j)] = reduction.reduce(&values);
        }
    }
    out
}

/// The accumulator maintained while sliding is the reduction over the
/// *full* `(2r+1) x (2r+1)` box, center cell included — the center is part
/// of the window like any other cell and keeps sliding in and out of it
/// exactly like the rest of the box. Excluding the center is therefore
/// not a one-time step at column 0: it has to be redone at every column,
/// against whatever cell is centered there now. We do that by cloning the
/// running box accumulator and removing that column's own center value
/// from the clone before writing it out, leaving the slid accumulator
/// itself untouched for the next column.
fn radial_incremental<T, Red>(grid: &Grid<T>, r: u32, reduction: &Red) -> Array2<Red::Output>
where
    Red: Reduction<T> + ?Sized,
{
    let shape = grid.shape();
    let r = r as i32;
    let mut out = Array2::from_elem((shape.rows, shape.cols), reduction.empty());

    for i in 0..shape.rows {
        // Resolve this row's window of source rows once ("row buffering").
        let row_idxs: Vec<Option<usize>> = (-r..=r).map(|di| grid.resolve_row(i, di)).collect();

        // Initialize the running accumulator at column 0 over the whole
        // box, including the center cell (i, 0).
        let mut acc = reduction.empty();
        for &row_idx in &row_idxs {
            for dj in -r..=r {
                let col_idx = grid.resolve_col(0, dj);
                let value = match (row_idx, col_idx) {
                    (Some(ri), Some(cj)) => Some(grid.get(ri, cj)),
                    _ => None,
                };
                reduction.add(&mut acc, value);
            }
        }
        out[(i, 0)] = without_center(reduction, &acc, grid, i, 0);

        // Slide the window across columns: drop the outgoing column,
        // fold in the incoming one. The box accumulator always includes
        // every cell in the current window, center included.
        for j in 1..shape.cols {
            for &row_idx in &row_idxs {
                let out_col = grid.resolve_col(j - 1, -r);
                let in_col = grid.resolve_col(j, r);
                let out_value = match (row_idx, out_col) {
                    (Some(ri), Some(cj)) => Some(grid.get(ri, cj)),
                    _ => None,
                };
                let in_value = match (row_idx, in_col) {
                    (Some(ri), Some(cj)) => Some(grid.get(ri, cj)),
                    _ => None,
                };
                reduction.remove(&mut acc, out_value);
                reduction.add(&mut acc, in_value);
            }
            out[(i, j)] = without_center(reduction, &acc, grid, i, j);
        }
    }
    out
}

/// `box_acc` minus the contribution of the cell at `(i, j)` itself, which
/// is always in-bounds (it is the cell being processed, never an
/// out-of-bounds neighbor offset).
fn without_center<T, Red>(reduction: &Red, box_acc: &Red::Output, grid: &Grid<T>, i: usize, j: usize) -> Red::Output
where
    Red: Reduction<T> + ?Sized,
{
    let mut without = box_acc.clone();
    reduction.remove(&mut without, Some(grid.get(i, j)));
    without
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridShape, OverflowPolicy};

    #[test]
    fn radial_offsets_exclude_center() {
        let n = Neighborhood::radial(1);
        assert_eq!(n.offsets().len(), 8);
        assert!(!n.offsets().contains(&(0, 0)));
    }

    #[test]
    fn von_neumann_offsets_are_manhattan_one() {
        let n = Neighborhood::von_neumann(1);
        let mut offsets = n.offsets().to_vec();
        offsets.sort();
        let mut expected = vec![(-1, 0), (1, 0), (0, -1), (0, 1)];
        expected.sort();
        assert_eq!(offsets, expected);
    }

    #[test]
    fn incremental_and_generic_counts_agree_under_wrap() {
        let cells = ndarray::arr2(&[
            [true, false, true, false],
            [false, true, false, true],
            [true, true, false, false],
            [false, false, true, true],
        ]);
        let grid = Grid::from_array(cells, OverflowPolicy::Wrap);
        let nb = Neighborhood::moore();

        let incremental = sweep(&grid, &nb, &Count { predicate: |c: &bool| *c });
        let forced_generic = generic(&grid, &nb, &Count { predicate: |c: &bool| *c });
        assert_eq!(incremental, forced_generic);
    }

    #[test]
    fn skip_overflow_excludes_out_of_bounds_neighbors_from_count() {
        let cells = ndarray::Array2::from_elem((3, 3), true);
        let grid = Grid::from_array(cells, OverflowPolicy::Skip);
        let nb = Neighborhood::moore();
        let counts = sweep(&grid, &nb, &Count { predicate: |c: &bool| *c });
        // Corner cell has only 3 in-bounds neighbors, all true.
        assert_eq!(counts[(0, 0)], 3);
        // Center cell has the full 8.
        assert_eq!(counts[(1, 1)], 8);
    }

    #[test]
    fn shape_helper_roundtrips() {
        let shape: GridShape = (4, 5).into();
        assert_eq!(shape.rows, 4);
        assert_eq!(shape.cols, 5);
    }
}
