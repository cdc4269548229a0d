//! Grid storage, boundary-overflow policy and the optional cell mask.

use ndarray::Array2;
use std::mem;

use crate::error::SimError;

/// Shape of a grid, in `(rows, cols)` order — matches `ndarray::Array2::dim()`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        GridShape { rows, cols }
    }
}

impl From<(usize, usize)> for GridShape {
    fn from((rows, cols): (usize, usize)) -> Self {
        GridShape { rows, cols }
    }
}

/// Boundary behaviour for neighbor reads and offset resolution outside
/// `[0, rows) x [0, cols)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OverflowPolicy {
    /// Indices are mapped modulo the dimensions (a torus).
    Wrap,
    /// Indices outside the grid contribute nothing; neighbor reads return
    /// `None` rather than a zero value.
    Skip,
}

/// A rectangular array of cells plus its overflow policy and optional mask.
///
/// Absence of a mask is equivalent to an all-true mask and costs nothing in
/// the hot path: `is_masked_out` short-circuits on `None` before ever
/// touching an array.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Grid<T> {
    cells: Array2<T>,
    overflow: OverflowPolicy,
    mask: Option<Array2<bool>>,
}

impl<T> Grid<T> {
    pub fn from_array(cells: Array2<T>, overflow: OverflowPolicy) -> Self {
        Grid {
            cells,
            overflow,
            mask: None,
        }
    }

    pub fn new(shape: GridShape, fill: T, overflow: OverflowPolicy) -> Self
    where
        T: Clone,
    {
        Grid::from_array(Array2::from_elem((shape.rows, shape.cols), fill), overflow)
    }

    pub fn shape(&self) -> GridShape {
        let (rows, cols) = self.cells.dim();
        GridShape { rows, cols }
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    pub fn set_overflow(&mut self, overflow: OverflowPolicy) {
        self.overflow = overflow;
    }

    pub fn mask(&self) -> Option<&Array2<bool>> {
        self.mask.as_ref()
    }

    pub fn set_mask(&mut self, mask: Option<Array2<bool>>) -> Result<(), SimError> {
        if let Some(m) = &mask {
            let found: GridShape = m.dim().into();
            let expected = self.shape();
            if found != expected {
                return Err(SimError::GridShapeMismatch {
                    context: "mask".to_string(),
                    expected,
                    found: Some(found),
                });
            }
        }
        self.mask = mask;
        Ok(())
    }

    /// Whether `(i, j)` is excluded from rule application: its value must be
    /// carried from source to destination unchanged.
    #[inline]
    pub fn is_masked_out(&self, i: usize, j: usize) -> bool {
        match &self.mask {
            None => false,
            Some(m) => !m[(i, j)],
        }
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> &T {
        &self.cells[(i, j)]
    }

    /// Unchecked in-bounds write. Callers must have already resolved
    /// overflow, or be iterating interior indices directly.
    #[inline]
    pub fn write(&mut self, i: usize, j: usize, v: T) {
        self.cells[(i, j)] = v;
    }

    pub fn cells(&self) -> &Array2<T> {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut Array2<T> {
        &mut self.cells
    }

    /// Resolve `(i, j) + (di, dj)` through this grid's overflow policy.
    ///
    /// `Wrap` always returns an index. `Skip` returns `None` when the
    /// resolved position falls outside the grid — the "out-of-bounds
    /// signal" neighborhood reductions must treat as absent, not as zero.
    #[inline]
    pub fn resolve_offset(&self, i: usize, j: usize, di: i32, dj: i32) -> Option<(usize, usize)> {
        match (self.resolve_row(i, di), self.resolve_col(j, dj)) {
            (Some(ri), Some(rj)) => Some((ri, rj)),
            _ => None,
        }
    }

    /// Resolve `i + di` through the overflow policy along the row axis alone.
    ///
    /// Factoring row/column resolution lets the buffered sweep (see
    /// [`crate::neighborhood`]) resolve a row's window once per row instead
    /// of once per cell.
    #[inline]
    pub fn resolve_row(&self, i: usize, di: i32) -> Option<usize> {
        let rows = self.cells.dim().0;
        let ti = i as i64 + di as i64;
        match self.overflow {
            OverflowPolicy::Wrap => Some(ti.rem_euclid(rows as i64) as usize),
            OverflowPolicy::Skip => {
                if ti < 0 || ti as usize >= rows {
                    None
                } else {
                    Some(ti as usize)
                }
            }
        }
    }

    /// Resolve `j + dj` through the overflow policy along the column axis alone.
    #[inline]
    pub fn resolve_col(&self, j: usize, dj: i32) -> Option<usize> {
        let cols = self.cells.dim().1;
        let tj = j as i64 + dj as i64;
        match self.overflow {
            OverflowPolicy::Wrap => Some(tj.rem_euclid(cols as i64) as usize),
            OverflowPolicy::Skip => {
                if tj < 0 || tj as usize >= cols {
                    None
                } else {
                    Some(tj as usize)
                }
            }
        }
    }

    /// Read the cell at `(i, j) + (di, dj)`, applying the overflow policy.
    #[inline]
    pub fn read_offset(&self, i: usize, j: usize, di: i32, dj: i32) -> Option<&T> {
        self.resolve_offset(i, j, di, dj)
            .map(|(ri, rj)| &self.cells[(ri, rj)])
    }
}

/// The source/destination pair that backs one named grid inside [`crate::simdata::SimData`].
///
/// A sweep reads exclusively from `src` and writes exclusively to `dst`;
/// `swap` is an O(1) exchange of buffer roles, never a copy.
#[derive(Clone, Debug)]
pub struct GridPair<T> {
    pub src: Grid<T>,
    pub dst: Grid<T>,
}

impl<T> GridPair<T> {
    pub fn new(src: Grid<T>, dst: Grid<T>) -> Self {
        GridPair { src, dst }
    }

    pub fn from_init(init: Grid<T>) -> Self
    where
        T: Clone,
    {
        let dst = init.clone();
        GridPair { src: init, dst }
    }

    #[inline]
    pub fn swap(&mut self) {
        mem::swap(&mut self.src, &mut self.dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_resolves_negative_offsets() {
        let g = Grid::new(GridShape::new(4, 4), 0u8, OverflowPolicy::Wrap);
        assert_eq!(g.resolve_offset(0, 0, -1, -1), Some((3, 3)));
        assert_eq!(g.resolve_offset(3, 3, 1, 1), Some((0, 0)));
    }

    #[test]
    fn skip_reports_out_of_bounds_as_none() {
        let g = Grid::new(GridShape::new(4, 4), 0u8, OverflowPolicy::Skip);
        assert_eq!(g.resolve_offset(0, 0, -1, 0), None);
        assert_eq!(g.resolve_offset(3, 3, 0, 1), None);
        assert_eq!(g.resolve_offset(1, 1, 1, 1), Some((2, 2)));
    }

    #[test]
    fn mask_shape_mismatch_is_rejected() {
        let mut g = Grid::new(GridShape::new(3, 3), 0u8, OverflowPolicy::Wrap);
        let bad_mask = Array2::from_elem((2, 2), true);
        assert!(matches!(
            g.set_mask(Some(bad_mask)),
            Err(SimError::GridShapeMismatch { .. })
        ));
    }

    #[test]
    fn absent_mask_never_masks_out() {
        let g = Grid::new(GridShape::new(3, 3), 0u8, OverflowPolicy::Wrap);
        assert!(!g.is_masked_out(1, 1));
    }

    #[test]
    fn swap_exchanges_buffers_without_copying_values() {
        let mut pair = GridPair::new(
            Grid::new(GridShape::new(2, 2), 1u8, OverflowPolicy::Wrap),
            Grid::new(GridShape::new(2, 2), 2u8, OverflowPolicy::Wrap),
        );
        pair.swap();
        assert_eq!(*pair.src.get(0, 0), 2);
        assert_eq!(*pair.dst.get(0, 0), 1);
    }
}
