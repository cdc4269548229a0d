//! Conway's Game of Life, bundled as a worked example of a
//! `Capability::Neighborhood` rule built on the Moore stencil.

use crate::neighborhood::{CountF64, Neighborhood, Reduction};
use crate::rule::{Capability, Context, RuleSpec};

/// The classic B3/S23 life rule over a wrapped or skip-bounded grid of
/// `bool` cells.
pub struct GameOfLife {
    neighborhood: Neighborhood,
    reduction: CountF64<fn(&bool) -> bool>,
}

impl Default for GameOfLife {
    fn default() -> Self {
        GameOfLife {
            neighborhood: Neighborhood::moore(),
            reduction: CountF64 { predicate: |c: &bool| *c },
        }
    }
}

impl GameOfLife {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleSpec<bool> for GameOfLife {
    fn name(&self) -> &str {
        "game_of_life"
    }

    fn capability(&self) -> Capability {
        Capability::Neighborhood
    }

    fn neighborhood(&self) -> Option<&Neighborhood> {
        Some(&self.neighborhood)
    }

    fn reduction(&self) -> Option<&(dyn Reduction<bool, Output = f64> + Send + Sync)> {
        Some(&self.reduction)
    }

    fn apply_neighborhood(&self, ctx: &Context<'_>, cell: &bool) -> bool {
        let live_neighbors = ctx.reduction().unwrap_or(0.0).round() as i64;
        if *cell {
            (2..=3).contains(&live_neighbors)
        } else {
            live_neighbors == 3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver;
    use crate::grid::{Grid, OverflowPolicy};
    use crate::rule::GridName;
    use crate::ruleset::Ruleset;
    use crate::sink::MemorySink;
    use ndarray::Array2;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn blinker_grid() -> HashMap<GridName, Grid<bool>> {
        let mut cells = Array2::from_elem((5, 5), false);
        for c in 1..=3 {
            cells[(2, c)] = true;
        }
        let mut init = HashMap::new();
        init.insert(GridName::default_grid(), Grid::from_array(cells, OverflowPolicy::Wrap));
        init
    }

    #[test]
    fn blinker_oscillates_with_period_two() {
        let mut sink: MemorySink<bool> = MemorySink::new();
        let ruleset = Ruleset::new(vec![Arc::new(GameOfLife::new())], 1.0, OverflowPolicy::Wrap);
        driver::start(&mut sink, ruleset, Some(blinker_grid()), (0.0, 2.0), 1_000_000.0, None).unwrap();

        let gen0 = sink.at(0).unwrap().default_grid().unwrap();
        let gen1 = sink.at(1).unwrap().default_grid().unwrap();
        let gen2 = sink.at(2).unwrap().default_grid().unwrap();

        assert_eq!(gen0, gen2);
        assert_ne!(gen0, gen1);

        // Generation 1 is the vertical phase of the blinker.
        for r in 0..5 {
            for c in 0..5 {
                let expected = r == 1 || r == 2 || r == 3;
                let expected = expected && c == 2;
                assert_eq!(gen1[(r, c)], expected, "mismatch at ({r}, {c})");
            }
        }
    }

    #[test]
    fn shape_constant_grid_is_a_still_life() {
        let mut cells = Array2::from_elem((4, 4), false);
        for &(r, c) in &[(1, 1), (1, 2), (2, 1), (2, 2)] {
            cells[(r, c)] = true;
        }
        let mut init = HashMap::new();
        init.insert(GridName::default_grid(), Grid::from_array(cells.clone(), OverflowPolicy::Wrap));

        let mut sink: MemorySink<bool> = MemorySink::new();
        let ruleset = Ruleset::new(vec![Arc::new(GameOfLife::new())], 1.0, OverflowPolicy::Wrap);
        driver::start(&mut sink, ruleset, Some(init), (0.0, 5.0), 1_000_000.0, None).unwrap();

        for i in 0..sink.length() {
            assert_eq!(sink.at(i).unwrap().default_grid().unwrap(), &cells);
        }
    }
}
