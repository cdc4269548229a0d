//! Fused rule chains (§4.4): a contiguous subsequence of rules that share a
//! single sweep, threading the intermediate cell value without
//! materialising it to the grid between links.

use std::sync::Arc;

use crate::error::SimError;
use crate::neighborhood::{Neighborhood, Reduction};
use crate::rule::{Capability, Context, GridName, PrecomputeContext, RuleSpec};

/// An ordered sequence of cell/neighborhood rules fused into one sweep.
///
/// Only the first link may be a `Capability::Neighborhood` rule; every
/// subsequent link sees the cell value produced by the previous link but
/// the neighborhood reduction stays the one computed from the unmodified
/// source grid (§4.4). No manual rules and no cross-grid rules may appear
/// in a chain — `Chain::new` rejects those at construction.
pub struct Chain<T> {
    name: String,
    rules: Vec<Arc<dyn RuleSpec<T>>>,
}

impl<T> Chain<T> {
    pub fn new(rules: Vec<Arc<dyn RuleSpec<T>>>) -> Result<Self, SimError> {
        if rules.is_empty() {
            return Err(SimError::InvalidChain("a chain must contain at least one rule".into()));
        }

        let grid = rules[0].writes();
        for (idx, rule) in rules.iter().enumerate() {
            match rule.capability() {
                Capability::Manual => {
                    return Err(SimError::InvalidChain(format!(
                        "rule `{}` is a manual rule and cannot be chained",
                        rule.name()
                    )))
                }
                Capability::Chain => {
                    return Err(SimError::InvalidChain(format!(
                        "rule `{}` is itself a chain and cannot be nested",
                        rule.name()
                    )))
                }
                Capability::Neighborhood if idx != 0 => {
                    return Err(SimError::InvalidChain(format!(
                        "rule `{}` is a neighborhood rule but is not the first link in the chain",
                        rule.name()
                    )))
                }
                Capability::Cell | Capability::Neighborhood => {}
            }
            if rule.reads() != grid || rule.writes() != grid {
                return Err(SimError::InvalidChain(format!(
                    "rule `{}` reads/writes a different grid than the rest of the chain",
                    rule.name()
                )));
            }
        }

        let name = rules.iter().map(|r| r.name()).collect::<Vec<_>>().join(" -> ");
        Ok(Chain { name, rules })
    }

    pub fn rules(&self) -> &[Arc<dyn RuleSpec<T>>] {
        &self.rules
    }
}

impl<T> RuleSpec<T> for Chain<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Chain
    }

    fn reads(&self) -> Vec<GridName> {
        self.rules[0].reads()
    }

    fn writes(&self) -> Vec<GridName> {
        self.rules[0].writes()
    }

    fn neighborhood(&self) -> Option<&Neighborhood> {
        self.rules[0].neighborhood()
    }

    fn reduction(&self) -> Option<&(dyn Reduction<T, Output = f64> + Send + Sync)> {
        self.rules[0].reduction()
    }

    fn apply_chain(&self, ctx: &Context<'_>, cell: &T) -> T {
        let mut value = match self.rules[0].capability() {
            Capability::Neighborhood => self.rules[0].apply_neighborhood(ctx, cell),
            Capability::Cell => self.rules[0].apply_cell(ctx, cell),
            _ => unreachable!("validated at construction"),
        };
        // Every subsequent link is a cell rule operating on the value
        // produced so far; the reduction in `ctx` is never recomputed.
        for rule in &self.rules[1..] {
            value = rule.apply_cell(ctx, &value);
        }
        value
    }

    fn precompute(&self, ctx: &PrecomputeContext<'_>) -> Option<Arc<dyn RuleSpec<T>>> {
        let mut replaced = false;
        let new_rules: Vec<Arc<dyn RuleSpec<T>>> = self
            .rules
            .iter()
            .map(|rule| match rule.precompute(ctx) {
                Some(r) => {
                    replaced = true;
                    r
                }
                None => Arc::clone(rule),
            })
            .collect();
        if !replaced {
            return None;
        }
        // Re-validation is unnecessary: precomputation only changes a rule's
        // internal parameters, never its capability or declared grid set.
        Some(Arc::new(Chain {
            name: self.name.clone(),
            rules: new_rules,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Capability;

    struct AddOne;
    impl RuleSpec<i32> for AddOne {
        fn name(&self) -> &str {
            "add_one"
        }
        fn capability(&self) -> Capability {
            Capability::Cell
        }
        fn apply_cell(&self, _ctx: &Context<'_>, cell: &i32) -> i32 {
            cell + 1
        }
    }

    struct Double;
    impl RuleSpec<i32> for Double {
        fn name(&self) -> &str {
            "double"
        }
        fn capability(&self) -> Capability {
            Capability::Cell
        }
        fn apply_cell(&self, _ctx: &Context<'_>, cell: &i32) -> i32 {
            cell * 2
        }
    }

    struct Manual;
    impl RuleSpec<i32> for Manual {
        fn name(&self) -> &str {
            "manual"
        }
        fn capability(&self) -> Capability {
            Capability::Manual
        }
    }

    #[test]
    fn chain_threads_value_without_materialising() {
        let chain = Chain::new(vec![Arc::new(AddOne), Arc::new(Double)]).unwrap();
        let aux = std::collections::HashMap::new();
        let ctx = Context::new(0.0, 1.0, None, &aux, (0, 0));
        assert_eq!(chain.apply_chain(&ctx, &5), 12);
    }

    #[test]
    fn manual_rules_are_rejected_from_chains() {
        let err = Chain::new(vec![Arc::new(AddOne), Arc::new(Manual)]).unwrap_err();
        assert!(matches!(err, SimError::InvalidChain(_)));
    }

    #[test]
    fn empty_chain_is_rejected() {
        let err = Chain::<i32>::new(vec![]).unwrap_err();
        assert!(matches!(err, SimError::InvalidChain(_)));
    }
}
