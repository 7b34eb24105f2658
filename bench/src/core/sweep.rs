//! Conditional parameter-sweep expansion.
//!
//! A sweep is a staged Cartesian product: each parameter fans out the partial
//! assignments accumulated so far, except where a condition (evaluated against
//! that branch's current values) withholds it. Declaration order is therefore
//! semantically significant, and branches may end up with unequal parameter
//! sets.

use std::collections::BTreeMap;

use crate::core::condition::Condition;

/// One concrete assignment of values to all active parameters.
///
/// `BTreeMap` keeps iteration order deterministic, which makes combination
/// hashes and log headers stable across runs.
pub type Combination = BTreeMap<String, String>;

/// A parameter ready for expansion: a resolved value list plus its condition.
#[derive(Debug, Clone)]
pub struct SweepParam {
    pub name: String,
    pub values: Vec<String>,
    pub when: Option<Condition>,
}

/// Expand `params` over `base` into the full set of combinations.
///
/// A branch whose condition fails passes through unchanged (the parameter is
/// simply absent from it); a parameter with no values leaves every branch
/// unchanged. Nothing is ever dropped.
pub fn expand(params: &[SweepParam], base: &Combination) -> Vec<Combination> {
    let mut combos = vec![base.clone()];
    for param in params {
        let mut next = Vec::with_capacity(combos.len());
        for combo in &combos {
            let active = param.when.as_ref().is_none_or(|c| c.evaluate(combo));
            if !active || param.values.is_empty() {
                next.push(combo.clone());
                continue;
            }
            for value in &param.values {
                let mut branch = combo.clone();
                branch.insert(param.name.clone(), value.clone());
                next.push(branch);
            }
        }
        combos = next;
    }
    combos
}
