//! Rewrites generic collections into concrete hash based collections.
//!
//! Every `create` of a map or multimap with a single inserting operator is
//! a candidate. Rules are tried in order per candidate and the first one
//! that applies wins. Rules check all of their preconditions before queuing
//! any edit, a rule that doesn't apply leaves the program as it was.

pub mod hash_indexed_view;
pub mod hash_map;
pub mod rewriter;

use std::fmt;

use relc_error::{DbError, Result};
use rewriter::Rewriter;
use tracing::debug;

use crate::config::CompileConfig;
use crate::registry::CompileContext;
use crate::subop::{OpId, Program, SubOperator, ValueId};

/// The kind of collection a generic collection was rewritten into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specialization {
    HashMap,
    HashMultiMap,
    HashIndexedView,
}

/// Counts of rewrites applied by a specialization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecializeStats {
    pub hash_maps: usize,
    pub hash_multimaps: usize,
    pub hash_indexed_views: usize,
    /// Generic collections left in place.
    pub skipped: usize,
    pub iterations: usize,
}

impl SpecializeStats {
    fn record(&mut self, kind: Specialization) {
        match kind {
            Specialization::HashMap => self.hash_maps += 1,
            Specialization::HashMultiMap => self.hash_multimaps += 1,
            Specialization::HashIndexedView => self.hash_indexed_views += 1,
        }
    }
}

impl fmt::Display for SpecializeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hash_maps={} hash_multimaps={} hash_indexed_views={} skipped={}",
            self.hash_maps, self.hash_multimaps, self.hash_indexed_views, self.skipped
        )
    }
}

pub trait SpecializeRule: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Try to rewrite the collection produced by `create`.
    ///
    /// Returns `None` without queuing edits if the rule doesn't apply.
    fn try_rewrite(
        &self,
        rewriter: &mut Rewriter<'_>,
        create: OpId,
    ) -> Result<Option<Specialization>>;
}

/// Run the specialization rules to a fixed point.
pub fn specialize(
    program: &mut Program,
    ctx: &mut CompileContext,
    config: &CompileConfig,
) -> Result<SpecializeStats> {
    let mut rules: Vec<Box<dyn SpecializeRule>> = Vec::new();
    if config.enable_optimizations {
        rules.push(Box::new(hash_indexed_view::MultiMapAsHashIndexedView));
    }
    rules.push(Box::new(hash_map::MapAsHashMap));
    rules.push(Box::new(hash_map::MultiMapAsHashMultiMap));

    let mut stats = SpecializeStats::default();

    // Only sweeps that apply a rewrite count against the bound, the final
    // sweep observing the fixed point is always allowed.
    let mut applying_sweeps = 0;
    loop {
        stats.iterations += 1;
        let candidates = generic_creates(program)?;
        let mut applied = 0;

        for create in &candidates {
            // An earlier rewrite in this sweep may have replaced it.
            if program.position(*create).is_none() || !is_generic_create(program, *create)? {
                continue;
            }

            for rule in &rules {
                let mut rewriter = Rewriter::new(program, ctx);
                if let Some(kind) = rule.try_rewrite(&mut rewriter, *create)? {
                    rewriter.apply()?;
                    debug!(rule = rule.name(), %create, "applied specialization");
                    stats.record(kind);
                    applied += 1;
                    break;
                }
            }
        }

        if applied == 0 {
            stats.skipped = candidates.len();
            return Ok(stats);
        }

        applying_sweeps += 1;
        if applying_sweeps > config.max_rewrite_iterations {
            return Err(
                DbError::new("Collection specialization did not reach a fixed point")
                    .with_field("max_rewrite_iterations", config.max_rewrite_iterations),
            );
        }
    }
}

fn is_generic_create(program: &Program, op: OpId) -> Result<bool> {
    Ok(matches!(program.op(op)?, SubOperator::Create { ty } if ty.is_generic_collection()))
}

fn generic_creates(program: &Program) -> Result<Vec<OpId>> {
    let mut creates = Vec::new();
    for op in program.all_ops() {
        if is_generic_create(program, op)? {
            creates.push(op);
        }
    }
    Ok(creates)
}

/// Operators inserting into a state.
pub fn insert_sites(program: &Program, state: ValueId) -> Result<Vec<OpId>> {
    let mut sites = Vec::new();
    for user in program.users(state) {
        match program.op(user)? {
            SubOperator::Insert { state: s, .. } | SubOperator::LookupOrInsert { state: s, .. }
                if *s == state =>
            {
                sites.push(user)
            }
            _ => (),
        }
    }
    Ok(sites)
}

/// The single inserting operator for the state created by `create`, `None`
/// if there isn't exactly one.
pub fn single_insert_site(program: &Program, create: OpId) -> Result<Option<OpId>> {
    let state = program.result(create)?;
    let sites = insert_sites(program, state)?;
    match sites.as_slice() {
        [site] => Ok(Some(*site)),
        _ => {
            debug!(%create, num_sites = sites.len(), "collection needs exactly one insert site");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ScalarExpr;
    use crate::expr::region::ExprRegion;
    use crate::types::datatype::DataType;
    use crate::types::state::{Member, StateMembers, StateType};

    fn members(names: &[&str]) -> StateMembers {
        StateMembers::new(
            names
                .iter()
                .map(|n| Member::new(*n, DataType::int64()))
                .collect(),
        )
    }

    /// A map with `num_inserts` insert sites fed from a vector scan.
    fn map_program(ctx: &mut CompileContext, num_inserts: usize) -> Program {
        let mut program = Program::new();
        let body = program.body();
        let map = program
            .append_value(body, SubOperator::Create {
                ty: StateType::Map {
                    keys: members(&["k"]),
                    values: members(&["v"]),
                },
            })
            .unwrap();
        let vector = program
            .append_value(body, SubOperator::Create {
                ty: StateType::Vector(members(&["x"])),
            })
            .unwrap();

        for idx in 0..num_inserts {
            let x = ctx
                .columns
                .create_def(&format!("s{idx}"), "x", DataType::int64())
                .unwrap();
            let scan = program
                .append_value(body, SubOperator::Scan {
                    state: vector,
                    mapping: vec![("x".to_string(), x)],
                })
                .unwrap();
            program
                .append(body, SubOperator::Insert {
                    input: scan,
                    state: map,
                    mapping: vec![
                        (x.reference(), "k".to_string()),
                        (x.reference(), "v".to_string()),
                    ],
                    eq: Some(
                        ExprRegion::key_equality(&[DataType::int64()], &[DataType::int64()])
                            .unwrap(),
                    ),
                })
                .unwrap();
        }

        program
            .append(body, SubOperator::Return { values: Vec::new() })
            .unwrap();
        program
    }

    #[test]
    fn single_insert_map_specialized() {
        let mut ctx = CompileContext::new();
        let mut program = map_program(&mut ctx, 1);

        let stats = specialize(&mut program, &mut ctx, &CompileConfig::new()).unwrap();
        assert_eq!(1, stats.hash_maps);
        assert_eq!(0, stats.skipped);
        assert!(generic_creates(&program).unwrap().is_empty());
    }

    #[test]
    fn multiple_inserts_left_generic() {
        let mut ctx = CompileContext::new();
        let mut program = map_program(&mut ctx, 2);

        let stats = specialize(&mut program, &mut ctx, &CompileConfig::new()).unwrap();
        assert_eq!(0, stats.hash_maps);
        assert_eq!(1, stats.skipped);
        assert_eq!(1, generic_creates(&program).unwrap().len());
    }

    #[test]
    fn iteration_bound() {
        let config = |max_rewrite_iterations| CompileConfig {
            max_rewrite_iterations,
            ..CompileConfig::new()
        };

        // One applying sweep, the confirming sweep isn't counted.
        let mut ctx = CompileContext::new();
        let mut program = map_program(&mut ctx, 1);
        let stats = specialize(&mut program, &mut ctx, &config(1)).unwrap();
        assert_eq!(1, stats.hash_maps);
        assert_eq!(2, stats.iterations);

        let mut ctx = CompileContext::new();
        let mut program = map_program(&mut ctx, 1);
        let err = specialize(&mut program, &mut ctx, &config(0)).unwrap_err();
        assert!(err.get_msg().contains("fixed point"));

        // Nothing to rewrite.
        let mut ctx = CompileContext::new();
        let mut program = map_program(&mut ctx, 2);
        let stats = specialize(&mut program, &mut ctx, &config(0)).unwrap();
        assert_eq!(1, stats.iterations);
    }

    #[test]
    fn rewrite_keeps_region_expression() {
        let mut ctx = CompileContext::new();
        let mut program = map_program(&mut ctx, 1);
        let before: Vec<_> = program
            .all_ops()
            .into_iter()
            .filter_map(|op| match program.op(op).unwrap() {
                SubOperator::Insert { eq, .. } => eq.clone(),
                _ => None,
            })
            .collect();

        specialize(&mut program, &mut ctx, &CompileConfig::new()).unwrap();
        let after: Vec<_> = program
            .all_ops()
            .into_iter()
            .filter_map(|op| match program.op(op).unwrap() {
                SubOperator::Insert { eq, .. } => eq.clone(),
                _ => None,
            })
            .collect();

        assert_eq!(before, after);
        assert_eq!(
            ScalarExpr::and(vec![ScalarExpr::is_true(ScalarExpr::eq(
                ScalarExpr::arg(0),
                ScalarExpr::arg(1)
            ))]),
            after[0].results[0]
        );
    }
}
