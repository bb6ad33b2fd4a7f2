//! State member usage of operators.
//!
//! Member names are unique across a compilation, so usage is reported as
//! plain name sets regardless of which state a member belongs to.

use std::collections::HashSet;

use relc_error::Result;

use super::{OpId, Program, SubOperator, ValueId};
use crate::types::state::StateType;

/// Members read by an operator, including operators nested in its body.
pub fn read_members(program: &Program, op: OpId) -> Result<HashSet<String>> {
    let mut members = HashSet::new();
    visit_nested(program, op, &mut |op| collect_read(program, op, &mut members))?;
    Ok(members)
}

/// Members written by an operator, including operators nested in its body.
pub fn written_members(program: &Program, op: OpId) -> Result<HashSet<String>> {
    let mut members = HashSet::new();
    visit_nested(program, op, &mut |op| collect_written(program, op, &mut members))?;
    Ok(members)
}

/// Members written by a single operator, ignoring any body it owns.
pub fn direct_written_members(program: &Program, op: &SubOperator) -> Result<HashSet<String>> {
    let mut members = HashSet::new();
    collect_written(program, op, &mut members)?;
    Ok(members)
}

/// Operators using a state value directly, at any nesting depth.
pub fn state_users(program: &Program, state: ValueId) -> Vec<OpId> {
    program.users(state)
}

fn visit_nested(
    program: &Program,
    op: OpId,
    f: &mut impl FnMut(&SubOperator) -> Result<()>,
) -> Result<()> {
    let node = program.op(op)?;
    f(node)?;

    if let Some(body) = node.body() {
        let mut result = Ok(());
        program.walk(body, &mut |_, nested| {
            if result.is_ok() {
                result = f(nested);
            }
        });
        result?;
    }

    Ok(())
}

fn collect_read(program: &Program, op: &SubOperator, out: &mut HashSet<String>) -> Result<()> {
    match op {
        SubOperator::Scan { mapping, .. } | SubOperator::Gather { mapping, .. } => {
            out.extend(mapping.iter().map(|(member, _)| member.clone()));
        }
        SubOperator::Lookup { state, .. } | SubOperator::LookupOrInsert { state, .. } => {
            match program.state_type(*state)? {
                StateType::HashIndexedView { hash, link, .. } => {
                    out.insert(hash.clone());
                    out.insert(link.clone());
                }
                other => {
                    if let Some(keys) = other.key_members() {
                        out.extend(keys.names().map(|n| n.to_string()));
                    }
                }
            }
        }
        SubOperator::Insert { state, .. } => {
            // Uniquely keyed inserts probe existing keys.
            let state = program.state_type(*state)?;
            if state.is_unique_keyed() {
                if let Some(keys) = state.key_members() {
                    out.extend(keys.names().map(|n| n.to_string()));
                }
            }
        }
        SubOperator::Reduce { members, .. } | SubOperator::CreateSortedView { members, .. } => {
            out.extend(members.iter().cloned());
        }
        SubOperator::CreateHashIndexedView { hash, .. } => {
            out.insert(hash.clone());
        }
        SubOperator::ConvertToExplicit { state, .. } => {
            out.extend(
                program
                    .state_type(*state)?
                    .members()
                    .names()
                    .map(|n| n.to_string()),
            );
        }
        _ => (),
    }
    Ok(())
}

fn collect_written(program: &Program, op: &SubOperator, out: &mut HashSet<String>) -> Result<()> {
    match op {
        SubOperator::Materialize { mapping, .. }
        | SubOperator::Insert { mapping, .. }
        | SubOperator::Scatter { mapping, .. } => {
            out.extend(mapping.iter().map(|(_, member)| member.clone()));
        }
        SubOperator::LookupOrInsert { state, .. } => {
            out.extend(
                program
                    .state_type(*state)?
                    .members()
                    .names()
                    .map(|n| n.to_string()),
            );
        }
        SubOperator::Reduce { members, .. } => {
            out.extend(members.iter().cloned());
        }
        SubOperator::CreateHashIndexedView { link, .. } => {
            out.insert(link.clone());
        }
        _ => (),
    }
    Ok(())
}
