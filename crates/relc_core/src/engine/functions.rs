//! Lowering of every expression region in a program.

use std::collections::HashMap;
use std::fmt;

use relc_error::{DbError, Result};
use tracing::trace;

use crate::expr::ScalarExpr;
use crate::expr::region::ExprRegion;
use crate::lowering::scalar::{CompiledRegion, compile_region};
use crate::registry::column::{ColumnManager, ColumnRef};
use crate::subop::{OpId, Program, SubOperator};
use crate::types::datatype::DataType;
use crate::types::state::StateType;

/// What a compiled region is used for by its operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionRole {
    Map,
    /// Stored keys followed by probe keys, producing a single boolean.
    Equality,
    /// Initial values of a newly inserted entry.
    Initial,
    Reduce,
    Comparator,
    /// Hash of the key values for hashed collections.
    KeyHash,
}

impl RegionRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Map => "map",
            Self::Equality => "eq",
            Self::Initial => "initial",
            Self::Reduce => "reduce",
            Self::Comparator => "comparator",
            Self::KeyHash => "key_hash",
        }
    }
}

impl fmt::Display for RegionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw functions for a program, keyed by operator and role.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: HashMap<(OpId, RegionRole), CompiledRegion>,
}

impl FunctionTable {
    pub fn get(&self, op: OpId, role: RegionRole) -> Result<&CompiledRegion> {
        self.functions.get(&(op, role)).ok_or_else(|| {
            DbError::new("Missing compiled region")
                .with_field("op", op)
                .with_field("role", role)
        })
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Total number of raw instructions across all functions.
    pub fn num_instructions(&self) -> usize {
        self.functions
            .values()
            .map(|f| f.function.count_insts(|_| true))
            .sum()
    }

    fn insert(&mut self, op: OpId, role: RegionRole, region: &ExprRegion) -> Result<()> {
        let name = format!("{op}_{role}");
        let compiled = compile_region(&name, region)?;
        trace!(%name, "compiled region");
        self.functions.insert((op, role), compiled);
        Ok(())
    }
}

/// Compile the regions embedded in every operator, along with the implicit
/// key equality and key hash functions of the collections they access.
pub fn lower_program(program: &Program, columns: &ColumnManager) -> Result<FunctionTable> {
    let mut table = FunctionTable::default();

    for id in program.all_ops() {
        match program.op(id)? {
            SubOperator::Map { region, .. } => table.insert(id, RegionRole::Map, region)?,
            SubOperator::Reduce { region, .. } => table.insert(id, RegionRole::Reduce, region)?,
            SubOperator::CreateSortedView { comparator, .. } => {
                table.insert(id, RegionRole::Comparator, comparator)?
            }
            SubOperator::Insert {
                state,
                mapping,
                eq,
                ..
            } => {
                let state = program.state_type(*state)?;
                let Some(keys) = state.key_members() else {
                    continue;
                };
                let stored: Vec<DataType> = keys.members.iter().map(|m| m.datatype).collect();
                let mut inserted = Vec::with_capacity(stored.len());
                for key in keys.names() {
                    let (col, _) = mapping
                        .iter()
                        .find(|(_, member)| member == key)
                        .ok_or_else(|| {
                            DbError::new("Insert does not write key member").with_field("member", key)
                        })?;
                    inserted.push(columns.datatype(col.id())?);
                }

                if state.is_unique_keyed() {
                    let eq = match eq {
                        Some(eq) => eq.clone(),
                        None => ExprRegion::key_equality(&stored, &inserted)?,
                    };
                    table.insert(id, RegionRole::Equality, &eq)?;
                }
                if is_hashed(state) {
                    table.insert(id, RegionRole::KeyHash, &key_hash(&inserted))?;
                }
            }
            SubOperator::Lookup {
                state, keys, eq, ..
            } => {
                let state = program.state_type(*state)?;
                lower_lookup(&mut table, columns, id, state, keys, eq.as_ref())?;
            }
            SubOperator::LookupOrInsert {
                state,
                keys,
                eq,
                initial,
                ..
            } => {
                let state = program.state_type(*state)?;
                lower_lookup(&mut table, columns, id, state, keys, eq.as_ref())?;
                table.insert(id, RegionRole::Initial, initial)?;
            }
            _ => (),
        }
    }

    Ok(table)
}

fn lower_lookup(
    table: &mut FunctionTable,
    columns: &ColumnManager,
    id: OpId,
    state: &StateType,
    keys: &[ColumnRef],
    eq: Option<&ExprRegion>,
) -> Result<()> {
    // Hash indexed views compare the stored hash directly.
    let Some(stored) = state.key_members() else {
        return Ok(());
    };
    let stored: Vec<DataType> = stored.members.iter().map(|m| m.datatype).collect();
    let probe = keys
        .iter()
        .map(|k| columns.datatype(k.id()))
        .collect::<Result<Vec<_>>>()?;

    let eq = match eq {
        Some(eq) => eq.clone(),
        None => ExprRegion::key_equality(&stored, &probe)?,
    };
    table.insert(id, RegionRole::Equality, &eq)?;

    if is_hashed(state) {
        table.insert(id, RegionRole::KeyHash, &key_hash(&probe))?;
    }
    Ok(())
}

const fn is_hashed(state: &StateType) -> bool {
    matches!(state, StateType::HashMap { .. } | StateType::HashMultiMap { .. })
}

fn key_hash(key_types: &[DataType]) -> ExprRegion {
    let args = (0..key_types.len()).map(ScalarExpr::arg).collect();
    ExprRegion::new(key_types.to_vec(), vec![ScalarExpr::Hash(args)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowering::raw::RawScalar;
    use crate::types::datatype::ScalarType;

    #[test]
    fn key_hash_ignores_nullability() {
        let int = DataType::int64();
        let hash = compile_region("h", &key_hash(&[int])).unwrap();
        let nullable_hash =
            compile_region("h", &key_hash(&[DataType::nullable(ScalarType::Int(64))])).unwrap();

        let plain = hash.call(&[RawScalar::Int(42)]).unwrap();
        let wrapped = nullable_hash
            .call(&[RawScalar::valid(RawScalar::Int(42))])
            .unwrap();
        assert_eq!(plain, wrapped);
    }

    #[test]
    fn missing_function() {
        let table = FunctionTable::default();
        let err = table.get(OpId(3), RegionRole::Map).unwrap_err();
        assert_eq!("Missing compiled region", err.get_msg());
        assert!(table.is_empty());
    }
}
