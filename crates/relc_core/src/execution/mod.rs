//! Reference executor for sub-operator programs.
//!
//! Operators run eagerly in program order and every stream is fully
//! collected before its consumer runs. Expression regions are evaluated by
//! interpreting their lowered raw functions, so executing a program also
//! exercises the scalar lowering.

pub mod provider;
pub mod state;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use provider::TableProvider;
use relc_error::{DbError, OptionExt, Result, ResultExt};
use serde::Deserialize;
use serde_json::{Value, json};
use state::StateStorage;
use tracing::trace;

use crate::engine::functions::{FunctionTable, RegionRole};
use crate::lowering::raw::RawScalar;
use crate::lowering::scalar::CompiledRegion;
use crate::lowering::scalar::constant::format_raw;
use crate::registry::column::{ColumnId, ColumnManager, ColumnRef};
use crate::subop::{OpId, Program, RegionId, SubOperator, ValueId};
use crate::types::datatype::DataType;
use crate::types::state::StateType;

/// Points at a single row of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef {
    pub state: ValueId,
    pub row: usize,
}

/// Value of a single column in a stream row.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Raw(RawScalar),
    Ref(EntryRef),
    Optional(Option<EntryRef>),
    List(Vec<EntryRef>),
}

impl Datum {
    pub fn try_as_raw(&self) -> Result<&RawScalar> {
        match self {
            Self::Raw(v) => Ok(v),
            _ => Err(DbError::new("Expected a scalar column value")),
        }
    }

    pub fn try_as_ref(&self) -> Result<EntryRef> {
        match self {
            Self::Ref(r) => Ok(*r),
            _ => Err(DbError::new("Expected an entry reference")),
        }
    }
}

type Row = IndexMap<ColumnId, Datum>;

/// Rows of the result table returned by a program.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub names: Vec<String>,
    pub types: Vec<DataType>,
    pub rows: Vec<Vec<RawScalar>>,
}

impl QueryResult {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Every value formatted according to its column type.
    pub fn formatted_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&self.types)
                    .map(|(value, datatype)| format_raw(value, datatype))
                    .collect()
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        let columns: Vec<Value> = self
            .names
            .iter()
            .zip(&self.types)
            .map(|(name, datatype)| json!({"name": name, "type": datatype.to_string()}))
            .collect();
        let rows: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&self.types)
                    .map(|(value, datatype)| {
                        if value.is_null() {
                            Value::Null
                        } else {
                            Value::String(format_raw(value, datatype))
                        }
                    })
                    .collect()
            })
            .collect();
        json!({"columns": columns, "rows": rows})
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.formatted_rows();
        let mut widths: Vec<usize> = self.names.iter().map(|n| n.len()).collect();
        for row in &rows {
            for (width, value) in widths.iter_mut().zip(row) {
                *width = (*width).max(value.len());
            }
        }

        write_cells(f, &self.names, &widths)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", rule.join("-+-"))?;
        for row in &rows {
            write_cells(f, row, &widths)?;
        }
        Ok(())
    }
}

fn write_cells(f: &mut fmt::Formatter<'_>, values: &[String], widths: &[usize]) -> fmt::Result {
    let cells: Vec<String> = values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{value:<width$}"))
        .collect();
    writeln!(f, "{}", cells.join(" | ").trim_end())
}

/// Parsed description of an external table handle.
#[derive(Debug, Deserialize)]
struct ExternalDescription {
    /// Member name to table column name.
    mapping: HashMap<String, String>,
}

/// Executes a single program.
#[derive(Debug)]
pub struct Executor<'a> {
    program: &'a Program,
    functions: &'a FunctionTable,
    columns: &'a ColumnManager,
    provider: &'a dyn TableProvider,
    states: HashMap<ValueId, StateStorage>,
    flags: HashMap<ValueId, bool>,
    streams: HashMap<ValueId, Vec<Row>>,
    result_names: HashMap<ValueId, Vec<String>>,
}

impl<'a> Executor<'a> {
    pub fn new(
        program: &'a Program,
        functions: &'a FunctionTable,
        columns: &'a ColumnManager,
        provider: &'a dyn TableProvider,
    ) -> Self {
        Executor {
            program,
            functions,
            columns,
            provider,
            states: HashMap::new(),
            flags: HashMap::new(),
            streams: HashMap::new(),
            result_names: HashMap::new(),
        }
    }

    /// Run the program, producing the result table it returns.
    pub fn execute(mut self) -> Result<QueryResult> {
        let program = self.program;
        let returned = self.run_region(program.body(), &Row::new())?;

        let mut results = Vec::new();
        for value in returned {
            if let StateType::ResultTable(members) = program.state_type(value)? {
                results.push((value, members));
            }
        }
        let [(value, members)] = results.as_slice() else {
            return Err(DbError::new("Program must return exactly one result table")
                .with_field("results", results.len()));
        };

        let names = self
            .result_names
            .remove(value)
            .required("Result table was never converted")?;
        let storage = self.states.remove(value).required("Result table has no storage")?;

        Ok(QueryResult {
            names,
            types: members.members.iter().map(|m| m.datatype).collect(),
            rows: storage.rows,
        })
    }

    /// Run every operator in a region, returning the values it returns.
    fn run_region(&mut self, region: RegionId, base: &Row) -> Result<Vec<ValueId>> {
        let program = self.program;
        for &id in &program.region(region)?.ops {
            let node = program.node(id)?;
            if let SubOperator::Return { values } = &node.op {
                return Ok(values.clone());
            }
            trace!(%id, op = node.op.name(), "executing operator");
            self.run_op(id, &node.op, node.result, base)?;
        }
        Err(DbError::new("Region is missing a return terminator").with_field("region", region))
    }

    fn run_op(
        &mut self,
        id: OpId,
        op: &SubOperator,
        result: Option<ValueId>,
        base: &Row,
    ) -> Result<()> {
        let program = self.program;
        let functions = self.functions;

        match op {
            SubOperator::GetExternal {
                table,
                members,
                description,
            } => {
                let desc: ExternalDescription = serde_json::from_str(description)
                    .context("Failed to parse external table description")?;
                let columns = members
                    .members
                    .iter()
                    .map(|m| {
                        let column = desc.mapping.get(&m.name).ok_or_else(|| {
                            DbError::new("External description is missing a member")
                                .with_field("member", &m.name)
                        })?;
                        Ok((column.clone(), m.datatype))
                    })
                    .collect::<Result<Vec<_>>>()?;

                let rows = self.provider.scan(table, &columns)?;
                let names = members.names().map(|n| n.to_string()).collect();
                self.states
                    .insert(expect_result(id, result)?, StateStorage::with_rows(names, rows));
            }
            SubOperator::Create { ty } => {
                self.states
                    .insert(expect_result(id, result)?, StateStorage::new(ty)?);
            }
            SubOperator::Scan { state, mapping } => {
                let storage = self.state(*state)?;
                let indices = mapping
                    .iter()
                    .map(|(member, def)| Ok((storage.member_index(member)?, def.id())))
                    .collect::<Result<Vec<_>>>()?;

                let rows = storage
                    .rows
                    .iter()
                    .map(|stored| {
                        let mut row = base.clone();
                        for (idx, col) in &indices {
                            row.insert(*col, Datum::Raw(stored[*idx].clone()));
                        }
                        row
                    })
                    .collect();
                self.output(id, result, rows)?;
            }
            SubOperator::Map {
                input,
                computed,
                inputs,
                ..
            } => {
                let function = functions.get(id, RegionRole::Map)?;
                let mut rows = self.take_stream(*input)?;
                for row in &mut rows {
                    let args = raw_values(row, inputs)?;
                    let results = function.call(&args)?;
                    if results.len() != computed.len() {
                        return Err(DbError::new("Map produced wrong number of values")
                            .with_field("op", id)
                            .with_field("expected", computed.len())
                            .with_field("got", results.len()));
                    }
                    for (def, value) in computed.iter().zip(results) {
                        row.insert(def.id(), Datum::Raw(value));
                    }
                }
                self.output(id, result, rows)?;
            }
            SubOperator::Filter { input, conditions } => {
                let rows = self.take_stream(*input)?;
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    let mut keep = true;
                    for cond in conditions {
                        keep &= raw_value(&row, *cond)?.is_true();
                    }
                    if keep {
                        kept.push(row);
                    }
                }
                self.output(id, result, kept)?;
            }
            SubOperator::Renaming { input, renamed } => {
                let mut rows = self.take_stream(*input)?;
                for row in &mut rows {
                    for (def, col) in renamed {
                        let value = column(row, *col)?.clone();
                        row.insert(def.id(), value);
                    }
                }
                self.output(id, result, rows)?;
            }
            SubOperator::Materialize {
                input,
                state,
                mapping,
            } => {
                let rows = self.take_stream(*input)?;
                let storage = self.state_mut(*state)?;
                let cols = member_columns(&storage.members, mapping)?;
                for row in rows {
                    storage.push(raw_values(&row, &cols)?, None)?;
                }
            }
            SubOperator::Insert {
                input,
                state,
                mapping,
                ..
            } => {
                let ty = program.state_type(*state)?;
                let eq = if ty.is_unique_keyed() {
                    Some(functions.get(id, RegionRole::Equality)?)
                } else {
                    None
                };
                let hash = key_hash_function(functions, id, ty)?;

                let rows = self.take_stream(*input)?;
                let storage = self.state_mut(*state)?;
                let cols = member_columns(&storage.members, mapping)?;
                let num_keys = storage.num_keys()?;

                for row in rows {
                    let values = raw_values(&row, &cols)?;
                    let key_hash = call_hash(hash, &values[..num_keys])?;
                    if let Some(eq) = eq {
                        let keys = &values[..num_keys];
                        let existing = matching_entries(storage, eq, key_hash, keys)?;
                        if let Some(entry) = existing.first() {
                            storage.rows[*entry] = values;
                            continue;
                        }
                    }
                    storage.push(values, key_hash)?;
                }
            }
            SubOperator::Lookup {
                input,
                state,
                keys,
                reference,
                ..
            } => {
                let ty = program.state_type(*state)?;
                let eq = match ty {
                    StateType::HashIndexedView { .. } => None,
                    _ => Some(functions.get(id, RegionRole::Equality)?),
                };
                let hash = key_hash_function(functions, id, ty)?;

                let mut rows = self.take_stream(*input)?;
                let storage = self.state(*state)?;
                for row in &mut rows {
                    let probe = raw_values(row, keys)?;
                    let matches = match eq {
                        Some(eq) => {
                            let key_hash = call_hash(hash, &probe)?;
                            matching_entries(storage, eq, key_hash, &probe)?
                        }
                        None => {
                            let hash = match probe.as_slice() {
                                [RawScalar::Index(h)] => *h,
                                _ => {
                                    return Err(DbError::new(
                                        "Hash indexed view lookup requires a single hash key",
                                    ));
                                }
                            };
                            storage.candidates(Some(hash))?
                        }
                    };

                    let mut entries = matches
                        .into_iter()
                        .map(|idx| EntryRef {
                            state: *state,
                            row: idx,
                        });
                    let datum = if ty.is_multi_lookup() {
                        Datum::List(entries.collect())
                    } else {
                        Datum::Optional(entries.next())
                    };
                    row.insert(reference.id(), datum);
                }
                self.output(id, result, rows)?;
            }
            SubOperator::LookupOrInsert {
                input,
                state,
                keys,
                reference,
                ..
            } => {
                let ty = program.state_type(*state)?;
                let eq = functions.get(id, RegionRole::Equality)?;
                let initial = functions.get(id, RegionRole::Initial)?;
                let hash = key_hash_function(functions, id, ty)?;

                let stored_types: Vec<DataType> = ty
                    .key_members()
                    .required("Lookup or insert requires a keyed state")?
                    .members
                    .iter()
                    .map(|m| m.datatype)
                    .collect();
                let probe_types = keys
                    .iter()
                    .map(|k| self.columns.datatype(k.id()))
                    .collect::<Result<Vec<_>>>()?;

                let mut rows = self.take_stream(*input)?;
                let storage = self.state_mut(*state)?;
                for row in &mut rows {
                    let probe = raw_values(row, keys)?;
                    let key_hash = call_hash(hash, &probe)?;
                    let existing = matching_entries(storage, eq, key_hash, &probe)?;

                    let entry = match existing.first() {
                        Some(entry) => *entry,
                        None => {
                            let mut values = probe
                                .into_iter()
                                .zip(probe_types.iter().zip(&stored_types))
                                .map(|(value, (from, to))| adapt_nullability(value, from, to))
                                .collect::<Result<Vec<_>>>()?;
                            values.extend(initial.call(&[])?);
                            storage.push(values, key_hash)?
                        }
                    };
                    row.insert(
                        reference.id(),
                        Datum::Ref(EntryRef {
                            state: *state,
                            row: entry,
                        }),
                    );
                }
                self.output(id, result, rows)?;
            }
            SubOperator::ScanList { input, list, elem } => {
                let rows = self.take_stream(*input)?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    let Datum::List(entries) = column(&row, *list)? else {
                        return Err(DbError::new("Expected a list column").with_field("op", id));
                    };
                    for entry in entries {
                        let mut extended = row.clone();
                        extended.insert(elem.id(), Datum::Ref(*entry));
                        out.push(extended);
                    }
                }
                self.output(id, result, out)?;
            }
            SubOperator::UnwrapOptionalRef {
                input,
                optional,
                reference,
            } => {
                let rows = self.take_stream(*input)?;
                let mut out = Vec::with_capacity(rows.len());
                for mut row in rows {
                    let Datum::Optional(entry) = column(&row, *optional)? else {
                        return Err(
                            DbError::new("Expected an optional column").with_field("op", id)
                        );
                    };
                    if let Some(entry) = *entry {
                        row.insert(reference.id(), Datum::Ref(entry));
                        out.push(row);
                    }
                }
                self.output(id, result, out)?;
            }
            SubOperator::Gather {
                input,
                reference,
                mapping,
            } => {
                let mut rows = self.take_stream(*input)?;
                for row in &mut rows {
                    let entry = column(row, *reference)?.try_as_ref()?;
                    let storage = self.state(entry.state)?;
                    for (member, def) in mapping {
                        let value = storage.value(entry.row, storage.member_index(member)?)?;
                        row.insert(def.id(), Datum::Raw(value.clone()));
                    }
                }
                self.output(id, result, rows)?;
            }
            SubOperator::Scatter {
                input,
                reference,
                mapping,
            } => {
                let rows = self.take_stream(*input)?;
                for row in rows {
                    let entry = column(&row, *reference)?.try_as_ref()?;
                    let storage = self.state_mut(entry.state)?;
                    for (col, member) in mapping {
                        let idx = storage.member_index(member)?;
                        storage.set_value(entry.row, idx, raw_value(&row, *col)?.clone())?;
                    }
                }
            }
            SubOperator::Reduce {
                input,
                reference,
                columns,
                members,
                ..
            } => {
                let function = functions.get(id, RegionRole::Reduce)?;
                let rows = self.take_stream(*input)?;
                for row in rows {
                    let entry = column(&row, *reference)?.try_as_ref()?;
                    let storage = self.state_mut(entry.state)?;
                    let indices = members
                        .iter()
                        .map(|m| storage.member_index(m))
                        .collect::<Result<Vec<_>>>()?;

                    let mut args = Vec::with_capacity(indices.len() + columns.len());
                    for idx in &indices {
                        args.push(storage.value(entry.row, *idx)?.clone());
                    }
                    args.extend(raw_values(&row, columns)?);

                    let results = function.call(&args)?;
                    if results.len() != indices.len() {
                        return Err(DbError::new("Reduce produced wrong number of values")
                            .with_field("op", id));
                    }
                    for (idx, value) in indices.into_iter().zip(results) {
                        storage.set_value(entry.row, idx, value)?;
                    }
                }
            }
            SubOperator::NestedMap { input, body } => {
                let rows = self.take_stream(*input)?;
                let region = program.region(*body)?;
                let [arg] = region.args.as_slice() else {
                    return Err(DbError::new("Nested map body must take a single stream")
                        .with_field("op", id));
                };

                let mut out = Vec::new();
                for row in rows {
                    self.streams.insert(*arg, vec![row.clone()]);
                    let returned = self.run_region(*body, &row)?;
                    let [stream] = returned.as_slice() else {
                        return Err(DbError::new("Nested map body must return a single stream")
                            .with_field("op", id));
                    };
                    out.extend(self.take_stream(*stream)?);
                    self.streams.remove(arg);
                }
                self.output(id, result, out)?;
            }
            SubOperator::CreateSortedView { state, members, .. } => {
                let comparator = functions.get(id, RegionRole::Comparator)?;
                let source = self.state(*state)?;
                let keys = members
                    .iter()
                    .map(|m| source.member_index(m))
                    .collect::<Result<Vec<_>>>()?;

                let mut rows = source.rows.clone();
                let mut error = None;
                rows.sort_by(|a, b| {
                    if error.is_some() {
                        return Ordering::Equal;
                    }
                    compare_rows(comparator, &keys, a, b).unwrap_or_else(|e| {
                        error = Some(e);
                        Ordering::Equal
                    })
                });
                if let Some(error) = error {
                    return Err(error);
                }

                let view = StateStorage::with_rows(source.members.clone(), rows);
                self.states.insert(expect_result(id, result)?, view);
            }
            SubOperator::CreateHashIndexedView { state, hash, link } => {
                let view = StateStorage::hash_indexed_view(self.state(*state)?, hash, link)?;
                self.states.insert(expect_result(id, result)?, view);
            }
            SubOperator::ConvertToExplicit { state, names } => {
                let source = self.state(*state)?;
                let table = StateStorage::with_rows(source.members.clone(), source.rows.clone());
                let result = expect_result(id, result)?;
                self.states.insert(result, table);
                self.result_names.insert(result, names.clone());
            }
            SubOperator::CreateFlag => {
                self.flags.insert(expect_result(id, result)?, false);
            }
            SubOperator::SetFlag {
                input,
                flag,
                condition,
            } => {
                let rows = self.take_stream(*input)?;
                let mut set = false;
                for row in &rows {
                    set |= raw_value(row, *condition)?.is_true();
                }
                let current = self
                    .flags
                    .get_mut(flag)
                    .ok_or_else(|| DbError::new("Unknown flag").with_field("flag", flag))?;
                *current |= set;
            }
            SubOperator::GetFlag { flag, mark } => {
                let value = *self
                    .flags
                    .get(flag)
                    .ok_or_else(|| DbError::new("Unknown flag").with_field("flag", flag))?;
                let mut row = base.clone();
                row.insert(mark.id(), Datum::Raw(RawScalar::bool(value)));
                self.output(id, result, vec![row])?;
            }
            SubOperator::Return { .. } => {
                return Err(DbError::new("Return executed as an operator").with_field("op", id));
            }
        }

        Ok(())
    }

    fn state(&self, state: ValueId) -> Result<&StateStorage> {
        self.states
            .get(&state)
            .ok_or_else(|| {
                DbError::new("State used before it was created").with_field("state", state)
            })
    }

    fn state_mut(&mut self, state: ValueId) -> Result<&mut StateStorage> {
        self.states
            .get_mut(&state)
            .ok_or_else(|| {
                DbError::new("State used before it was created").with_field("state", state)
            })
    }

    fn take_stream(&mut self, stream: ValueId) -> Result<Vec<Row>> {
        self.streams
            .remove(&stream)
            .ok_or_else(|| DbError::new("Stream not available").with_field("stream", stream))
    }

    fn output(&mut self, id: OpId, result: Option<ValueId>, rows: Vec<Row>) -> Result<()> {
        self.streams.insert(expect_result(id, result)?, rows);
        Ok(())
    }
}

fn expect_result(id: OpId, result: Option<ValueId>) -> Result<ValueId> {
    result.ok_or_else(|| DbError::new("Operator does not produce a value").with_field("op", id))
}

fn column(row: &Row, col: ColumnRef) -> Result<&Datum> {
    row.get(&col.id())
        .ok_or_else(|| DbError::new("Column missing from row").with_field("column", col.id()))
}

fn raw_value(row: &Row, col: ColumnRef) -> Result<&RawScalar> {
    column(row, col)?.try_as_raw()
}

fn raw_values(row: &Row, cols: &[ColumnRef]) -> Result<Vec<RawScalar>> {
    cols.iter().map(|c| raw_value(row, *c).cloned()).collect()
}

/// Columns writing each member of a state, in member order.
fn member_columns(members: &[String], mapping: &[(ColumnRef, String)]) -> Result<Vec<ColumnRef>> {
    members
        .iter()
        .map(|member| {
            mapping
                .iter()
                .find(|(_, m)| m == member)
                .map(|(col, _)| *col)
                .ok_or_else(|| DbError::new("Member not written").with_field("member", member))
        })
        .collect()
}

fn key_hash_function<'a>(
    functions: &'a FunctionTable,
    id: OpId,
    ty: &StateType,
) -> Result<Option<&'a CompiledRegion>> {
    match ty {
        StateType::HashMap { .. } | StateType::HashMultiMap { .. } => {
            Ok(Some(functions.get(id, RegionRole::KeyHash)?))
        }
        _ => Ok(None),
    }
}

fn call_hash(function: Option<&CompiledRegion>, keys: &[RawScalar]) -> Result<Option<u64>> {
    let Some(function) = function else {
        return Ok(None);
    };
    match function.call(keys)?.as_slice() {
        [RawScalar::Index(hash)] => Ok(Some(*hash)),
        _ => Err(DbError::new("Key hash must produce a single index")),
    }
}

/// Entries whose stored keys compare equal to `probe`.
fn matching_entries(
    storage: &StateStorage,
    eq: &CompiledRegion,
    hash: Option<u64>,
    probe: &[RawScalar],
) -> Result<Vec<usize>> {
    let mut matches = Vec::new();
    for candidate in storage.candidates(hash)? {
        let mut args = storage.keys(candidate)?.to_vec();
        args.extend_from_slice(probe);
        if eq.call_predicate(&args)? {
            matches.push(candidate);
        }
    }
    Ok(matches)
}

fn compare_rows(
    comparator: &CompiledRegion,
    keys: &[usize],
    a: &[RawScalar],
    b: &[RawScalar],
) -> Result<Ordering> {
    let less = |x: &[RawScalar], y: &[RawScalar]| {
        let mut args: Vec<RawScalar> = keys.iter().map(|k| x[*k].clone()).collect();
        args.extend(keys.iter().map(|k| y[*k].clone()));
        comparator.call_predicate(&args)
    };

    if less(a, b)? {
        Ok(Ordering::Less)
    } else if less(b, a)? {
        Ok(Ordering::Greater)
    } else {
        Ok(Ordering::Equal)
    }
}

/// Convert a raw value between the nullable and non-nullable forms of a
/// type.
fn adapt_nullability(value: RawScalar, from: &DataType, to: &DataType) -> Result<RawScalar> {
    match (from.nullable, to.nullable) {
        (false, true) => Ok(RawScalar::valid(value)),
        (true, false) => {
            if value.is_null() {
                return Err(
                    DbError::new("Null value for non-nullable member").with_field("type", to)
                );
            }
            match value {
                RawScalar::Tuple(mut fields) if fields.len() == 2 => Ok(fields.swap_remove(1)),
                other => Ok(other),
            }
        }
        _ => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::datatype::ScalarType;

    #[test]
    fn adapt_nullable_values() {
        let int = DataType::int64();
        let nullable = DataType::nullable(ScalarType::Int(64));

        let wrapped = adapt_nullability(RawScalar::Int(3), &int, &nullable).unwrap();
        assert_eq!(RawScalar::valid(RawScalar::Int(3)), wrapped);
        assert_eq!(
            RawScalar::Int(3),
            adapt_nullability(wrapped, &nullable, &int).unwrap()
        );

        let null = RawScalar::null(&crate::lowering::raw::RawType::I64);
        assert!(adapt_nullability(null, &nullable, &int).is_err());
    }

    #[test]
    fn result_display_aligns_columns() {
        let result = QueryResult {
            names: vec!["a".to_string(), "name".to_string()],
            types: vec![DataType::int64(), DataType::nullable(ScalarType::String)],
            rows: vec![
                vec![
                    RawScalar::Int(100),
                    RawScalar::valid(RawScalar::Bytes(b"x".to_vec())),
                ],
                vec![
                    RawScalar::Int(2),
                    RawScalar::null(&crate::lowering::raw::RawType::Bytes),
                ],
            ],
        };

        let expected = "\
a   | name
----+-----
100 | x
2   | NULL
";
        assert_eq!(expected, result.to_string());
        assert_eq!(
            json!({
                "columns": [{"name": "a", "type": "int64"}, {"name": "name", "type": "string?"}],
                "rows": [["100", "x"], ["2", null]]
            }),
            result.to_json()
        );
    }
}
