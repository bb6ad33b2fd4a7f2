//! Structural checks for sub-operator programs.
//!
//! Verifies that every value is used within the scope it was defined in,
//! streams are consumed at most once, columns are visible where they're
//! used, state operands have a suitable type, and embedded regions agree
//! with the columns and members they are bound to.

use std::collections::{HashMap, HashSet};

use relc_error::{DbError, Result};
use tracing::trace;

use super::{OpId, Program, RegionId, SubOperator, ValueId, ValueKind};
use crate::expr::region::ExprRegion;
use crate::registry::column::{ColumnId, ColumnManager, ColumnRef};
use crate::types::column::ColumnType;
use crate::types::datatype::{DataType, ScalarType};
use crate::types::state::StateType;

/// Verify a complete program.
pub fn verify_program(program: &Program, columns: &ColumnManager) -> Result<()> {
    let mut verifier = Verifier {
        program,
        columns,
        streams: HashMap::new(),
        consumed: HashSet::new(),
        scopes: Vec::new(),
    };
    verifier.verify_region(program.body(), &HashSet::new())?;
    trace!("program verified");
    Ok(())
}

type Env = HashSet<ColumnId>;

#[derive(Debug)]
struct Verifier<'a> {
    program: &'a Program,
    columns: &'a ColumnManager,
    /// Visible columns for each stream.
    streams: HashMap<ValueId, Env>,
    consumed: HashSet<ValueId>,
    /// Values defined in each enclosing region, innermost last.
    scopes: Vec<HashSet<ValueId>>,
}

impl Verifier<'_> {
    /// Verify a region, returning the values it returns.
    fn verify_region(&mut self, region: RegionId, base: &Env) -> Result<Vec<ValueId>> {
        let reg = self.program.region(region)?;
        self.scopes.push(reg.args.iter().copied().collect());

        let mut returned = None;
        for (idx, &op) in reg.ops.iter().enumerate() {
            let node = self.program.node(op)?;
            if node.region != Some(region) {
                return Err(DbError::new("Operator placed in a region it doesn't belong to")
                    .with_field("op", op)
                    .with_field("region", region));
            }

            if let SubOperator::Return { values } = &node.op {
                if idx != reg.ops.len() - 1 {
                    return Err(op_error(op, &node.op, "Return must be the last operator"));
                }
                returned = Some(values.clone());
            }

            self.verify_op(op, base)?;
        }

        self.scopes.pop();

        returned.ok_or_else(|| {
            DbError::new("Region is missing a return terminator").with_field("region", region)
        })
    }

    fn verify_op(&mut self, id: OpId, base: &Env) -> Result<()> {
        let op = &self.program.op(id)?.clone();

        for operand in op.operands() {
            if !self.scopes.iter().any(|scope| scope.contains(&operand)) {
                return Err(op_error(id, op, "Value used outside of the scope it's defined in")
                    .with_field("value", operand));
            }
        }

        // Input stream handling shared by every stream consuming operator.
        let input_env = match op.input_stream() {
            Some(input) => Some(self.consume_stream(id, op, input)?),
            None => None,
        };

        for col in op.used_columns() {
            let env = input_env.as_ref().unwrap_or(base);
            if !env.contains(&col.id()) {
                return Err(op_error(id, op, "Column not visible in input stream")
                    .with_field("column", self.columns.display_name(col.id())));
            }
        }

        let defined = op.defined_columns();
        {
            let env = input_env.as_ref().unwrap_or(base);
            for def in &defined {
                if env.contains(&def.id()) {
                    return Err(op_error(id, op, "Column redefined while still visible")
                        .with_field("column", self.columns.display_name(def.id())));
                }
            }
        }

        self.check_operator(id, op)?;

        let output_env = match op {
            SubOperator::NestedMap { body, .. } => {
                let env = input_env.clone().unwrap_or_default();
                Some(self.verify_nested(id, op, *body, env)?)
            }
            SubOperator::Scan { .. } | SubOperator::GetFlag { .. } => {
                let mut env = base.clone();
                env.extend(defined.iter().map(|d| d.id()));
                Some(env)
            }
            SubOperator::Filter { .. }
            | SubOperator::Map { .. }
            | SubOperator::Renaming { .. }
            | SubOperator::Lookup { .. }
            | SubOperator::LookupOrInsert { .. }
            | SubOperator::ScanList { .. }
            | SubOperator::UnwrapOptionalRef { .. }
            | SubOperator::Gather { .. } => {
                let mut env = input_env.clone().unwrap_or_default();
                env.extend(defined.iter().map(|d| d.id()));
                Some(env)
            }
            _ => None,
        };

        if let Some(result) = self.program.node(id)?.result {
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(result);
            }
            if let Some(env) = output_env {
                self.streams.insert(result, env);
            }
        }

        if let SubOperator::Return { values } = op {
            for value in values {
                if matches!(self.program.value(*value)?.kind, ValueKind::Stream) {
                    self.consume_stream(id, op, *value)?;
                }
            }
        }

        Ok(())
    }

    fn verify_nested(&mut self, id: OpId, op: &SubOperator, body: RegionId, env: Env) -> Result<Env> {
        let region = self.program.region(body)?;
        if region.parent != Some(id) {
            return Err(op_error(id, op, "Body region not owned by operator"));
        }
        let [arg] = region.args.as_slice() else {
            return Err(op_error(id, op, "Nested map body must take a single stream")
                .with_field("args", region.args.len()));
        };
        self.expect_kind(id, op, *arg, "stream", |k| matches!(k, ValueKind::Stream))?;
        self.streams.insert(*arg, env.clone());

        let returned = self.verify_region(body, &env)?;
        let [stream] = returned.as_slice() else {
            return Err(op_error(id, op, "Nested map body must return a single stream")
                .with_field("returned", returned.len()));
        };

        self.streams
            .get(stream)
            .cloned()
            .ok_or_else(|| op_error(id, op, "Nested map body must return a stream"))
    }

    fn consume_stream(&mut self, id: OpId, op: &SubOperator, input: ValueId) -> Result<Env> {
        self.expect_kind(id, op, input, "stream", |k| matches!(k, ValueKind::Stream))?;
        if !self.consumed.insert(input) {
            return Err(op_error(id, op, "Stream consumed more than once").with_field("value", input));
        }
        self.streams
            .get(&input)
            .cloned()
            .ok_or_else(|| op_error(id, op, "Unknown stream").with_field("value", input))
    }

    fn expect_kind(
        &self,
        id: OpId,
        op: &SubOperator,
        value: ValueId,
        expected: &str,
        pred: impl Fn(&ValueKind) -> bool,
    ) -> Result<()> {
        let kind = &self.program.value(value)?.kind;
        if !pred(kind) {
            return Err(op_error(id, op, format!("Expected {expected} operand"))
                .with_field("value", value)
                .with_field("kind", kind));
        }
        Ok(())
    }

    fn state(&self, id: OpId, op: &SubOperator, value: ValueId) -> Result<&StateType> {
        self.expect_kind(id, op, value, "state", |k| matches!(k, ValueKind::State(_)))?;
        self.program.state_type(value)
    }

    fn datatype(&self, col: ColumnId) -> Result<DataType> {
        self.columns.datatype(col)
    }

    fn check_member(
        &self,
        id: OpId,
        op: &SubOperator,
        state: &StateType,
        member: &str,
        col: ColumnId,
    ) -> Result<()> {
        let member_type = state.member_type(member)?;
        let col_type = self.datatype(col)?;
        if member_type != col_type {
            return Err(op_error(id, op, "Column type does not match member type")
                .with_field("member", member)
                .with_field("member_type", member_type)
                .with_field("column", self.columns.display_name(col))
                .with_field("column_type", col_type));
        }
        Ok(())
    }

    /// State referenced by an entry reference column.
    fn referenced_state(&self, id: OpId, op: &SubOperator, col: ColumnRef) -> Result<StateType> {
        match self.columns.column_type(col.id())? {
            ColumnType::EntryRef(state) => Ok(state.as_ref().clone()),
            other => Err(op_error(id, op, "Expected an entry reference column")
                .with_field("column", self.columns.display_name(col.id()))
                .with_field("type", other)),
        }
    }

    fn check_operator(&self, id: OpId, op: &SubOperator) -> Result<()> {
        for region in op.expr_regions() {
            region
                .validate()
                .map_err(|e| op_error(id, op, "Invalid region").with_field("error", e))?;
        }

        match op {
            SubOperator::GetExternal { .. }
            | SubOperator::Create { .. }
            | SubOperator::CreateFlag
            | SubOperator::Return { .. }
            | SubOperator::NestedMap { .. } => (),
            SubOperator::Scan { state, mapping } => {
                let state = self.state(id, op, *state)?;
                if !state.is_scannable() {
                    return Err(op_error(id, op, "State cannot be scanned").with_field("state", state));
                }
                for (member, def) in mapping {
                    self.check_member(id, op, state, member, def.id())?;
                }
            }
            SubOperator::Map {
                computed,
                inputs,
                region,
                ..
            } => {
                let params = inputs
                    .iter()
                    .map(|c| self.datatype(c.id()))
                    .collect::<Result<Vec<_>>>()?;
                check_params(id, op, region, &params)?;
                let results = computed
                    .iter()
                    .map(|c| self.datatype(c.id()))
                    .collect::<Result<Vec<_>>>()?;
                check_results(id, op, region, &results)?;
            }
            SubOperator::Filter { conditions, .. } => {
                for cond in conditions {
                    expect_bool(id, op, self.datatype(cond.id())?)?;
                }
            }
            SubOperator::Renaming { renamed, .. } => {
                for (def, col) in renamed {
                    if self.columns.column_type(def.id())? != self.columns.column_type(col.id())? {
                        return Err(op_error(id, op, "Renamed column changes type")
                            .with_field("column", self.columns.display_name(col.id())));
                    }
                }
            }
            SubOperator::Materialize { state, mapping, .. } => {
                let state = self.state(id, op, *state)?;
                if !state.is_materializable() {
                    return Err(op_error(id, op, "Cannot materialize into state")
                        .with_field("state", state));
                }
                for (col, member) in mapping {
                    self.check_member(id, op, state, member, col.id())?;
                }
            }
            SubOperator::Insert {
                state, mapping, eq, ..
            } => {
                let state = self.state(id, op, *state)?;
                let keys = state.key_members().ok_or_else(|| {
                    op_error(id, op, "Cannot insert into state").with_field("state", state)
                })?;
                for (col, member) in mapping {
                    self.check_member(id, op, state, member, col.id())?;
                }
                for key in keys.names() {
                    if !mapping.iter().any(|(_, m)| m == key) {
                        return Err(op_error(id, op, "Insert is missing a key member")
                            .with_field("member", key));
                    }
                }
                if let Some(eq) = eq {
                    check_equality(id, op, eq, keys.len() * 2)?;
                }
            }
            SubOperator::Lookup {
                state,
                keys,
                reference,
                eq,
                ..
            } => {
                let state = self.state(id, op, *state)?;
                if !state.is_lookupable() {
                    return Err(op_error(id, op, "Cannot look up entries in state")
                        .with_field("state", state));
                }
                self.check_lookup_keys(id, op, state, keys)?;
                let expected = ColumnType::lookup_result(state);
                self.check_column_type(id, op, reference.reference(), &expected)?;
                if let Some(eq) = eq {
                    check_equality(id, op, eq, keys.len() * 2)?;
                }
            }
            SubOperator::LookupOrInsert {
                state,
                keys,
                reference,
                eq,
                initial,
                ..
            } => {
                let state = self.state(id, op, *state)?;
                if !state.is_unique_keyed() {
                    return Err(op_error(id, op, "Lookup or insert requires uniquely keyed state")
                        .with_field("state", state));
                }
                self.check_lookup_keys(id, op, state, keys)?;
                self.check_column_type(
                    id,
                    op,
                    reference.reference(),
                    &ColumnType::entry_ref(state.clone()),
                )?;
                if let Some(eq) = eq {
                    check_equality(id, op, eq, keys.len() * 2)?;
                }

                let values = match state {
                    StateType::Map { values, .. } | StateType::HashMap { values, .. } => {
                        values.members.iter().map(|m| m.datatype).collect::<Vec<_>>()
                    }
                    _ => Vec::new(),
                };
                check_params(id, op, initial, &[])?;
                check_results(id, op, initial, &values)?;
            }
            SubOperator::ScanList { list, elem, .. } => match self.columns.column_type(list.id())? {
                ColumnType::List(inner) => {
                    self.check_column_type(id, op, elem.reference(), inner)?;
                }
                other => {
                    return Err(op_error(id, op, "Expected a list column").with_field("type", other));
                }
            },
            SubOperator::UnwrapOptionalRef {
                optional,
                reference,
                ..
            } => match self.columns.column_type(optional.id())? {
                ColumnType::Optional(inner) => {
                    self.check_column_type(id, op, reference.reference(), inner)?;
                }
                other => {
                    return Err(op_error(id, op, "Expected an optional column")
                        .with_field("type", other));
                }
            },
            SubOperator::Gather {
                reference, mapping, ..
            } => {
                let state = self.referenced_state(id, op, *reference)?;
                for (member, def) in mapping {
                    self.check_member(id, op, &state, member, def.id())?;
                }
            }
            SubOperator::Scatter {
                reference, mapping, ..
            } => {
                let state = self.referenced_state(id, op, *reference)?;
                for (col, member) in mapping {
                    self.check_member(id, op, &state, member, col.id())?;
                }
            }
            SubOperator::Reduce {
                reference,
                columns,
                members,
                region,
                ..
            } => {
                let state = self.referenced_state(id, op, *reference)?;
                let member_types = members
                    .iter()
                    .map(|m| state.member_type(m))
                    .collect::<Result<Vec<_>>>()?;
                let mut params = member_types.clone();
                for col in columns {
                    params.push(self.datatype(col.id())?);
                }
                check_params(id, op, region, &params)?;
                check_results(id, op, region, &member_types)?;
            }
            SubOperator::CreateSortedView {
                state,
                members,
                comparator,
            } => {
                let state = self.state(id, op, *state)?;
                if !matches!(state, StateType::Vector(_)) {
                    return Err(op_error(id, op, "Sorted view requires a vector"));
                }
                let mut params = Vec::with_capacity(members.len() * 2);
                for member in members {
                    params.push(state.member_type(member)?);
                }
                params.extend(params.clone());
                check_params(id, op, comparator, &params)?;
                check_results(id, op, comparator, &[DataType::bool()])?;
            }
            SubOperator::CreateHashIndexedView { state, hash, link } => {
                let state = self.state(id, op, *state)?;
                if !matches!(state, StateType::Buffer(_)) {
                    return Err(op_error(id, op, "Hash indexed view requires a buffer"));
                }
                if state.member_type(hash)? != DataType::index() {
                    return Err(op_error(id, op, "Hash member must be an index"));
                }
                if state.member_type(link)? != DataType::link() {
                    return Err(op_error(id, op, "Link member must be a link"));
                }
            }
            SubOperator::ConvertToExplicit { state, names } => {
                let state = self.state(id, op, *state)?;
                if !matches!(state, StateType::Table(_)) {
                    return Err(op_error(id, op, "Only tables can be converted"));
                }
                if names.len() != state.members().len() {
                    return Err(op_error(id, op, "Name count does not match member count")
                        .with_field("names", names.len())
                        .with_field("members", state.members().len()));
                }
            }
            SubOperator::SetFlag {
                flag, condition, ..
            } => {
                self.expect_kind(id, op, *flag, "flag", |k| matches!(k, ValueKind::Flag))?;
                expect_bool(id, op, self.datatype(condition.id())?)?;
            }
            SubOperator::GetFlag { flag, mark } => {
                self.expect_kind(id, op, *flag, "flag", |k| matches!(k, ValueKind::Flag))?;
                expect_bool(id, op, self.datatype(mark.id())?)?;
            }
        }

        Ok(())
    }

    fn check_lookup_keys(
        &self,
        id: OpId,
        op: &SubOperator,
        state: &StateType,
        keys: &[ColumnRef],
    ) -> Result<()> {
        let expected: Vec<DataType> = match state {
            StateType::HashIndexedView { .. } => vec![DataType::index()],
            other => other
                .key_members()
                .map(|keys| keys.members.iter().map(|m| m.datatype).collect())
                .unwrap_or_default(),
        };

        if expected.len() != keys.len() {
            return Err(op_error(id, op, "Lookup key count does not match state")
                .with_field("expected", expected.len())
                .with_field("got", keys.len()));
        }

        for (key, expected) in keys.iter().zip(expected) {
            let dt = self.datatype(key.id())?;
            if dt.scalar != expected.scalar {
                return Err(op_error(id, op, "Lookup key type does not match state")
                    .with_field("column", self.columns.display_name(key.id()))
                    .with_field("expected", expected)
                    .with_field("got", dt));
            }
        }

        Ok(())
    }

    fn check_column_type(
        &self,
        id: OpId,
        op: &SubOperator,
        col: ColumnRef,
        expected: &ColumnType,
    ) -> Result<()> {
        let actual = self.columns.column_type(col.id())?;
        if actual != expected {
            return Err(op_error(id, op, "Unexpected column type")
                .with_field("column", self.columns.display_name(col.id()))
                .with_field("expected", expected)
                .with_field("got", actual));
        }
        Ok(())
    }
}

fn op_error(id: OpId, op: &SubOperator, msg: impl Into<String>) -> DbError {
    DbError::new(msg).with_field("op", format!("{id} ({})", op.name()))
}

fn expect_bool(id: OpId, op: &SubOperator, dt: DataType) -> Result<()> {
    if dt.scalar != ScalarType::Bool {
        return Err(op_error(id, op, "Expected a boolean column").with_field("type", dt));
    }
    Ok(())
}

fn check_params(id: OpId, op: &SubOperator, region: &ExprRegion, params: &[DataType]) -> Result<()> {
    if region.params != params {
        return Err(op_error(id, op, "Region parameters do not match bound values")
            .with_field("expected", format_types(params))
            .with_field("got", format_types(&region.params)));
    }
    Ok(())
}

fn check_results(id: OpId, op: &SubOperator, region: &ExprRegion, results: &[DataType]) -> Result<()> {
    let types = region.result_types()?;
    if types != results {
        return Err(op_error(id, op, "Region results do not match bound values")
            .with_field("expected", format_types(results))
            .with_field("got", format_types(&types)));
    }
    Ok(())
}

/// Equality regions take two halves of keys and produce one boolean.
fn check_equality(id: OpId, op: &SubOperator, eq: &ExprRegion, num_params: usize) -> Result<()> {
    if eq.params.len() != num_params {
        return Err(op_error(id, op, "Equality region has the wrong number of arguments")
            .with_field("expected", num_params)
            .with_field("got", eq.params.len()));
    }
    match eq.result_types()?.as_slice() {
        [dt] if dt.scalar == ScalarType::Bool => Ok(()),
        _ => Err(op_error(id, op, "Equality region must produce a single boolean")),
    }
}

fn format_types(types: &[DataType]) -> String {
    let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    format!("[{}]", types.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ScalarExpr;
    use crate::registry::CompileContext;
    use crate::types::state::{Member, StateMembers};

    fn vector(name: &str) -> StateType {
        StateType::Vector(StateMembers::new(vec![Member::new(name, DataType::int64())]))
    }

    #[test]
    fn verify_simple_program() {
        let mut ctx = CompileContext::new();
        let a = ctx.columns.create_def("t", "a", DataType::int64()).unwrap();
        let b = ctx.columns.create_def("t", "b", DataType::bool()).unwrap();

        let mut program = Program::new();
        let body = program.body();
        let state = program
            .append_value(body, SubOperator::Create { ty: vector("a") })
            .unwrap();
        let scan = program
            .append_value(
                body,
                SubOperator::Scan {
                    state,
                    mapping: vec![("a".to_string(), a)],
                },
            )
            .unwrap();
        let (region, inputs) = ExprRegion::bind_columns(
            &[ScalarExpr::compare(
                crate::expr::CompareOp::Gt,
                ScalarExpr::column(a.reference()),
                ScalarExpr::constant(3i64, DataType::int64()),
            )],
            &ctx.columns,
        )
        .unwrap();
        let map = program
            .append_value(
                body,
                SubOperator::Map {
                    input: scan,
                    computed: vec![b],
                    inputs,
                    region,
                },
            )
            .unwrap();
        let filter = program
            .append_value(
                body,
                SubOperator::Filter {
                    input: map,
                    conditions: vec![b.reference()],
                },
            )
            .unwrap();
        program
            .append(body, SubOperator::Return {
                values: vec![filter],
            })
            .unwrap();

        verify_program(&program, &ctx.columns).unwrap();
    }

    #[test]
    fn stream_consumed_twice() {
        let mut ctx = CompileContext::new();
        let a = ctx.columns.create_def("t", "a", DataType::int64()).unwrap();

        let mut program = Program::new();
        let body = program.body();
        let state = program
            .append_value(body, SubOperator::Create { ty: vector("a") })
            .unwrap();
        let scan = program
            .append_value(
                body,
                SubOperator::Scan {
                    state,
                    mapping: vec![("a".to_string(), a)],
                },
            )
            .unwrap();
        let f1 = program
            .append_value(
                body,
                SubOperator::Filter {
                    input: scan,
                    conditions: Vec::new(),
                },
            )
            .unwrap();
        let f2 = program
            .append_value(
                body,
                SubOperator::Filter {
                    input: scan,
                    conditions: Vec::new(),
                },
            )
            .unwrap();
        program
            .append(body, SubOperator::Return {
                values: vec![f1, f2],
            })
            .unwrap();

        let err = verify_program(&program, &ctx.columns).unwrap_err();
        assert!(err.get_msg().contains("more than once"), "{err}");
    }

    #[test]
    fn column_not_visible() {
        let mut ctx = CompileContext::new();
        let a = ctx.columns.create_def("t", "a", DataType::int64()).unwrap();
        let c = ctx.columns.create_def("t", "c", DataType::bool()).unwrap();

        let mut program = Program::new();
        let body = program.body();
        let state = program
            .append_value(body, SubOperator::Create { ty: vector("a") })
            .unwrap();
        let scan = program
            .append_value(
                body,
                SubOperator::Scan {
                    state,
                    mapping: vec![("a".to_string(), a)],
                },
            )
            .unwrap();
        let filter = program
            .append_value(
                body,
                SubOperator::Filter {
                    input: scan,
                    conditions: vec![c.reference()],
                },
            )
            .unwrap();
        program
            .append(body, SubOperator::Return {
                values: vec![filter],
            })
            .unwrap();

        let err = verify_program(&program, &ctx.columns).unwrap_err();
        assert!(err.get_msg().contains("not visible"), "{err}");
    }

    #[test]
    fn missing_terminator() {
        let ctx = CompileContext::new();
        let mut program = Program::new();
        let body = program.body();
        program
            .append(body, SubOperator::Create { ty: vector("a") })
            .unwrap();

        let err = verify_program(&program, &ctx.columns).unwrap_err();
        assert!(err.get_msg().contains("return"), "{err}");
    }

    #[test]
    fn map_region_arity() {
        let mut ctx = CompileContext::new();
        let a = ctx.columns.create_def("t", "a", DataType::int64()).unwrap();
        let b = ctx.columns.create_def("t", "b", DataType::int64()).unwrap();

        let mut program = Program::new();
        let body = program.body();
        let state = program
            .append_value(body, SubOperator::Create { ty: vector("a") })
            .unwrap();
        let scan = program
            .append_value(
                body,
                SubOperator::Scan {
                    state,
                    mapping: vec![("a".to_string(), a)],
                },
            )
            .unwrap();
        // Region takes two arguments but only one column is bound.
        let region = ExprRegion::new(
            vec![DataType::int64(), DataType::int64()],
            vec![ScalarExpr::arg(1)],
        );
        let map = program
            .append_value(
                body,
                SubOperator::Map {
                    input: scan,
                    computed: vec![b],
                    inputs: vec![a.reference()],
                    region,
                },
            )
            .unwrap();
        program
            .append(body, SubOperator::Return { values: vec![map] })
            .unwrap();

        let err = verify_program(&program, &ctx.columns).unwrap_err();
        assert!(err.get_msg().contains("parameters"), "{err}");
    }
}
