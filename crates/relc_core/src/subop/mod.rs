//! Sub-operator programs.
//!
//! A program is an arena of operators grouped into regions. The top level
//! body is region 0, nested map operators own their body region. Operators
//! produce at most one value: a tuple stream, a state, or a flag.
//!
//! Rewrites never hold references into the arena across mutations, every
//! link between operators, values and regions is an index.

pub mod analysis;
pub mod explain;
pub mod verify;

use std::fmt;

use relc_error::{DbError, Result};

use crate::expr::region::ExprRegion;
use crate::registry::column::{ColumnDef, ColumnRef};
use crate::types::state::{StateMembers, StateType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Stream,
    State(StateType),
    Flag,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::State(state) => write!(f, "{state}"),
            Self::Flag => write!(f, "flag"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueProducer {
    Op(OpId),
    RegionArg { region: RegionId, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    pub kind: ValueKind,
    pub producer: ValueProducer,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Region {
    pub args: Vec<ValueId>,
    pub ops: Vec<OpId>,
    /// Operator owning this region, `None` for the top level body.
    pub parent: Option<OpId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpNode {
    pub op: SubOperator,
    pub result: Option<ValueId>,
    /// Region containing this operator, `None` if detached.
    pub region: Option<RegionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubOperator {
    /// Handle to an external table. The description is a JSON object naming
    /// the table and mapping members to table columns.
    GetExternal {
        table: String,
        members: StateMembers,
        description: String,
    },
    Create {
        ty: StateType,
    },
    /// Enumerate the rows of a state, defining a column per member.
    Scan {
        state: ValueId,
        mapping: Vec<(String, ColumnDef)>,
    },
    Map {
        input: ValueId,
        computed: Vec<ColumnDef>,
        /// Columns passed to the region, in argument order.
        inputs: Vec<ColumnRef>,
        region: ExprRegion,
    },
    /// Keep rows where all conditions are true.
    Filter {
        input: ValueId,
        conditions: Vec<ColumnRef>,
    },
    Renaming {
        input: ValueId,
        renamed: Vec<(ColumnDef, ColumnRef)>,
    },
    Materialize {
        input: ValueId,
        state: ValueId,
        mapping: Vec<(ColumnRef, String)>,
    },
    /// Insert rows into an associative state.
    ///
    /// `eq` compares stored keys (first half of the arguments) with the new
    /// row's keys (second half). Only used by uniquely keyed states.
    Insert {
        input: ValueId,
        state: ValueId,
        mapping: Vec<(ColumnRef, String)>,
        eq: Option<ExprRegion>,
    },
    /// Find entries matching the key columns.
    ///
    /// Produces an optional reference for uniquely keyed states and a list
    /// of references otherwise.
    Lookup {
        input: ValueId,
        state: ValueId,
        keys: Vec<ColumnRef>,
        reference: ColumnDef,
        eq: Option<ExprRegion>,
    },
    /// Find the entry for the keys, inserting one built from `initial` if it
    /// doesn't exist.
    LookupOrInsert {
        input: ValueId,
        state: ValueId,
        keys: Vec<ColumnRef>,
        reference: ColumnDef,
        eq: Option<ExprRegion>,
        initial: ExprRegion,
    },
    /// Produce one row per element in a list column.
    ScanList {
        input: ValueId,
        list: ColumnRef,
        elem: ColumnDef,
    },
    /// Drop rows with a missing reference.
    UnwrapOptionalRef {
        input: ValueId,
        optional: ColumnRef,
        reference: ColumnDef,
    },
    /// Read members of the referenced entry into new columns.
    Gather {
        input: ValueId,
        reference: ColumnRef,
        mapping: Vec<(String, ColumnDef)>,
    },
    /// Write columns into members of the referenced entry.
    Scatter {
        input: ValueId,
        reference: ColumnRef,
        mapping: Vec<(ColumnRef, String)>,
    },
    /// Update members of the referenced entry.
    ///
    /// Region arguments are the current member values followed by the
    /// column values, results are the new member values.
    Reduce {
        input: ValueId,
        reference: ColumnRef,
        columns: Vec<ColumnRef>,
        members: Vec<String>,
        region: ExprRegion,
    },
    /// Run the body once per input row.
    ///
    /// The body receives a stream containing just the current row. Streams
    /// started inside the body extend the current row.
    NestedMap {
        input: ValueId,
        body: RegionId,
    },
    CreateSortedView {
        state: ValueId,
        members: Vec<String>,
        /// Strict less-than over `members` of two rows.
        comparator: ExprRegion,
    },
    CreateHashIndexedView {
        state: ValueId,
        hash: String,
        link: String,
    },
    ConvertToExplicit {
        state: ValueId,
        names: Vec<String>,
    },
    CreateFlag,
    SetFlag {
        input: ValueId,
        flag: ValueId,
        condition: ColumnRef,
    },
    /// Single row stream extending the current row with the flag's value.
    GetFlag {
        flag: ValueId,
        mark: ColumnDef,
    },
    Return {
        values: Vec<ValueId>,
    },
}

impl SubOperator {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GetExternal { .. } => "get_external",
            Self::Create { .. } => "create",
            Self::Scan { .. } => "scan",
            Self::Map { .. } => "map",
            Self::Filter { .. } => "filter",
            Self::Renaming { .. } => "renaming",
            Self::Materialize { .. } => "materialize",
            Self::Insert { .. } => "insert",
            Self::Lookup { .. } => "lookup",
            Self::LookupOrInsert { .. } => "lookup_or_insert",
            Self::ScanList { .. } => "scan_list",
            Self::UnwrapOptionalRef { .. } => "unwrap_optional_ref",
            Self::Gather { .. } => "gather",
            Self::Scatter { .. } => "scatter",
            Self::Reduce { .. } => "reduce",
            Self::NestedMap { .. } => "nested_map",
            Self::CreateSortedView { .. } => "create_sorted_view",
            Self::CreateHashIndexedView { .. } => "create_hash_indexed_view",
            Self::ConvertToExplicit { .. } => "convert_to_explicit",
            Self::CreateFlag => "create_flag",
            Self::SetFlag { .. } => "set_flag",
            Self::GetFlag { .. } => "get_flag",
            Self::Return { .. } => "return",
        }
    }

    /// The input stream, if this operator consumes one.
    pub fn input_stream(&self) -> Option<ValueId> {
        match self {
            Self::Map { input, .. }
            | Self::Filter { input, .. }
            | Self::Renaming { input, .. }
            | Self::Materialize { input, .. }
            | Self::Insert { input, .. }
            | Self::Lookup { input, .. }
            | Self::LookupOrInsert { input, .. }
            | Self::ScanList { input, .. }
            | Self::UnwrapOptionalRef { input, .. }
            | Self::Gather { input, .. }
            | Self::Scatter { input, .. }
            | Self::Reduce { input, .. }
            | Self::NestedMap { input, .. }
            | Self::SetFlag { input, .. } => Some(*input),
            _ => None,
        }
    }

    /// The state operand, if any.
    pub fn state_operand(&self) -> Option<ValueId> {
        match self {
            Self::Scan { state, .. }
            | Self::Materialize { state, .. }
            | Self::Insert { state, .. }
            | Self::Lookup { state, .. }
            | Self::LookupOrInsert { state, .. }
            | Self::CreateSortedView { state, .. }
            | Self::CreateHashIndexedView { state, .. }
            | Self::ConvertToExplicit { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// Every value operand in order.
    pub fn operands(&self) -> Vec<ValueId> {
        let mut operands = Vec::new();
        if let Some(input) = self.input_stream() {
            operands.push(input);
        }
        if let Some(state) = self.state_operand() {
            operands.push(state);
        }
        match self {
            Self::SetFlag { flag, .. } | Self::GetFlag { flag, .. } => operands.push(*flag),
            Self::Return { values } => operands.extend(values.iter().copied()),
            _ => (),
        }
        operands
    }

    pub fn for_each_operand_mut(&mut self, f: &mut impl FnMut(&mut ValueId)) {
        match self {
            Self::GetExternal { .. } | Self::Create { .. } | Self::CreateFlag => (),
            Self::Scan { state, .. }
            | Self::CreateSortedView { state, .. }
            | Self::CreateHashIndexedView { state, .. }
            | Self::ConvertToExplicit { state, .. } => f(state),
            Self::Map { input, .. }
            | Self::Filter { input, .. }
            | Self::Renaming { input, .. }
            | Self::ScanList { input, .. }
            | Self::UnwrapOptionalRef { input, .. }
            | Self::Gather { input, .. }
            | Self::Scatter { input, .. }
            | Self::Reduce { input, .. }
            | Self::NestedMap { input, .. } => f(input),
            Self::Materialize { input, state, .. }
            | Self::Insert { input, state, .. }
            | Self::Lookup { input, state, .. }
            | Self::LookupOrInsert { input, state, .. } => {
                f(input);
                f(state);
            }
            Self::SetFlag { input, flag, .. } => {
                f(input);
                f(flag);
            }
            Self::GetFlag { flag, .. } => f(flag),
            Self::Return { values } => values.iter_mut().for_each(f),
        }
    }

    /// Body region owned by this operator.
    pub fn body(&self) -> Option<RegionId> {
        match self {
            Self::NestedMap { body, .. } => Some(*body),
            _ => None,
        }
    }

    /// Columns introduced by this operator.
    pub fn defined_columns(&self) -> Vec<ColumnDef> {
        match self {
            Self::Scan { mapping, .. } | Self::Gather { mapping, .. } => {
                mapping.iter().map(|(_, def)| *def).collect()
            }
            Self::Map { computed, .. } => computed.clone(),
            Self::Renaming { renamed, .. } => renamed.iter().map(|(def, _)| *def).collect(),
            Self::Lookup { reference, .. } | Self::LookupOrInsert { reference, .. } => {
                vec![*reference]
            }
            Self::ScanList { elem, .. } => vec![*elem],
            Self::UnwrapOptionalRef { reference, .. } => vec![*reference],
            Self::GetFlag { mark, .. } => vec![*mark],
            _ => Vec::new(),
        }
    }

    /// Columns read from the input stream.
    pub fn used_columns(&self) -> Vec<ColumnRef> {
        match self {
            Self::Map { inputs, .. } => inputs.clone(),
            Self::Filter { conditions, .. } => conditions.clone(),
            Self::Renaming { renamed, .. } => renamed.iter().map(|(_, col)| *col).collect(),
            Self::Materialize { mapping, .. }
            | Self::Insert { mapping, .. }
            | Self::Scatter { mapping, .. } => mapping.iter().map(|(col, _)| *col).collect(),
            Self::Lookup { keys, .. } | Self::LookupOrInsert { keys, .. } => keys.clone(),
            Self::ScanList { list, .. } => vec![*list],
            Self::UnwrapOptionalRef { optional, .. } => vec![*optional],
            Self::Gather { reference, .. } => vec![*reference],
            Self::Reduce {
                reference, columns, ..
            } => {
                let mut cols = vec![*reference];
                cols.extend(columns.iter().copied());
                cols
            }
            Self::SetFlag { condition, .. } => vec![*condition],
            _ => Vec::new(),
        }
    }

    /// Expression regions embedded in this operator.
    pub fn expr_regions(&self) -> Vec<&ExprRegion> {
        match self {
            Self::Map { region, .. } | Self::Reduce { region, .. } => vec![region],
            Self::Insert { eq, .. } | Self::Lookup { eq, .. } => eq.iter().collect(),
            Self::LookupOrInsert { eq, initial, .. } => {
                let mut regions: Vec<&ExprRegion> = eq.iter().collect();
                regions.push(initial);
                regions
            }
            Self::CreateSortedView { comparator, .. } => vec![comparator],
            _ => Vec::new(),
        }
    }
}

/// A sub-operator program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    ops: Vec<OpNode>,
    values: Vec<ValueInfo>,
    regions: Vec<Region>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        Program {
            ops: Vec::new(),
            values: Vec::new(),
            regions: vec![Region::default()],
        }
    }

    /// The top level body.
    pub const fn body(&self) -> RegionId {
        RegionId(0)
    }

    pub fn new_region(&mut self) -> RegionId {
        let id = RegionId(self.regions.len() as u32);
        self.regions.push(Region::default());
        id
    }

    pub fn add_region_arg(&mut self, region: RegionId, kind: ValueKind) -> Result<ValueId> {
        let index = self.region(region)?.args.len();
        let value = self.push_value(ValueInfo {
            kind,
            producer: ValueProducer::RegionArg { region, index },
        });
        self.region_mut(region)?.args.push(value);
        Ok(value)
    }

    /// Create an operator without placing it in any region.
    pub fn create_detached(&mut self, op: SubOperator) -> Result<OpId> {
        let kind = self.result_kind(&op)?;
        let id = OpId(self.ops.len() as u32);

        if let Some(body) = op.body() {
            let region = self.region_mut(body)?;
            if region.parent.is_some() {
                return Err(DbError::new("Region already owned by another operator")
                    .with_field("region", body));
            }
            region.parent = Some(id);
        }

        let result = kind.map(|kind| {
            self.push_value(ValueInfo {
                kind,
                producer: ValueProducer::Op(id),
            })
        });

        self.ops.push(OpNode {
            op,
            result,
            region: None,
        });

        Ok(id)
    }

    /// Append an operator to the end of a region.
    pub fn append(&mut self, region: RegionId, op: SubOperator) -> Result<OpId> {
        let id = self.create_detached(op)?;
        self.region_mut(region)?.ops.push(id);
        self.ops[id.0 as usize].region = Some(region);
        Ok(id)
    }

    /// Append an operator and return the value it produces.
    pub fn append_value(&mut self, region: RegionId, op: SubOperator) -> Result<ValueId> {
        let id = self.append(region, op)?;
        self.result(id)
    }

    /// Place a detached operator next to an anchor operator.
    pub fn attach(&mut self, op: OpId, anchor: OpId, pos: InsertPosition) -> Result<()> {
        if self.node(op)?.region.is_some() {
            return Err(DbError::new("Operator is already attached").with_field("op", op));
        }
        let (region, idx) = self
            .position(anchor)
            .ok_or_else(|| DbError::new("Anchor operator is detached").with_field("op", anchor))?;

        let idx = match pos {
            InsertPosition::Before => idx,
            InsertPosition::After => idx + 1,
        };
        self.region_mut(region)?.ops.insert(idx, op);
        self.ops[op.0 as usize].region = Some(region);
        Ok(())
    }

    /// Remove an operator from its region. Its result must no longer be
    /// used.
    pub fn erase(&mut self, op: OpId) -> Result<()> {
        let (region, idx) = self
            .position(op)
            .ok_or_else(|| DbError::new("Cannot erase detached operator").with_field("op", op))?;
        self.region_mut(region)?.ops.remove(idx);
        self.ops[op.0 as usize].region = None;
        Ok(())
    }

    /// Replace uses of `old` with `new` in every operator except those
    /// listed.
    pub fn replace_uses(&mut self, old: ValueId, new: ValueId, except: &[OpId]) {
        for (idx, node) in self.ops.iter_mut().enumerate() {
            if except.contains(&OpId(idx as u32)) {
                continue;
            }
            node.op.for_each_operand_mut(&mut |operand| {
                if *operand == old {
                    *operand = new;
                }
            });
        }
    }

    /// Swap the operator at `op`, updating the kind of its result.
    pub fn set_operator(&mut self, op: OpId, new: SubOperator) -> Result<()> {
        let kind = self.result_kind(&new)?;
        let result = self.node(op)?.result;
        match (result, kind) {
            (Some(value), Some(kind)) => self.set_value_kind(value, kind)?,
            (None, None) => (),
            _ => {
                return Err(DbError::new("Replacement operator changes result arity")
                    .with_field("op", op)
                    .with_field("new", new.name()));
            }
        }
        self.ops[op.0 as usize].op = new;
        Ok(())
    }

    pub fn set_value_kind(&mut self, value: ValueId, kind: ValueKind) -> Result<()> {
        let info = self
            .values
            .get_mut(value.0 as usize)
            .ok_or_else(|| DbError::new(format!("Unknown value: {value}")))?;
        info.kind = kind;
        Ok(())
    }

    pub fn node(&self, op: OpId) -> Result<&OpNode> {
        self.ops
            .get(op.0 as usize)
            .ok_or_else(|| DbError::new(format!("Unknown operator: {op}")))
    }

    pub fn op(&self, op: OpId) -> Result<&SubOperator> {
        Ok(&self.node(op)?.op)
    }

    /// The value produced by an operator.
    pub fn result(&self, op: OpId) -> Result<ValueId> {
        self.node(op)?.result.ok_or_else(|| {
            DbError::new("Operator does not produce a value").with_field("op", op)
        })
    }

    pub fn value(&self, value: ValueId) -> Result<&ValueInfo> {
        self.values
            .get(value.0 as usize)
            .ok_or_else(|| DbError::new(format!("Unknown value: {value}")))
    }

    pub fn state_type(&self, value: ValueId) -> Result<&StateType> {
        match &self.value(value)?.kind {
            ValueKind::State(state) => Ok(state),
            other => Err(DbError::new("Expected a state value")
                .with_field("value", value)
                .with_field("kind", other)),
        }
    }

    pub fn region(&self, region: RegionId) -> Result<&Region> {
        self.regions
            .get(region.0 as usize)
            .ok_or_else(|| DbError::new(format!("Unknown region: {region}")))
    }

    fn region_mut(&mut self, region: RegionId) -> Result<&mut Region> {
        self.regions
            .get_mut(region.0 as usize)
            .ok_or_else(|| DbError::new(format!("Unknown region: {region}")))
    }

    fn push_value(&mut self, info: ValueInfo) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(info);
        id
    }

    /// Visit every attached operator in a region and its nested regions,
    /// parents before children.
    pub fn walk(&self, region: RegionId, f: &mut impl FnMut(OpId, &SubOperator)) {
        let Ok(region) = self.region(region) else {
            return;
        };
        for &op in &region.ops {
            let node = &self.ops[op.0 as usize];
            f(op, &node.op);
            if let Some(body) = node.op.body() {
                self.walk(body, f);
            }
        }
    }

    /// Every attached operator reachable from the top level body.
    pub fn all_ops(&self) -> Vec<OpId> {
        let mut ops = Vec::new();
        self.walk(self.body(), &mut |op, _| ops.push(op));
        ops
    }

    /// Attached operators using a value as an operand.
    pub fn users(&self, value: ValueId) -> Vec<OpId> {
        let mut users = Vec::new();
        self.walk(self.body(), &mut |id, op| {
            if op.operands().contains(&value) {
                users.push(id);
            }
        });
        users
    }

    /// Region and index of an attached operator.
    pub fn position(&self, op: OpId) -> Option<(RegionId, usize)> {
        let region = self.ops.get(op.0 as usize)?.region?;
        let idx = self
            .regions
            .get(region.0 as usize)?
            .ops
            .iter()
            .position(|o| *o == op)?;
        Some((region, idx))
    }

    /// The operator in `region` that is or contains `op`.
    pub fn ancestor_in(&self, op: OpId, region: RegionId) -> Option<OpId> {
        let mut current = op;
        loop {
            let current_region = self.ops.get(current.0 as usize)?.region?;
            if current_region == region {
                return Some(current);
            }
            current = self.regions.get(current_region.0 as usize)?.parent?;
        }
    }

    /// Compute the kind of value an operator produces.
    fn result_kind(&self, op: &SubOperator) -> Result<Option<ValueKind>> {
        Ok(Some(match op {
            SubOperator::GetExternal { members, .. } => {
                ValueKind::State(StateType::ExternalTable(members.clone()))
            }
            SubOperator::Create { ty } => ValueKind::State(ty.clone()),
            SubOperator::CreateSortedView { state, .. } => match self.state_type(*state)? {
                StateType::Vector(members) => ValueKind::State(StateType::SortedView(members.clone())),
                other => {
                    return Err(DbError::new("Sorted view requires a vector")
                        .with_field("state", other));
                }
            },
            SubOperator::CreateHashIndexedView { state, hash, link } => {
                match self.state_type(*state)? {
                    StateType::Buffer(members) => ValueKind::State(StateType::HashIndexedView {
                        hash: hash.clone(),
                        link: link.clone(),
                        members: members.clone(),
                    }),
                    other => {
                        return Err(DbError::new("Hash indexed view requires a buffer")
                            .with_field("state", other));
                    }
                }
            }
            SubOperator::ConvertToExplicit { state, .. } => {
                ValueKind::State(StateType::ResultTable(self.state_type(*state)?.members()))
            }
            SubOperator::CreateFlag => ValueKind::Flag,
            SubOperator::Scan { .. }
            | SubOperator::Map { .. }
            | SubOperator::Filter { .. }
            | SubOperator::Renaming { .. }
            | SubOperator::Lookup { .. }
            | SubOperator::LookupOrInsert { .. }
            | SubOperator::ScanList { .. }
            | SubOperator::UnwrapOptionalRef { .. }
            | SubOperator::Gather { .. }
            | SubOperator::NestedMap { .. }
            | SubOperator::GetFlag { .. } => ValueKind::Stream,
            SubOperator::Materialize { .. }
            | SubOperator::Insert { .. }
            | SubOperator::Scatter { .. }
            | SubOperator::Reduce { .. }
            | SubOperator::SetFlag { .. }
            | SubOperator::Return { .. } => return Ok(None),
        }))
    }

    /// The values returned by the top level body.
    pub fn returned_values(&self) -> Result<Vec<ValueId>> {
        let body = self.region(self.body())?;
        let last = body
            .ops
            .last()
            .ok_or_else(|| DbError::new("Program body is empty"))?;
        match self.op(*last)? {
            SubOperator::Return { values } => Ok(values.clone()),
            other => Err(DbError::new("Program body does not end with a return")
                .with_field("last", other.name())),
        }
    }
}
