use relc_error::Result;
use tracing::trace;

use crate::registry::CompileContext;
use crate::registry::column::ColumnManager;
use crate::subop::{InsertPosition, OpId, Program, SubOperator, ValueId};
use crate::types::state::StateType;

#[derive(Debug, Clone, PartialEq)]
enum Edit {
    Attach {
        op: OpId,
        anchor: OpId,
        pos: InsertPosition,
    },
    Erase(OpId),
    ReplaceUses {
        old: ValueId,
        new: ValueId,
        except: Vec<OpId>,
    },
    SetOperator {
        op: OpId,
        new: SubOperator,
    },
    RetypeColumns {
        from: StateType,
        to: StateType,
    },
}

/// Collects edits to a program and applies them in one go.
///
/// New operators are created detached and only become part of the program
/// once the queued attach is applied. Dropping a rewriter without applying
/// it leaves the program unchanged apart from unreachable detached
/// operators and unused columns.
#[derive(Debug)]
pub struct Rewriter<'a> {
    pub program: &'a mut Program,
    pub ctx: &'a mut CompileContext,
    edits: Vec<Edit>,
}

impl<'a> Rewriter<'a> {
    pub fn new(program: &'a mut Program, ctx: &'a mut CompileContext) -> Self {
        Rewriter {
            program,
            ctx,
            edits: Vec::new(),
        }
    }

    /// Create a detached operator, returning it along with the value it
    /// produces.
    pub fn create(&mut self, op: SubOperator) -> Result<(OpId, Option<ValueId>)> {
        let id = self.program.create_detached(op)?;
        let result = self.program.node(id)?.result;
        Ok((id, result))
    }

    /// Create a detached operator that must produce a value.
    pub fn create_value(&mut self, op: SubOperator) -> Result<(OpId, ValueId)> {
        let id = self.program.create_detached(op)?;
        Ok((id, self.program.result(id)?))
    }

    pub fn attach(&mut self, op: OpId, anchor: OpId, pos: InsertPosition) {
        self.edits.push(Edit::Attach { op, anchor, pos });
    }

    pub fn erase(&mut self, op: OpId) {
        self.edits.push(Edit::Erase(op));
    }

    pub fn replace_uses(&mut self, old: ValueId, new: ValueId, except: Vec<OpId>) {
        self.edits.push(Edit::ReplaceUses { old, new, except });
    }

    pub fn set_operator(&mut self, op: OpId, new: SubOperator) {
        self.edits.push(Edit::SetOperator { op, new });
    }

    /// Rewrite every column type referencing `from` to reference `to`.
    pub fn retype_columns(&mut self, from: StateType, to: StateType) {
        self.edits.push(Edit::RetypeColumns { from, to });
    }

    pub fn num_edits(&self) -> usize {
        self.edits.len()
    }

    /// Apply all queued edits in the order they were queued.
    pub fn apply(self) -> Result<()> {
        for edit in self.edits {
            match edit {
                Edit::Attach { op, anchor, pos } => self.program.attach(op, anchor, pos)?,
                Edit::Erase(op) => self.program.erase(op)?,
                Edit::ReplaceUses { old, new, except } => {
                    self.program.replace_uses(old, new, &except)
                }
                Edit::SetOperator { op, new } => self.program.set_operator(op, new)?,
                Edit::RetypeColumns { from, to } => {
                    let count = retype_columns(self.program, &mut self.ctx.columns, &from, &to)?;
                    trace!(%from, %to, %count, "retyped columns");
                }
            }
        }
        Ok(())
    }
}

/// Substitute state types in the type of every column defined by an
/// attached operator, including operators in nested bodies.
pub fn retype_columns(
    program: &Program,
    columns: &mut ColumnManager,
    from: &StateType,
    to: &StateType,
) -> Result<usize> {
    let mut defs = Vec::new();
    program.walk(program.body(), &mut |_, op| defs.extend(op.defined_columns()));

    let mut count = 0;
    for def in defs {
        if let Some(new) = columns.column_type(def.id())?.substitute_state(from, to) {
            columns.set_column_type(def.id(), new)?;
            count += 1;
        }
    }

    Ok(count)
}
