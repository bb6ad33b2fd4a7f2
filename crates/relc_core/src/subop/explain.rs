//! Text rendering of sub-operator programs.

use std::fmt;

use super::{Program, RegionId, SubOperator};
use crate::registry::column::{ColumnId, ColumnManager};

/// Display wrapper resolving column ids to their qualified names.
#[derive(Debug, Clone, Copy)]
pub struct ProgramDisplay<'a> {
    pub program: &'a Program,
    pub columns: &'a ColumnManager,
}

impl<'a> ProgramDisplay<'a> {
    pub fn new(program: &'a Program, columns: &'a ColumnManager) -> Self {
        ProgramDisplay { program, columns }
    }

    fn col(&self, id: ColumnId) -> String {
        self.columns.display_name(id)
    }

    fn cols(&self, ids: impl IntoIterator<Item = ColumnId>) -> String {
        let names: Vec<_> = ids.into_iter().map(|id| self.col(id)).collect();
        names.join(", ")
    }

    fn fmt_region(&self, f: &mut fmt::Formatter<'_>, region: RegionId, indent: usize) -> fmt::Result {
        let Ok(reg) = self.program.region(region) else {
            return writeln!(f, "{:indent$}<missing {region}>", "");
        };

        for &op in &reg.ops {
            let Ok(node) = self.program.node(op) else {
                continue;
            };
            write!(f, "{:indent$}", "")?;
            if let Some(result) = node.result {
                write!(f, "{result} = ")?;
            }
            self.fmt_op(f, &node.op)?;
            writeln!(f)?;

            if let Some(body) = node.op.body() {
                if let Ok(body_reg) = self.program.region(body) {
                    let args: Vec<_> = body_reg.args.iter().map(|a| a.to_string()).collect();
                    writeln!(f, "{:indent$}  ^({}):", "", args.join(", "))?;
                }
                self.fmt_region(f, body, indent + 4)?;
            }
        }

        Ok(())
    }

    fn fmt_op(&self, f: &mut fmt::Formatter<'_>, op: &SubOperator) -> fmt::Result {
        write!(f, "{}", op.name())?;
        match op {
            SubOperator::GetExternal {
                table, members, ..
            } => write!(f, " \"{table}\" {members}"),
            SubOperator::Create { ty } => write!(f, " {ty}"),
            SubOperator::Scan { state, mapping } => {
                write!(f, " {state} {{")?;
                for (idx, (member, def)) in mapping.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{member} -> {}", self.col(def.id()))?;
                }
                write!(f, "}}")
            }
            SubOperator::Map {
                input,
                computed,
                inputs,
                region,
            } => write!(
                f,
                " {input} [{}] <- ({}) {region}",
                self.cols(computed.iter().map(|c| c.id())),
                self.cols(inputs.iter().map(|c| c.id())),
            ),
            SubOperator::Filter { input, conditions } => {
                write!(f, " {input} [{}]", self.cols(conditions.iter().map(|c| c.id())))
            }
            SubOperator::Renaming { input, renamed } => {
                write!(f, " {input} {{")?;
                for (idx, (def, col)) in renamed.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> {}", self.col(col.id()), self.col(def.id()))?;
                }
                write!(f, "}}")
            }
            SubOperator::Materialize {
                input,
                state,
                mapping,
            }
            | SubOperator::Insert {
                input,
                state,
                mapping,
                ..
            } => {
                write!(f, " {input} into {state} {{")?;
                for (idx, (col, member)) in mapping.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> {member}", self.col(col.id()))?;
                }
                write!(f, "}}")?;
                if let SubOperator::Insert { eq: Some(eq), .. } = op {
                    write!(f, " eq {eq}")?;
                }
                Ok(())
            }
            SubOperator::Lookup {
                input,
                state,
                keys,
                reference,
                eq,
            } => {
                write!(
                    f,
                    " {input} in {state} [{}] -> {}",
                    self.cols(keys.iter().map(|c| c.id())),
                    self.col(reference.id())
                )?;
                if let Some(eq) = eq {
                    write!(f, " eq {eq}")?;
                }
                Ok(())
            }
            SubOperator::LookupOrInsert {
                input,
                state,
                keys,
                reference,
                eq,
                initial,
            } => {
                write!(
                    f,
                    " {input} in {state} [{}] -> {} initial {initial}",
                    self.cols(keys.iter().map(|c| c.id())),
                    self.col(reference.id())
                )?;
                if let Some(eq) = eq {
                    write!(f, " eq {eq}")?;
                }
                Ok(())
            }
            SubOperator::ScanList { input, list, elem } => {
                write!(f, " {input} {} -> {}", self.col(list.id()), self.col(elem.id()))
            }
            SubOperator::UnwrapOptionalRef {
                input,
                optional,
                reference,
            } => write!(
                f,
                " {input} {} -> {}",
                self.col(optional.id()),
                self.col(reference.id())
            ),
            SubOperator::Gather {
                input,
                reference,
                mapping,
            } => {
                write!(f, " {input} {} {{", self.col(reference.id()))?;
                for (idx, (member, def)) in mapping.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{member} -> {}", self.col(def.id()))?;
                }
                write!(f, "}}")
            }
            SubOperator::Scatter {
                input,
                reference,
                mapping,
            } => {
                write!(f, " {input} {} {{", self.col(reference.id()))?;
                for (idx, (col, member)) in mapping.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> {member}", self.col(col.id()))?;
                }
                write!(f, "}}")
            }
            SubOperator::Reduce {
                input,
                reference,
                columns,
                members,
                region,
            } => write!(
                f,
                " {input} {} [{}] <- ({}) {region}",
                self.col(reference.id()),
                members.join(", "),
                self.cols(columns.iter().map(|c| c.id())),
            ),
            SubOperator::NestedMap { input, body } => write!(f, " {input} {body}"),
            SubOperator::CreateSortedView {
                state,
                members,
                comparator,
            } => write!(f, " {state} [{}] {comparator}", members.join(", ")),
            SubOperator::CreateHashIndexedView { state, hash, link } => {
                write!(f, " {state} hash {hash} link {link}")
            }
            SubOperator::ConvertToExplicit { state, names } => {
                write!(f, " {state} [{}]", names.join(", "))
            }
            SubOperator::CreateFlag => Ok(()),
            SubOperator::SetFlag {
                input,
                flag,
                condition,
            } => write!(f, " {input} {flag} if {}", self.col(condition.id())),
            SubOperator::GetFlag { flag, mark } => {
                write!(f, " {flag} -> {}", self.col(mark.id()))
            }
            SubOperator::Return { values } => {
                let values: Vec<_> = values.iter().map(|v| v.to_string()).collect();
                write!(f, " {}", values.join(", "))
            }
        }
    }
}

impl fmt::Display for ProgramDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_region(f, self.program.body(), 0)
    }
}
