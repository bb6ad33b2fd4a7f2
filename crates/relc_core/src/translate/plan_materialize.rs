use relc_error::{DbError, Result};

use super::{TranslateState, missing_column, state_members, write_mapping};
use crate::registry::column::ColumnRef;
use crate::relalg::{Node, RelOperator};
use crate::subop::{SubOperator, ValueId};
use crate::types::datatype::DataType;
use crate::types::state::{Member, StateType};

impl TranslateState<'_> {
    /// Write the result columns into a table and hand it out under the
    /// requested names.
    pub fn translate_materialize(
        &mut self,
        input: Node<RelOperator>,
        columns: Vec<ColumnRef>,
        names: Vec<String>,
    ) -> Result<ValueId> {
        if columns.len() != names.len() {
            return Err(DbError::new("Result names do not match result columns")
                .with_field("columns", columns.len())
                .with_field("names", names.len()));
        }

        let available = input.output_columns()?;
        if let Some(missing) = columns.iter().find(|c| !available.contains(c)) {
            return Err(missing_column(self.ctx, *missing, "materialize"));
        }

        let stream = self.translate(input)?;

        let members = columns
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let datatype: DataType = self.ctx.columns.datatype(col.id())?;
                let name = self.ctx.members.unique_member(&format!("col{idx}"));
                Ok(Member::new(name, datatype))
            })
            .collect::<Result<Vec<_>>>()?;

        let table = self.append(SubOperator::Create {
            ty: StateType::Table(state_members(&members)),
        })?;
        self.append_sink(SubOperator::Materialize {
            input: stream,
            state: table,
            mapping: write_mapping(&columns, &members),
        })?;

        self.append(SubOperator::ConvertToExplicit {
            state: table,
            names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::super::translate_plan;
    use super::*;
    use crate::config::CompileConfig;
    use crate::registry::CompileContext;
    use crate::subop::ValueKind;

    #[test]
    fn result_table_returned() {
        let mut ctx = CompileContext::new();
        let plan = scan(&mut ctx, "t", &["a", "b"]);
        let cols = plan.output_columns().unwrap();
        let plan = Node::new(
            RelOperator::Materialize {
                columns: vec![cols[1]],
                names: vec!["renamed".to_string()],
            },
            vec![plan],
        );

        let program = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap();
        let returned = program.returned_values().unwrap();
        assert_eq!(1, returned.len());
        let ValueKind::State(StateType::ResultTable(members)) = &program.value(returned[0]).unwrap().kind
        else {
            panic!("expected result table");
        };
        assert_eq!(1, members.len());
    }

    #[test]
    fn name_count_mismatch() {
        let mut ctx = CompileContext::new();
        let plan = scan(&mut ctx, "t", &["a"]);
        let cols = plan.output_columns().unwrap();
        let plan = Node::new(
            RelOperator::Materialize {
                columns: cols,
                names: Vec::new(),
            },
            vec![plan],
        );

        let err = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap_err();
        assert_eq!("Result names do not match result columns", err.get_msg());
    }
}
