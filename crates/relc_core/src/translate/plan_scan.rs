use relc_error::Result;
use serde_json::json;

use super::TranslateState;
use crate::registry::column::ColumnDef;
use crate::subop::{SubOperator, ValueId};
use crate::types::state::{Member, StateMembers};

impl TranslateState<'_> {
    pub fn translate_base_table(
        &mut self,
        table: String,
        columns: Vec<(String, ColumnDef)>,
    ) -> Result<ValueId> {
        let mut members = Vec::with_capacity(columns.len());
        let mut mapping = serde_json::Map::new();
        let mut scan_mapping = Vec::with_capacity(columns.len());

        for (column, def) in columns {
            let datatype = self.ctx.columns.datatype(def.id())?;
            let member = self.ctx.members.unique_member(&column);
            mapping.insert(member.clone(), json!(column));
            scan_mapping.push((member.clone(), def));
            members.push(Member::new(member, datatype));
        }

        let description = json!({
            "table": table,
            "mapping": mapping,
        })
        .to_string();

        let state = self.append(SubOperator::GetExternal {
            table,
            members: StateMembers::new(members),
            description,
        })?;

        self.append(SubOperator::Scan {
            state,
            mapping: scan_mapping,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::super::translate_plan;
    use crate::config::CompileConfig;
    use crate::registry::CompileContext;
    use crate::subop::SubOperator;

    #[test]
    fn external_description_maps_members() {
        let mut ctx = CompileContext::new();
        // Member names are unique across tables, column names are not.
        let left = scan(&mut ctx, "t1", &["a"]);
        let right = scan(&mut ctx, "t2", &["a"]);
        let plan = crate::relalg::Node::new(crate::relalg::RelOperator::CrossProduct, vec![
            left, right,
        ]);
        let plan = materialize(&ctx, plan);

        let program = translate_plan(&mut ctx, &CompileConfig::new(), plan).unwrap();
        let externals: Vec<(String, serde_json::Value)> = program
            .all_ops()
            .into_iter()
            .filter_map(|op| match program.op(op).unwrap() {
                SubOperator::GetExternal {
                    members,
                    description,
                    ..
                } => {
                    let [member] = members.members.as_slice() else {
                        panic!("expected a single member: {members:?}");
                    };
                    Some((member.name.clone(), serde_json::from_str(description).unwrap()))
                }
                _ => None,
            })
            .collect();

        assert_eq!(2, externals.len());
        let (left_member, left_desc) = &externals[0];
        let (right_member, right_desc) = &externals[1];
        assert_ne!(left_member, right_member);
        assert_eq!("t1", left_desc["table"]);
        assert_eq!("a", left_desc["mapping"][left_member.as_str()]);
        assert_eq!("t2", right_desc["table"]);
        assert_eq!("a", right_desc["mapping"][right_member.as_str()]);
    }
}
