//! Multimap to hash indexed view.
//!
//! Rows that would be inserted into the multimap are materialized into a
//! buffer with two extra members, the hash of the key and a link used to
//! chain rows sharing a hash bucket. Lookups probe the view by hash only,
//! then gather the stored keys of each candidate and filter on full key
//! equality.

use relc_error::{DbError, Result};
use tracing::debug;

use super::rewriter::Rewriter;
use super::{SpecializeRule, Specialization, single_insert_site};
use crate::expr::ScalarExpr;
use crate::expr::region::ExprRegion;
use crate::registry::column::{ColumnDef, ColumnRef};
use crate::subop::analysis::direct_written_members;
use crate::subop::{InsertPosition, OpId, Program, SubOperator, ValueId};
use crate::types::datatype::DataType;
use crate::types::state::{Member, StateMembers, StateType};

#[derive(Debug, Clone, Copy)]
pub struct MultiMapAsHashIndexedView;

#[derive(Debug)]
struct InsertSite {
    op: OpId,
    input: ValueId,
    mapping: Vec<(ColumnRef, String)>,
}

#[derive(Debug)]
struct LookupSite {
    op: OpId,
    input: ValueId,
    keys: Vec<ColumnRef>,
    reference: ColumnDef,
    eq: Option<ExprRegion>,
    scan_list: OpId,
    scan_list_result: ValueId,
    elem: ColumnDef,
}

#[derive(Debug)]
struct ViewPlan {
    keys: StateMembers,
    values: StateMembers,
    insert: InsertSite,
    lookups: Vec<LookupSite>,
}

impl SpecializeRule for MultiMapAsHashIndexedView {
    fn name(&self) -> &'static str {
        "multimap_as_hash_indexed_view"
    }

    fn try_rewrite(
        &self,
        rewriter: &mut Rewriter<'_>,
        create: OpId,
    ) -> Result<Option<Specialization>> {
        let Some(plan) = plan_view(rewriter.program, create)? else {
            return Ok(None);
        };
        rewrite_view(rewriter, create, plan)?;
        Ok(Some(Specialization::HashIndexedView))
    }
}

fn skip(create: OpId, reason: &str) -> Result<Option<ViewPlan>> {
    debug!(%create, %reason, "not rewriting multimap into hash indexed view");
    Ok(None)
}

/// Check every precondition and collect what the rewrite needs.
fn plan_view(program: &Program, create: OpId) -> Result<Option<ViewPlan>> {
    let SubOperator::Create {
        ty: StateType::MultiMap { keys, values },
    } = program.op(create)?
    else {
        return Ok(None);
    };
    let state = program.result(create)?;
    let members = keys.concat(values);

    let Some(insert_op) = single_insert_site(program, create)? else {
        return Ok(None);
    };
    let SubOperator::Insert {
        input, mapping, ..
    } = program.op(insert_op)?
    else {
        return skip(create, "insert site is not a plain insert");
    };

    let Some((create_region, _)) = program.position(create) else {
        return Ok(None);
    };
    let Some((insert_region, insert_idx)) = program.position(insert_op) else {
        return Ok(None);
    };
    if insert_region != create_region {
        return skip(create, "insert is nested below the create");
    }
    for member in members.names() {
        if !mapping.iter().any(|(_, m)| m == member) {
            return skip(create, "insert does not write every member");
        }
    }

    let mut lookups = Vec::new();
    for user in program.users(state) {
        if user == insert_op {
            continue;
        }
        let SubOperator::Lookup {
            input,
            keys: lookup_keys,
            reference,
            eq,
            ..
        } = program.op(user)?
        else {
            return skip(create, "state used by something other than insert or lookup");
        };

        match program.ancestor_in(user, create_region) {
            Some(anchor) => match program.position(anchor) {
                Some((_, idx)) if idx > insert_idx => (),
                _ => return skip(create, "lookup before insert"),
            },
            None => return skip(create, "lookup outside of create region"),
        }

        if let Some(eq) = eq {
            if eq.params.len() != lookup_keys.len() * 2 {
                return skip(create, "equality region arity");
            }
            if eq.result_types()?.len() != 1 {
                return skip(create, "equality region must yield a single value");
            }
        }

        let result = program.result(user)?;
        let consumers = program.users(result);
        let [consumer] = consumers.as_slice() else {
            return skip(create, "lookup result consumed more than once");
        };
        let SubOperator::ScanList { list, elem, .. } = program.op(*consumer)? else {
            return skip(create, "lookup result not consumed by scan list");
        };
        if *list != reference.reference() {
            return skip(create, "scan list over a different column");
        }

        lookups.push(LookupSite {
            op: user,
            input: *input,
            keys: lookup_keys.clone(),
            reference: *reference,
            eq: eq.clone(),
            scan_list: *consumer,
            scan_list_result: program.result(*consumer)?,
            elem: *elem,
        });
    }

    // The buffer is write once. Nothing other than the insert may write
    // members afterwards.
    let mut other_writer = false;
    let mut walk_err = None;
    program.walk(program.body(), &mut |id, op| {
        if id == insert_op || other_writer || walk_err.is_some() {
            return;
        }
        match direct_written_members(program, op) {
            Ok(written) => other_writer = written.iter().any(|m| members.contains(m)),
            Err(e) => walk_err = Some(e),
        }
    });
    if let Some(e) = walk_err {
        return Err(e);
    }
    if other_writer {
        return skip(create, "members written outside of the insert");
    }

    Ok(Some(ViewPlan {
        keys: keys.clone(),
        values: values.clone(),
        insert: InsertSite {
            op: insert_op,
            input: *input,
            mapping: mapping.clone(),
        },
        lookups,
    }))
}

fn rewrite_view(rewriter: &mut Rewriter<'_>, create: OpId, plan: ViewPlan) -> Result<()> {
    let from = StateType::MultiMap {
        keys: plan.keys.clone(),
        values: plan.values.clone(),
    };

    let hash = rewriter.ctx.members.unique_member("hash");
    let link = rewriter.ctx.members.unique_member("link");
    let mut members = vec![
        Member::new(hash.clone(), DataType::index()),
        Member::new(link.clone(), DataType::link()),
    ];
    members.extend(plan.keys.members.iter().cloned());
    members.extend(plan.values.members.iter().cloned());
    let members = StateMembers::new(members);
    let view_type = StateType::HashIndexedView {
        hash: hash.clone(),
        link: link.clone(),
        members: members.clone(),
    };

    // Buffer replaces the multimap.
    let (buffer_op, buffer) = rewriter.create_value(SubOperator::Create {
        ty: StateType::Buffer(members),
    })?;
    rewriter.attach(buffer_op, create, InsertPosition::After);

    // Stored keys in key member order.
    let mut stored_keys = Vec::with_capacity(plan.keys.len());
    for key in plan.keys.names() {
        if let Some((col, _)) = plan.insert.mapping.iter().find(|(_, m)| m == key) {
            stored_keys.push(*col);
        }
    }

    let scope = rewriter.ctx.columns.unique_scope("hash");
    let hash_col = rewriter.ctx.columns.create_def(&scope, "hash", DataType::index())?;
    let link_col = rewriter.ctx.columns.create_def(&scope, "link", DataType::link())?;
    let (region, inputs) = ExprRegion::bind_columns(
        &[
            ScalarExpr::Hash(stored_keys.iter().map(|c| ScalarExpr::column(*c)).collect()),
            ScalarExpr::InvalidLink,
        ],
        &rewriter.ctx.columns,
    )?;
    let (hash_op, hashed) = rewriter.create_value(SubOperator::Map {
        input: plan.insert.input,
        computed: vec![hash_col, link_col],
        inputs,
        region,
    })?;

    let mut mapping = vec![
        (hash_col.reference(), hash.clone()),
        (link_col.reference(), link.clone()),
    ];
    mapping.extend(plan.insert.mapping.iter().cloned());
    let (materialize_op, _) = rewriter.create(SubOperator::Materialize {
        input: hashed,
        state: buffer,
        mapping,
    })?;
    let (view_op, view) = rewriter.create_value(SubOperator::CreateHashIndexedView {
        state: buffer,
        hash,
        link,
    })?;

    rewriter.attach(hash_op, plan.insert.op, InsertPosition::Before);
    rewriter.attach(materialize_op, plan.insert.op, InsertPosition::Before);
    rewriter.attach(view_op, plan.insert.op, InsertPosition::Before);
    rewriter.erase(plan.insert.op);
    rewriter.erase(create);

    for site in plan.lookups {
        rewrite_lookup(rewriter, &plan.keys, view, site)?;
    }

    rewriter.retype_columns(from, view_type);

    Ok(())
}

fn rewrite_lookup(
    rewriter: &mut Rewriter<'_>,
    keys: &StateMembers,
    view: ValueId,
    site: LookupSite,
) -> Result<()> {
    let k = site.keys.len();

    // Probe hash.
    let scope = rewriter.ctx.columns.unique_scope("probe");
    let probe_hash = rewriter.ctx.columns.create_def(&scope, "hash", DataType::index())?;
    let (region, inputs) = ExprRegion::bind_columns(
        &[ScalarExpr::Hash(
            site.keys.iter().map(|c| ScalarExpr::column(*c)).collect(),
        )],
        &rewriter.ctx.columns,
    )?;
    let (probe_op, probed) = rewriter.create_value(SubOperator::Map {
        input: site.input,
        computed: vec![probe_hash],
        inputs,
        region,
    })?;
    rewriter.attach(probe_op, site.op, InsertPosition::Before);
    rewriter.set_operator(
        site.op,
        SubOperator::Lookup {
            input: probed,
            state: view,
            keys: vec![probe_hash.reference()],
            reference: site.reference,
            eq: None,
        },
    );

    // Re-fetch stored keys for each candidate.
    let scope = rewriter.ctx.columns.unique_scope("lookup");
    let mut gathered = Vec::with_capacity(k);
    for member in &keys.members {
        let def = rewriter
            .ctx
            .columns
            .create_def(&scope, &member.name, member.datatype)?;
        gathered.push((member.name.clone(), def));
    }
    let (gather_op, gathered_stream) = rewriter.create_value(SubOperator::Gather {
        input: site.scan_list_result,
        reference: site.elem.reference(),
        mapping: gathered.clone(),
    })?;

    // Full equality, probe keys are the first half of the arguments.
    let mut params = Vec::with_capacity(k * 2);
    for key in &site.keys {
        params.push(rewriter.ctx.columns.datatype(key.id())?);
    }
    params.extend(keys.members.iter().map(|m| m.datatype));

    let eq = match &site.eq {
        Some(eq) => {
            let mapping: Vec<_> = (0..k)
                .map(|idx| ScalarExpr::arg(k + idx))
                .chain((0..k).map(ScalarExpr::arg))
                .collect();
            eq.rebind(params, &mapping)?
        }
        None => ExprRegion::key_equality(&params[..k], &params[k..])?,
    };
    let matched_type = match eq.result_types()?.as_slice() {
        [dt] => *dt,
        other => {
            return Err(DbError::new("Equality region must yield a single value")
                .with_field("results", other.len()));
        }
    };
    let scope = rewriter.ctx.columns.unique_scope("match");
    let matched = rewriter.ctx.columns.create_def(&scope, "eq", matched_type)?;

    let mut inputs = site.keys.clone();
    inputs.extend(gathered.iter().map(|(_, def)| def.reference()));
    let (map_op, map_stream) = rewriter.create_value(SubOperator::Map {
        input: gathered_stream,
        computed: vec![matched],
        inputs,
        region: eq,
    })?;
    let (filter_op, filtered) = rewriter.create_value(SubOperator::Filter {
        input: map_stream,
        conditions: vec![matched.reference()],
    })?;

    rewriter.attach(gather_op, site.scan_list, InsertPosition::After);
    rewriter.attach(map_op, gather_op, InsertPosition::After);
    rewriter.attach(filter_op, map_op, InsertPosition::After);
    rewriter.replace_uses(site.scan_list_result, filtered, vec![gather_op]);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileConfig;
    use crate::registry::CompileContext;
    use crate::specialize::specialize;
    use crate::subop::ValueKind;
    use crate::subop::verify::verify_program;
    use crate::types::column::ColumnType;

    /// Build side inserts (k, v) from one vector, probe side looks up k
    /// from another vector inside a nested map.
    fn join_program(ctx: &mut CompileContext, extra_lookup_use: bool) -> Program {
        let int = DataType::int64();
        let multimap = StateType::MultiMap {
            keys: StateMembers::new(vec![Member::new("mk", int)]),
            values: StateMembers::new(vec![Member::new("mv", int)]),
        };

        let bk = ctx.columns.create_def("b", "k", int).unwrap();
        let bv = ctx.columns.create_def("b", "v", int).unwrap();
        let pk = ctx.columns.create_def("p", "k", int).unwrap();
        let list = ctx
            .columns
            .create_def("l", "list", ColumnType::lookup_result(&multimap))
            .unwrap();
        let elem = ctx
            .columns
            .create_def("l", "elem", ColumnType::entry_ref(multimap.clone()))
            .unwrap();
        let out_v = ctx.columns.create_def("l", "v", int).unwrap();

        let mut program = Program::new();
        let top = program.body();
        let build_vec = program
            .append_value(top, SubOperator::Create {
                ty: StateType::Vector(StateMembers::new(vec![
                    Member::new("bk", int),
                    Member::new("bv", int),
                ])),
            })
            .unwrap();
        let probe_vec = program
            .append_value(top, SubOperator::Create {
                ty: StateType::Vector(StateMembers::new(vec![Member::new("pk", int)])),
            })
            .unwrap();
        let state = program
            .append_value(top, SubOperator::Create { ty: multimap })
            .unwrap();
        let build = program
            .append_value(top, SubOperator::Scan {
                state: build_vec,
                mapping: vec![("bk".to_string(), bk), ("bv".to_string(), bv)],
            })
            .unwrap();
        program
            .append(top, SubOperator::Insert {
                input: build,
                state,
                mapping: vec![
                    (bk.reference(), "mk".to_string()),
                    (bv.reference(), "mv".to_string()),
                ],
                eq: None,
            })
            .unwrap();
        let probe = program
            .append_value(top, SubOperator::Scan {
                state: probe_vec,
                mapping: vec![("pk".to_string(), pk)],
            })
            .unwrap();

        let body = program.new_region();
        let arg = program.add_region_arg(body, ValueKind::Stream).unwrap();
        let looked = program
            .append_value(body, SubOperator::Lookup {
                input: arg,
                state,
                keys: vec![pk.reference()],
                reference: list,
                eq: Some(
                    ExprRegion::join_key_equality(&[int], &[int]).unwrap(),
                ),
            })
            .unwrap();
        let scanned = program
            .append_value(body, SubOperator::ScanList {
                input: looked,
                list: list.reference(),
                elem,
            })
            .unwrap();
        let gathered = program
            .append_value(body, SubOperator::Gather {
                input: scanned,
                reference: elem.reference(),
                mapping: vec![("mv".to_string(), out_v)],
            })
            .unwrap();
        program
            .append(body, SubOperator::Return {
                values: vec![gathered],
            })
            .unwrap();
        let joined = program
            .append_value(top, SubOperator::NestedMap { input: probe, body })
            .unwrap();

        if extra_lookup_use {
            // A second scan of the multimap blocks the view rewrite.
            let extra = ctx.columns.create_def("x", "mk", int).unwrap();
            let scan = program
                .append_value(top, SubOperator::Scan {
                    state,
                    mapping: vec![("mk".to_string(), extra)],
                })
                .unwrap();
            program
                .append(top, SubOperator::Return {
                    values: vec![joined, scan],
                })
                .unwrap();
        } else {
            program
                .append(top, SubOperator::Return {
                    values: vec![joined],
                })
                .unwrap();
        }

        program
    }

    #[test]
    fn rewrite_into_view() {
        let mut ctx = CompileContext::new();
        let mut program = join_program(&mut ctx, false);
        verify_program(&program, &ctx.columns).unwrap();

        let stats = specialize(&mut program, &mut ctx, &CompileConfig::new()).unwrap();
        assert_eq!(1, stats.hash_indexed_views);
        assert_eq!(0, stats.hash_multimaps);
        verify_program(&program, &ctx.columns).unwrap();

        let names: Vec<_> = program
            .all_ops()
            .into_iter()
            .map(|op| program.op(op).unwrap().name())
            .collect();
        assert_eq!(
            vec![
                "create",
                "create",
                "create",
                "scan",
                "map",
                "materialize",
                "create_hash_indexed_view",
                "scan",
                "nested_map",
                "map",
                "lookup",
                "scan_list",
                "gather",
                "map",
                "filter",
                "gather",
                "return",
                "return",
            ],
            names
        );

        // Lookup now probes by hash only.
        let lookup = program
            .all_ops()
            .into_iter()
            .find(|op| matches!(program.op(*op).unwrap(), SubOperator::Lookup { .. }))
            .unwrap();
        let SubOperator::Lookup { keys, eq, state, .. } = program.op(lookup).unwrap() else {
            unreachable!()
        };
        assert_eq!(1, keys.len());
        assert!(eq.is_none());
        assert!(matches!(
            program.state_type(*state).unwrap(),
            StateType::HashIndexedView { .. }
        ));
    }

    #[test]
    fn disabled_optimizations_use_hash_multimap() {
        let mut ctx = CompileContext::new();
        let mut program = join_program(&mut ctx, false);

        let config = CompileConfig {
            enable_optimizations: false,
            ..CompileConfig::new()
        };
        let stats = specialize(&mut program, &mut ctx, &config).unwrap();
        assert_eq!(0, stats.hash_indexed_views);
        assert_eq!(1, stats.hash_multimaps);
        verify_program(&program, &ctx.columns).unwrap();
    }

    #[test]
    fn other_use_falls_back_to_hash_multimap() {
        let mut ctx = CompileContext::new();
        let mut program = join_program(&mut ctx, true);

        let stats = specialize(&mut program, &mut ctx, &CompileConfig::new()).unwrap();
        assert_eq!(0, stats.hash_indexed_views);
        assert_eq!(1, stats.hash_multimaps);
        verify_program(&program, &ctx.columns).unwrap();
    }

    #[test]
    fn multi_valued_equality_falls_back_to_hash_multimap() {
        let mut ctx = CompileContext::new();
        let mut program = join_program(&mut ctx, false);

        let lookup = program
            .all_ops()
            .into_iter()
            .find(|op| matches!(program.op(*op).unwrap(), SubOperator::Lookup { .. }))
            .unwrap();
        let SubOperator::Lookup {
            input,
            state,
            keys,
            reference,
            ..
        } = program.op(lookup).unwrap().clone()
        else {
            unreachable!()
        };
        let int = DataType::int64();
        let eq = ExprRegion::new(
            vec![int, int],
            vec![
                ScalarExpr::eq(ScalarExpr::arg(0), ScalarExpr::arg(1)),
                ScalarExpr::bool(true),
            ],
        );
        program
            .set_operator(
                lookup,
                SubOperator::Lookup {
                    input,
                    state,
                    keys,
                    reference,
                    eq: Some(eq),
                },
            )
            .unwrap();

        let stats = specialize(&mut program, &mut ctx, &CompileConfig::new()).unwrap();
        assert_eq!(0, stats.hash_indexed_views);
        assert_eq!(1, stats.hash_multimaps);
    }
}
