use relc_error::Result;

use super::rewriter::Rewriter;
use super::{SpecializeRule, Specialization, single_insert_site};
use crate::subop::{OpId, SubOperator};
use crate::types::state::StateType;

/// Rewrite a map into a hash map with the same keys and values.
#[derive(Debug, Clone, Copy)]
pub struct MapAsHashMap;

impl SpecializeRule for MapAsHashMap {
    fn name(&self) -> &'static str {
        "map_as_hash_map"
    }

    fn try_rewrite(
        &self,
        rewriter: &mut Rewriter<'_>,
        create: OpId,
    ) -> Result<Option<Specialization>> {
        let Some(StateType::Map { keys, values }) = created_type(rewriter, create)? else {
            return Ok(None);
        };
        let to = StateType::HashMap { keys, values };
        retype_collection(rewriter, create, to)?;
        Ok(Some(Specialization::HashMap))
    }
}

/// Rewrite a multimap into a hash multimap.
#[derive(Debug, Clone, Copy)]
pub struct MultiMapAsHashMultiMap;

impl SpecializeRule for MultiMapAsHashMultiMap {
    fn name(&self) -> &'static str {
        "multimap_as_hash_multimap"
    }

    fn try_rewrite(
        &self,
        rewriter: &mut Rewriter<'_>,
        create: OpId,
    ) -> Result<Option<Specialization>> {
        let Some(StateType::MultiMap { keys, values }) = created_type(rewriter, create)? else {
            return Ok(None);
        };
        let to = StateType::HashMultiMap { keys, values };
        retype_collection(rewriter, create, to)?;
        Ok(Some(Specialization::HashMultiMap))
    }
}

/// Type created by a create operator with exactly one insert site.
fn created_type(rewriter: &Rewriter<'_>, create: OpId) -> Result<Option<StateType>> {
    let SubOperator::Create { ty } = rewriter.program.op(create)? else {
        return Ok(None);
    };
    if single_insert_site(rewriter.program, create)?.is_none() {
        return Ok(None);
    }
    Ok(Some(ty.clone()))
}

fn retype_collection(rewriter: &mut Rewriter<'_>, create: OpId, to: StateType) -> Result<()> {
    let from = rewriter.program.state_type(rewriter.program.result(create)?)?.clone();
    rewriter.set_operator(create, SubOperator::Create { ty: to.clone() });
    rewriter.retype_columns(from, to);
    Ok(())
}
