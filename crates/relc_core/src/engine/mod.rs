//! Compiler driver.
//!
//! Runs the passes in order: translate, verify, specialize, verify, lower.
//! Each stage runs in its own span.

pub mod functions;

use functions::{FunctionTable, lower_program};
use relc_error::Result;
use tracing::{debug, debug_span};

use crate::config::CompileConfig;
use crate::execution::provider::TableProvider;
use crate::execution::{Executor, QueryResult};
use crate::registry::CompileContext;
use crate::relalg::description::{PlanBinder, QueryDescription};
use crate::relalg::{Node, RelOperator};
use crate::specialize::{SpecializeStats, specialize};
use crate::subop::Program;
use crate::subop::explain::ProgramDisplay;
use crate::subop::verify::verify_program;
use crate::translate::translate_plan;

#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: CompileConfig,
}

impl Compiler {
    pub fn new(config: CompileConfig) -> Self {
        Compiler { config }
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Bind a name based query description and compile it.
    pub fn compile_description(&self, query: &QueryDescription) -> Result<CompiledQuery> {
        let mut ctx = CompileContext::new();
        let plan = debug_span!("bind")
            .in_scope(|| PlanBinder::new(&mut ctx, &query.tables).bind(&query.plan))?;
        self.compile(ctx, plan)
    }

    /// Compile a bound plan. The plan must have been bound against `ctx`.
    pub fn compile(
        &self,
        mut ctx: CompileContext,
        plan: Node<RelOperator>,
    ) -> Result<CompiledQuery> {
        let mut program =
            debug_span!("translate").in_scope(|| translate_plan(&mut ctx, &self.config, plan))?;
        self.verify(&program, &ctx)?;

        let stats = debug_span!("specialize")
            .in_scope(|| specialize(&mut program, &mut ctx, &self.config))?;
        debug!(%stats, "specialized collections");
        self.verify(&program, &ctx)?;

        let functions = debug_span!("lower").in_scope(|| lower_program(&program, &ctx.columns))?;
        debug!(
            functions = functions.len(),
            instructions = functions.num_instructions(),
            "lowered regions"
        );

        Ok(CompiledQuery {
            ctx,
            program,
            functions,
            stats,
        })
    }

    fn verify(&self, program: &Program, ctx: &CompileContext) -> Result<()> {
        if !self.config.verify_program {
            return Ok(());
        }
        debug_span!("verify").in_scope(|| verify_program(program, &ctx.columns))
    }
}

/// A program ready for execution.
#[derive(Debug)]
pub struct CompiledQuery {
    pub ctx: CompileContext,
    pub program: Program,
    pub functions: FunctionTable,
    pub stats: SpecializeStats,
}

impl CompiledQuery {
    /// Text rendering of the specialized program.
    pub fn explain(&self) -> String {
        ProgramDisplay::new(&self.program, &self.ctx.columns).to_string()
    }

    pub fn execute(&self, provider: &dyn TableProvider) -> Result<QueryResult> {
        Executor::new(&self.program, &self.functions, &self.ctx.columns, provider).execute()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileConfig;

    const QUERY: &str = r#"{
        "tables": {
            "t": {
                "columns": [{"name": "g", "type": "int64"}, {"name": "v", "type": "int64"}],
                "rows": [[1, 10], [2, 5], [1, 7]]
            }
        },
        "plan": {
            "op": "aggregate",
            "input": {"op": "scan", "table": "t"},
            "group_by": ["g"],
            "aggregates": [{"function": "sum", "arg": "v", "name": "total"}]
        }
    }"#;

    #[test]
    fn aggregate_map_specialized() {
        let query = QueryDescription::from_json(QUERY).unwrap();
        let compiled = Compiler::new(CompileConfig::new())
            .compile_description(&query)
            .unwrap();

        assert_eq!(1, compiled.stats.hash_maps);
        assert!(compiled.explain().contains("hashmap"));
        assert!(!compiled.functions.is_empty());
    }

    #[test]
    fn unverified_compile() {
        let mut config = CompileConfig::new();
        config.verify_program = false;
        let query = QueryDescription::from_json(QUERY).unwrap();
        let compiled = Compiler::new(config).compile_description(&query).unwrap();
        assert_eq!(1, compiled.stats.hash_maps);
    }
}
