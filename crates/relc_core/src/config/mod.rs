use std::collections::HashMap;
use std::sync::LazyLock;

use relc_error::{DbError, Result};

use crate::expr::value::ConstValue;
use crate::relalg::{BuildSide, JoinImpl};

/// Configuration for a single compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileConfig {
    /// Gates the rewrite of multimaps into hash indexed views.
    pub enable_optimizations: bool,
    /// Run the program verifier after each stage.
    pub verify_program: bool,
    /// Strategy for joins without an explicit hint.
    pub default_join_impl: JoinImpl,
    pub max_rewrite_iterations: u64,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CompileConfig {
    pub fn new() -> Self {
        CompileConfig {
            enable_optimizations: true,
            verify_program: true,
            default_join_impl: JoinImpl::NestedLoop,
            max_rewrite_iterations: DEFAULT_MAX_REWRITE_ITERATIONS,
        }
    }

    pub fn set_from_scalar(&mut self, name: &str, value: ConstValue) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_scalar(&self, name: &str) -> Result<ConstValue> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        let val = (func.get)(self);
        Ok(val)
    }

    /// Set a setting from `name=value` text, as passed on the command line.
    pub fn set_from_str(&mut self, assignment: &str) -> Result<()> {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| DbError::new(format!("Expected 'name=value', got '{assignment}'")))?;

        self.set_from_scalar(name.trim(), ConstValue::String(value.trim().to_string()))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_conf = Self::new();

        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        let scalar = (func.get)(&def_conf);
        (func.set)(scalar, self)
    }

    pub fn reset_all(&mut self) {
        *self = Self::new();
    }

    /// Names and descriptions of every setting, sorted by name.
    pub fn settings() -> Vec<(&'static str, &'static str)> {
        let mut settings: Vec<_> = GET_SET_FUNCTIONS
            .iter()
            .map(|(name, funcs)| (*name, funcs.description))
            .collect();
        settings.sort_unstable();
        settings
    }
}

struct SettingFunctions {
    description: &'static str,
    set: fn(scalar: ConstValue, conf: &mut CompileConfig) -> Result<()>,
    get: fn(conf: &CompileConfig) -> ConstValue,
}

impl SettingFunctions {
    const fn new<S: CompileSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_scalar as _,
            get: S::get_as_scalar as _,
        }
    }
}

fn insert_setting<S: CompileSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<EnableOptimizations>(&mut map);
    insert_setting::<VerifyProgram>(&mut map);
    insert_setting::<DefaultJoinImpl>(&mut map);
    insert_setting::<MaxRewriteIterations>(&mut map);

    map
});

pub trait CompileSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_scalar(scalar: ConstValue, conf: &mut CompileConfig) -> Result<()>;
    fn get_as_scalar(conf: &CompileConfig) -> ConstValue;
}

pub struct EnableOptimizations;

impl CompileSetting for EnableOptimizations {
    const NAME: &'static str = "enable_optimizations";
    const DESCRIPTION: &'static str = "Allow rewriting multimaps into hash indexed views";

    fn set_from_scalar(scalar: ConstValue, conf: &mut CompileConfig) -> Result<()> {
        let val = scalar.try_as_bool()?;
        conf.enable_optimizations = val;
        Ok(())
    }

    fn get_as_scalar(conf: &CompileConfig) -> ConstValue {
        conf.enable_optimizations.into()
    }
}

pub struct VerifyProgram;

impl CompileSetting for VerifyProgram {
    const NAME: &'static str = "verify_program";
    const DESCRIPTION: &'static str = "Verify the sub-operator program after every stage";

    fn set_from_scalar(scalar: ConstValue, conf: &mut CompileConfig) -> Result<()> {
        let val = scalar.try_as_bool()?;
        conf.verify_program = val;
        Ok(())
    }

    fn get_as_scalar(conf: &CompileConfig) -> ConstValue {
        conf.verify_program.into()
    }
}

pub struct DefaultJoinImpl;

impl CompileSetting for DefaultJoinImpl {
    const NAME: &'static str = "default_join_impl";
    const DESCRIPTION: &'static str =
        "Join strategy used when a join has no hint ('nested_loop' or 'hash')";

    fn set_from_scalar(scalar: ConstValue, conf: &mut CompileConfig) -> Result<()> {
        let val = scalar.try_as_str()?;
        conf.default_join_impl = match val {
            "nested_loop" => JoinImpl::NestedLoop,
            "hash" => JoinImpl::Hash {
                build: BuildSide::Right,
            },
            other => {
                return Err(DbError::new(format!("Unknown join implementation: '{other}'")));
            }
        };
        Ok(())
    }

    fn get_as_scalar(conf: &CompileConfig) -> ConstValue {
        conf.default_join_impl.as_str().into()
    }
}

pub const DEFAULT_MAX_REWRITE_ITERATIONS: u64 = 64;

const MIN_REWRITE_ITERATIONS: i64 = 1;
const MAX_REWRITE_ITERATIONS: i64 = 4096;

pub struct MaxRewriteIterations;

impl CompileSetting for MaxRewriteIterations {
    const NAME: &'static str = "max_rewrite_iterations";
    const DESCRIPTION: &'static str = "Upper bound on specialization sweeps that apply a rewrite";

    fn set_from_scalar(scalar: ConstValue, conf: &mut CompileConfig) -> Result<()> {
        let val = scalar.try_as_i64()?;

        if val < MIN_REWRITE_ITERATIONS {
            return Err(DbError::new(format!(
                "Rewrite iterations cannot be less than {MIN_REWRITE_ITERATIONS}"
            )));
        }

        if val > MAX_REWRITE_ITERATIONS {
            return Err(DbError::new(format!(
                "Rewrite iterations cannot be greater than {MAX_REWRITE_ITERATIONS}"
            )));
        }

        conf.max_rewrite_iterations = val as u64;
        Ok(())
    }

    fn get_as_scalar(conf: &CompileConfig) -> ConstValue {
        (conf.max_rewrite_iterations as i64).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_setting_exists() {
        let mut conf = CompileConfig::new();
        conf.set_from_scalar("default_join_impl", "hash".into())
            .unwrap();

        let val = conf.get_as_scalar("default_join_impl").unwrap();
        assert_eq!("hash", val.try_as_str().unwrap());
        assert_eq!(
            JoinImpl::Hash {
                build: BuildSide::Right
            },
            conf.default_join_impl
        );
    }

    #[test]
    fn set_setting_not_exists() {
        let mut conf = CompileConfig::new();
        conf.set_from_scalar("hell_world", 58i64.into()).unwrap_err();
    }

    #[test]
    fn set_from_str_parses_value() {
        let mut conf = CompileConfig::new();
        conf.set_from_str("enable_optimizations = false").unwrap();
        assert!(!conf.enable_optimizations);

        conf.set_from_str("max_rewrite_iterations=8").unwrap();
        assert_eq!(8, conf.max_rewrite_iterations);

        conf.set_from_str("max_rewrite_iterations=0").unwrap_err();
        conf.set_from_str("verify_program").unwrap_err();
    }

    #[test]
    fn reset_setting() {
        let mut conf = CompileConfig::new();
        conf.set_from_scalar("verify_program", false.into()).unwrap();
        conf.set_from_scalar("max_rewrite_iterations", 3i64.into())
            .unwrap();

        conf.reset("verify_program").unwrap();
        assert!(conf.verify_program);
        assert_eq!(3, conf.max_rewrite_iterations);

        conf.reset_all();
        assert_eq!(CompileConfig::new(), conf);
    }

    #[test]
    fn settings_listed() {
        let names: Vec<_> = CompileConfig::settings().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            vec![
                "default_join_impl",
                "enable_optimizations",
                "max_rewrite_iterations",
                "verify_program"
            ],
            names
        );
    }
}
