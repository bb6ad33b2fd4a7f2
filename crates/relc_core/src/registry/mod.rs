//! Column and member registries shared by every pass of a compilation.

pub mod column;
pub mod member;

use column::ColumnManager;
use member::MemberManager;

/// Registries scoped to a single compilation unit.
#[derive(Debug, Default)]
pub struct CompileContext {
    pub columns: ColumnManager,
    pub members: MemberManager,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }
}
