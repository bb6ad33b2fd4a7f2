use std::fmt;

use super::datatype::DataType;
use super::state::StateType;

/// Type of a column flowing through a tuple stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Scalar(DataType),
    /// Reference to a single entry in a state of the given type.
    EntryRef(Box<StateType>),
    /// Possibly missing value. Produced by lookups on uniquely keyed states.
    Optional(Box<ColumnType>),
    /// List of values. Produced by lookups on multi states.
    List(Box<ColumnType>),
}

impl ColumnType {
    pub fn entry_ref(state: StateType) -> Self {
        ColumnType::EntryRef(Box::new(state))
    }

    pub fn optional(inner: ColumnType) -> Self {
        ColumnType::Optional(Box::new(inner))
    }

    pub fn list(inner: ColumnType) -> Self {
        ColumnType::List(Box::new(inner))
    }

    /// The type produced by looking up entries in a state.
    pub fn lookup_result(state: &StateType) -> Self {
        let entry = Self::entry_ref(state.clone());
        if state.is_multi_lookup() {
            Self::list(entry)
        } else {
            Self::optional(entry)
        }
    }

    pub fn try_as_scalar(&self) -> Option<DataType> {
        match self {
            Self::Scalar(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Visit every state type referenced by this column type.
    pub fn for_each_state(&self, f: &mut impl FnMut(&StateType)) {
        match self {
            Self::Scalar(_) => (),
            Self::EntryRef(state) => f(state),
            Self::Optional(inner) | Self::List(inner) => inner.for_each_state(f),
        }
    }

    /// Structurally replace `from` with `to`, returning the new type if
    /// anything changed.
    pub fn substitute_state(&self, from: &StateType, to: &StateType) -> Option<ColumnType> {
        match self {
            Self::Scalar(_) => None,
            Self::EntryRef(state) => {
                if state.as_ref() == from {
                    Some(Self::entry_ref(to.clone()))
                } else {
                    None
                }
            }
            Self::Optional(inner) => inner
                .substitute_state(from, to)
                .map(Self::optional),
            Self::List(inner) => inner.substitute_state(from, to).map(Self::list),
        }
    }
}

impl From<DataType> for ColumnType {
    fn from(value: DataType) -> Self {
        ColumnType::Scalar(value)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(dt) => write!(f, "{dt}"),
            Self::EntryRef(state) => write!(f, "ref<{}>", state.kind_name()),
            Self::Optional(inner) => write!(f, "optional<{inner}>"),
            Self::List(inner) => write!(f, "list<{inner}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::datatype::ScalarType;
    use crate::types::state::{Member, StateMembers};

    fn multimap() -> StateType {
        StateType::MultiMap {
            keys: StateMembers::new(vec![Member::new("k", DataType::int64())]),
            values: StateMembers::default(),
        }
    }

    #[test]
    fn lookup_result_kinds() {
        let mm = multimap();
        assert!(matches!(ColumnType::lookup_result(&mm), ColumnType::List(_)));

        let map = StateType::Map {
            keys: StateMembers::new(vec![Member::new("k", DataType::int64())]),
            values: StateMembers::default(),
        };
        assert!(matches!(
            ColumnType::lookup_result(&map),
            ColumnType::Optional(_)
        ));
    }

    #[test]
    fn substitute_nested() {
        let mm = multimap();
        let hmm = StateType::HashMultiMap {
            keys: StateMembers::new(vec![Member::new("k", DataType::int64())]),
            values: StateMembers::default(),
        };

        let ty = ColumnType::lookup_result(&mm);
        let new = ty.substitute_state(&mm, &hmm).unwrap();
        assert_eq!(ColumnType::list(ColumnType::entry_ref(hmm.clone())), new);

        // Nothing to replace.
        assert!(new.substitute_state(&mm, &hmm).is_none());
        assert!(
            ColumnType::Scalar(DataType::new(ScalarType::Bool))
                .substitute_state(&mm, &hmm)
                .is_none()
        );
    }
}
