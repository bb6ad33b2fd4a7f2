use std::fmt;

use relc_error::{DbError, Result};

use super::datatype::DataType;

/// A named member of a state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    pub name: String,
    pub datatype: DataType,
}

impl Member {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Member {
            name: name.into(),
            datatype,
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.datatype)
    }
}

/// Ordered list of members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StateMembers {
    pub members: Vec<Member>,
}

impl StateMembers {
    pub fn new(members: Vec<Member>) -> Self {
        StateMembers { members }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Concatenate two member lists.
    pub fn concat(&self, other: &StateMembers) -> StateMembers {
        let mut members = self.members.clone();
        members.extend(other.members.iter().cloned());
        StateMembers { members }
    }
}

impl fmt::Display for StateMembers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, member) in self.members.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{member}")?;
        }
        write!(f, "]")
    }
}

/// Type of an out-of-stream state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateType {
    /// Opaque handle to an external table.
    ExternalTable(StateMembers),
    /// Table being built up as a query result.
    Table(StateMembers),
    /// Table converted into the externally consumable form.
    ResultTable(StateMembers),
    /// Flat append-only buffer of rows.
    Buffer(StateMembers),
    /// Growable vector of rows that may be sorted.
    Vector(StateMembers),
    /// Sorted view over a vector.
    SortedView(StateMembers),
    /// Generic associative collection with unique keys.
    Map {
        keys: StateMembers,
        values: StateMembers,
    },
    /// Generic associative collection allowing duplicate keys.
    MultiMap {
        keys: StateMembers,
        values: StateMembers,
    },
    HashMap {
        keys: StateMembers,
        values: StateMembers,
    },
    HashMultiMap {
        keys: StateMembers,
        values: StateMembers,
    },
    /// Hash to link index over a buffer. `members` are the members of the
    /// underlying buffer, including the hash and link members.
    HashIndexedView {
        hash: String,
        link: String,
        members: StateMembers,
    },
}

impl StateType {
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::ExternalTable(_) => "external_table",
            Self::Table(_) => "table",
            Self::ResultTable(_) => "result_table",
            Self::Buffer(_) => "buffer",
            Self::Vector(_) => "vector",
            Self::SortedView(_) => "sorted_view",
            Self::Map { .. } => "map",
            Self::MultiMap { .. } => "multimap",
            Self::HashMap { .. } => "hashmap",
            Self::HashMultiMap { .. } => "hash_multimap",
            Self::HashIndexedView { .. } => "hash_indexed_view",
        }
    }

    /// Key members for associative states.
    pub fn key_members(&self) -> Option<&StateMembers> {
        match self {
            Self::Map { keys, .. }
            | Self::MultiMap { keys, .. }
            | Self::HashMap { keys, .. }
            | Self::HashMultiMap { keys, .. } => Some(keys),
            _ => None,
        }
    }

    /// All members in storage order, keys first for associative states.
    pub fn members(&self) -> StateMembers {
        match self {
            Self::ExternalTable(m)
            | Self::Table(m)
            | Self::ResultTable(m)
            | Self::Buffer(m)
            | Self::Vector(m)
            | Self::SortedView(m) => m.clone(),
            Self::Map { keys, values }
            | Self::MultiMap { keys, values }
            | Self::HashMap { keys, values }
            | Self::HashMultiMap { keys, values } => keys.concat(values),
            Self::HashIndexedView { members, .. } => members.clone(),
        }
    }

    pub fn member_type(&self, name: &str) -> Result<DataType> {
        self.members()
            .get(name)
            .map(|m| m.datatype)
            .ok_or_else(|| {
                DbError::new("Missing member on state")
                    .with_field("member", name)
                    .with_field("state", self)
            })
    }

    /// If this is one of the generic associative collections.
    pub const fn is_generic_collection(&self) -> bool {
        matches!(self, Self::Map { .. } | Self::MultiMap { .. })
    }

    /// If entries in this state are uniquely keyed.
    pub const fn is_unique_keyed(&self) -> bool {
        matches!(self, Self::Map { .. } | Self::HashMap { .. })
    }

    /// If lookups on this state may produce more than one entry.
    pub const fn is_multi_lookup(&self) -> bool {
        matches!(
            self,
            Self::MultiMap { .. } | Self::HashMultiMap { .. } | Self::HashIndexedView { .. }
        )
    }

    pub const fn is_lookupable(&self) -> bool {
        matches!(
            self,
            Self::Map { .. }
                | Self::MultiMap { .. }
                | Self::HashMap { .. }
                | Self::HashMultiMap { .. }
                | Self::HashIndexedView { .. }
        )
    }

    /// States that can be the target of a materialize.
    pub const fn is_materializable(&self) -> bool {
        matches!(self, Self::Buffer(_) | Self::Vector(_) | Self::Table(_))
    }

    pub const fn is_scannable(&self) -> bool {
        !matches!(self, Self::HashIndexedView { .. } | Self::Table(_))
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExternalTable(m)
            | Self::Table(m)
            | Self::ResultTable(m)
            | Self::Buffer(m)
            | Self::Vector(m)
            | Self::SortedView(m) => write!(f, "{}{m}", self.kind_name()),
            Self::Map { keys, values }
            | Self::MultiMap { keys, values }
            | Self::HashMap { keys, values }
            | Self::HashMultiMap { keys, values } => {
                write!(f, "{}<{keys} -> {values}>", self.kind_name())
            }
            Self::HashIndexedView {
                hash,
                link,
                members,
            } => write!(f, "{}<{hash}, {link}>{members}", self.kind_name()),
        }
    }
}
