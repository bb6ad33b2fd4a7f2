//! Runtime storage for states.
//!
//! Every state stores rows of raw values in member order. Associative
//! states additionally keep an index over the key members, and hash indexed
//! views chain rows sharing a directory slot through their link member.

use std::fmt;

use hashbrown::raw::RawTable;
use relc_error::{DbError, Result};

use crate::lowering::raw::RawScalar;
use crate::types::state::StateType;

/// Index over the rows of a state.
pub enum StateIndex {
    /// Plain rows, no lookups.
    None,
    /// Keys compared against every row.
    Linear { num_keys: usize },
    /// Rows bucketed by the hash of their keys.
    Hashed {
        num_keys: usize,
        table: RawTable<(u64, Vec<usize>)>,
    },
    /// Directory of chain heads indexed by the low bits of the stored hash.
    Chained {
        hash: usize,
        link: usize,
        directory: Vec<Option<usize>>,
    },
}

impl fmt::Debug for StateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Linear { num_keys } => {
                f.debug_struct("Linear").field("num_keys", num_keys).finish()
            }
            Self::Hashed { num_keys, table } => f
                .debug_struct("Hashed")
                .field("num_keys", num_keys)
                .field("buckets", &table.len())
                .finish(),
            Self::Chained {
                hash,
                link,
                directory,
            } => f
                .debug_struct("Chained")
                .field("hash", hash)
                .field("link", link)
                .field("directory", &directory.len())
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct StateStorage {
    pub members: Vec<String>,
    pub rows: Vec<Vec<RawScalar>>,
    pub index: StateIndex,
}

impl StateStorage {
    /// Empty storage for a newly created state.
    pub fn new(ty: &StateType) -> Result<Self> {
        let members: Vec<String> = ty.members().names().map(|n| n.to_string()).collect();
        let index = match ty {
            StateType::Map { keys, .. } | StateType::MultiMap { keys, .. } => StateIndex::Linear {
                num_keys: keys.len(),
            },
            StateType::HashMap { keys, .. } | StateType::HashMultiMap { keys, .. } => {
                StateIndex::Hashed {
                    num_keys: keys.len(),
                    table: RawTable::new(),
                }
            }
            StateType::HashIndexedView { .. } | StateType::SortedView(_) => {
                return Err(DbError::new("Views are created from an existing state")
                    .with_field("state", ty));
            }
            _ => StateIndex::None,
        };

        Ok(StateStorage {
            members,
            rows: Vec::new(),
            index,
        })
    }

    /// Plain storage holding the given rows.
    pub fn with_rows(members: Vec<String>, rows: Vec<Vec<RawScalar>>) -> Self {
        StateStorage {
            members,
            rows,
            index: StateIndex::None,
        }
    }

    /// Build a hash indexed view over a copy of `buffer`'s rows.
    ///
    /// Rows are chained in insertion order, each link pointing at the row
    /// previously heading its slot.
    pub fn hash_indexed_view(buffer: &StateStorage, hash: &str, link: &str) -> Result<Self> {
        let hash = buffer.member_index(hash)?;
        let link = buffer.member_index(link)?;

        let size = buffer.rows.len().max(1).next_power_of_two();
        let mask = (size - 1) as u64;
        let mut directory = vec![None; size];
        let mut rows = buffer.rows.clone();

        for (idx, row) in rows.iter_mut().enumerate() {
            let slot = (stored_hash(row, hash)? & mask) as usize;
            row[link] = RawScalar::Ptr(directory[slot]);
            directory[slot] = Some(idx);
        }

        Ok(StateStorage {
            members: buffer.members.clone(),
            rows,
            index: StateIndex::Chained {
                hash,
                link,
                directory,
            },
        })
    }

    pub fn member_index(&self, member: &str) -> Result<usize> {
        self.members
            .iter()
            .position(|m| m == member)
            .ok_or_else(|| DbError::new("Missing member on state").with_field("member", member))
    }

    pub fn num_keys(&self) -> Result<usize> {
        match &self.index {
            StateIndex::Linear { num_keys } | StateIndex::Hashed { num_keys, .. } => Ok(*num_keys),
            _ => Err(DbError::new("State is not keyed")),
        }
    }

    pub fn value(&self, row: usize, member: usize) -> Result<&RawScalar> {
        self.rows
            .get(row)
            .and_then(|r| r.get(member))
            .ok_or_else(|| {
                DbError::new("Entry out of bounds")
                    .with_field("row", row)
                    .with_field("member", member)
            })
    }

    pub fn set_value(&mut self, row: usize, member: usize, value: RawScalar) -> Result<()> {
        let slot = self
            .rows
            .get_mut(row)
            .and_then(|r| r.get_mut(member))
            .ok_or_else(|| {
                DbError::new("Entry out of bounds")
                    .with_field("row", row)
                    .with_field("member", member)
            })?;
        *slot = value;
        Ok(())
    }

    /// Keys of a stored row.
    pub fn keys(&self, row: usize) -> Result<&[RawScalar]> {
        let num_keys = self.num_keys()?;
        self.rows
            .get(row)
            .map(|r| &r[..num_keys])
            .ok_or_else(|| DbError::new("Entry out of bounds").with_field("row", row))
    }

    /// Rows that may match a key with the given hash.
    ///
    /// For hashed states `hash` must be the key hash, and every row is a
    /// candidate for linear states. Candidates still need a full key
    /// comparison. Chained views compare the stored hash and return exact
    /// matches.
    pub fn candidates(&self, hash: Option<u64>) -> Result<Vec<usize>> {
        match (&self.index, hash) {
            (StateIndex::Linear { .. }, _) => Ok((0..self.rows.len()).collect()),
            (StateIndex::Hashed { table, .. }, Some(hash)) => Ok(table
                .get(hash, |(h, _)| *h == hash)
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default()),
            (
                StateIndex::Chained {
                    hash: hash_member,
                    link,
                    directory,
                },
                Some(hash),
            ) => {
                let mask = (directory.len() - 1) as u64;
                let mut matches = Vec::new();
                let mut current = directory[(hash & mask) as usize];
                while let Some(idx) = current {
                    let row = self
                        .rows
                        .get(idx)
                        .ok_or_else(|| DbError::new("Dangling link").with_field("row", idx))?;
                    if stored_hash(row, *hash_member)? == hash {
                        matches.push(idx);
                    }
                    current = match &row[*link] {
                        RawScalar::Ptr(next) => *next,
                        other => {
                            return Err(DbError::new("Link member does not hold a pointer")
                                .with_field("value", other));
                        }
                    };
                }
                Ok(matches)
            }
            (StateIndex::Hashed { .. } | StateIndex::Chained { .. }, None) => {
                Err(DbError::new("Lookup into a hashed state requires a hash"))
            }
            (StateIndex::None, _) => Err(DbError::new("State does not support lookups")),
        }
    }

    /// Append a row, indexing it under `hash` for hashed states.
    pub fn push(&mut self, row: Vec<RawScalar>, hash: Option<u64>) -> Result<usize> {
        if row.len() != self.members.len() {
            return Err(DbError::new("Row does not match state members")
                .with_field("expected", self.members.len())
                .with_field("got", row.len()));
        }
        let idx = self.rows.len();

        match (&mut self.index, hash) {
            (StateIndex::Hashed { table, .. }, Some(hash)) => {
                match table.get_mut(hash, |(h, _)| *h == hash) {
                    Some((_, rows)) => rows.push(idx),
                    None => {
                        table.insert(hash, (hash, vec![idx]), |(h, _)| *h);
                    }
                }
            }
            (StateIndex::Hashed { .. }, None) => {
                return Err(DbError::new("Insert into a hashed state requires a hash"));
            }
            (StateIndex::Chained { .. }, _) => {
                return Err(DbError::new("Hash indexed views are read only"));
            }
            _ => (),
        }

        self.rows.push(row);
        Ok(idx)
    }
}

fn stored_hash(row: &[RawScalar], member: usize) -> Result<u64> {
    row.get(member)
        .and_then(|v| v.try_as_index())
        .ok_or_else(|| DbError::new("Hash member does not hold an index"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::datatype::DataType;
    use crate::types::state::{Member, StateMembers};

    fn buffer(hashes: &[u64]) -> StateStorage {
        let rows = hashes
            .iter()
            .enumerate()
            .map(|(idx, h)| {
                vec![
                    RawScalar::Index(*h),
                    RawScalar::Ptr(None),
                    RawScalar::Int(idx as i128),
                ]
            })
            .collect();
        StateStorage::with_rows(
            vec!["hash".to_string(), "link".to_string(), "v".to_string()],
            rows,
        )
    }

    #[test]
    fn chained_lookup_follows_links() {
        // 4 rows, directory of 4 slots. 1 and 5 share slot 1.
        let view = StateStorage::hash_indexed_view(&buffer(&[1, 5, 1, 2]), "hash", "link")
            .unwrap();

        let mut ones = view.candidates(Some(1)).unwrap();
        ones.sort_unstable();
        assert_eq!(vec![0, 2], ones);
        assert_eq!(vec![1], view.candidates(Some(5)).unwrap());
        assert!(view.candidates(Some(3)).unwrap().is_empty());

        // Head of slot 1 is the last row inserted there.
        assert_eq!(RawScalar::Ptr(Some(1)), view.rows[2][1]);
        assert_eq!(RawScalar::Ptr(None), view.rows[0][1]);
    }

    #[test]
    fn empty_view() {
        let view = StateStorage::hash_indexed_view(&buffer(&[]), "hash", "link").unwrap();
        assert!(view.candidates(Some(7)).unwrap().is_empty());
    }

    #[test]
    fn hashed_buckets() {
        let ty = StateType::HashMultiMap {
            keys: StateMembers::new(vec![Member::new("k", DataType::int64())]),
            values: StateMembers::default(),
        };
        let mut storage = StateStorage::new(&ty).unwrap();
        storage.push(vec![RawScalar::Int(1)], Some(10)).unwrap();
        storage.push(vec![RawScalar::Int(2)], Some(20)).unwrap();
        storage.push(vec![RawScalar::Int(3)], Some(10)).unwrap();

        assert_eq!(vec![0, 2], storage.candidates(Some(10)).unwrap());
        assert!(storage.candidates(Some(30)).unwrap().is_empty());
        assert!(storage.push(vec![RawScalar::Int(4)], None).is_err());
        assert_eq!(&[RawScalar::Int(3)], storage.keys(2).unwrap());
    }
}
