// src/project/env.rs

//! Per-script environment overrides.
//!
//! Each pair carries an opaque [`EnvEntryId`] assigned on insertion, so a
//! pair can be edited in place (including its name) without losing track of
//! which entry an editor row refers to.

use std::fmt;

/// Stable identifier of one environment pair within its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvEntryId(u64);

impl EnvEntryId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EnvEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvPair {
    pub id: EnvEntryId,
    pub name: String,
    pub value: String,
}

/// Which half of a pair an edit targets (column 0 / column 1 in an editor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvColumn {
    Name,
    Value,
}

impl TryFrom<usize> for EnvColumn {
    type Error = String;

    fn try_from(column: usize) -> Result<Self, Self::Error> {
        match column {
            0 => Ok(EnvColumn::Name),
            1 => Ok(EnvColumn::Value),
            other => Err(format!(
                "invalid environment column {other} (expected 0 for name or 1 for value)"
            )),
        }
    }
}

/// Result of [`Environment::edit_pair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Renamed,
    ValueChanged,
    /// The new name belonged to a different pair; the edited pair was deleted.
    RemovedOnCollision,
    NotFound,
}

/// Ordered collection of `(id, name, value)` triples.
///
/// Storage does not require unique names (a loaded project may contain
/// duplicates); the interactive operations enforce the collision rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pairs: Vec<EnvPair>,
    next_id: u64,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvPair> {
        self.pairs.iter()
    }

    pub fn get(&self, id: EnvEntryId) -> Option<&EnvPair> {
        self.pairs.iter().find(|p| p.id == id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.pairs.iter().any(|p| p.name == name)
    }

    /// Append a pair without any collision check.
    ///
    /// Used when materialising a stored project.
    pub fn insert_unchecked(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> EnvEntryId {
        let id = EnvEntryId(self.next_id);
        self.next_id += 1;
        self.pairs.push(EnvPair {
            id,
            name: name.into(),
            value: value.into(),
        });
        id
    }

    /// Add a new pair. Returns `None` (and changes nothing) if a pair with
    /// the same name already exists.
    pub fn add_pair(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<EnvEntryId> {
        let name = name.into();
        if self.contains_name(&name) {
            return None;
        }
        Some(self.insert_unchecked(name, value))
    }

    /// Edit one column of an existing pair.
    ///
    /// A name edit that collides with a *different* pair deletes the edited
    /// pair instead of renaming it. Value edits always succeed.
    pub fn edit_pair(
        &mut self,
        id: EnvEntryId,
        column: EnvColumn,
        text: impl Into<String>,
    ) -> EditOutcome {
        let text = text.into();
        let Some(pos) = self.pairs.iter().position(|p| p.id == id) else {
            return EditOutcome::NotFound;
        };

        match column {
            EnvColumn::Value => {
                self.pairs[pos].value = text;
                EditOutcome::ValueChanged
            }
            EnvColumn::Name => {
                let collides = self
                    .pairs
                    .iter()
                    .any(|p| p.id != id && p.name == text);
                if collides {
                    self.pairs.remove(pos);
                    EditOutcome::RemovedOnCollision
                } else {
                    self.pairs[pos].name = text;
                    EditOutcome::Renamed
                }
            }
        }
    }

    /// Delete a pair. Returns whether it existed.
    pub fn remove_pair(&mut self, id: EnvEntryId) -> bool {
        let before = self.pairs.len();
        self.pairs.retain(|p| p.id != id);
        self.pairs.len() != before
    }

    /// `NAME`/`VALUE` pairs in collection order, duplicates included.
    pub fn to_vars(&self) -> Vec<(String, String)> {
        self.pairs
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }
}
