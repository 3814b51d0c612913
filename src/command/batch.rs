// src/command/batch.rs

use crate::command::CommandSpec;
use crate::types::CommandId;

/// Ordered mapping `CommandId -> CommandSpec` submitted to one `exec` call.
///
/// Insertion order is the start order. Inserting an id that is already
/// present replaces its spec in place (last write wins, original position
/// kept); callers should not rely on that and keep ids unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<(CommandId, CommandSpec)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a command, returning the spec it replaced if the id was taken.
    pub fn insert(&mut self, id: impl Into<CommandId>, spec: CommandSpec) -> Option<CommandSpec> {
        let id = id.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some((_, slot)) => Some(std::mem::replace(slot, spec)),
            None => {
                self.entries.push((id, spec));
                None
            }
        }
    }

    /// Fluent variant of [`Batch::insert`].
    pub fn with(mut self, id: impl Into<CommandId>, spec: CommandSpec) -> Self {
        self.insert(id, spec);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CommandSpec> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, spec)| spec)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandSpec)> {
        self.entries.iter().map(|(id, spec)| (id.as_str(), spec))
    }
}

impl<K: Into<CommandId>> FromIterator<(K, CommandSpec)> for Batch {
    fn from_iter<T: IntoIterator<Item = (K, CommandSpec)>>(iter: T) -> Self {
        let mut batch = Batch::new();
        for (id, spec) in iter {
            batch.insert(id, spec);
        }
        batch
    }
}

impl IntoIterator for Batch {
    type Item = (CommandId, CommandSpec);
    type IntoIter = std::vec::IntoIter<(CommandId, CommandSpec)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
