//! Recency-ordered cache of prepared statements.

use indexmap::IndexMap;

use super::statement::PreparedStatement;

/// Bounded map from SQL text to an idle [`PreparedStatement`].
///
/// Entries are kept in recency order: index 0 is the least recently
/// returned statement. A statement that is checked out is not in the map,
/// so the same SQL can never be handed to two callers at once.
#[derive(Debug)]
pub(crate) struct StatementCache {
    entries: IndexMap<String, PreparedStatement>,
    capacity: usize,
}

impl StatementCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) const fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks out the statement cached for `sql`.
    pub(crate) fn take(&mut self, sql: &str) -> Option<PreparedStatement> {
        self.entries.shift_remove(sql)
    }

    /// Removes least recently used entries until one more fits.
    pub(crate) fn make_room(&mut self) -> Vec<PreparedStatement> {
        let mut evicted = Vec::new();
        while !self.entries.is_empty() && self.entries.len() >= self.capacity {
            if let Some((_, statement)) = self.entries.shift_remove_index(0) {
                evicted.push(statement);
            }
        }
        evicted
    }

    /// Returns `statement` to the cache as the most recently used entry.
    ///
    /// Gives the statement back when there is no room for it: with a zero
    /// capacity, or when another statement for the same SQL is already
    /// cached.
    pub(crate) fn insert(&mut self, statement: PreparedStatement) -> Option<PreparedStatement> {
        if self.capacity == 0 || self.entries.contains_key(statement.sql()) {
            return Some(statement);
        }
        self.entries.insert(statement.sql().to_owned(), statement);
        None
    }

    /// Empties the cache, least recently used first.
    pub(crate) fn drain(&mut self) -> Vec<PreparedStatement> {
        self.entries.drain(..).map(|(_, statement)| statement).collect()
    }

    /// Cached SQL texts, least recently used first.
    #[cfg(test)]
    pub(crate) fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
