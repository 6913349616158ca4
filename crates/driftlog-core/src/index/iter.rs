//! Lazy, restartable iteration over the shallow index in log order.

use std::collections::VecDeque;

use rusqlite::types::Value as SqlValue;

use super::EntryIndex;
use crate::clock::Clock;
use crate::db::wall_to_sql;
use crate::entry::ShallowEntry;
use crate::error::Result;

/// Which end of the log iteration starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Oldest first.
    Ascending,
    /// Newest first.
    Descending,
}

/// Which entries an iteration visits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    /// Current heads, optionally restricted to one gid.
    Heads { gid: Option<String> },
}

impl Filter {
    pub(super) fn push_sql(&self, sql: &mut String, params: &mut Vec<SqlValue>) {
        match self {
            Self::All => {}
            Self::Heads { gid: None } => sql.push_str(" AND head = 1"),
            Self::Heads { gid: Some(gid) } => {
                sql.push_str(" AND head = 1 AND gid = ?");
                params.push(SqlValue::Text(gid.clone()));
            }
        }
    }
}

/// Keyset position: the SQL ordering columns of one clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Cursor {
    pub wall_time: i64,
    pub logical: i64,
    pub clock_id: Vec<u8>,
}

impl From<&Clock> for Cursor {
    fn from(clock: &Clock) -> Self {
        Self {
            wall_time: wall_to_sql(clock.timestamp.wall_time),
            logical: i64::from(clock.timestamp.logical),
            clock_id: clock.id.clone(),
        }
    }
}

impl Cursor {
    pub(super) fn params(&self) -> [SqlValue; 3] {
        [
            SqlValue::Integer(self.wall_time),
            SqlValue::Integer(self.logical),
            SqlValue::Blob(self.clock_id.clone()),
        ]
    }
}

/// Sorted iterator over shallow entries, paged by the index fetch size.
///
/// Pages are keyed on the clock columns, so entries deleted mid-iteration
/// (as trimming does) never cause skips. Entries with identical clocks are
/// always fetched as a whole group and ordered with the log's
/// [`crate::sort::Sorting`].
pub struct SortedIter<'a, T> {
    index: &'a EntryIndex<T>,
    filter: Filter,
    direction: Direction,
    start: Option<Cursor>,
    cursor: Option<Cursor>,
    buffer: VecDeque<ShallowEntry>,
    done: bool,
}

impl<'a, T> SortedIter<'a, T> {
    pub(super) const fn new(
        index: &'a EntryIndex<T>,
        filter: Filter,
        direction: Direction,
        start: Option<Cursor>,
    ) -> Self {
        Self {
            index,
            filter,
            direction,
            start,
            cursor: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Start over from the beginning.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.done = false;
    }

    /// Collect the remaining entries.
    ///
    /// # Errors
    ///
    /// Returns the first storage or ordering error.
    pub fn collect_all(self) -> Result<Vec<ShallowEntry>> {
        self.collect()
    }

    fn fill(&mut self) -> Result<()> {
        let fetch_size = self.index.fetch_size;
        let position = self.cursor.as_ref().or(self.start.as_ref());
        let mut page = self
            .index
            .page(&self.filter, self.direction, position, fetch_size)?;
        if page.len() < fetch_size {
            self.done = true;
        }
        let Some(last) = page.last() else {
            self.done = true;
            return Ok(());
        };

        let cursor = Cursor::from(&last.meta.clock);
        page.retain(|e| Cursor::from(&e.meta.clock) != cursor);
        page.extend(self.index.tie_group(&self.filter, &cursor)?);

        self.index.sorting.sort(&mut page)?;
        if self.direction == Direction::Descending {
            page.reverse();
        }

        self.cursor = Some(cursor);
        self.buffer.extend(page);
        Ok(())
    }
}

impl<T> Iterator for SortedIter<'_, T> {
    type Item = Result<ShallowEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
