//! Bounded dual-view store for statement results
//!
//! [`MaterializedResults`] keeps every accepted row in two FIFO-bounded
//! sequences:
//!
//! ```text
//! append(+I a, +I b, -D a, +I c)      capacity = 3
//!
//! changelog: [+I b] [-D a] [+I c]      (+I a evicted, oldest first)
//! table:     [b] [c]                   (a retracted through the key index)
//! index:     key(b) → handle, key(c) → handle
//! ```
//!
//! The table is the replayed current state: inserts append, every other
//! operation removes the newest live row with the same key in O(1) through the
//! identity index. Retracting a key that is not materialized (never inserted,
//! or already evicted) has no visible effect.
//!
//! ## Concurrency
//!
//! Both sequences, the index and the view mode sit behind one `RwLock`.
//! `append` takes it exclusively, every read shares it. A [`ResultsCursor`]
//! does not hold the lock between calls; it locks per operation, so a user
//! paging through results never stalls ingestion. Positions are generational
//! handles, so a cursor left on an evicted row reads `None` rather than some
//! other row.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};

use crate::arena::{ArenaList, Handle};
use crate::types::{Row, RowKey};

/// Synthetic header shown before the declared headers in changelog mode.
pub const OPERATION_HEADER: &str = "Operation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Table,
    Changelog,
}

#[derive(Debug)]
struct ResultsState {
    table_mode: bool,
    max_capacity: usize,
    headers: Vec<String>,
    changelog: ArenaList<Arc<Row>>,
    table: ArenaList<Arc<Row>>,
    /// Live table handles per key, oldest first.
    index: HashMap<RowKey, VecDeque<Handle>>,
}

impl ResultsState {
    fn view(&self) -> View {
        if self.table_mode {
            View::Table
        } else {
            View::Changelog
        }
    }

    fn list(&self, view: View) -> &ArenaList<Arc<Row>> {
        match view {
            View::Table => &self.table,
            View::Changelog => &self.changelog,
        }
    }

    fn headers(&self) -> Vec<String> {
        match self.view() {
            View::Table => self.headers.clone(),
            View::Changelog => std::iter::once(OPERATION_HEADER.to_string())
                .chain(self.headers.iter().cloned())
                .collect(),
        }
    }

    fn apply(&mut self, row: Row) {
        let row = Arc::new(row);
        self.changelog.push_back(Arc::clone(&row));

        let key = row.row_key();
        if row.operation.is_insert() {
            let handle = self.table.push_back(row);
            self.index.entry(key).or_default().push_back(handle);
        } else if let Some(handles) = self.index.get_mut(&key) {
            if let Some(handle) = handles.pop_back() {
                self.table.remove(handle);
            }
            if handles.is_empty() {
                self.index.remove(&key);
            }
        }

        self.evict();
    }

    fn evict(&mut self) {
        if self.changelog.len() > self.max_capacity {
            self.changelog.pop_front();
            trace!("Evicted oldest changelog entry");
        }

        if self.table.len() > self.max_capacity {
            if let Some((handle, row)) = self.table.pop_front() {
                let key = row.row_key();
                if let Some(handles) = self.index.get_mut(&key) {
                    if handles.front() == Some(&handle) {
                        handles.pop_front();
                    } else {
                        handles.retain(|h| *h != handle);
                    }
                    if handles.is_empty() {
                        self.index.remove(&key);
                    }
                }
                trace!("Evicted oldest table row");
            }
        }
    }
}

fn render(view: View, row: &Row) -> Row {
    match view {
        View::Table => row.clone(),
        View::Changelog => row.with_operation_column(),
    }
}

fn display_width(text: &str) -> usize {
    text.lines()
        .map(|line| line.chars().count())
        .max()
        .unwrap_or(0)
}

/// Changelog and materialized table of one statement's results, bounded to
/// `max_capacity` rows each.
///
/// Cloning is cheap and yields a handle to the same underlying store.
#[derive(Debug, Clone)]
pub struct MaterializedResults {
    state: Arc<RwLock<ResultsState>>,
}

impl MaterializedResults {
    /// Create an empty store in table mode.
    pub fn new(headers: Vec<String>, max_capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(ResultsState {
                table_mode: true,
                max_capacity,
                headers,
                changelog: ArenaList::new(),
                table: ArenaList::new(),
                index: HashMap::new(),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ResultsState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ResultsState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ingest rows in order.
    ///
    /// Rows whose field count differs from the header count are skipped and
    /// make the call return `false`; the remaining rows are still applied.
    pub fn append(&self, rows: impl IntoIterator<Item = Row>) -> bool {
        let mut state = self.write();
        let expected = state.headers.len();

        let mut all_accepted = true;
        for row in rows {
            if row.fields.len() != expected {
                debug!(
                    expected,
                    actual = row.fields.len(),
                    "Skipping result row with mismatched field count"
                );
                all_accepted = false;
                continue;
            }
            state.apply(row);
        }
        all_accepted
    }

    /// Number of rows in the sequence selected by the view mode.
    pub fn size(&self) -> usize {
        let state = self.read();
        state.list(state.view()).len()
    }

    /// Switch between table (`true`) and changelog (`false`) view.
    pub fn set_table_mode(&self, table_mode: bool) {
        self.write().table_mode = table_mode;
    }

    pub fn is_table_mode(&self) -> bool {
        self.read().table_mode
    }

    /// Column headers of the current view.
    pub fn headers(&self) -> Vec<String> {
        self.read().headers()
    }

    /// Cursor over the current view, starting at its front or back.
    pub fn iterator(&self, from_back: bool) -> ResultsCursor {
        let state = self.read();
        let view = state.view();
        let list = state.list(view);
        let position = if from_back { list.back() } else { list.front() };

        ResultsCursor {
            state: Arc::clone(&self.state),
            view,
            position: Mutex::new(position),
        }
    }

    /// Visit every row of the current view front to back.
    pub fn for_each(&self, mut f: impl FnMut(usize, &Row)) {
        let state = self.read();
        let view = state.view();
        for (row_idx, row) in state.list(view).iter().enumerate() {
            f(row_idx, &render(view, row));
        }
    }

    /// Widest rendered value per column, headers included.
    pub fn max_width_per_column(&self) -> Vec<usize> {
        let state = self.read();
        let view = state.view();

        let mut widths: Vec<usize> = state
            .headers()
            .iter()
            .map(|header| display_width(header))
            .collect();

        for row in state.list(view).iter() {
            let row = render(view, row);
            for (col_idx, field) in row.fields.iter().enumerate() {
                if let Some(width) = widths.get_mut(col_idx) {
                    *width = (*width).max(display_width(&field.to_string()));
                }
            }
        }
        widths
    }

    /// Whether a live table row with this key exists.
    pub fn contains_key(&self, key: &RowKey) -> bool {
        self.read().index.contains_key(key)
    }

    pub fn max_results(&self) -> usize {
        self.read().max_capacity
    }

    pub fn table_size(&self) -> usize {
        self.read().table.len()
    }

    pub fn changelog_size(&self) -> usize {
        self.read().changelog.len()
    }
}

/// Bidirectional position in one view of a [`MaterializedResults`].
///
/// The view is fixed when the cursor is created. Each call locks the cursor's
/// position and then the store's shared lock, for that call only.
#[derive(Debug)]
pub struct ResultsCursor {
    state: Arc<RwLock<ResultsState>>,
    view: View,
    position: Mutex<Option<Handle>>,
}

impl ResultsCursor {
    fn lock_position(&self) -> MutexGuard<'_, Option<Handle>> {
        self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ResultsState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn value_at(&self, state: &ResultsState, position: Option<Handle>) -> Option<Row> {
        let row = state.list(self.view).get(position?)?;
        Some(render(self.view, row))
    }

    /// True once the cursor moved past either end.
    pub fn has_reached_end(&self) -> bool {
        self.lock_position().is_none()
    }

    /// Row at the current position, decorated with its operation in
    /// changelog mode. `None` at the end or if the row has been evicted.
    pub fn value(&self) -> Option<Row> {
        let position = self.lock_position();
        let state = self.read_state();
        self.value_at(&state, *position)
    }

    /// Return the current row and step forward.
    pub fn get_next(&self) -> Option<Row> {
        let mut position = self.lock_position();
        let state = self.read_state();
        let row = self.value_at(&state, *position);
        let next = (*position).and_then(|handle| state.list(self.view).next(handle));
        *position = next;
        row
    }

    /// Return the current row and step backward.
    pub fn get_prev(&self) -> Option<Row> {
        let mut position = self.lock_position();
        let state = self.read_state();
        let row = self.value_at(&state, *position);
        let prev = (*position).and_then(|handle| state.list(self.view).prev(handle));
        *position = prev;
        row
    }

    /// Step `steps` positions (negative moves backward), stopping early at the
    /// end, and return the row there.
    pub fn move_by(&self, steps: isize) -> Option<Row> {
        let mut remaining = steps;
        while remaining != 0 && !self.has_reached_end() {
            if remaining < 0 {
                self.get_prev();
                remaining += 1;
            } else {
                self.get_next();
                remaining -= 1;
            }
        }
        self.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, FieldType, Operation};

    fn row(op: Operation, value: &str) -> Row {
        Row::new(op, vec![Field::varchar(value)])
    }

    fn insert(value: &str) -> Row {
        row(Operation::Insert, value)
    }

    fn values(results: &MaterializedResults) -> Vec<String> {
        let mut out = Vec::new();
        results.for_each(|_, row| {
            out.push(
                row.fields
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join("|"),
            )
        });
        out
    }

    fn store() -> MaterializedResults {
        MaterializedResults::new(vec!["value".to_string()], 10)
    }

    #[test]
    fn test_new_store_is_empty_table_mode() {
        let results = store();
        assert!(results.is_table_mode());
        assert_eq!(results.size(), 0);
        assert_eq!(results.max_results(), 10);
        assert!(results.iterator(false).has_reached_end());
        assert!(results.iterator(true).has_reached_end());
    }

    #[test]
    fn test_changelog_grows_with_every_accepted_row() {
        let results = store();
        assert!(results.append(vec![insert("a"), insert("b"), row(Operation::Delete, "a")]));
        assert_eq!(results.changelog_size(), 3);
        assert_eq!(results.table_size(), 1);
        assert_eq!(values(&results), vec!["b"]);
    }

    #[test]
    fn test_insert_then_delete_round_trip() {
        let results = store();
        let k = insert("k");
        let key = k.row_key();

        results.append(vec![k]);
        assert!(results.contains_key(&key));

        results.append(vec![row(Operation::Delete, "k")]);
        assert_eq!(results.table_size(), 0);
        assert_eq!(results.changelog_size(), 2);
        assert!(!results.contains_key(&key));
    }

    #[test]
    fn test_retracting_unknown_key_is_noop() {
        let results = store();
        results.append(vec![insert("a")]);

        assert!(results.append(vec![
            row(Operation::UpdateBefore, "missing"),
            row(Operation::Delete, "missing"),
        ]));
        assert_eq!(results.table_size(), 1);
        assert_eq!(results.changelog_size(), 3);
    }

    #[test]
    fn test_update_after_retracts_not_inserts() {
        let results = store();
        results.append(vec![insert("a"), row(Operation::UpdateAfter, "a")]);
        assert_eq!(results.table_size(), 0);

        results.append(vec![row(Operation::UpdateAfter, "b")]);
        assert_eq!(results.table_size(), 0);
        assert_eq!(results.changelog_size(), 3);
    }

    #[test]
    fn test_capacity_evicts_oldest_table_row() {
        let results = MaterializedResults::new(vec!["value".to_string()], 2);
        results.append(vec![insert("a"), insert("b"), insert("c")]);

        assert_eq!(values(&results), vec!["b", "c"]);
        assert!(!results.contains_key(&insert("a").row_key()));
        assert!(results.contains_key(&insert("b").row_key()));
        assert!(results.contains_key(&insert("c").row_key()));
        assert_eq!(results.changelog_size(), 2);
    }

    #[test]
    fn test_changelog_pinned_at_capacity() {
        let results = MaterializedResults::new(vec!["value".to_string()], 3);
        for i in 0..10 {
            results.append(vec![insert(&i.to_string())]);
            assert_eq!(results.changelog_size(), (i + 1).min(3));
        }
        results.set_table_mode(false);
        assert_eq!(values(&results), vec!["+I|7", "+I|8", "+I|9"]);
    }

    #[test]
    fn test_mismatched_row_is_skipped_but_batch_continues() {
        let results = MaterializedResults::new(vec!["a".to_string(), "b".to_string()], 10);
        let wide = Row::new(
            Operation::Insert,
            vec![Field::varchar("1"), Field::varchar("2"), Field::varchar("3")],
        );
        let good = Row::new(Operation::Insert, vec![Field::varchar("1"), Field::varchar("2")]);

        assert!(!results.append(vec![wide.clone()]));
        assert_eq!(results.table_size(), 0);
        assert_eq!(results.changelog_size(), 0);

        assert!(!results.append(vec![wide, good]));
        assert_eq!(results.table_size(), 1);
        assert_eq!(results.changelog_size(), 1);
    }

    #[test]
    fn test_duplicate_keys_keep_index_consistent() {
        let results = store();
        results.append(vec![insert("a"), insert("a")]);
        assert_eq!(results.table_size(), 2);

        results.append(vec![row(Operation::Delete, "a")]);
        assert_eq!(results.table_size(), 1);
        assert!(results.contains_key(&insert("a").row_key()));

        results.append(vec![row(Operation::Delete, "a")]);
        assert_eq!(results.table_size(), 0);
        assert!(!results.contains_key(&insert("a").row_key()));
    }

    #[test]
    fn test_duplicate_key_survives_eviction_of_older_copy() {
        let results = MaterializedResults::new(vec!["value".to_string()], 2);
        results.append(vec![insert("a"), insert("b"), insert("a")]);

        assert_eq!(values(&results), vec!["b", "a"]);
        assert!(results.contains_key(&insert("a").row_key()));

        results.append(vec![row(Operation::Delete, "a")]);
        assert_eq!(values(&results), vec!["b"]);
        assert!(!results.contains_key(&insert("a").row_key()));
    }

    #[test]
    fn test_mode_toggle_changes_view_not_data() {
        let results = store();
        results.append(vec![insert("a"), insert("b"), row(Operation::Delete, "a")]);

        assert_eq!(results.headers(), vec!["value"]);
        assert_eq!(results.size(), 1);

        results.set_table_mode(false);
        assert!(!results.is_table_mode());
        assert_eq!(results.headers(), vec!["Operation", "value"]);
        assert_eq!(results.size(), 3);
        assert_eq!(values(&results), vec!["+I|a", "+I|b", "-D|a"]);

        results.set_table_mode(true);
        assert_eq!(results.size(), 1);
        assert_eq!(values(&results), vec!["b"]);
        assert_eq!(results.changelog_size(), 3);
    }

    #[test]
    fn test_cursor_forward_traversal_matches_append_order() {
        let results = store();
        results.append(vec![insert("a"), insert("b"), insert("c")]);

        let cursor = results.iterator(false);
        let mut seen = Vec::new();
        while !cursor.has_reached_end() {
            seen.push(cursor.get_next().unwrap().fields[0].to_string());
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(cursor.value(), None);
    }

    #[test]
    fn test_cursor_backward_traversal() {
        let results = store();
        results.append(vec![insert("a"), insert("b"), insert("c")]);

        let cursor = results.iterator(true);
        assert_eq!(cursor.get_prev().unwrap().fields[0].to_string(), "c");
        assert_eq!(cursor.get_prev().unwrap().fields[0].to_string(), "b");
        assert_eq!(cursor.get_prev().unwrap().fields[0].to_string(), "a");
        assert!(cursor.has_reached_end());
    }

    #[test]
    fn test_cursor_move() {
        let results = store();
        results.append(["a", "b", "c", "d"].map(insert));

        let cursor = results.iterator(false);
        assert_eq!(cursor.move_by(0).unwrap().fields[0].to_string(), "a");
        assert_eq!(cursor.move_by(2).unwrap().fields[0].to_string(), "c");
        assert_eq!(cursor.move_by(-1).unwrap().fields[0].to_string(), "b");
        assert_eq!(cursor.move_by(10), None);
        assert!(cursor.has_reached_end());
        assert_eq!(cursor.move_by(-1), None);
    }

    #[test]
    fn test_cursor_changelog_decoration_is_idempotent() {
        let results = store();
        results.append(vec![insert("a")]);
        results.set_table_mode(false);

        let cursor = results.iterator(false);
        let first = cursor.value().unwrap();
        let second = cursor.value().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fields.len(), 2);
        assert_eq!(first.fields[0], Field::atomic(FieldType::Varchar, "+I"));

        results.set_table_mode(true);
        assert_eq!(results.iterator(false).value().unwrap().fields.len(), 1);
    }

    #[test]
    fn test_cursor_keeps_view_chosen_at_creation() {
        let results = store();
        results.append(vec![insert("a"), row(Operation::Delete, "a")]);

        results.set_table_mode(false);
        let cursor = results.iterator(false);
        results.set_table_mode(true);

        assert_eq!(cursor.get_next().unwrap().fields[0].to_string(), "+I");
        assert_eq!(cursor.get_next().unwrap().fields[0].to_string(), "-D");
        assert!(cursor.has_reached_end());
    }

    #[test]
    fn test_cursor_on_evicted_row_fails_soft() {
        let results = MaterializedResults::new(vec!["value".to_string()], 1);
        results.append(vec![insert("a")]);

        let cursor = results.iterator(false);
        results.append(vec![insert("b")]);

        assert!(!cursor.has_reached_end());
        assert_eq!(cursor.value(), None);
        assert_eq!(cursor.get_next(), None);
        assert!(cursor.has_reached_end());
    }

    #[test]
    fn test_max_width_per_column() {
        let results = MaterializedResults::new(vec!["id".to_string(), "name".to_string()], 10);
        results.append(vec![
            Row::new(
                Operation::Insert,
                vec![Field::varchar("12345"), Field::varchar("ab")],
            ),
            Row::new(
                Operation::Insert,
                vec![Field::varchar("1"), Field::varchar("line\nlonger line")],
            ),
        ]);

        assert_eq!(results.max_width_per_column(), vec![5, 11]);

        results.set_table_mode(false);
        assert_eq!(results.max_width_per_column(), vec![9, 5, 11]);
    }
}
