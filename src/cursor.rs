//! Sized, lazily iterated query results.

/// Result set returned by every query operation.
///
/// `count()` reports how many candidates the query considered. Items that
/// fail to materialize during iteration may make the produced sequence
/// shorter than that. Each call to `iter()` starts a fresh pass.
pub trait Cursor {
    type Item;

    fn count(&self) -> usize;

    fn iter(&self) -> Box<dyn Iterator<Item = Self::Item> + '_>;
}

/// Cursor over already materialized results.
#[derive(Debug, Clone)]
pub struct VecCursor<T> {
    items: Vec<T>,
    count: usize,
}

impl<T> VecCursor<T> {
    pub fn new(items: Vec<T>) -> Self {
        let count = items.len();
        Self { items, count }
    }

    /// Build a cursor whose reported count differs from the number of
    /// held items, e.g. a page of a larger match set.
    pub fn with_count(items: Vec<T>, count: usize) -> Self {
        Self { items, count }
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }
}

impl<T: Clone> Cursor for VecCursor<T> {
    type Item = T;

    fn count(&self) -> usize {
        self.count
    }

    fn iter(&self) -> Box<dyn Iterator<Item = T> + '_> {
        Box::new(self.items.iter().cloned())
    }
}
