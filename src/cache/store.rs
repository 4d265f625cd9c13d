//! Page store: page index to compressed bitmap, with a running byte total

use std::collections::BTreeMap;
use std::sync::Arc;

use super::types::CompressedPage;

/// Entry map of one cache instance.
///
/// Only the interaction thread mutates it; workers hand their bytes back
/// over a channel instead.
#[derive(Default)]
pub struct PageStore {
    entries: BTreeMap<usize, Arc<CompressedPage>>,
    size_bytes: usize,
}

impl PageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, page: usize) -> Option<Arc<CompressedPage>> {
        self.entries.get(&page).cloned()
    }

    #[must_use]
    pub fn contains(&self, page: usize) -> bool {
        self.entries.contains_key(&page)
    }

    /// Store a page, replacing any previous entry. Returns the stored handle.
    pub fn insert(&mut self, page: CompressedPage) -> Arc<CompressedPage> {
        let entry = Arc::new(page);
        self.size_bytes += entry.size_bytes();
        if let Some(old) = self.entries.insert(entry.page, Arc::clone(&entry)) {
            self.size_bytes -= old.size_bytes();
        }
        entry
    }

    /// Remove a page, returning the number of bytes freed (0 if absent).
    pub fn remove(&mut self, page: usize) -> usize {
        match self.entries.remove(&page) {
            Some(entry) => {
                self.size_bytes -= entry.size_bytes();
                entry.size_bytes()
            }
            None => 0,
        }
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.size_bytes = 0;
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total compressed bytes held
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Cached page indices in ascending order
    pub fn pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: usize, size: usize) -> CompressedPage {
        CompressedPage::new(index, 10, 10, vec![0; size])
    }

    #[test]
    fn insert_tracks_size() {
        let mut store = PageStore::new();
        store.insert(page(0, 100));
        store.insert(page(3, 50));

        assert_eq!(store.len(), 2);
        assert_eq!(store.size_bytes(), 150);
        assert!(store.contains(3));
        assert_eq!(store.pages().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn replacing_an_entry_does_not_double_count() {
        let mut store = PageStore::new();
        store.insert(page(1, 100));
        store.insert(page(1, 40));

        assert_eq!(store.len(), 1);
        assert_eq!(store.size_bytes(), 40);
    }

    #[test]
    fn removing_absent_page_frees_nothing() {
        let mut store = PageStore::new();
        store.insert(page(2, 70));

        assert_eq!(store.remove(5), 0);
        assert_eq!(store.size_bytes(), 70);
        assert_eq!(store.remove(2), 70);
        assert_eq!(store.size_bytes(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn clear_resets_totals() {
        let mut store = PageStore::new();
        for i in 0..4 {
            store.insert(page(i, 10));
        }

        assert_eq!(store.clear(), 4);
        assert_eq!(store.size_bytes(), 0);
        assert!((0..4).all(|i| store.get(i).is_none()));
    }

    #[test]
    fn readers_keep_entries_alive_after_removal() {
        let mut store = PageStore::new();
        let handle = store.insert(page(0, 8));
        store.remove(0);
        assert_eq!(handle.size_bytes(), 8);
    }
}
