use crate::models::EntryId;
use std::collections::HashSet;

/// Batch selection over the visible entry list.
#[derive(Debug, Clone, Default)]
pub struct SelectionTracker {
    selected: HashSet<EntryId>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips one entry; returns whether it is now selected.
    pub fn toggle(&mut self, entry_id: EntryId) -> bool {
        if self.selected.remove(&entry_id) {
            false
        } else {
            self.selected.insert(entry_id);
            true
        }
    }

    /// Clears when every visible entry is already selected, otherwise selects them all.
    pub fn select_all(&mut self, visible: &[EntryId]) {
        let all_selected = !visible.is_empty() && visible.iter().all(|id| self.selected.contains(id));
        if all_selected {
            self.selected.clear();
        } else {
            self.selected.extend(visible.iter().copied());
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Drops ids that were accepted, rejected, deleted or moved out of view.
    pub fn invalidate(&mut self, entry_ids: impl IntoIterator<Item = EntryId>) {
        for entry_id in entry_ids {
            self.selected.remove(&entry_id);
        }
    }

    /// Keeps only ids still present in the visible list.
    pub fn retain_visible(&mut self, visible: &[EntryId]) {
        let visible = visible.iter().copied().collect::<HashSet<_>>();
        self.selected.retain(|id| visible.contains(id));
    }

    pub fn is_selected(&self, entry_id: EntryId) -> bool {
        self.selected.contains(&entry_id)
    }

    pub fn ids(&self) -> &HashSet<EntryId> {
        &self.selected
    }

    /// Selected ids in ascending order.
    pub fn sorted_ids(&self) -> Vec<EntryId> {
        let mut ids = self.selected.iter().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::SelectionTracker;

    #[test]
    fn toggle_flips_membership() {
        let mut selection = SelectionTracker::new();
        assert!(selection.toggle(7));
        assert!(selection.is_selected(7));
        assert!(!selection.toggle(7));
        assert!(selection.is_empty());
    }

    #[test]
    fn select_all_is_a_full_toggle() {
        let mut selection = SelectionTracker::new();
        selection.toggle(2);
        selection.select_all(&[1, 2, 3]);
        assert_eq!(selection.sorted_ids(), vec![1, 2, 3]);
        selection.select_all(&[1, 2, 3]);
        assert!(selection.is_empty());
    }

    #[test]
    fn invalidation_removes_stale_ids() {
        let mut selection = SelectionTracker::new();
        selection.select_all(&[1, 2, 3, 4]);
        selection.invalidate([2, 9]);
        selection.retain_visible(&[1, 2, 3]);
        assert_eq!(selection.sorted_ids(), vec![1, 3]);
        assert_eq!(selection.len(), 2);
    }
}
