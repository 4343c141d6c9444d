use std::collections::HashSet;

use crate::model::StudentId;

/// Checked rows, keyed by student id rather than row position so a changed
/// page or re-sorted view can never retarget a selection.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    ids: HashSet<StudentId>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &StudentId) -> bool {
        self.ids.contains(id)
    }

    pub fn toggle(&mut self, id: &StudentId) {
        if !self.ids.remove(id) {
            self.ids.insert(id.clone());
        }
    }

    pub fn set(&mut self, id: &StudentId, checked: bool) {
        if checked {
            self.ids.insert(id.clone());
        } else {
            self.ids.remove(id);
        }
    }

    /// Header checkbox. Acts on the rows of the current page only: selects
    /// them all, or clears them if they were all selected already.
    pub fn toggle_page<'a, I>(&mut self, page_ids: I)
    where
        I: IntoIterator<Item = &'a StudentId>,
    {
        let page: Vec<&StudentId> = page_ids.into_iter().collect();
        let all_checked = !page.is_empty() && page.iter().all(|id| self.ids.contains(*id));
        for id in page {
            self.set(id, !all_checked);
        }
    }

    /// Whether every row of the page is checked (header checkbox state).
    pub fn page_fully_selected<'a, I>(&self, page_ids: I) -> bool
    where
        I: IntoIterator<Item = &'a StudentId>,
    {
        let mut any = false;
        for id in page_ids {
            if !self.ids.contains(id) {
                return false;
            }
            any = true;
        }
        any
    }

    /// The selected ids that are visible on the current page, in page order.
    /// Bulk actions use this at confirmation time.
    pub fn resolve<'a, I>(&self, page_ids: I) -> Vec<StudentId>
    where
        I: IntoIterator<Item = &'a StudentId>,
    {
        page_ids
            .into_iter()
            .filter(|id| self.ids.contains(*id))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
