//! Named position markers kept sorted by sample position.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub position: usize,
    pub name: String,
}

impl Label {
    pub fn new(position: usize, name: impl Into<String>) -> Self {
        Self {
            position,
            name: name.into(),
        }
    }

    pub(crate) fn byte_cost(&self) -> usize {
        std::mem::size_of::<Label>() + self.name.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelList {
    items: Vec<Label>,
}

impl LabelList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary order; positions are sorted, equal positions keep
    /// their relative order.
    pub fn from_unsorted(mut items: Vec<Label>) -> Self {
        items.sort_by_key(|l| l.position);
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Label] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Label> {
        self.items.get(index)
    }

    /// Insert after any label at the same position; returns the new index.
    pub fn insert(&mut self, label: Label) -> usize {
        let idx = self.items.partition_point(|l| l.position <= label.position);
        self.items.insert(idx, label);
        idx
    }

    /// Put a label back at an exact index (undo of a removal).
    pub(crate) fn insert_at(&mut self, index: usize, label: Label) -> bool {
        if index > self.items.len() {
            return false;
        }
        self.items.insert(index, label);
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<Label> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    /// Swap in a replacement label, returning the old one. Keeps the list sorted
    /// by moving the entry when its position changed; returns the new index.
    pub(crate) fn replace(&mut self, index: usize, label: Label) -> Option<(usize, Label)> {
        let old = self.remove(index)?;
        let idx = self.insert(label);
        Some((idx, old))
    }

    /// Index of the first label whose name matches exactly.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|l| l.name == name)
    }

    /// Index of the first label at or after `position` (== len when none).
    pub fn index_at_or_after(&self, position: usize) -> usize {
        self.items.partition_point(|l| l.position < position)
    }

    pub fn nearest(&self, position: usize) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        let after = self.index_at_or_after(position);
        if after == 0 {
            return Some(0);
        }
        if after >= self.items.len() {
            return Some(self.items.len() - 1);
        }
        let before_dist = position - self.items[after - 1].position;
        let after_dist = self.items[after].position - position;
        Some(if before_dist <= after_dist { after - 1 } else { after })
    }

    /// Follow a splice that replaced `old_len` samples at `start` with `new_len`.
    /// Labels past the edit move with the tail; labels inside are clamped to the
    /// end of the new content. Returns whether anything moved.
    pub fn adjust_for_splice(&mut self, start: usize, old_len: usize, new_len: usize) -> bool {
        if old_len == new_len {
            return false;
        }
        let old_end = start + old_len;
        let new_end = start + new_len;
        let mut changed = false;
        for label in &mut self.items {
            let moved = if (label.position >= old_end && old_len > 0) || label.position > old_end {
                label.position - old_end + new_end
            } else if label.position > new_end {
                new_end
            } else {
                label.position
            };
            if moved != label.position {
                label.position = moved;
                changed = true;
            }
        }
        changed
    }

    /// Keep only labels inside `[start, end]`, rebased to `start`.
    pub fn crop(&mut self, start: usize, end: usize) -> bool {
        let before = self.items.clone();
        self.items.retain(|l| l.position >= start && l.position <= end);
        for label in &mut self.items {
            label.position -= start;
        }
        before != self.items
    }

    /// Rescale positions after a sample-rate change.
    pub fn scale(&mut self, ratio: f64) {
        for label in &mut self.items {
            label.position = ((label.position as f64) * ratio).round().max(0.0) as usize;
        }
    }

    pub(crate) fn byte_cost(&self) -> usize {
        self.items.iter().map(Label::byte_cost).sum()
    }

    pub(crate) fn into_vec(self) -> Vec<Label> {
        self.items
    }
}
