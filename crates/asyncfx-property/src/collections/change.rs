#![forbid(unsafe_code)]

//! Change records delivered to collection listeners.
//!
//! A lock scope records every edit in order. On release the edits are split
//! into batches of the same kind (adds, removes, replacements) and one change
//! is delivered per batch.

/// The kind of an edit; consecutive edits of one kind share a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditKind {
    Add,
    Remove,
    Replace,
}

pub(crate) trait Edit {
    fn kind(&self) -> EditKind;
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

/// A single positional list edit.
///
/// Indices refer to the list as it was when the edit was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEdit<T> {
    Added { index: usize, item: T },
    Removed { index: usize, item: T },
    Replaced { index: usize, old: T, new: T },
}

impl<T> Edit for ListEdit<T> {
    fn kind(&self) -> EditKind {
        match self {
            Self::Added { .. } => EditKind::Add,
            Self::Removed { .. } => EditKind::Remove,
            Self::Replaced { .. } => EditKind::Replace,
        }
    }
}

impl<T> ListEdit<T> {
    #[must_use]
    pub fn kind(&self) -> EditKind {
        Edit::kind(self)
    }

    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Added { index, .. } | Self::Removed { index, .. } | Self::Replaced { index, .. } => *index,
        }
    }
}

/// One batch of list edits, all of the same kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListChange<T> {
    edits: Vec<ListEdit<T>>,
}

impl<T> ListChange<T> {
    pub(crate) fn new(edits: Vec<ListEdit<T>>) -> Self {
        Self { edits }
    }

    #[must_use]
    pub fn edits(&self) -> &[ListEdit<T>] {
        &self.edits
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Kind shared by every edit in the batch.
    #[must_use]
    pub fn kind(&self) -> Option<EditKind> {
        self.edits.first().map(ListEdit::kind)
    }

    /// Items added by this batch, including the new side of replacements.
    pub fn added(&self) -> impl Iterator<Item = &T> {
        self.edits.iter().filter_map(|e| match e {
            ListEdit::Added { item, .. } => Some(item),
            ListEdit::Replaced { new, .. } => Some(new),
            ListEdit::Removed { .. } => None,
        })
    }

    /// Items removed by this batch, including the old side of replacements.
    pub fn removed(&self) -> impl Iterator<Item = &T> {
        self.edits.iter().filter_map(|e| match e {
            ListEdit::Removed { item, .. } => Some(item),
            ListEdit::Replaced { old, .. } => Some(old),
            ListEdit::Added { .. } => None,
        })
    }
}

impl<T: Clone> ListChange<T> {
    /// Replay the batch onto `items`, clamping indices that no longer fit.
    pub fn apply_to(&self, items: &mut Vec<T>) {
        for edit in &self.edits {
            match edit {
                ListEdit::Added { index, item } => {
                    let at = (*index).min(items.len());
                    items.insert(at, item.clone());
                }
                ListEdit::Removed { index, .. } => {
                    if *index < items.len() {
                        items.remove(*index);
                    }
                }
                ListEdit::Replaced { index, new, .. } => {
                    if let Some(slot) = items.get_mut(*index) {
                        *slot = new.clone();
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetEdit<T> {
    Added(T),
    Removed(T),
}

impl<T> Edit for SetEdit<T> {
    fn kind(&self) -> EditKind {
        match self {
            Self::Added(_) => EditKind::Add,
            Self::Removed(_) => EditKind::Remove,
        }
    }
}

/// One batch of set edits, all of the same kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetChange<T> {
    edits: Vec<SetEdit<T>>,
}

impl<T> SetChange<T> {
    pub(crate) fn new(edits: Vec<SetEdit<T>>) -> Self {
        Self { edits }
    }

    #[must_use]
    pub fn edits(&self) -> &[SetEdit<T>] {
        &self.edits
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn added(&self) -> impl Iterator<Item = &T> {
        self.edits.iter().filter_map(|e| match e {
            SetEdit::Added(item) => Some(item),
            SetEdit::Removed(_) => None,
        })
    }

    pub fn removed(&self) -> impl Iterator<Item = &T> {
        self.edits.iter().filter_map(|e| match e {
            SetEdit::Removed(item) => Some(item),
            SetEdit::Added(_) => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Batcher
// ---------------------------------------------------------------------------

/// Groups a stream of edits into same-kind runs.
pub(crate) struct Batcher<E> {
    batches: Vec<Vec<E>>,
    last: Option<EditKind>,
}

impl<E: Edit> Batcher<E> {
    pub(crate) fn new() -> Self {
        Self {
            batches: Vec::new(),
            last: None,
        }
    }

    pub(crate) fn push(&mut self, edit: E) {
        let kind = edit.kind();
        if self.last == Some(kind)
            && let Some(batch) = self.batches.last_mut()
        {
            batch.push(edit);
        } else {
            self.batches.push(vec![edit]);
        }
        self.last = Some(kind);
    }

    pub(crate) fn take(&mut self) -> Vec<Vec<E>> {
        self.last = None;
        std::mem::take(&mut self.batches)
    }
}
