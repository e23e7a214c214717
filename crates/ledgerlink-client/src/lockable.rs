//! Lockable list -- append phase, then locked round-robin reads.
//!
//! Holds the pinned node list of a request and the per-chunk transaction ids.
//! Not synchronized: a list belongs to one in-flight request.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockableError {
    #[error("list is locked")]
    Locked,
    #[error("index {index} out of range for list of length {len}")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockableList<T> {
    items: Vec<T>,
    index: usize,
    locked: bool,
}

impl<T> Default for LockableList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: 0,
            locked: false,
        }
    }
}

impl<T> LockableList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_unlocked(&self) -> Result<(), LockableError> {
        if self.locked {
            return Err(LockableError::Locked);
        }
        Ok(())
    }

    pub fn push(&mut self, item: T) -> Result<(), LockableError> {
        self.require_unlocked()?;
        self.items.push(item);
        Ok(())
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) -> Result<(), LockableError> {
        self.require_unlocked()?;
        self.items.extend(items);
        Ok(())
    }

    /// Replace the whole sequence and rewind the cursor.
    pub fn set_list(&mut self, items: Vec<T>) -> Result<(), LockableError> {
        self.require_unlocked()?;
        self.items = items;
        self.index = 0;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), LockableError> {
        self.set_list(Vec::new())
    }

    /// Overwrite slot `index`, or append when `index == len`.
    pub fn set(&mut self, index: usize, item: T) -> Result<(), LockableError> {
        self.require_unlocked()?;
        let len = self.items.len();
        match index.cmp(&len) {
            std::cmp::Ordering::Less => self.items[index] = item,
            std::cmp::Ordering::Equal => self.items.push(item),
            std::cmp::Ordering::Greater => return Err(LockableError::OutOfRange { index, len }),
        }
        Ok(())
    }

    /// Fill slot `index` only when it does not exist yet (`index == len`).
    /// An occupied slot is left alone.
    pub fn set_if_absent(&mut self, index: usize, item: T) -> Result<(), LockableError> {
        self.require_unlocked()?;
        if index == self.items.len() {
            self.items.push(item);
        } else if index > self.items.len() {
            return Err(LockableError::OutOfRange {
                index,
                len: self.items.len(),
            });
        }
        Ok(())
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Value under the cursor, without advancing.
    pub fn current(&self) -> Option<&T> {
        self.items.get(self.index)
    }

    /// Value under the cursor, then advance. `None` on an empty list.
    pub fn get_next(&mut self) -> Option<&T> {
        let index = self.advance();
        self.items.get(index)
    }

    /// Move the cursor one step, wrapping at the end. Returns the index it
    /// moved from. An empty list keeps the cursor at zero.
    pub fn advance(&mut self) -> usize {
        let index = self.index;
        if !self.items.is_empty() {
            self.index = (self.index + 1) % self.items.len();
        }
        index
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T> From<Vec<T>> for LockableList<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items,
            index: 0,
            locked: false,
        }
    }
}
