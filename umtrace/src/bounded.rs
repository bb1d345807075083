//! Fixed-capacity containers with an explicit overflow policy.
//!
//! [`BoundedStack`] refuses pushes once full, [`Ring`] evicts its oldest entry.
//! Neither ever allocates or writes out of bounds.

/// LIFO stack that refuses new items once `N` are stored.
#[derive(Clone, Copy)]
pub struct BoundedStack<T, const N: usize> {
    items: [T; N],
    len: usize,
}

impl<T: Copy + Default, const N: usize> BoundedStack<T, N> {
    pub fn new() -> Self {
        Self {
            items: [T::default(); N],
            len: 0,
        }
    }
}

impl<T: Copy + Default, const N: usize> Default for BoundedStack<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const N: usize> BoundedStack<T, N> {
    /// Pushes `item`, handing it back if the stack is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.len >= N {
            // Stack full!
            return Err(item);
        }

        self.items[self.len] = item;
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.items[self.len])
    }

    pub fn top(&self) -> Option<&T> {
        self.as_slice().last()
    }

    /// Drops everything above `len` in one step.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Stored items, oldest first.
    pub fn as_slice(&self) -> &[T] {
        &self.items[..self.len]
    }
}

/// Ring buffer keeping the `N` most recent items.
#[derive(Clone, Copy)]
pub struct Ring<T, const N: usize> {
    items: [T; N],
    // index of the next write
    head: usize,
    len: usize,
}

impl<T: Copy + Default, const N: usize> Ring<T, N> {
    pub fn new() -> Self {
        Self {
            items: [T::default(); N],
            head: 0,
            len: 0,
        }
    }
}

impl<T: Copy + Default, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const N: usize> Ring<T, N> {
    /// Stores `item`, returning the oldest entry if it had to be evicted.
    pub fn push(&mut self, item: T) -> Option<T> {
        if N == 0 {
            return Some(item);
        }
        let evicted = if self.len == N {
            Some(self.items[self.head])
        } else {
            self.len += 1;
            None
        };
        self.items[self.head] = item;
        self.head = (self.head + 1) % N;
        evicted
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Slot index of the `n`-th most recent item.
    fn slot(&self, n: usize) -> usize {
        (self.head + N - 1 - n) % N
    }

    /// Items from most recent to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).map(move |n| &self.items[self.slot(n)])
    }

    /// Most recent item matching `pred`.
    pub fn find_mut(&mut self, mut pred: impl FnMut(&T) -> bool) -> Option<&mut T> {
        let n = (0..self.len).find(|&n| pred(&self.items[self.slot(n)]))?;
        let slot = self.slot(n);
        Some(&mut self.items[slot])
    }
}
