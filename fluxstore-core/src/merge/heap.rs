//! Binary min-heap over an ordering function
//!
//! `std::collections::BinaryHeap` has no way to re-sift the root after it is
//! advanced in place, which is the common operation of a k-way merge.

/// Array-backed binary min-heap ordered by `less`
pub struct BlockHeap<T> {
    items: Vec<T>,
    less: fn(&T, &T) -> bool,
}

impl<T> BlockHeap<T> {
    /// Build a heap from `items`
    pub fn new(items: Vec<T>, less: fn(&T, &T) -> bool) -> Self {
        let mut heap = Self { items, less };
        heap.heapify();
        heap
    }

    /// Number of items in the heap
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the heap is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Smallest item
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Mutable access to the smallest item. Call [`Self::fix_root`] after
    /// changing its ordering key.
    pub fn peek_mut(&mut self) -> Option<&mut T> {
        self.items.first_mut()
    }

    /// Restore the heap after the root key changed
    pub fn fix_root(&mut self) {
        self.sift_down(0);
    }

    /// Remove and return the smallest item
    pub fn pop_root(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let root = self.items.pop();
        self.sift_down(0);
        root
    }

    /// Add an item
    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    fn heapify(&mut self) {
        let n = self.items.len();
        for i in (0..n / 2).rev() {
            self.sift_down(i);
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.items.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                return;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < n && (self.less)(&self.items[right], &self.items[left]) {
                smallest = right;
            }
            if !(self.less)(&self.items[smallest], &self.items[i]) {
                return;
            }
            self.items.swap(i, smallest);
            i = smallest;
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !(self.less)(&self.items[i], &self.items[parent]) {
                return;
            }
            self.items.swap(i, parent);
            i = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn less(a: &i64, b: &i64) -> bool {
        a < b
    }

    #[test]
    fn test_pop_order() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let items: Vec<i64> = (0..500).map(|_| rng.gen_range(-100..100)).collect();
        let mut heap = BlockHeap::new(items.clone(), less);
        heap.push(-1000);

        let mut popped = Vec::new();
        while let Some(v) = heap.pop_root() {
            popped.push(v);
        }
        let mut want = items;
        want.push(-1000);
        want.sort();
        assert_eq!(popped, want);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_fix_root() {
        let mut heap = BlockHeap::new(vec![1, 5, 3, 7], less);
        *heap.peek_mut().unwrap() = 6;
        heap.fix_root();
        assert_eq!(heap.peek(), Some(&3));
        assert_eq!(heap.len(), 4);
    }
}
