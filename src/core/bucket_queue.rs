/// Priority queue over a small range of integer priorities
///
/// Items are popped highest priority first; within a bin the most recently
/// pushed item comes out first. Push and pop are O(1) amortised.
#[derive(Debug)]
pub struct BucketQueue<T> {
    bins: Vec<Vec<T>>,
    /// Highest bin that may be non-empty; -1 once exhausted
    top: isize,
    len: usize,
}

impl<T> BucketQueue<T> {
    pub fn new(bin_count: usize) -> Self {
        let bin_count = bin_count.max(1);
        Self {
            bins: (0..bin_count).map(|_| Vec::new()).collect(),
            top: -1,
            len: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Priorities above the last bin are clamped into it
    #[inline]
    pub fn push(&mut self, priority: usize, item: T) {
        let priority = priority.min(self.bins.len() - 1);
        self.bins[priority].push(item);
        self.len += 1;
        if priority as isize > self.top {
            self.top = priority as isize;
        }
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        while self.top >= 0 && self.bins[self.top as usize].is_empty() {
            self.top -= 1;
        }
        if self.top < 0 {
            return None;
        }
        self.len -= 1;
        self.bins[self.top as usize].pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_highest_priority_first() {
        let mut queue: BucketQueue<&str> = BucketQueue::new(256);
        assert!(queue.is_empty());

        queue.push(100, "mid");
        queue.push(5, "low");
        queue.push(200, "high");
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop(), Some("high"));
        assert_eq!(queue.pop(), Some("mid"));

        // a late push above the cursor must still come out next
        queue.push(250, "late");
        assert_eq!(queue.pop(), Some("late"));
        assert_eq!(queue.pop(), Some("low"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_priority_clamped_to_last_bin() {
        let mut queue = BucketQueue::new(4);
        queue.push(1, 1u32);
        queue.push(1000, 2u32);
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.is_empty());
    }
}
