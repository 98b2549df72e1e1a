//! Lock-free cyclic iterator over a fixed set of items: a monotonically
//! advancing atomic counter indexes into a fixed `Vec`, so `next()` is
//! safe to call from any number of concurrent callers without locking.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug)]
pub struct RoundRobin<T> {
    items: Vec<T>,
    next: AtomicUsize,
}

impl<T> RoundRobin<T> {
    /// Builds a selector over `items`. Errors if `items` is empty.
    pub fn new(items: Vec<T>) -> Result<Self> {
        if items.is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigValidation,
                "round-robin selector requires at least one item",
            ));
        }

        Ok(Self {
            items,
            next: AtomicUsize::new(0),
        })
    }

    /// Returns the next item in insertion order, cyclically. The internal
    /// counter wraps on overflow without losing uniformity, since only the
    /// value modulo `count()` is ever observed.
    pub fn next(&self) -> &T {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        &self.items[n % self.items.len()]
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn empty_input_is_rejected() {
        let err = RoundRobin::<u32>::new(vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigValidation);
    }

    #[test]
    fn cycles_in_insertion_order() {
        let rr = RoundRobin::new(vec!["a", "b", "c"]).unwrap();
        let seen: Vec<_> = (0..7).map(|_| *rr.next()).collect();
        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn count_matches_input_len() {
        let rr = RoundRobin::new(vec![1, 2, 3, 4]).unwrap();
        assert_eq!(rr.count(), 4);
    }

    /// For N concurrent `next()` calls on a selector of size k, each
    /// item is returned floor(N/k) or ceil(N/k) times.
    #[test]
    fn fair_under_concurrency() {
        let rr = Arc::new(RoundRobin::new(vec![0, 1, 2, 3, 4]).unwrap());
        let k = rr.count();
        let n_per_thread = 2000;
        let threads = 8;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let rr = rr.clone();
                thread::spawn(move || {
                    let mut local = Vec::with_capacity(n_per_thread);
                    for _ in 0..n_per_thread {
                        local.push(*rr.next());
                    }
                    local
                })
            })
            .collect();

        let mut counts: HashMap<i32, usize> = HashMap::new();
        for h in handles {
            for item in h.join().unwrap() {
                *counts.entry(item).or_default() += 1;
            }
        }

        let total = threads * n_per_thread;
        let floor = total / k;
        let ceil = floor + if total % k == 0 { 0 } else { 1 };
        for count in counts.values() {
            assert!(*count == floor || *count == ceil, "count {} out of range", count);
        }
    }
}
