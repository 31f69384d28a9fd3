//! Lock-free multi-producer/single-consumer queue (component C3).
//!
//! A Michael/Scott-style intrusive list tuned for many producers and
//! exactly one consumer: `enqueue` is a single atomic exchange plus one
//! release store, `dequeue` never blocks, and there is no ABA hazard
//! because the single consumer never hands freed nodes back into the
//! structure.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    value: AtomicPtr<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn sentinel() -> *mut Self {
        Box::into_raw(Box::new(Node {
            value: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    fn holding(value: T) -> *mut Self {
        Box::into_raw(Box::new(Node {
            value: AtomicPtr::new(Box::into_raw(Box::new(value))),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// A wait-free-to-enqueue, lock-free-to-dequeue FIFO queue of `T` values.
pub(crate) struct LockFreeQueue<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
}

// SAFETY: ownership of every enqueued `T` moves through `AtomicPtr`
// exchanges; the consumer is the only thread that ever frees a node, and
// producers only ever touch `head`.
unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> LockFreeQueue<T> {
    pub(crate) fn new() -> Self {
        let sentinel = Node::sentinel();
        Self {
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
        }
    }

    /// Adds `value` to the head of the queue. Never blocks.
    pub(crate) fn enqueue(&self, value: T) {
        let new_node = Node::holding(value);
        let head_before = self.head.swap(new_node, Ordering::AcqRel);
        // SAFETY: `head_before` was produced by a prior `swap` (or is the
        // initial sentinel) and is never freed while reachable from `head`.
        unsafe {
            (*head_before).next.store(new_node, Ordering::Release);
        }
    }

    /// Removes and returns the value at the tail, or `None` if the queue
    /// is empty.
    pub(crate) fn dequeue(&self) -> Option<T> {
        loop {
            let tail = self.tail.load(Ordering::Relaxed);
            // SAFETY: `tail` is always a live node owned by this queue.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };

            if next.is_null() {
                // SAFETY: see above.
                let value_ptr = unsafe { (*tail).value.swap(ptr::null_mut(), Ordering::Relaxed) };
                if value_ptr.is_null() {
                    return None;
                }
                // SAFETY: `value_ptr` was produced by `Node::holding` and
                // swapped out exactly once here.
                return Some(unsafe { *Box::from_raw(value_ptr) });
            }

            // SAFETY: see above; `tail` has a successor so it is safe to
            // retire once the tail pointer has moved past it.
            let value_ptr = unsafe { (*tail).value.load(Ordering::Relaxed) };
            self.tail.store(next, Ordering::Relaxed);
            // SAFETY: `tail` is no longer reachable from `self.tail` and no
            // other thread retains a reference to it.
            unsafe {
                drop(Box::from_raw(tail));
            }

            if !value_ptr.is_null() {
                // SAFETY: `value_ptr` has not been consumed before: only
                // the branch above (taken for the sentinel/head node) or
                // this one can observe and null it out, and a node is
                // visited at most once here.
                return Some(unsafe { *Box::from_raw(value_ptr) });
            }
            // Value already consumed by a racing call that saw this node
            // as the head; loop and try the new tail.
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        // SAFETY: `tail` is always live.
        let value = unsafe { (*tail).value.load(Ordering::Relaxed) };
        let head = self.head.load(Ordering::Acquire);
        ptr::eq(tail, head) && value.is_null()
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            // SAFETY: walking the chain from `tail`; nothing else touches
            // the queue once it is being dropped.
            unsafe {
                let value = (*tail).value.load(Ordering::Relaxed);
                if !value.is_null() {
                    drop(Box::from_raw(value));
                }
                let next = (*tail).next.load(Ordering::Relaxed);
                drop(Box::from_raw(tail));
                if next.is_null() {
                    break;
                }
                tail = next;
            }
        }
    }
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_producer_fifo_order() {
        let queue = LockFreeQueue::new();
        for i in 0..10 {
            queue.enqueue(i);
        }
        let drained: Vec<_> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn empty_queue_reports_empty() {
        let queue: LockFreeQueue<i32> = LockFreeQueue::new();
        assert!(queue.is_empty());
        queue.enqueue(1);
        assert!(!queue.is_empty());
        assert_eq!(queue.dequeue(), Some(1));
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn multi_producer_preserves_per_producer_order() {
        let queue = Arc::new(LockFreeQueue::new());
        let producers = 8;
        let per_producer = 1000;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        queue.enqueue((p, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut last_seen: HashMap<usize, i32> = HashMap::new();
        let mut total = 0;
        while let Some((producer, sequence)) = queue.dequeue() {
            total += 1;
            let last = last_seen.entry(producer).or_insert(-1);
            assert!(sequence > *last, "producer {producer} delivered out of order");
            *last = sequence;
        }
        assert_eq!(total, producers * per_producer);
    }
}
