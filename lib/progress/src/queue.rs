// SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-stream input queue: multi-producer push, single-consumer pop.
//!
//! Built on a lock-free [`SegQueue`] plus a consumer-side staging slot.
//! The staging slot lets the single consumer examine the head without
//! committing to dequeue it (the admission policy may reject a bounded
//! head and retry on a later pass); a rejected head stays the head, so
//! FIFO order is preserved. Only the worker thread touches the slot, so
//! its mutex is never contended.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::state::{ComputeStream, OpState};

pub(crate) struct InputQueue {
    /// Raw bits of the owning compute stream. Written once on the slot
    /// growth path before the registry publishes the slot; immutable
    /// afterwards.
    stream: AtomicUsize,
    inner: SegQueue<Box<dyn OpState>>,
    staged: Mutex<Option<Box<dyn OpState>>>,
}

impl fmt::Debug for InputQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputQueue")
            .field("stream", &self.stream.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl InputQueue {
    /// An unpublished queue slot. The stream identity is assigned by the
    /// registry when the slot is claimed.
    pub(crate) fn unpublished() -> Self {
        Self {
            stream: AtomicUsize::new(0),
            inner: SegQueue::new(),
            staged: Mutex::new(None),
        }
    }

    pub(crate) fn set_stream(&self, stream: ComputeStream) {
        // Publication ordering is provided by the registry's
        // release-increment of the slot counter.
        self.stream.store(stream.raw(), Ordering::Relaxed);
    }

    pub(crate) fn stream(&self) -> ComputeStream {
        ComputeStream::from_raw(self.stream.load(Ordering::Relaxed))
    }

    /// Producer side. Lock-free.
    pub(crate) fn push(&self, state: Box<dyn OpState>) {
        self.inner.push(state);
    }

    /// Consumer side: dequeue the head iff `admit` accepts it.
    ///
    /// Returns `None` when the queue is empty or the head was rejected;
    /// a rejected head remains the head for the next call. Must only be
    /// called from the single consumer thread.
    pub(crate) fn pop_if(
        &self,
        admit: impl FnOnce(&dyn OpState) -> bool,
    ) -> Option<Box<dyn OpState>> {
        let mut staged = self.staged.lock();
        if staged.is_none() {
            *staged = self.inner.pop();
        }
        let admitted = match staged.as_deref() {
            Some(head) => admit(head),
            None => false,
        };
        if admitted {
            staged.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RunType, StepAction};

    struct Tagged(u32);

    impl OpState for Tagged {
        fn compute_stream(&self) -> ComputeStream {
            ComputeStream::DEFAULT
        }
        fn run_type(&self) -> RunType {
            RunType::Unbounded
        }
        fn start(&mut self) {}
        fn step(&mut self) -> StepAction {
            StepAction::Complete
        }
        fn name(&self) -> &str {
            "tagged"
        }
        fn desc(&self) -> String {
            self.0.to_string()
        }
    }

    fn tag(state: &dyn OpState) -> u32 {
        state.desc().parse().unwrap()
    }

    #[test]
    fn fifo_order() {
        let queue = InputQueue::unpublished();
        for i in 0..4u32 {
            queue.push(Box::new(Tagged(i)));
        }
        for i in 0..4u32 {
            let state = queue.pop_if(|_| true).unwrap();
            assert_eq!(tag(state.as_ref()), i);
        }
        assert!(queue.pop_if(|_| true).is_none());
    }

    #[test]
    fn rejected_head_stays_head() {
        let queue = InputQueue::unpublished();
        queue.push(Box::new(Tagged(0)));
        queue.push(Box::new(Tagged(1)));

        assert!(queue.pop_if(|_| false).is_none());
        // The rejected head is still first out.
        let state = queue.pop_if(|_| true).unwrap();
        assert_eq!(tag(state.as_ref()), 0);
    }

    #[test]
    fn admit_sees_the_head() {
        let queue = InputQueue::unpublished();
        queue.push(Box::new(Tagged(7)));
        let state = queue.pop_if(|head| tag(head) == 7).unwrap();
        assert_eq!(tag(state.as_ref()), 7);
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        use std::sync::Arc;

        let queue = Arc::new(InputQueue::unpublished());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        queue.push(Box::new(Tagged(p * 100 + i)));
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }

        let mut seen = Vec::new();
        while let Some(state) = queue.pop_if(|_| true) {
            seen.push(tag(state.as_ref()));
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..400).collect::<Vec<_>>());
    }
}
