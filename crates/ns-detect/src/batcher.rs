//! Micro-batching of feature vectors ahead of the scorer.
//!
//! Vectors accumulate until the batch is full or `batch_timeout` has passed
//! since the first vector entered the buffer, whichever comes first. The
//! scoring worker drives the clock; this type just owns the buffer and the
//! deadline arithmetic so it stays directly testable.

use crate::features::FeatureVector;
use std::time::{Duration, Instant};

pub struct MicroBatcher {
    buffer: Vec<FeatureVector>,
    capacity: usize,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl MicroBatcher {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            timeout,
            deadline: None,
        }
    }

    /// Adds a vector. Returns the full batch when capacity is reached.
    pub fn push(&mut self, vector: FeatureVector) -> Option<Vec<FeatureVector>> {
        if self.buffer.is_empty() {
            self.deadline = Some(Instant::now() + self.timeout);
        }
        self.buffer.push(vector);
        if self.buffer.len() >= self.capacity {
            self.take()
        } else {
            None
        }
    }

    /// The instant at which the current partial batch must be dispatched,
    /// if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Dispatches the partial batch if its deadline has passed.
    pub fn take_if_due(&mut self, now: Instant) -> Option<Vec<FeatureVector>> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.take(),
            _ => None,
        }
    }

    /// Takes whatever is buffered, due or not. Used on shutdown.
    pub fn take(&mut self) -> Option<Vec<FeatureVector>> {
        if self.buffer.is_empty() {
            return None;
        }
        self.deadline = None;
        Some(std::mem::take(&mut self.buffer))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
