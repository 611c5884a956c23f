//! First-in-first-out queue of acts

use std::collections::VecDeque;

use crate::common::{Error, Result};
use crate::playthrough::Act;

/// Acts waiting to run, front first
#[derive(Debug, Default)]
pub struct WorkQueue {
    acts: VecDeque<Act>,
}

impl WorkQueue {
    pub fn new(acts: impl IntoIterator<Item = Act>) -> Self {
        Self {
            acts: acts.into_iter().collect(),
        }
    }

    /// Remove the next act
    ///
    /// Fails with `EmptyQueue` once every act has been taken.
    pub fn pop(&mut self) -> Result<Act> {
        self.acts.pop_front().ok_or(Error::EmptyQueue)
    }

    pub fn is_empty(&self) -> bool {
        self.acts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.acts.len()
    }
}
