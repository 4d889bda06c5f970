//! Ordered collection of sink handles with identity-based removal.

use std::sync::Arc;

use crate::sink::{same_sink, Sink};

/// The ordered set of sinks a connector distributes to.
///
/// Insertion order is preserved and duplicates are allowed: attaching the
/// same handle twice yields two independent slots. Removal matches by
/// identity and takes the first slot holding that sink.
#[derive(Clone, Default)]
pub(crate) struct SinkSet {
    sinks: Vec<Arc<dyn Sink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.push(sink);
    }

    /// Removes the first slot holding `sink`. Returns whether one was found.
    pub fn remove(&mut self, sink: &Arc<dyn Sink>) -> bool {
        match self.sinks.iter().position(|s| same_sink(s, sink)) {
            Some(index) => {
                self.sinks.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes every slot holding `sink`, returning how many there were.
    pub fn remove_all(&mut self, sink: &Arc<dyn Sink>) -> usize {
        let before = self.sinks.len();
        self.sinks.retain(|s| !same_sink(s, sink));
        before - self.sinks.len()
    }

    /// Whether any slot holds `sink`.
    pub fn contains(&self, sink: &Arc<dyn Sink>) -> bool {
        self.sinks.iter().any(|s| same_sink(s, sink))
    }

    /// Number of slots holding `sink`.
    pub fn count(&self, sink: &Arc<dyn Sink>) -> usize {
        self.sinks.iter().filter(|s| same_sink(s, sink)).count()
    }

    /// One handle per distinct sink, in order of first attachment.
    pub fn distinct(&self) -> Vec<Arc<dyn Sink>> {
        let mut distinct: Vec<Arc<dyn Sink>> = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            if !distinct.iter().any(|s| same_sink(s, sink)) {
                distinct.push(Arc::clone(sink));
            }
        }
        distinct
    }

    /// Removes the slot at `index`; later slots shift down by one.
    pub fn remove_at(&mut self, index: usize) -> Arc<dyn Sink> {
        self.sinks.remove(index)
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Sink>> {
        self.sinks.get(index)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn as_slice(&self) -> &[Arc<dyn Sink>] {
        &self.sinks
    }

    /// Copies the current handles, for iterating without holding a lock.
    pub fn snapshot(&self) -> Vec<Arc<dyn Sink>> {
        self.sinks.clone()
    }
}
