use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::ArcStr;
use crate::error::NodeError;

/// A failure recorded by the graph.
#[derive(Debug, Clone)]
pub struct SinkEntry {
    /// Name of the node that failed.
    pub node: ArcStr,
    pub error: NodeError,
}

/// Append-only log of node failures, owned by a session.
///
/// Nodes without their own error hook route failures here. Clones share the
/// same log.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    entries: Arc<Mutex<Vec<SinkEntry>>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SinkEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, node: ArcStr, error: NodeError) {
        self.lock().push(SinkEntry { node, error });
    }

    /// Snapshot of the recorded failures, oldest first.
    pub fn errors(&self) -> Vec<SinkEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes and returns every recorded failure.
    pub fn drain_and_clear(&self) -> Vec<SinkEntry> {
        std::mem::take(&mut *self.lock())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sink: &ErrorSink, node: &str) {
        let node: ArcStr = node.into();
        sink.push(
            node.clone(),
            NodeError::resolve(node, anyhow::anyhow!("boom")),
        );
    }

    #[test]
    fn test_push_and_drain() {
        let sink = ErrorSink::new();
        entry(&sink, "a");
        entry(&sink, "b");

        assert_eq!(sink.len(), 2);
        let drained = sink.drain_and_clear();
        assert_eq!(drained.len(), 2);
        assert_eq!(&*drained[0].node, "a");
        assert_eq!(&*drained[1].node, "b");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_clones_share_log() {
        let sink = ErrorSink::new();
        let other = sink.clone();
        entry(&other, "a");
        assert_eq!(sink.errors().len(), 1);

        sink.clear();
        assert!(other.is_empty());
    }
}
