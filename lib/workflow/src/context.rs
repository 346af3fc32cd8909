//! Per-execution key/value store of node outputs.
//!
//! Entries are keyed by `(node id, output name)` and rendered as
//! `node_id.output_name` only in snapshots and errors. Every key is written at
//! most once; a node's outputs are published together when it completes, so
//! readers never see a partial set. Readers may wait for a key until it is
//! written or the run closes the context.

use crate::error::ContextConflict;
use crate::node::NodeId;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Builds the context key for a node output.
#[must_use]
pub fn context_key(node_id: &NodeId, output: &str) -> String {
    format!("{node_id}.{output}")
}

/// Versioned, write-once store scoped to one execution.
#[derive(Debug)]
pub struct ExecutionContext {
    entries: RwLock<BTreeMap<(NodeId, String), JsonValue>>,
    version: watch::Sender<u64>,
    closed: AtomicBool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            version,
            closed: AtomicBool::new(false),
        }
    }

    /// Writes a single output.
    ///
    /// # Errors
    ///
    /// Returns `ContextConflict` if the key was already written.
    pub fn write(
        &self,
        node_id: &NodeId,
        output: &str,
        value: JsonValue,
    ) -> Result<(), ContextConflict> {
        self.write_outputs(node_id, BTreeMap::from([(output.to_string(), value)]))
    }

    /// Publishes all outputs of a completed node at once.
    ///
    /// Nothing is written if any key already exists.
    ///
    /// # Errors
    ///
    /// Returns `ContextConflict` naming the first key already written.
    pub fn write_outputs(
        &self,
        node_id: &NodeId,
        outputs: BTreeMap<String, JsonValue>,
    ) -> Result<(), ContextConflict> {
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(output) = outputs
                .keys()
                .find(|output| entries.contains_key(&(node_id.clone(), (*output).clone())))
            {
                return Err(ContextConflict {
                    key: context_key(node_id, output),
                });
            }
            entries.extend(
                outputs
                    .into_iter()
                    .map(|(output, value)| ((node_id.clone(), output), value)),
            );
        }
        self.version.send_modify(|v| *v += 1);
        Ok(())
    }

    /// Returns a node output if it has been written.
    #[must_use]
    pub fn get(&self, node_id: &NodeId, output: &str) -> Option<JsonValue> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(node_id.clone(), output.to_string()))
            .cloned()
    }

    /// Returns the number of written keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current write version; bumps on every publish and on close.
    #[must_use]
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Waits until the key is written, or returns `None` once the context is
    /// closed without it.
    pub async fn wait_for(&self, node_id: &NodeId, output: &str) -> Option<JsonValue> {
        let mut changes = self.version.subscribe();
        loop {
            if let Some(value) = self.get(node_id, output) {
                return Some(value);
            }
            if self.is_closed() {
                return None;
            }
            if changes.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Marks the run terminal and wakes all waiters.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.version.send_modify(|v| *v += 1);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns a JSON object copy of every written key, rendered as
    /// `node_id.output_name`.
    #[must_use]
    pub fn snapshot(&self) -> JsonValue {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        JsonValue::Object(
            entries
                .iter()
                .map(|((node_id, output), v)| (context_key(node_id, output), v.clone()))
                .collect::<Map<_, _>>(),
        )
    }
}

/// A node's read access to the context, limited to its ancestors' outputs.
#[derive(Debug, Clone)]
pub struct ContextView {
    context: Arc<ExecutionContext>,
    visible: Arc<BTreeSet<NodeId>>,
}

impl ContextView {
    #[must_use]
    pub fn new(context: Arc<ExecutionContext>, visible: BTreeSet<NodeId>) -> Self {
        Self {
            context,
            visible: Arc::new(visible),
        }
    }

    /// Returns true if this view may read outputs of `node_id`.
    #[must_use]
    pub fn can_see(&self, node_id: &NodeId) -> bool {
        self.visible.contains(node_id)
    }

    /// Returns an ancestor's output, if written.
    #[must_use]
    pub fn get(&self, node_id: &NodeId, output: &str) -> Option<JsonValue> {
        if !self.can_see(node_id) {
            return None;
        }
        self.context.get(node_id, output)
    }

    /// Waits for an ancestor's output. Returns `None` immediately for nodes
    /// outside the view.
    pub async fn wait_for(&self, node_id: &NodeId, output: &str) -> Option<JsonValue> {
        if !self.can_see(node_id) {
            return None;
        }
        self.context.wait_for(node_id, output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn write_once_per_key() {
        let ctx = ExecutionContext::new();
        let node = NodeId::from("a");
        ctx.write(&node, "output", json!(1)).expect("first write");

        let err = ctx.write(&node, "output", json!(2)).unwrap_err();
        assert_eq!(err.key, "a.output");
        assert_eq!(ctx.get(&node, "output"), Some(json!(1)));
    }

    #[test]
    fn dotted_names_stay_distinct() {
        let ctx = ExecutionContext::new();
        ctx.write(&"a.b".into(), "c", json!(1)).expect("write");
        ctx.write(&"a".into(), "b.c", json!(2)).expect("write");
        assert_eq!(ctx.get(&"a.b".into(), "c"), Some(json!(1)));
        assert_eq!(ctx.get(&"a".into(), "b.c"), Some(json!(2)));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn conflicting_batch_writes_nothing() {
        let ctx = ExecutionContext::new();
        let node = NodeId::from("n");
        ctx.write(&node, "b", json!(0)).expect("write");

        let batch = BTreeMap::from([("a".to_string(), json!(1)), ("b".to_string(), json!(2))]);
        assert!(ctx.write_outputs(&node, batch).is_err());
        assert_eq!(ctx.get(&node, "a"), None);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn second_batch_for_a_node_conflicts() {
        let ctx = ExecutionContext::new();
        let node = NodeId::from("n");
        let batch = BTreeMap::from([("out".to_string(), json!(1))]);
        ctx.write_outputs(&node, batch.clone()).expect("first batch");

        let err = ctx.write_outputs(&node, batch).unwrap_err();
        assert_eq!(err.key, "n.out");
        assert_eq!(err.to_string(), "context key 'n.out' written twice");
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn snapshot_is_object() {
        let ctx = ExecutionContext::new();
        ctx.write(&"a".into(), "output", json!({"x": 1})).expect("write");
        assert_eq!(ctx.snapshot(), json!({"a.output": {"x": 1}}));
    }

    #[tokio::test]
    async fn wait_for_sees_later_write() {
        let ctx = Arc::new(ExecutionContext::new());
        let writer = Arc::clone(&ctx);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.write(&"a".into(), "output", json!(7)).expect("write");
        });

        assert_eq!(ctx.wait_for(&"a".into(), "output").await, Some(json!(7)));
    }

    #[tokio::test]
    async fn wait_for_returns_none_when_closed() {
        let ctx = Arc::new(ExecutionContext::new());
        let closer = Arc::clone(&ctx);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });

        assert_eq!(ctx.wait_for(&"never".into(), "written").await, None);
    }

    #[test]
    fn view_hides_non_ancestors() {
        let ctx = Arc::new(ExecutionContext::new());
        ctx.write(&"a".into(), "output", json!(1)).expect("write");
        ctx.write(&"sibling".into(), "output", json!(2)).expect("write");

        let view = ContextView::new(Arc::clone(&ctx), BTreeSet::from([NodeId::from("a")]));
        assert_eq!(view.get(&"a".into(), "output"), Some(json!(1)));
        assert_eq!(view.get(&"sibling".into(), "output"), None);
    }
}
