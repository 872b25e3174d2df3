//! Concurrency-safe node registry.
//!
//! Providers create instances from many tasks at once and record them here;
//! the orchestrator then copies the registry into the cluster's ordered node
//! lists. Writes to one key never block writes to another, and each key
//! remembers when it was first inserted so copies come out in a stable order.

use std::sync::atomic::{AtomicU64, Ordering};

use autok3s_types::{Node, Status};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    node: Node,
}

/// `instance_id -> Node` map shared by one orchestrator operation.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: DashMap<String, Slot>,
    next_seq: AtomicU64,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `node`, or refresh the backend-observed fields of an existing
    /// entry: `instance_status` and any non-empty address list. Flags, role
    /// and credentials of an existing entry are kept.
    pub fn store_or_update(&self, node: Node) {
        match self.nodes.entry(node.instance_id.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = &mut entry.get_mut().node;
                existing.instance_status = node.instance_status;
                if !node.public_ip_address.is_empty() {
                    existing.public_ip_address = node.public_ip_address;
                }
                if !node.internal_ip_address.is_empty() {
                    existing.internal_ip_address = node.internal_ip_address;
                }
            }
            Entry::Vacant(entry) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                debug!(instance_id = %node.instance_id, master = node.master, "Registered node");
                entry.insert(Slot { seq, node });
            }
        }
    }

    /// Apply `f` to the entry for `instance_id`. Returns false when absent.
    pub fn update<F>(&self, instance_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Node),
    {
        match self.nodes.get_mut(instance_id) {
            Some(mut slot) => {
                f(&mut slot.node);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, instance_id: &str) -> Option<Node> {
        self.nodes.get(instance_id).map(|slot| slot.node.clone())
    }

    /// Entries matching `pred`, in insertion order.
    pub fn filter<P>(&self, pred: P) -> Vec<Node>
    where
        P: Fn(&Node) -> bool,
    {
        let mut slots: Vec<Slot> = self
            .nodes
            .iter()
            .filter(|slot| pred(&slot.node))
            .map(|slot| slot.value().clone())
            .collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.node).collect()
    }

    /// Every entry, in insertion order.
    pub fn nodes(&self) -> Vec<Node> {
        self.filter(|_| true)
    }

    /// Copy every entry into `status`: a node already listed is replaced in
    /// place, a new one is appended to the list matching its role.
    ///
    /// Entries stay in the registry so a failed operation can still be
    /// rolled back from it.
    pub fn drain_into(&self, status: &mut Status) {
        for node in self.nodes() {
            match status.find_mut(&node.instance_id) {
                Some(existing) => *existing = node,
                None if node.master => status.master_nodes.push(node),
                None => status.worker_nodes.push(node),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn node(id: &str, master: bool, ip: &str) -> Node {
        let mut n = Node::new(id, master);
        n.public_ip_address = vec![ip.to_string()];
        n
    }

    #[test]
    fn test_store_or_update_is_idempotent() {
        let registry = NodeRegistry::new();
        let mut first = node("i-1", true, "1.1.1.1");
        first.current = true;
        first.rollback = true;
        first.instance_status = "pending".to_string();
        registry.store_or_update(first.clone());

        let mut second = node("i-1", false, "");
        second.public_ip_address.clear();
        second.internal_ip_address = vec!["10.0.0.1".to_string()];
        second.instance_status = "running".to_string();
        registry.store_or_update(second);

        assert_eq!(registry.len(), 1);
        let stored = registry.get("i-1").unwrap();
        assert_eq!(stored.instance_status, "running");
        assert_eq!(stored.public_ip_address, vec!["1.1.1.1"]);
        assert_eq!(stored.internal_ip_address, vec!["10.0.0.1"]);
        assert!(stored.master);
        assert!(stored.current);
        assert!(stored.rollback);
    }

    #[test]
    fn test_update_overrides_flags() {
        let registry = NodeRegistry::new();
        registry.store_or_update(node("i-1", false, "1.1.1.1"));

        assert!(registry.update("i-1", |n| n.rollback = true));
        assert!(registry.get("i-1").unwrap().rollback);
        assert!(!registry.update("missing", |n| n.rollback = true));
    }

    #[test]
    fn test_drain_preserves_insertion_order() {
        let registry = NodeRegistry::new();
        for i in 0..20 {
            registry.store_or_update(node(&format!("m{:02}", i), i % 4 == 0, "1.1.1.1"));
        }

        let mut status = Status::default();
        registry.drain_into(&mut status);

        let masters: Vec<_> = status.master_nodes.iter().map(|n| n.instance_id.as_str()).collect();
        assert_eq!(masters, vec!["m00", "m04", "m08", "m12", "m16"]);
        assert_eq!(status.worker_nodes.len(), 15);
        assert_eq!(status.worker_nodes[0].instance_id, "m01");
    }

    #[test]
    fn test_drain_updates_in_place_without_duplicates() {
        let mut status = Status {
            master_nodes: vec![node("m0", true, "1.1.1.1")],
            worker_nodes: vec![node("w0", false, "1.1.1.2")],
        };

        let registry = NodeRegistry::new();
        let mut refreshed = node("w0", false, "9.9.9.9");
        refreshed.instance_status = "running".to_string();
        registry.store_or_update(refreshed);
        registry.store_or_update(node("w1", false, "1.1.1.3"));

        registry.drain_into(&mut status);
        registry.drain_into(&mut status);

        assert_eq!(status.master_nodes.len(), 1);
        assert_eq!(status.worker_nodes.len(), 2);
        assert_eq!(status.worker_nodes[0].public_ip_address, vec!["9.9.9.9"]);
        assert_eq!(status.worker_nodes[1].instance_id, "w1");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_filter_targets_rollback_set() {
        let registry = NodeRegistry::new();
        for (id, current, rollback) in [
            ("a", true, true),
            ("b", true, false),
            ("c", false, true),
            ("d", true, true),
        ] {
            let mut n = node(id, false, "1.1.1.1");
            n.current = current;
            n.rollback = rollback;
            registry.store_or_update(n);
        }

        let targets: Vec<_> = registry
            .filter(|n| n.current && n.rollback)
            .into_iter()
            .map(|n| n.instance_id)
            .collect();
        assert_eq!(targets, vec!["a", "d"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers() {
        let registry = Arc::new(NodeRegistry::new());
        let mut handles = Vec::new();

        for task in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let id = format!("i-{}", i % 25);
                    let mut n = node(&id, i % 5 == 0, &format!("10.0.{}.{}", task, i));
                    n.instance_status = format!("task-{}", task);
                    registry.store_or_update(n);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), 25);
        let mut status = Status::default();
        registry.drain_into(&mut status);
        assert_eq!(status.len(), 25);
        assert!(!registry.is_empty());
    }
}
