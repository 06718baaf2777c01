//! Registry of declared table links.
//!
//! Tables declare their outgoing links at creation time; the registry owns
//! every descriptor and answers both directions: outgoing (this table points
//! at a target) and incoming (other tables point at this one). Cascade
//! deletion walks incoming links recursively, so registration rejects any
//! link that would close a cycle of CASCADE edges — termination of the walk
//! is a registration-time guarantee, not a runtime check.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::models::{ReferentialAction, TableLink};
use crate::{Error, Result};

/// Shared registry of all declared links in one database.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    links: Mutex<Vec<TableLink>>,
}

impl LinkRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the outgoing links of `source_table`.
    ///
    /// Re-registering an identical link (table re-created with the same
    /// spec) is a no-op. Fails with [`Error::LinkCycle`] when a new CASCADE
    /// edge closes a cycle; nothing is registered in that case.
    pub fn register(&self, source_table: &str, declared: &[TableLink]) -> Result<()> {
        let mut links = lock_links(&self.links);

        let mut candidates = Vec::new();
        for link in declared {
            let mut link = link.clone();
            link.source_table = source_table.to_string();
            if !links.contains(&link) && !candidates.contains(&link) {
                candidates.push(link);
            }
        }
        if candidates.is_empty() {
            return Ok(());
        }

        // Cycle check over CASCADE edges, existing plus candidates.
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for link in links.iter().chain(candidates.iter()) {
            if link.on_delete == ReferentialAction::Cascade {
                edges
                    .entry(link.source_table.as_str())
                    .or_default()
                    .push(link.target_table.as_str());
            }
        }
        if let Some((source, target)) = find_cycle_edge(&edges) {
            return Err(Error::LinkCycle {
                from_table: source.to_string(),
                target: target.to_string(),
            });
        }

        links.extend(candidates);
        Ok(())
    }

    /// Links declared by `table` (it is the source).
    #[must_use]
    pub fn outgoing(&self, table: &str) -> Vec<TableLink> {
        lock_links(&self.links)
            .iter()
            .filter(|l| l.source_table == table)
            .cloned()
            .collect()
    }

    /// Links pointing at `table` (it is the target).
    #[must_use]
    pub fn incoming(&self, table: &str) -> Vec<TableLink> {
        lock_links(&self.links)
            .iter()
            .filter(|l| l.target_table == table)
            .cloned()
            .collect()
    }

    /// The link from `source` to `target`, if declared.
    #[must_use]
    pub fn link_between(&self, source: &str, target: &str) -> Option<TableLink> {
        lock_links(&self.links)
            .iter()
            .find(|l| l.source_table == source && l.target_table == target)
            .cloned()
    }

    /// Removes every link touching `table`, in either role.
    ///
    /// Called on `drop_table`: descriptors referencing a gone table must not
    /// keep feeding cascade resolution.
    pub fn unregister_table(&self, table: &str) {
        lock_links(&self.links).retain(|l| l.source_table != table && l.target_table != table);
    }
}

fn lock_links(links: &Mutex<Vec<TableLink>>) -> std::sync::MutexGuard<'_, Vec<TableLink>> {
    match links.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("link registry mutex was poisoned, recovering");
            poisoned.into_inner()
        },
    }
}

/// Finds one edge participating in a directed cycle, if any exists.
///
/// Depth-first search with a recursion stack; the graph is tiny (one node
/// per table), so no effort is spent on anything cleverer.
fn find_cycle_edge<'a>(edges: &HashMap<&'a str, Vec<&'a str>>) -> Option<(&'a str, &'a str)> {
    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        done: &mut HashSet<&'a str>,
        stack: &mut HashSet<&'a str>,
    ) -> Option<(&'a str, &'a str)> {
        if done.contains(node) {
            return None;
        }
        stack.insert(node);
        for &next in edges.get(node).into_iter().flatten() {
            if stack.contains(next) {
                return Some((node, next));
            }
            if let Some(found) = visit(next, edges, done, stack) {
                return Some(found);
            }
        }
        stack.remove(node);
        done.insert(node);
        None
    }

    let mut done = HashSet::new();
    for &node in edges.keys() {
        let mut stack = HashSet::new();
        if let Some(found) = visit(node, edges, &mut done, &mut stack) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::ReferentialAction::Cascade;

    fn cascade(target: &str, target_key: &str, source_key: &str) -> TableLink {
        TableLink::new(target, target_key, source_key).on_delete(Cascade)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = LinkRegistry::new();
        registry
            .register("classes", &[cascade("users", "id", "teacher_id")])
            .unwrap();
        registry
            .register(
                "participants",
                &[
                    cascade("users", "id", "user_id"),
                    cascade("classes", "class_id", "class_id"),
                ],
            )
            .unwrap();

        assert_eq!(registry.outgoing("participants").len(), 2);
        assert_eq!(registry.incoming("users").len(), 2);
        assert_eq!(registry.incoming("classes").len(), 1);
        let link = registry.link_between("classes", "users").unwrap();
        assert_eq!(link.source_key, "teacher_id");
        assert!(registry.link_between("users", "classes").is_none());
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let registry = LinkRegistry::new();
        let links = [cascade("users", "id", "user_id")];
        registry.register("participants", &links).unwrap();
        registry.register("participants", &links).unwrap();
        assert_eq!(registry.outgoing("participants").len(), 1);
    }

    #[test]
    fn test_cascade_cycle_rejected() {
        let registry = LinkRegistry::new();
        registry
            .register("b", &[cascade("a", "id", "a_id")])
            .unwrap();
        let result = registry.register("a", &[cascade("b", "id", "b_id")]);
        assert!(matches!(result, Err(Error::LinkCycle { .. })));
        // The rejected registration left nothing behind.
        assert!(registry.outgoing("a").is_empty());
    }

    #[test]
    fn test_self_link_cycle_rejected() {
        let registry = LinkRegistry::new();
        let result = registry.register("tree", &[cascade("tree", "id", "parent_id")]);
        assert!(matches!(result, Err(Error::LinkCycle { .. })));
    }

    #[test]
    fn test_non_cascade_cycle_allowed() {
        let registry = LinkRegistry::new();
        registry
            .register("b", &[TableLink::new("a", "id", "a_id")])
            .unwrap();
        registry
            .register("a", &[TableLink::new("b", "id", "b_id")])
            .unwrap();
        assert_eq!(registry.outgoing("a").len(), 1);
    }

    #[test]
    fn test_unregister_table() {
        let registry = LinkRegistry::new();
        registry
            .register("classes", &[cascade("users", "id", "teacher_id")])
            .unwrap();
        registry.unregister_table("users");
        assert!(registry.incoming("users").is_empty());
        assert!(registry.outgoing("classes").is_empty());
    }
}
