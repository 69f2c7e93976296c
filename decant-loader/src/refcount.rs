use crate::error::ContentError;
use crate::manager::ContentManagerInner;
use crate::reference::{AssetReference, ObjectKey, ReferenceKey};
use std::collections::hash_map::Entry;

impl ContentManagerInner {
    pub(crate) fn increment_reference(
        &mut self,
        key: ReferenceKey,
        is_public: bool,
    ) {
        let node = &mut self.nodes[key];
        if is_public {
            node.public_count += 1;
        } else {
            node.private_count += 1;
        }
        log::trace!(
            "increment [{}] public {} private {}",
            node.url,
            node.public_count,
            node.private_count
        );
    }

    /// Decrements one counter, cascading releases through outgoing edges when
    /// a node's total hits zero. A public count reaching zero while private
    /// references remain triggers a cycle collection: that state is only
    /// explained by a live parent still pointing here, or by an unreachable
    /// cycle.
    pub(crate) fn decrement_reference(
        &mut self,
        key: ReferenceKey,
        is_public: bool,
    ) -> Result<(), ContentError> {
        let mut work = vec![(key, is_public)];
        while let Some((key, is_public)) = work.pop() {
            let node = self
                .nodes
                .get_mut(key)
                .expect("decrement targets a released node");

            let counter = if is_public {
                &mut node.public_count
            } else {
                &mut node.private_count
            };
            if *counter == 0 {
                return Err(ContentError::UnbalancedReference {
                    url: node.url.clone(),
                });
            }
            *counter -= 1;

            let total = node.total_count();
            let public_now = node.public_count;
            log::trace!(
                "decrement [{}] public {} private {}",
                node.url,
                node.public_count,
                node.private_count
            );

            if total == 0 {
                let released = self.release_node(key);
                for child in released.outgoing {
                    work.push((child, false));
                }
            } else if is_public && public_now == 0 {
                self.collect_cycles();
            }
        }
        Ok(())
    }

    /// Tears one node down: runs the object's release hook and removes every
    /// trace of the node from the graph. What happens to its outgoing edges
    /// is the caller's decision (cascade vs. cycle sweep).
    pub(crate) fn release_node(
        &mut self,
        key: ReferenceKey,
    ) -> AssetReference {
        let node = self.unlink_node(key);
        log::debug!("released [{}]", node.url);
        node.object.on_release();
        node
    }

    /// Unregisters a node without running its release hook. Also the cleanup
    /// path for a shell whose construction failed.
    pub(crate) fn unlink_node(
        &mut self,
        key: ReferenceKey,
    ) -> AssetReference {
        self.unlink_from_chain(key);
        let node = self
            .nodes
            .remove(key)
            .expect("unlink targets a released node");
        self.loaded_by_object.remove(&ObjectKey::of(&*node.object));
        node
    }

    pub(crate) fn link_into_chain(
        &mut self,
        key: ReferenceKey,
    ) {
        let content_id = self.nodes[key].content_id;
        match self.loaded_by_id.entry(content_id) {
            Entry::Occupied(entry) => {
                // New nodes slot in right after the chain head
                let head = *entry.get();
                let head_next = self.nodes[head].next;
                self.nodes[key].prev = Some(head);
                self.nodes[key].next = head_next;
                if let Some(next) = head_next {
                    self.nodes[next].prev = Some(key);
                }
                self.nodes[head].next = Some(key);
            }
            Entry::Vacant(entry) => {
                entry.insert(key);
            }
        }
    }

    pub(crate) fn unlink_from_chain(
        &mut self,
        key: ReferenceKey,
    ) {
        let (content_id, prev, next) = {
            let node = &self.nodes[key];
            (node.content_id, node.prev, node.next)
        };

        match prev {
            Some(prev_key) => self.nodes[prev_key].next = next,
            None => {
                // Chain head; the id map points here
                match next {
                    Some(next_key) => {
                        self.loaded_by_id.insert(content_id, next_key);
                    }
                    None => {
                        self.loaded_by_id.remove(&content_id);
                    }
                }
            }
        }
        if let Some(next_key) = next {
            self.nodes[next_key].prev = prev;
        }

        let node = &mut self.nodes[key];
        node.prev = None;
        node.next = None;
    }
}
