use crate::manager::ContentManagerInner;
use crate::reference::ReferenceKey;

impl ContentManagerInner {
    /// Reclaims objects kept alive only by reference cycles.
    ///
    /// Counting alone cannot free a cycle (every member always holds a
    /// nonzero count from its partner), so this traces the graph from every
    /// publicly-rooted node and releases whatever the trace never reached.
    /// Runs to completion inside the manager lock; cost is proportional to
    /// the number of loaded nodes.
    #[profiling::function]
    pub(crate) fn collect_cycles(&mut self) {
        // Epoch 0 is the never-visited sentinel
        self.collect_epoch = self.collect_epoch.wrapping_add(1);
        if self.collect_epoch == 0 {
            self.collect_epoch = 1;
        }
        let epoch = self.collect_epoch;

        // Public counts are the only roots of liveness; a node without one is
        // alive purely through other objects' edges
        let mut stack: Vec<ReferenceKey> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.public_count > 0)
            .map(|(key, _)| key)
            .collect();

        let mut reachable = 0usize;
        while let Some(key) = stack.pop() {
            if self.nodes[key].collect_epoch == epoch {
                continue;
            }
            self.nodes[key].collect_epoch = epoch;
            reachable += 1;

            let node = &self.nodes[key];
            for &child in &node.outgoing {
                if self.nodes[child].collect_epoch != epoch {
                    stack.push(child);
                }
            }
        }

        let candidates: Vec<ReferenceKey> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.collect_epoch != epoch)
            .map(|(key, _)| key)
            .collect();

        log::debug!(
            "cycle collection: {} reachable, {} to release",
            reachable,
            candidates.len()
        );

        // The candidate set is closed under reachability from survivors (a
        // marked node's edges are all marked), so each candidate is torn down
        // directly without per-edge decrements. Order across the set is
        // unspecified.
        for key in candidates {
            self.release_node(key);
        }
    }
}
