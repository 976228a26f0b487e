//! Exact axis mapping.
//!
//! Two axes are exactly mapped when they denote the same loop in the generated
//! kernel: a reference axis and its replayed copy, an axis and its rfactor or
//! recompute clone, two root axes linked through a producer/consumer edge.

use crate::AxisId;

#[derive(Debug, Clone, Default)]
pub struct AxisMap {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl AxisMap {
    /// Register a fresh axis as its own class.
    pub(crate) fn push(&mut self, id: AxisId) {
        debug_assert_eq!(id.index(), self.parent.len());
        self.parent.push(id.0);
        self.rank.push(0);
    }

    pub fn find(&self, id: AxisId) -> AxisId {
        let mut cur = id.0;
        while self.parent[cur as usize] != cur {
            cur = self.parent[cur as usize];
        }
        AxisId(cur)
    }

    fn find_compress(&mut self, id: AxisId) -> u32 {
        let root = self.find(id).0;
        let mut cur = id.0;
        while self.parent[cur as usize] != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    pub fn union(&mut self, a: AxisId, b: AxisId) {
        let ra = self.find_compress(a);
        let rb = self.find_compress(b);
        if ra == rb {
            return;
        }
        let (ra_rank, rb_rank) = (self.rank[ra as usize], self.rank[rb as usize]);
        if ra_rank < rb_rank {
            self.parent[ra as usize] = rb;
        } else {
            self.parent[rb as usize] = ra;
            if ra_rank == rb_rank {
                self.rank[ra as usize] += 1;
            }
        }
    }

    pub fn are_mapped(&self, a: AxisId, b: AxisId) -> bool {
        self.find(a) == self.find(b)
    }
}
