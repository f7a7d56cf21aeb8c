//! Dominator tree and dominance frontiers
//!
//! Immediate dominators use the iterative Cooper-Harvey-Kennedy algorithm
//! over reverse post-order. Unreachable blocks have no dominator and appear
//! in no frontier.

use super::cfg::ControlFlowGraph;
use crate::ir::BasicBlockId;
use rustc_hash::{FxHashMap, FxHashSet};

/// Dominance information for one function
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: Option<BasicBlockId>,
    /// Immediate dominator; the entry maps to itself
    idom: FxHashMap<BasicBlockId, BasicBlockId>,
    children: FxHashMap<BasicBlockId, Vec<BasicBlockId>>,
    frontiers: FxHashMap<BasicBlockId, Vec<BasicBlockId>>,
    rpo_index: FxHashMap<BasicBlockId, usize>,
}

impl DominatorTree {
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let rpo = cfg.reverse_post_order();
        let rpo_index: FxHashMap<BasicBlockId, usize> =
            rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let mut idom: FxHashMap<BasicBlockId, BasicBlockId> = FxHashMap::default();
        if let Some(&entry) = rpo.first() {
            idom.insert(entry, entry);
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom = None;
                for &pred in cfg.predecessors(block) {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &rpo_index, current, pred),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        let mut children: FxHashMap<BasicBlockId, Vec<BasicBlockId>> = FxHashMap::default();
        for &block in rpo.iter().skip(1) {
            if let Some(&parent) = idom.get(&block) {
                children.entry(parent).or_default().push(block);
            }
        }

        let frontiers = compute_frontiers(cfg, &idom);

        DominatorTree {
            entry: rpo.first().copied(),
            idom,
            children,
            frontiers,
            rpo_index,
        }
    }

    /// Immediate dominator (`None` for the entry and unreachable blocks)
    pub fn idom(&self, block: BasicBlockId) -> Option<BasicBlockId> {
        self.idom.get(&block).copied().filter(|&d| d != block)
    }

    /// Whether `a` dominates `b` (reflexive)
    pub fn dominates(&self, a: BasicBlockId, b: BasicBlockId) -> bool {
        if !self.idom.contains_key(&b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom.get(&current) {
                Some(&dom) if dom != current => current = dom,
                _ => return false,
            }
        }
    }

    /// Blocks immediately dominated by `block`, in reverse post-order
    pub fn children(&self, block: BasicBlockId) -> &[BasicBlockId] {
        self.children.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Dominance frontier of `block`, sorted by id
    pub fn frontier(&self, block: BasicBlockId) -> &[BasicBlockId] {
        self.frontiers
            .get(&block)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Iterated dominance frontier of a set of blocks, sorted by id
    pub fn iterated_frontier(
        &self,
        blocks: impl IntoIterator<Item = BasicBlockId>,
    ) -> Vec<BasicBlockId> {
        let mut result = FxHashSet::default();
        let mut worklist: Vec<BasicBlockId> = blocks.into_iter().collect();
        while let Some(block) = worklist.pop() {
            for &df in self.frontier(block) {
                if result.insert(df) {
                    worklist.push(df);
                }
            }
        }
        let mut result: Vec<_> = result.into_iter().collect();
        result.sort();
        result
    }

    /// Dominator-tree pre-order starting at the entry
    pub fn preorder(&self) -> Vec<BasicBlockId> {
        let mut order = Vec::new();
        let mut stack: Vec<BasicBlockId> = self.entry.into_iter().collect();
        while let Some(block) = stack.pop() {
            order.push(block);
            stack.extend(self.children(block).iter().rev());
        }
        order
    }

    pub fn is_reachable(&self, block: BasicBlockId) -> bool {
        self.rpo_index.contains_key(&block)
    }
}

/// Walk both fingers up the tree until they meet
fn intersect(
    idom: &FxHashMap<BasicBlockId, BasicBlockId>,
    rpo_index: &FxHashMap<BasicBlockId, usize>,
    mut b1: BasicBlockId,
    mut b2: BasicBlockId,
) -> BasicBlockId {
    let index = |b: &BasicBlockId| rpo_index.get(b).copied().unwrap_or(usize::MAX);
    while b1 != b2 {
        while index(&b1) > index(&b2) {
            b1 = idom[&b1];
        }
        while index(&b2) > index(&b1) {
            b2 = idom[&b2];
        }
    }
    b1
}

fn compute_frontiers(
    cfg: &ControlFlowGraph,
    idom: &FxHashMap<BasicBlockId, BasicBlockId>,
) -> FxHashMap<BasicBlockId, Vec<BasicBlockId>> {
    let mut frontiers: FxHashMap<BasicBlockId, FxHashSet<BasicBlockId>> = FxHashMap::default();

    for &block in cfg.reverse_post_order() {
        let preds: Vec<_> = cfg
            .predecessors(block)
            .iter()
            .copied()
            .filter(|p| idom.contains_key(p))
            .collect();
        if preds.len() < 2 {
            continue;
        }
        let Some(&block_idom) = idom.get(&block) else {
            continue;
        };
        for pred in preds {
            let mut runner = pred;
            while runner != block_idom {
                frontiers.entry(runner).or_default().insert(block);
                match idom.get(&runner) {
                    Some(&next) if next != runner => runner = next,
                    _ => break,
                }
            }
        }
    }

    frontiers
        .into_iter()
        .map(|(block, set)| {
            let mut list: Vec<_> = set.into_iter().collect();
            list.sort();
            (block, list)
        })
        .collect()
}
