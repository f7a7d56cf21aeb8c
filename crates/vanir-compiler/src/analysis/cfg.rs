//! Control-flow graph
//!
//! Snapshot of a function's block graph. Edges come from
//! `Function::successors`; the snapshot is not updated when the function is
//! edited, so passes recompute it after changing control flow.

use crate::ir::{BasicBlockId, Function};
use rustc_hash::{FxHashMap, FxHashSet};

/// Successor/predecessor lists and traversal orders for one function
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub entry: Option<BasicBlockId>,
    /// All blocks in layout order
    blocks: Vec<BasicBlockId>,
    successors: FxHashMap<BasicBlockId, Vec<BasicBlockId>>,
    predecessors: FxHashMap<BasicBlockId, Vec<BasicBlockId>>,
    /// Reachable blocks in reverse post-order
    rpo: Vec<BasicBlockId>,
}

impl ControlFlowGraph {
    /// Build the graph for `func`
    pub fn compute(func: &Function) -> Self {
        let blocks = func.block_ids();
        let mut successors: FxHashMap<BasicBlockId, Vec<BasicBlockId>> = FxHashMap::default();
        let mut predecessors: FxHashMap<BasicBlockId, Vec<BasicBlockId>> = FxHashMap::default();
        for &block in &blocks {
            predecessors.entry(block).or_default();
        }
        for &block in &blocks {
            let succs = func.successors(block);
            for &succ in &succs {
                predecessors.entry(succ).or_default().push(block);
            }
            successors.insert(block, succs);
        }

        let entry = func.entry();
        let rpo = match entry {
            Some(entry) => reverse_post_order(entry, &successors),
            None => Vec::new(),
        };

        ControlFlowGraph {
            entry,
            blocks,
            successors,
            predecessors,
            rpo,
        }
    }

    pub fn successors(&self, block: BasicBlockId) -> &[BasicBlockId] {
        self.successors.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Predecessors, in layout order of the predecessor
    pub fn predecessors(&self, block: BasicBlockId) -> &[BasicBlockId] {
        self.predecessors
            .get(&block)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Reachable blocks in reverse post-order (entry first)
    pub fn reverse_post_order(&self) -> &[BasicBlockId] {
        &self.rpo
    }

    /// All blocks in layout order, reachable or not
    pub fn blocks(&self) -> &[BasicBlockId] {
        &self.blocks
    }

    pub fn is_reachable(&self, block: BasicBlockId) -> bool {
        self.rpo.contains(&block)
    }

    /// Whether the edge `from -> to` is critical (multi-successor source,
    /// multi-predecessor destination)
    pub fn is_critical_edge(&self, from: BasicBlockId, to: BasicBlockId) -> bool {
        self.successors(from).len() > 1 && self.predecessors(to).len() > 1
    }
}

/// Iterative post-order DFS, reversed
fn reverse_post_order(
    entry: BasicBlockId,
    successors: &FxHashMap<BasicBlockId, Vec<BasicBlockId>>,
) -> Vec<BasicBlockId> {
    let mut postorder = Vec::new();
    let mut visited = FxHashSet::default();
    let mut stack = vec![(entry, 0usize)];
    visited.insert(entry);

    while let Some((block, next)) = stack.pop() {
        let succs = successors.get(&block).map(Vec::as_slice).unwrap_or(&[]);
        if let Some(&succ) = succs.get(next) {
            stack.push((block, next + 1));
            if visited.insert(succ) {
                stack.push((succ, 0));
            }
        } else {
            postorder.push(block);
        }
    }

    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, PredicateOperand, Type};

    /// entry -> {left, right} -> merge, plus an unreachable block
    fn make_diamond() -> (Function, [BasicBlockId; 5]) {
        let mut func = Function::new("diamond");
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.current_block();
        let left = b.create_block();
        let right = b.create_block();
        let merge = b.create_block();
        let dead = b.create_block();
        let p = b.param(Type::I1);
        b.branch_if(PredicateOperand::new(p), right).unwrap();
        b.switch_to_block(left);
        b.branch(merge).unwrap();
        b.switch_to_block(right);
        b.branch(merge).unwrap();
        b.switch_to_block(merge);
        b.ret().unwrap();
        b.switch_to_block(dead);
        b.branch(merge).unwrap();
        (func, [entry, left, right, merge, dead])
    }

    #[test]
    fn test_edges() {
        let (func, [entry, left, right, merge, dead]) = make_diamond();
        let cfg = ControlFlowGraph::compute(&func);
        assert_eq!(cfg.successors(entry), &[right, left]);
        assert_eq!(cfg.predecessors(merge), &[left, right, dead]);
        assert!(cfg.predecessors(entry).is_empty());
        assert!(!cfg.is_critical_edge(entry, right));
        assert!(!cfg.is_critical_edge(left, merge));
    }

    #[test]
    fn test_reverse_post_order() {
        let (func, [entry, left, right, merge, dead]) = make_diamond();
        let cfg = ControlFlowGraph::compute(&func);
        let rpo = cfg.reverse_post_order();
        assert_eq!(rpo.len(), 4);
        assert_eq!(rpo[0], entry);
        assert_eq!(rpo[3], merge);
        assert!(rpo.contains(&left) && rpo.contains(&right));
        assert!(!cfg.is_reachable(dead));
        assert_eq!(cfg.blocks().len(), 5);
    }
}
