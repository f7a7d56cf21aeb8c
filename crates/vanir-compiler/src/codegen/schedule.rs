//! List instruction scheduling
//!
//! Blocks are cut into regions at barriers (`Bar`, `Membar`) and Phi nodes;
//! those and the terminator never move. Inside a region a dependence DAG is
//! built from register def/use sets and memory accesses, and instructions are
//! issued one per cycle, each as soon as its operands are available, picking
//! the ready instruction with the highest priority.

use crate::config::Latencies;
use crate::context::Context;
use crate::error::CompileResult;
use crate::ir::{BasicBlockId, Function, Instruction, Opcode, Register};
use crate::transforms::pass::{Pass, PassOptions};
use rustc_hash::FxHashSet;
use std::str::FromStr;

/// Priority used to pick among ready instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Heuristic {
    /// Longest latency path to the end of the region first
    #[default]
    CriticalPath,
    /// Earliest instruction in the original order first
    SourceOrder,
}

impl FromStr for Heuristic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical-path" => Ok(Heuristic::CriticalPath),
            "source-order" => Ok(Heuristic::SourceOrder),
            other => Err(format!("unknown heuristic '{}'", other)),
        }
    }
}

/// Per-block list scheduler
#[derive(Debug, Default)]
pub struct ListScheduler {
    heuristic: Heuristic,
}

impl ListScheduler {
    pub const NAME: &'static str = "ListInstructionSchedulerPass";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heuristic(heuristic: Heuristic) -> Self {
        ListScheduler { heuristic }
    }

    pub fn heuristic(&self) -> Heuristic {
        self.heuristic
    }
}

impl Pass for ListScheduler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configure(&mut self, options: &PassOptions) {
        options.warn_unknown(Self::NAME, &["heuristic"]);
        if let Some(heuristic) = options.parse_value("heuristic") {
            self.heuristic = heuristic;
        }
    }

    fn run_on_function(&self, func: &mut Function, ctx: &Context) -> CompileResult<()> {
        let latencies = &ctx.target().latencies;
        let mut cycles = 0;
        for block in func.block_ids() {
            cycles += schedule_block(func, block, latencies, self.heuristic)?;
        }
        func.state.scheduled = true;
        log::debug!(
            "'{}': scheduled with {:?}, estimated {} cycles",
            func.name,
            self.heuristic,
            cycles
        );
        Ok(())
    }
}

/// Issue latency of an instruction, in cycles
pub fn latency(inst: &Instruction, latencies: &Latencies) -> u32 {
    match inst.opcode() {
        Opcode::Add
        | Opcode::And
        | Opcode::Ashr
        | Opcode::Lshr
        | Opcode::Or
        | Opcode::Shl
        | Opcode::Sub
        | Opcode::Xor
        | Opcode::Setp => latencies.alu,
        Opcode::Mul | Opcode::Fmul => latencies.multiply,
        Opcode::Sdiv | Opcode::Udiv | Opcode::Fdiv | Opcode::Srem | Opcode::Urem | Opcode::Frem => {
            latencies.divide
        }
        Opcode::Ld | Opcode::Atom => latencies.memory,
        _ => latencies.other,
    }
}

fn is_fixed(inst: &Instruction) -> bool {
    inst.is_barrier() || inst.opcode() == Opcode::Phi
}

/// Schedule one block, returning its estimated cycle count
fn schedule_block(
    func: &mut Function,
    block: BasicBlockId,
    latencies: &Latencies,
    heuristic: Heuristic,
) -> CompileResult<u32> {
    let mut insts = func.try_block_mut(block)?.clear();
    let terminator = match insts.last() {
        Some(last) if last.is_branch() => insts.pop(),
        _ => None,
    };

    let mut scheduled = Vec::with_capacity(insts.len() + 1);
    let mut region = Vec::new();
    let mut cycles = 0;
    for inst in insts {
        if is_fixed(&inst) {
            cycles += schedule_region(&mut region, &mut scheduled, latencies, heuristic);
            scheduled.push(inst);
            cycles += 1;
        } else {
            region.push(inst);
        }
    }
    cycles += schedule_region(&mut region, &mut scheduled, latencies, heuristic);
    if let Some(term) = terminator {
        scheduled.push(term);
        cycles += 1;
    }

    func.try_block_mut(block)?.replace_instructions(scheduled)?;
    Ok(cycles)
}

struct Node {
    successors: Vec<(usize, u32)>,
    predecessors: usize,
    latency: u32,
}

/// Dependence DAG over a region, edges pointing forward in program order
fn build_dag(region: &[Instruction], latencies: &Latencies) -> Vec<Node> {
    let defs: Vec<FxHashSet<Register>> = region
        .iter()
        .map(|i| i.defs().into_iter().collect())
        .collect();
    let uses: Vec<FxHashSet<Register>> = region
        .iter()
        .map(|i| i.uses().into_iter().collect())
        .collect();

    let mut nodes: Vec<Node> = region
        .iter()
        .map(|i| Node {
            successors: Vec::new(),
            predecessors: 0,
            latency: latency(i, latencies),
        })
        .collect();

    for j in 0..region.len() {
        for i in 0..j {
            let true_dep = !defs[i].is_disjoint(&uses[j]);
            let anti_dep = !uses[i].is_disjoint(&defs[j]);
            let output_dep = !defs[i].is_disjoint(&defs[j]);
            let memory_dep = region[i].is_memory_op()
                && region[j].is_memory_op()
                && (region[i].is_store() || region[j].is_store());

            let edge = if true_dep {
                Some(nodes[i].latency)
            } else if output_dep || memory_dep || anti_dep {
                Some(0)
            } else {
                None
            };
            if let Some(delay) = edge {
                nodes[i].successors.push((j, delay));
                nodes[j].predecessors += 1;
            }
        }
    }
    nodes
}

/// Drain `region` into `out` in scheduled order, returning the cycles used
fn schedule_region(
    region: &mut Vec<Instruction>,
    out: &mut Vec<Instruction>,
    latencies: &Latencies,
    heuristic: Heuristic,
) -> u32 {
    if region.is_empty() {
        return 0;
    }
    let mut nodes = build_dag(region, latencies);
    let n = nodes.len();

    let priority: Vec<u64> = match heuristic {
        Heuristic::CriticalPath => {
            let mut height = vec![0u64; n];
            for i in (0..n).rev() {
                let tail = nodes[i]
                    .successors
                    .iter()
                    .map(|&(j, _)| height[j])
                    .max()
                    .unwrap_or(0);
                height[i] = u64::from(nodes[i].latency) + tail;
            }
            height
        }
        Heuristic::SourceOrder => (0..n).map(|i| (n - i) as u64).collect(),
    };

    let mut earliest = vec![0u32; n];
    let mut done = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut cycle = 0u32;
    let mut finish = 0u32;

    while order.len() < n {
        let pick = (0..n)
            .filter(|&i| !done[i] && nodes[i].predecessors == 0 && earliest[i] <= cycle)
            .max_by(|&a, &b| priority[a].cmp(&priority[b]).then(b.cmp(&a)));
        let Some(i) = pick else {
            cycle += 1;
            continue;
        };

        done[i] = true;
        order.push(i);
        finish = finish.max(cycle + nodes[i].latency);
        let successors = std::mem::take(&mut nodes[i].successors);
        for (j, delay) in successors {
            earliest[j] = earliest[j].max(cycle + delay);
            nodes[j].predecessors -= 1;
        }
        cycle += 1;
    }

    let mut slots: Vec<Option<Instruction>> = region.drain(..).map(Some).collect();
    for i in order {
        if let Some(inst) = slots[i].take() {
            log::trace!("issue {}", inst);
            out.push(inst);
        }
    }
    finish.max(cycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, MembarLevel, Operand, Type};

    fn order(func: &Function) -> Vec<String> {
        func.instructions().map(|i| i.to_string()).collect()
    }

    /// `x = a + b; y = ld [p]; z = y + 1`
    fn make_load_chain() -> Function {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let a = b.param(Type::I32);
        let p = b.param(Type::Pointer);
        let x = b
            .binary(
                Opcode::Add,
                Type::I32,
                Operand::register(a, Type::I32),
                Operand::register(a, Type::I32),
            )
            .unwrap();
        let y = b.load(Type::I32, Operand::indirect(p, 0)).unwrap();
        let z = b
            .binary(
                Opcode::Add,
                Type::I32,
                Operand::register(y, Type::I32),
                Operand::register(x, Type::I32),
            )
            .unwrap();
        b.store(Operand::address("out", 0), Operand::register(z, Type::I32))
            .unwrap();
        b.ret().unwrap();
        func
    }

    #[test]
    fn test_critical_path_hoists_load() {
        let mut func = make_load_chain();
        let before = order(&func);
        ListScheduler::new()
            .run_on_function(&mut func, &Context::default())
            .unwrap();
        let after = order(&func);
        assert_eq!(after[0], before[1]);
        assert_eq!(after[1], before[0]);
        assert_eq!(&after[2..], &before[2..]);
        assert!(func.state.scheduled);
    }

    #[test]
    fn test_source_order_keeps_independent_order() {
        let mut func = make_load_chain();
        let before = order(&func);
        ListScheduler::with_heuristic(Heuristic::SourceOrder)
            .run_on_function(&mut func, &Context::default())
            .unwrap();
        assert_eq!(order(&func), before);
    }

    #[test]
    fn test_configure_heuristic() {
        let mut pass = ListScheduler::new();
        pass.configure(&PassOptions::new().with("heuristic=source-order"));
        assert_eq!(pass.heuristic(), Heuristic::SourceOrder);
        pass.configure(&PassOptions::new().with("heuristic=fastest"));
        assert_eq!(pass.heuristic(), Heuristic::SourceOrder);
    }

    #[test]
    fn test_anti_dependence_respected() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let a = b.param(Type::I32);
        let p = b.param(Type::Pointer);
        // read `a`, then overwrite it with a slow load
        b.store(Operand::address("out", 0), Operand::register(a, Type::I32))
            .unwrap();
        b.emit(crate::ir::InstructionKind::Unary {
            opcode: Opcode::Ld,
            d: Some(Operand::register(a, Type::I32)),
            a: Some(Operand::indirect(p, 0)),
        })
        .unwrap();
        b.ret().unwrap();
        let before = order(&func);
        ListScheduler::new()
            .run_on_function(&mut func, &Context::default())
            .unwrap();
        assert_eq!(order(&func), before);
    }

    #[test]
    fn test_nothing_crosses_membar() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let p = b.param(Type::Pointer);
        let v = b.param(Type::I32);
        b.store(Operand::indirect(p, 0), Operand::register(v, Type::I32))
            .unwrap();
        b.membar(MembarLevel::Cta).unwrap();
        let slow = b.load(Type::I32, Operand::indirect(p, 8)).unwrap();
        b.store(Operand::indirect(p, 16), Operand::register(slow, Type::I32))
            .unwrap();
        b.ret().unwrap();
        let before = order(&func);
        ListScheduler::new()
            .run_on_function(&mut func, &Context::default())
            .unwrap();
        let after = order(&func);
        let membar = after.iter().position(|s| s == "membar.cta").unwrap();
        assert_eq!(membar, 1);
        assert_eq!(after, before);
    }
}
