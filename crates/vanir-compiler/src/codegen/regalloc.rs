//! Chaitin-Briggs register allocation
//!
//! One interference graph per register class, built from liveness: a
//! register defined by an instruction interferes with everything live after
//! it, except the source of a register copy. Nodes of degree < k are removed
//! first; when none is left the cheapest node by `cost / degree` is pushed
//! anyway and may still find a colour on the way back (Briggs' optimistic
//! colouring). Registers left without a colour are handed to the spiller.
//!
//! Callees allocate from the same register file and nothing is saved across
//! a call, so a register live across one never receives a colour and always
//! lives in its spill slot.

use crate::analysis::liveness::step_backward;
use crate::analysis::{ControlFlowGraph, Liveness, RegisterSet};
use crate::context::Context;
use crate::error::{CompileError, CompileResult};
use crate::ir::{Function, PhysicalRegister, Register, RegisterClass, SpillRequest, VirtualRegister};
use crate::transforms::pass::{Pass, PassOptions};
use rustc_hash::{FxHashMap, FxHashSet};

/// Number of allocatable registers per class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBudget {
    pub general: u16,
    pub predicate: u16,
}

impl RegisterBudget {
    pub fn for_class(&self, class: RegisterClass) -> u16 {
        match class {
            RegisterClass::General => self.general,
            RegisterClass::Predicate => self.predicate,
            RegisterClass::Link => 1,
        }
    }
}

/// Result of one allocation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// Every register was coloured and the function rewritten
    Allocated { general_used: u16, predicate_used: u16 },
    /// These registers need spill code; the function is unchanged
    NeedsSpill(Vec<VirtualRegister>),
}

/// Interference graph over the virtual registers of one class
#[derive(Debug, Default)]
pub struct InterferenceGraph {
    nodes: Vec<VirtualRegister>,
    edges: FxHashMap<VirtualRegister, FxHashSet<VirtualRegister>>,
    /// Physical registers a node must avoid
    forbidden: FxHashMap<VirtualRegister, FxHashSet<u16>>,
}

impl InterferenceGraph {
    fn add_node(&mut self, v: VirtualRegister) {
        if !self.edges.contains_key(&v) {
            self.edges.insert(v, FxHashSet::default());
            self.nodes.push(v);
        }
    }

    fn add_edge(&mut self, a: VirtualRegister, b: VirtualRegister) {
        if a == b {
            return;
        }
        self.add_node(a);
        self.add_node(b);
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    fn forbid(&mut self, v: VirtualRegister, color: u16) {
        self.add_node(v);
        self.forbidden.entry(v).or_default().insert(color);
    }

    pub fn interferes(&self, a: VirtualRegister, b: VirtualRegister) -> bool {
        self.edges.get(&a).is_some_and(|n| n.contains(&b))
    }

    pub fn degree(&self, v: VirtualRegister) -> usize {
        self.edges.get(&v).map_or(0, |n| n.len())
    }

    pub fn nodes(&self) -> &[VirtualRegister] {
        &self.nodes
    }
}

/// Interference graphs and spill costs for one function
#[derive(Debug, Default)]
pub struct Interference {
    graphs: FxHashMap<RegisterClass, InterferenceGraph>,
    classes: FxHashMap<VirtualRegister, RegisterClass>,
    costs: FxHashMap<VirtualRegister, f64>,
    /// Registers whose value must survive a call
    across_calls: FxHashSet<VirtualRegister>,
}

impl Interference {
    pub fn build(func: &Function) -> Self {
        let mut result = Interference::default();

        for param in &func.params {
            if let Register::Virtual(v) = param.reg {
                result.note(v, RegisterClass::for_type(param.ty));
            }
        }
        for inst in func.instructions() {
            inst.visit_registers(|reg, class, _| {
                if let Register::Virtual(v) = reg {
                    result.note(v, class);
                    *result.costs.entry(v).or_default() += 1.0;
                }
            });
        }

        let cfg = ControlFlowGraph::compute(func);
        let liveness = Liveness::compute(func, &cfg);

        for block in func.blocks() {
            let mut live: RegisterSet = liveness.live_out(block.id()).clone();
            for inst in block.iter().rev() {
                let defs = inst.defs();
                if inst.is_call() {
                    let survivors = live
                        .iter()
                        .filter(|r| !defs.contains(r))
                        .filter_map(|r| r.as_virtual());
                    result.across_calls.extend(survivors);
                }
                if inst.is_copy() {
                    if let Some(source) = inst.a().and_then(|a| a.reg()) {
                        if !defs.contains(source) {
                            live.remove(source);
                        }
                    }
                }
                for (i, &def) in defs.iter().enumerate() {
                    for &other in live.iter().chain(&defs[i + 1..]) {
                        result.interfere(def, other);
                    }
                }
                step_backward(&mut live, inst);
            }
        }

        // everything live into the entry is defined there together
        if let Some(entry) = cfg.entry {
            let live_in: Vec<Register> = liveness.live_in(entry).iter().copied().collect();
            for (i, &a) in live_in.iter().enumerate() {
                for &b in &live_in[i + 1..] {
                    result.interfere(a, b);
                }
            }
        }

        for graph in result.graphs.values_mut() {
            graph.nodes.sort_unstable();
        }
        result
    }

    fn note(&mut self, v: VirtualRegister, class: RegisterClass) {
        let class = *self.classes.entry(v).or_insert(class);
        self.graphs.entry(class).or_default().add_node(v);
    }

    fn interfere(&mut self, a: Register, b: Register) {
        match (a, b) {
            (Register::Virtual(x), Register::Virtual(y)) => {
                let (Some(&cx), Some(&cy)) = (self.classes.get(&x), self.classes.get(&y)) else {
                    return;
                };
                if cx == cy {
                    self.graphs.entry(cx).or_default().add_edge(x, y);
                }
            }
            (Register::Virtual(v), Register::Physical(p))
            | (Register::Physical(p), Register::Virtual(v)) => {
                if self.classes.get(&v) == Some(&p.class) {
                    self.graphs.entry(p.class).or_default().forbid(v, p.index);
                }
            }
            (Register::Physical(_), Register::Physical(_)) => {}
        }
    }

    pub fn graph(&self, class: RegisterClass) -> Option<&InterferenceGraph> {
        self.graphs.get(&class)
    }

    pub fn class_of(&self, v: VirtualRegister) -> Option<RegisterClass> {
        self.classes.get(&v).copied()
    }

    pub fn cost(&self, v: VirtualRegister) -> f64 {
        self.costs.get(&v).copied().unwrap_or(0.0)
    }

    /// Whether `v` is live across some call
    pub fn crosses_call(&self, v: VirtualRegister) -> bool {
        self.across_calls.contains(&v)
    }
}

/// Colour one graph with `k` colours. Returns the colouring of every node
/// that received one; unspillable nodes are only pushed optimistically last
/// and `clobbered` nodes never get a colour.
fn color_graph(
    graph: &InterferenceGraph,
    k: u16,
    cost: impl Fn(VirtualRegister) -> f64,
    unspillable: &FxHashSet<VirtualRegister>,
    clobbered: &FxHashSet<VirtualRegister>,
) -> FxHashMap<VirtualRegister, u16> {
    let mut degree: FxHashMap<VirtualRegister, usize> =
        graph.nodes.iter().map(|&v| (v, graph.degree(v))).collect();
    let mut removed: FxHashSet<VirtualRegister> = FxHashSet::default();
    let mut stack: Vec<VirtualRegister> = Vec::with_capacity(graph.nodes.len());

    let mut remove = |v: VirtualRegister,
                      degree: &mut FxHashMap<VirtualRegister, usize>,
                      removed: &mut FxHashSet<VirtualRegister>| {
        removed.insert(v);
        stack.push(v);
        if let Some(neighbors) = graph.edges.get(&v) {
            for n in neighbors {
                if let Some(d) = degree.get_mut(n) {
                    *d = d.saturating_sub(1);
                }
            }
        }
    };

    while removed.len() < graph.nodes.len() {
        let trivial = graph
            .nodes
            .iter()
            .copied()
            .find(|v| !removed.contains(v) && degree[v] < usize::from(k));
        if let Some(v) = trivial {
            remove(v, &mut degree, &mut removed);
            continue;
        }

        let candidate = graph
            .nodes
            .iter()
            .copied()
            .filter(|v| !removed.contains(v))
            .min_by(|&a, &b| {
                let weight = |v: VirtualRegister| {
                    if unspillable.contains(&v) {
                        f64::INFINITY
                    } else {
                        cost(v) / degree[&v].max(1) as f64
                    }
                };
                weight(a).total_cmp(&weight(b)).then(a.cmp(&b))
            });
        if let Some(v) = candidate {
            log::trace!("optimistically pushing {}", v);
            remove(v, &mut degree, &mut removed);
        }
    }

    let mut colors: FxHashMap<VirtualRegister, u16> = FxHashMap::default();
    while let Some(v) = stack.pop() {
        if clobbered.contains(&v) {
            continue;
        }
        let mut taken: FxHashSet<u16> = graph.forbidden.get(&v).cloned().unwrap_or_default();
        if let Some(neighbors) = graph.edges.get(&v) {
            taken.extend(neighbors.iter().filter_map(|n| colors.get(n).copied()));
        }
        if let Some(color) = (0..k).find(|c| !taken.contains(c)) {
            colors.insert(v, color);
        }
    }
    colors
}

/// Try to allocate every virtual register of `func` within `budget`.
///
/// On success the function is rewritten to physical registers and marked
/// allocated. Otherwise it is left untouched and the registers to spill are
/// returned. Fails only when nothing but unspillable registers is left
/// uncoloured.
pub fn allocate_function(
    func: &mut Function,
    budget: RegisterBudget,
) -> CompileResult<AllocationOutcome> {
    let interference = Interference::build(func);
    let mut assignment: FxHashMap<VirtualRegister, PhysicalRegister> = FxHashMap::default();
    let mut uncolored: Vec<VirtualRegister> = Vec::new();
    let mut used: FxHashMap<RegisterClass, u16> = FxHashMap::default();

    let mut classes: Vec<RegisterClass> = interference.graphs.keys().copied().collect();
    classes.sort_unstable();
    for class in classes {
        let Some(graph) = interference.graph(class) else {
            continue;
        };
        let k = budget.for_class(class);
        let colors = color_graph(
            graph,
            k,
            |v| interference.cost(v),
            &func.unspillable,
            &interference.across_calls,
        );
        for &v in graph.nodes() {
            match colors.get(&v) {
                Some(&index) => {
                    let used = used.entry(class).or_default();
                    *used = (*used).max(index + 1);
                    assignment.insert(v, PhysicalRegister { class, index });
                }
                None => uncolored.push(v),
            }
        }
    }

    if !uncolored.is_empty() {
        uncolored.sort_unstable();
        let spillable: Vec<VirtualRegister> = uncolored
            .iter()
            .copied()
            .filter(|v| !func.unspillable.contains(v))
            .collect();
        if spillable.is_empty() {
            return Err(CompileError::UnallocatableRegister {
                function: func.name.clone(),
                register: uncolored[0],
            });
        }
        return Ok(AllocationOutcome::NeedsSpill(spillable));
    }

    rewrite(func, &assignment);
    func.state.allocated = true;
    func.spill_request = None;
    Ok(AllocationOutcome::Allocated {
        general_used: used.get(&RegisterClass::General).copied().unwrap_or(0),
        predicate_used: used.get(&RegisterClass::Predicate).copied().unwrap_or(0),
    })
}

fn rewrite(func: &mut Function, assignment: &FxHashMap<VirtualRegister, PhysicalRegister>) {
    let replace = |reg: &mut Register| {
        if let Register::Virtual(v) = reg {
            if let Some(&phys) = assignment.get(v) {
                *reg = Register::Physical(phys);
            }
        }
    };
    func.for_each_instruction_mut(|inst| {
        inst.for_each_use_mut(replace);
        inst.for_each_def_mut(replace);
    });
    for param in &mut func.params {
        replace(&mut param.reg);
    }
}

/// Graph-colouring register allocator
#[derive(Debug, Default)]
pub struct ChaitinBriggsAllocator {
    general: Option<u16>,
    predicates: Option<u16>,
}

impl ChaitinBriggsAllocator {
    pub const NAME: &'static str = "ChaitinBriggsRegisterAllocatorPass";

    pub fn new() -> Self {
        Self::default()
    }

    /// Register budget for `ctx`, with option overrides applied
    pub fn budget(&self, ctx: &Context) -> RegisterBudget {
        let target = ctx.target();
        RegisterBudget {
            general: self.general.unwrap_or(target.general_registers),
            predicate: self.predicates.unwrap_or(target.predicate_registers),
        }
    }
}

impl Pass for ChaitinBriggsAllocator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configure(&mut self, options: &PassOptions) {
        options.warn_unknown(Self::NAME, &["registers", "predicates"]);
        if let Some(n) = options.parse_value("registers") {
            self.general = Some(n);
        }
        if let Some(n) = options.parse_value("predicates") {
            self.predicates = Some(n);
        }
    }

    fn run_on_function(&self, func: &mut Function, ctx: &Context) -> CompileResult<()> {
        if func.state.allocated {
            return Ok(());
        }
        let budget = self.budget(ctx);
        match allocate_function(func, budget)? {
            AllocationOutcome::Allocated {
                general_used,
                predicate_used,
            } => {
                log::debug!(
                    "'{}': allocated with {} general and {} predicate registers",
                    func.name,
                    general_used,
                    predicate_used
                );
            }
            AllocationOutcome::NeedsSpill(registers) => {
                log::debug!("'{}': {} registers need spilling", func.name, registers.len());
                func.spill_request = Some(SpillRequest {
                    registers,
                    general_registers: budget.general,
                    predicate_registers: budget.predicate,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Opcode, Operand, Type};

    /// `n` values all live at once, summed at the end
    fn make_pressure(n: usize) -> (Function, Vec<VirtualRegister>) {
        let mut func = Function::new("pressure");
        let mut b = FunctionBuilder::new(&mut func);
        let values: Vec<VirtualRegister> = (0..n)
            .map(|i| b.const_int(Type::I32, i as i64).unwrap())
            .collect();
        let mut acc = values[0];
        for &v in &values[1..] {
            acc = b
                .binary(
                    Opcode::Add,
                    Type::I32,
                    Operand::register(acc, Type::I32),
                    Operand::register(v, Type::I32),
                )
                .unwrap();
        }
        b.store(Operand::address("out", 0), Operand::register(acc, Type::I32))
            .unwrap();
        b.ret().unwrap();
        (func, values)
    }

    fn budget(general: u16) -> RegisterBudget {
        RegisterBudget {
            general,
            predicate: 2,
        }
    }

    #[test]
    fn test_interference_of_simultaneously_live_values() {
        let (func, values) = make_pressure(3);
        let interference = Interference::build(&func);
        let graph = interference.graph(RegisterClass::General).unwrap();
        assert!(graph.interferes(values[0], values[1]));
        assert!(graph.interferes(values[1], values[2]));
        assert!(graph.interferes(values[0], values[2]));
    }

    #[test]
    fn test_copy_source_does_not_interfere() {
        let mut func = Function::new("copy");
        let mut b = FunctionBuilder::new(&mut func);
        let x = b.param(Type::I32);
        let y = b.copy(Type::I32, Operand::register(x, Type::I32)).unwrap();
        b.store(Operand::address("out", 0), Operand::register(y, Type::I32))
            .unwrap();
        b.ret().unwrap();
        let interference = Interference::build(&func);
        let graph = interference.graph(RegisterClass::General).unwrap();
        assert!(!graph.interferes(x, y));
    }

    #[test]
    fn test_allocation_rewrites_to_physical() {
        let (mut func, _) = make_pressure(4);
        let outcome = allocate_function(&mut func, budget(8)).unwrap();
        assert!(matches!(outcome, AllocationOutcome::Allocated { general_used, .. } if general_used <= 8));
        assert!(func.state.allocated);
        for inst in func.instructions() {
            assert!(inst.uses().iter().chain(&inst.defs()).all(|r| !r.is_virtual()));
        }
        crate::ir::verify_function(&func).unwrap();
    }

    #[test]
    fn test_colors_never_shared_by_interfering_registers() {
        let (mut func, values) = make_pressure(5);
        let interference = Interference::build(&func);
        allocate_function(&mut func, budget(5)).unwrap();
        let entry = func.entry().unwrap();
        let block = func.block(entry).unwrap();
        // the first five instructions define the five constants
        let colors: Vec<Register> = (0..values.len())
            .map(|i| block.get(i).unwrap().defs()[0])
            .collect();
        let graph = interference.graph(RegisterClass::General).unwrap();
        for i in 0..values.len() {
            for j in i + 1..values.len() {
                if graph.interferes(values[i], values[j]) {
                    assert_ne!(colors[i], colors[j]);
                }
            }
        }
    }

    #[test]
    fn test_too_few_registers_requests_spill() {
        let (mut func, _) = make_pressure(6);
        let before = func.to_string();
        let outcome = allocate_function(&mut func, budget(3)).unwrap();
        let AllocationOutcome::NeedsSpill(regs) = outcome else {
            panic!("expected a spill request");
        };
        assert!(!regs.is_empty());
        assert!(!func.state.allocated);
        assert_eq!(func.to_string(), before);
    }

    #[test]
    fn test_value_live_across_call_is_spilled() {
        let mut func = Function::new("caller");
        let mut b = FunctionBuilder::new(&mut func);
        let x = b.const_int(Type::I32, 5).unwrap();
        let arg = b.const_int(Type::I32, 6).unwrap();
        b.call("g", vec![Operand::register(arg, Type::I32)], &[])
            .unwrap();
        let next = b.create_block();
        b.switch_to_block(next);
        b.store(Operand::address("out", 0), Operand::register(x, Type::I32))
            .unwrap();
        b.ret().unwrap();

        let interference = Interference::build(&func);
        assert!(interference.crosses_call(x));
        assert!(!interference.crosses_call(arg));
        let outcome = allocate_function(&mut func, budget(8)).unwrap();
        assert_eq!(outcome, AllocationOutcome::NeedsSpill(vec![x]));
    }

    #[test]
    fn test_pass_records_spill_request() {
        let (mut func, _) = make_pressure(6);
        let mut pass = ChaitinBriggsAllocator::new();
        pass.configure(&PassOptions::new().with("registers=3"));
        pass.run_on_function(&mut func, &Context::default()).unwrap();
        let request = func.spill_request.as_ref().unwrap();
        assert_eq!(request.general_registers, 3);
        assert_eq!(request.predicate_registers, 8);
    }

    #[test]
    fn test_unspillable_uncolored_is_an_error() {
        let mut func = Function::new("temps");
        let mut b = FunctionBuilder::new(&mut func);
        let x = b.param(Type::I32);
        let y = b.param(Type::I32);
        b.store(Operand::address("out", 0), Operand::register(x, Type::I32))
            .unwrap();
        b.store(Operand::address("out", 8), Operand::register(y, Type::I32))
            .unwrap();
        b.ret().unwrap();
        func.unspillable.extend([x, y]);
        let err = allocate_function(&mut func, budget(1)).unwrap_err();
        assert!(matches!(err, CompileError::UnallocatableRegister { .. }));
    }
}
