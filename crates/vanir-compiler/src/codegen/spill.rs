//! Spill code insertion
//!
//! Consumes the spill request left by the register allocator. Every spilled
//! register gets a slot in a per-function global `<function>.spill`; each
//! use is preceded by a load into a fresh temporary and each definition is
//! followed by a store from one. Temporaries are marked unspillable and the
//! function is re-allocated, repeating until it colours or the round limit
//! is reached.

use super::regalloc::{allocate_function, AllocationOutcome, RegisterBudget};
use super::{reserve_global, symbol_extent};
use crate::context::Context;
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    BasicBlockId, Function, Instruction, InstructionKind, Module, Opcode, Operand,
    Register, Type, VirtualRegister,
};
use crate::transforms::pass::{Pass, PassOptions};
use crate::transforms::ssa::{split_edge, split_entry};
use rustc_hash::{FxHashMap, FxHashSet};

const DEFAULT_MAX_ITERATIONS: usize = 8;

/// Name of the global holding the spill slots of `function`
pub fn spill_area_symbol(function: &str) -> String {
    format!("{}.spill", function)
}

/// Bytes of `<function>.spill` referenced by the function's instructions
pub fn spill_area_bytes(func: &Function, slot_bytes: u32) -> usize {
    symbol_extent(func, &spill_area_symbol(&func.name), slot_bytes)
}

/// Slot assignment for one function
struct SpillArea {
    symbol: String,
    slot_bytes: u32,
    slots: FxHashMap<VirtualRegister, i64>,
    next: i64,
}

impl SpillArea {
    fn new(func: &Function, slot_bytes: u32) -> Self {
        SpillArea {
            symbol: spill_area_symbol(&func.name),
            slot_bytes,
            slots: FxHashMap::default(),
            next: spill_area_bytes(func, slot_bytes) as i64,
        }
    }

    fn slot(&mut self, reg: VirtualRegister) -> Operand {
        let offset = *self.slots.entry(reg).or_insert_with(|| {
            let offset = self.next;
            self.next += i64::from(self.slot_bytes);
            offset
        });
        Operand::address(self.symbol.clone(), offset)
    }
}

fn load(func: &mut Function, temp: VirtualRegister, ty: Type, slot: Operand) -> Instruction {
    func.instruction(InstructionKind::Unary {
        opcode: Opcode::Ld,
        d: Some(Operand::register(temp, ty)),
        a: Some(slot),
    })
}

fn store(func: &mut Function, slot: Operand, value: Register, ty: Type) -> Instruction {
    func.instruction(InstructionKind::St {
        d: Some(slot),
        a: Some(Operand::register(value, ty)),
    })
}

fn spilled_registers(
    inst: &Instruction,
    spilled: &FxHashSet<VirtualRegister>,
    want_defs: bool,
) -> Vec<VirtualRegister> {
    let mut regs = Vec::new();
    inst.visit_registers(|reg, _, is_def| {
        if let Register::Virtual(v) = reg {
            if is_def == want_defs && spilled.contains(&v) && !regs.contains(&v) {
                regs.push(v);
            }
        }
    });
    regs
}

/// Rewrite every access to `registers` through their spill slots
fn insert_spill_code(
    func: &mut Function,
    registers: &[VirtualRegister],
    area: &mut SpillArea,
) -> CompileResult<()> {
    let spilled: FxHashSet<VirtualRegister> = registers.iter().copied().collect();
    let mut types: FxHashMap<VirtualRegister, Type> = FxHashMap::default();
    for &reg in registers {
        let ty = func.register_type(reg).unwrap_or(Type::I64);
        types.insert(reg, ty);
    }

    for block in func.block_ids() {
        let insts = func.try_block_mut(block)?.clear();
        let mut out = Vec::with_capacity(insts.len());
        let mut after_terminator = Vec::new();

        for mut inst in insts {
            let mut temps: FxHashMap<VirtualRegister, VirtualRegister> = FxHashMap::default();
            let reads = spilled_registers(&inst, &spilled, false);
            let writes = spilled_registers(&inst, &spilled, true);

            // a guarded definition may not happen, so its temporary starts
            // out holding the current value
            let mut to_load = reads;
            if inst.is_conditional() {
                for &reg in &writes {
                    if !to_load.contains(&reg) {
                        to_load.push(reg);
                    }
                }
            }
            for reg in to_load {
                let ty = types[&reg];
                let temp = func.new_register(ty);
                func.unspillable.insert(temp);
                let slot = area.slot(reg);
                out.push(load(func, temp, ty, slot));
                temps.insert(reg, temp);
            }
            inst.for_each_use_mut(|r| {
                if let Some(&temp) = r.as_virtual().and_then(|v| temps.get(&v)) {
                    *r = Register::Virtual(temp);
                }
            });

            let mut stores = Vec::new();
            let mut def_temps: FxHashMap<VirtualRegister, VirtualRegister> = FxHashMap::default();
            for reg in writes {
                let ty = types[&reg];
                let temp = match temps.get(&reg) {
                    Some(&temp) if inst.is_conditional() => temp,
                    _ => {
                        let temp = func.new_register(ty);
                        func.unspillable.insert(temp);
                        temp
                    }
                };
                def_temps.insert(reg, temp);
                let slot = area.slot(reg);
                stores.push(store(func, slot, Register::Virtual(temp), ty));
            }
            inst.for_each_def_mut(|r| {
                if let Some(&temp) = r.as_virtual().and_then(|v| def_temps.get(&v)) {
                    *r = Register::Virtual(temp);
                }
            });

            if inst.is_branch() {
                out.push(inst);
                after_terminator = stores;
            } else {
                out.push(inst);
                out.extend(stores);
            }
        }

        func.try_block_mut(block)?.replace_instructions(out)?;
        if !after_terminator.is_empty() {
            store_on_fallthrough(func, block, after_terminator)?;
        }
    }

    // spilled parameters arrive in registers and go to memory on entry
    let params: Vec<(Register, Type)> = func
        .params
        .iter()
        .filter(|p| p.reg.as_virtual().is_some_and(|v| spilled.contains(&v)))
        .map(|p| (p.reg, p.ty))
        .collect();
    if params.is_empty() {
        return Ok(());
    }
    // the stores run once, so not in an entry that loops
    if let Some(entry) = split_entry(func)? {
        for (index, (reg, ty)) in params.into_iter().enumerate() {
            if let Register::Virtual(v) = reg {
                func.unspillable.insert(v);
                let slot = area.slot(v);
                let inst = store(func, slot, reg, ty);
                func.try_block_mut(entry)?.insert(index, inst)?;
            }
        }
    }
    Ok(())
}

/// Stores for values defined by a call go on the edge to its continuation
fn store_on_fallthrough(
    func: &mut Function,
    block: BasicBlockId,
    stores: Vec<Instruction>,
) -> CompileResult<()> {
    let Some(succ) = func.layout_successor(block) else {
        return Err(CompileError::malformed_at(
            &func.name,
            block,
            None,
            "spilled call result has no continuation block",
        ));
    };
    let split = split_edge(func, block, succ)?;
    let split_block = func.try_block_mut(split)?;
    for inst in stores {
        split_block.insert_before_terminator(inst)?;
    }
    Ok(())
}

/// Iterative spiller driving the register allocator
#[derive(Debug)]
pub struct GenericSpillCode {
    max_iterations: usize,
}

impl Default for GenericSpillCode {
    fn default() -> Self {
        GenericSpillCode {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl GenericSpillCode {
    pub const NAME: &'static str = "GenericSpillCodePass";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }
}

impl Pass for GenericSpillCode {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configure(&mut self, options: &PassOptions) {
        options.warn_unknown(Self::NAME, &["max-iterations"]);
        if let Some(n) = options.parse_value("max-iterations") {
            self.max_iterations = n;
        }
    }

    /// Spill and re-allocate one function. The slots live in
    /// `<function>.spill`, which `run_on_module` declares.
    fn run_on_function(&self, func: &mut Function, ctx: &Context) -> CompileResult<()> {
        if func.state.allocated {
            return Ok(());
        }
        let Some(request) = func.spill_request.take() else {
            return Ok(());
        };
        if func
            .instructions()
            .any(|i| matches!(i.opcode(), Opcode::Phi | Opcode::Psi))
        {
            return Err(CompileError::malformed(
                &func.name,
                "spill code cannot be inserted while Phi or Psi instructions remain",
            ));
        }

        let budget = RegisterBudget {
            general: request.general_registers,
            predicate: request.predicate_registers,
        };
        let mut area = SpillArea::new(func, ctx.target().abi_slot_bytes);
        let mut pending = request.registers;
        for round in 0..self.max_iterations {
            log::debug!(
                "'{}': spill round {}, {} registers",
                func.name,
                round + 1,
                pending.len()
            );
            insert_spill_code(func, &pending, &mut area)?;
            match allocate_function(func, budget)? {
                AllocationOutcome::Allocated { .. } => return Ok(()),
                AllocationOutcome::NeedsSpill(more) => pending = more,
            }
        }
        Err(CompileError::AllocationDidNotConverge {
            function: func.name.clone(),
            iterations: self.max_iterations,
        })
    }

    fn run_on_module(&self, module: &mut Module, ctx: &Context) -> CompileResult<()> {
        let slot_bytes = ctx.target().abi_slot_bytes;
        let mut areas = Vec::new();
        for func in module.functions_mut() {
            if func.spill_request.is_none() {
                continue;
            }
            self.run_on_function(func, ctx)?;
            areas.push((spill_area_symbol(&func.name), spill_area_bytes(func, slot_bytes)));
        }
        for (name, bytes) in areas {
            reserve_global(module, &name, bytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::regalloc::ChaitinBriggsAllocator;
    use crate::ir::{verify_module, FunctionBuilder, Global};

    /// `n` constants all live at once, summed into `out`
    fn make_pressure_module(n: usize) -> Module {
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
        let mut module = Module::new("m");
        module.add_global(Global::zeroed("out", 8));
        module.add_function(func);
        module
    }

    fn allocate(module: &mut Module, registers: &str) {
        let mut pass = ChaitinBriggsAllocator::new();
        pass.configure(&PassOptions::parse(registers));
        pass.run_on_module(module, &Context::default()).unwrap();
    }

    #[test]
    fn test_spilling_converges() {
        let mut module = make_pressure_module(6);
        allocate(&mut module, "registers=3");
        assert!(module.function_by_name("pressure").unwrap().spill_request.is_some());

        GenericSpillCode::new()
            .run_on_module(&mut module, &Context::default())
            .unwrap();
        let func = module.function_by_name("pressure").unwrap();
        assert!(func.state.allocated);
        assert!(func.spill_request.is_none());

        let area = module.global("pressure.spill").unwrap();
        assert_eq!(area.bytes() % 8, 0);
        assert_eq!(area.bytes(), spill_area_bytes(func, 8));
        assert!(func
            .instructions()
            .any(|i| i.opcode() == Opcode::Ld && i.to_string().contains("pressure.spill")));
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_spill_code_shape() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let x = b.param(Type::I32);
        let y = b
            .binary(
                Opcode::Add,
                Type::I32,
                Operand::register(x, Type::I32),
                Operand::immediate(1, Type::I32),
            )
            .unwrap();
        b.store(Operand::address("out", 0), Operand::register(y, Type::I32))
            .unwrap();
        b.ret().unwrap();

        let mut area = SpillArea::new(&func, 8);
        insert_spill_code(&mut func, &[y], &mut area).unwrap();
        let ops: Vec<Opcode> = func.instructions().map(|i| i.opcode()).collect();
        assert_eq!(
            ops,
            vec![Opcode::Add, Opcode::St, Opcode::Ld, Opcode::St, Opcode::Ret]
        );
        assert_eq!(spill_area_bytes(&func, 8), 8);
        assert!(!func.instructions().any(|i| i.uses().contains(&Register::Virtual(y))));
        assert_eq!(func.unspillable.len(), 2);
    }

    #[test]
    fn test_guarded_definition_reloads_first() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let p = b.param(Type::I1);
        let x = b.param(Type::I32);
        b.emit_guarded(
            crate::ir::PredicateOperand::new(p),
            InstructionKind::Binary {
                opcode: Opcode::Add,
                d: Some(Operand::register(x, Type::I32)),
                a: Some(Operand::register(x, Type::I32)),
                b: Some(Operand::immediate(1, Type::I32)),
            },
        )
        .unwrap();
        b.ret().unwrap();

        let mut area = SpillArea::new(&func, 8);
        insert_spill_code(&mut func, &[x], &mut area).unwrap();
        let ops: Vec<Opcode> = func.instructions().map(|i| i.opcode()).collect();
        // entry store of the parameter, reload, guarded add, store back
        assert_eq!(
            ops,
            vec![Opcode::St, Opcode::Ld, Opcode::Add, Opcode::St, Opcode::Ret]
        );
        let add = func.instructions().nth(2).unwrap();
        assert_eq!(add.defs(), add.a().and_then(|a| a.reg()).copied().into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_parameter_stored_before_looping_entry() {
        let mut func = Function::new("f");
        let mut b = FunctionBuilder::new(&mut func);
        let body = b.current_block();
        let exit = b.create_block();
        let p = b.param(Type::I1);
        let x = b.param(Type::I32);
        b.emit(InstructionKind::Binary {
            opcode: Opcode::Add,
            d: Some(Operand::register(x, Type::I32)),
            a: Some(Operand::register(x, Type::I32)),
            b: Some(Operand::immediate(1, Type::I32)),
        })
        .unwrap();
        b.branch_if(crate::ir::PredicateOperand::new(p), body).unwrap();
        b.switch_to_block(exit);
        b.ret().unwrap();

        let mut area = SpillArea::new(&func, 8);
        insert_spill_code(&mut func, &[x], &mut area).unwrap();
        let entry = func.entry().unwrap();
        assert_ne!(entry, body);
        let opcodes = |block: BasicBlockId| -> Vec<Opcode> {
            func.block(block).unwrap().iter().map(|i| i.opcode()).collect()
        };
        assert_eq!(opcodes(entry), vec![Opcode::St, Opcode::Bra]);
        assert_eq!(
            opcodes(body),
            vec![Opcode::Ld, Opcode::Add, Opcode::St, Opcode::Bra]
        );
        crate::ir::verify_function(&func).unwrap();
    }

    #[test]
    fn test_call_results_stored_on_edge() {
        let mut func = Function::new("caller");
        let mut b = FunctionBuilder::new(&mut func);
        let r = b.call("callee", vec![], &[Type::I32]).unwrap()[0];
        let next = b.create_block();
        b.switch_to_block(next);
        b.store(Operand::address("out", 0), Operand::register(r, Type::I32))
            .unwrap();
        b.ret().unwrap();

        let mut area = SpillArea::new(&func, 8);
        insert_spill_code(&mut func, &[r], &mut area).unwrap();
        assert_eq!(func.block_count(), 3);
        let split = func.layout_successor(func.entry().unwrap()).unwrap();
        let ops: Vec<Opcode> = func
            .block(split)
            .unwrap()
            .iter()
            .map(|i| i.opcode())
            .collect();
        assert_eq!(ops, vec![Opcode::St, Opcode::Bra]);
    }

    #[test]
    fn test_value_live_across_call_goes_through_memory() {
        let mut func = Function::new("caller");
        let mut b = FunctionBuilder::new(&mut func);
        let x = b.const_int(Type::I32, 5).unwrap();
        b.call("g", vec![], &[]).unwrap();
        let next = b.create_block();
        b.switch_to_block(next);
        b.store(Operand::address("out", 0), Operand::register(x, Type::I32))
            .unwrap();
        b.ret().unwrap();
        let mut module = Module::new("m");
        module.add_global(Global::zeroed("out", 8));
        module.add_function(func);

        allocate(&mut module, "registers=8");
        GenericSpillCode::new()
            .run_on_module(&mut module, &Context::default())
            .unwrap();
        let func = module.function_by_name("caller").unwrap();
        assert!(func.state.allocated);
        let opcodes = |block: BasicBlockId| -> Vec<Opcode> {
            func.block(block).unwrap().iter().map(|i| i.opcode()).collect()
        };
        let entry = func.entry().unwrap();
        let entry_ops = opcodes(entry);
        assert_eq!(entry_ops[entry_ops.len() - 2..], [Opcode::St, Opcode::Call]);
        let next = func.layout_successor(entry).unwrap();
        assert_eq!(opcodes(next), vec![Opcode::Ld, Opcode::St, Opcode::Ret]);
        assert_eq!(module.global("caller.spill").unwrap().bytes(), 8);
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_round_limit_reported() {
        let mut module = make_pressure_module(6);
        allocate(&mut module, "registers=3");
        let mut pass = GenericSpillCode::new();
        pass.configure(&PassOptions::parse("max-iterations=0"));
        let err = pass
            .run_on_module(&mut module, &Context::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::AllocationDidNotConverge { iterations: 0, .. }
        ));
    }

    #[test]
    fn test_unallocatable_temporaries() {
        let mut func = Function::new("tight");
        let mut b = FunctionBuilder::new(&mut func);
        let x = b.param(Type::I32);
        let y = b.param(Type::I32);
        let sum = b
            .binary(
                Opcode::Add,
                Type::I32,
                Operand::register(x, Type::I32),
                Operand::register(y, Type::I32),
            )
            .unwrap();
        b.store(Operand::address("out", 0), Operand::register(sum, Type::I32))
            .unwrap();
        b.ret().unwrap();
        let mut module = Module::new("m");
        module.add_global(Global::zeroed("out", 8));
        module.add_function(func);

        allocate(&mut module, "registers=1");
        let err = GenericSpillCode::new()
            .run_on_module(&mut module, &Context::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::UnallocatableRegister { .. }));
    }
}
