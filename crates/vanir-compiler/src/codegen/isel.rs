//! Translation-table instruction selection
//!
//! Each IR instruction is looked up in a table keyed by its opcode and the
//! kind of operand in its `a` slot. A rule keyed on the operand kind is more
//! specific than one keyed on the opcode alone and wins. A rule either keeps
//! the instruction, expands it through a template (the expansion is selected
//! again), or marks the opcode as unsupported on the target.

use crate::config::Target;
use crate::context::Context;
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    BasicBlockId, Function, Instruction, InstructionKind, Opcode, Operand, OperandKind, Type,
};
use crate::transforms::pass::{Pass, PassOptions};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Operand shape a rule applies to; `None` matches any `a` operand
pub type OperandPattern = Option<OperandKind>;

/// Expansion templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// `d = a rem b` as `q = a div b; p = q * b; d = a - p`
    RemainderViaDivide { divide: Opcode },
    /// Move an immediate `a` operand into a fresh register first
    MaterializeA,
}

/// What selection does with a matching instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Identity,
    Expand(Template),
    Unsupported,
}

const CONVERSIONS: [Opcode; 10] = [
    Opcode::Bitcast,
    Opcode::Fpext,
    Opcode::Fptosi,
    Opcode::Fptoui,
    Opcode::Fptrunc,
    Opcode::Sext,
    Opcode::Sitofp,
    Opcode::Trunc,
    Opcode::Uitofp,
    Opcode::Zext,
];

const ARITHMETIC: [Opcode; 14] = [
    Opcode::Add,
    Opcode::And,
    Opcode::Ashr,
    Opcode::Fdiv,
    Opcode::Fmul,
    Opcode::Frem,
    Opcode::Lshr,
    Opcode::Mul,
    Opcode::Or,
    Opcode::Sdiv,
    Opcode::Shl,
    Opcode::Sub,
    Opcode::Udiv,
    Opcode::Xor,
];

/// Rules for one target
#[derive(Debug, Clone)]
pub struct TranslationTable {
    target: String,
    rules: FxHashMap<(Opcode, OperandPattern), Rule>,
}

impl TranslationTable {
    /// Table for a target-independent machine: every concrete form is native
    pub fn generic(target: impl Into<String>) -> Self {
        let mut table = TranslationTable {
            target: target.into(),
            rules: FxHashMap::default(),
        };

        for op in CONVERSIONS {
            table.insert(op, None, Rule::Identity);
        }
        table.insert(Opcode::Ld, Some(OperandKind::Memory), Rule::Identity);
        table.insert(Opcode::Atom, Some(OperandKind::Memory), Rule::Identity);
        table.insert(Opcode::St, Some(OperandKind::Register), Rule::Identity);
        table.insert(
            Opcode::St,
            Some(OperandKind::Immediate),
            Rule::Expand(Template::MaterializeA),
        );

        for op in ARITHMETIC.into_iter().chain([Opcode::Setp]) {
            table.insert(op, Some(OperandKind::Register), Rule::Identity);
            table.insert(
                op,
                Some(OperandKind::Immediate),
                Rule::Expand(Template::MaterializeA),
            );
        }
        table.insert(
            Opcode::Srem,
            None,
            Rule::Expand(Template::RemainderViaDivide {
                divide: Opcode::Sdiv,
            }),
        );
        table.insert(
            Opcode::Urem,
            None,
            Rule::Expand(Template::RemainderViaDivide {
                divide: Opcode::Udiv,
            }),
        );

        for op in [
            Opcode::Bra,
            Opcode::Call,
            Opcode::Ret,
            Opcode::Bar,
            Opcode::Membar,
            Opcode::Launch,
        ] {
            table.insert(op, None, Rule::Identity);
        }

        table.insert(Opcode::Phi, None, Rule::Unsupported);
        table.insert(Opcode::Psi, None, Rule::Unsupported);
        table
    }

    /// The Archaeopteryx substrate has no kernel launch
    pub fn archaeopteryx() -> Self {
        let mut table = Self::generic("archaeopteryx");
        table.insert(Opcode::Launch, None, Rule::Unsupported);
        table
    }

    /// Table for `target`, by name
    pub fn for_target(target: &Target) -> Self {
        match target.name.as_str() {
            "archaeopteryx" => Self::archaeopteryx(),
            name => Self::generic(name),
        }
    }

    pub fn insert(&mut self, opcode: Opcode, pattern: OperandPattern, rule: Rule) {
        self.rules.insert((opcode, pattern), rule);
    }

    /// Most specific rule for `inst`
    pub fn lookup(&self, inst: &Instruction) -> Option<Rule> {
        let opcode = inst.opcode();
        let specific = inst
            .a()
            .and_then(|a| self.rules.get(&(opcode, Some(a.kind()))));
        specific
            .or_else(|| self.rules.get(&(opcode, None)))
            .copied()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Translation-table driven instruction selection
#[derive(Debug, Default)]
pub struct TranslationTableSelection;

impl TranslationTableSelection {
    pub const NAME: &'static str = "TranslationTableInstructionSelectionPass";

    pub fn new() -> Self {
        TranslationTableSelection
    }
}

impl Pass for TranslationTableSelection {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configure(&mut self, options: &PassOptions) {
        options.warn_unknown(Self::NAME, &[]);
    }

    fn run_on_function(&self, func: &mut Function, ctx: &Context) -> CompileResult<()> {
        if func.state.selected {
            return Ok(());
        }
        let table = TranslationTable::for_target(ctx.target());
        let mut expanded = 0;
        for block in func.block_ids() {
            expanded += select_block(func, &table, block)?;
        }
        func.state.selected = true;
        log::debug!(
            "'{}': selected for {}, {} expansions",
            func.name,
            table.target(),
            expanded
        );
        Ok(())
    }
}

fn select_block(
    func: &mut Function,
    table: &TranslationTable,
    block: BasicBlockId,
) -> CompileResult<usize> {
    let mut worklist: VecDeque<Instruction> = func.try_block_mut(block)?.clear().into();
    let mut selected = Vec::with_capacity(worklist.len());
    let mut expanded = 0;

    while let Some(inst) = worklist.pop_front() {
        match table.lookup(&inst) {
            Some(Rule::Identity) => selected.push(inst),
            Some(Rule::Expand(template)) => {
                log::trace!("expanding '{}' with {:?}", inst, template);
                let replacement = expand(func, block, inst, template)?;
                for new in replacement.into_iter().rev() {
                    worklist.push_front(new);
                }
                expanded += 1;
            }
            Some(Rule::Unsupported) | None => {
                return Err(CompileError::UnsupportedOpcode {
                    function: func.name.clone(),
                    block,
                    instruction: inst.id(),
                    opcode: inst.opcode(),
                    target: table.target().to_string(),
                });
            }
        }
    }

    func.try_block_mut(block)?.replace_instructions(selected)?;
    Ok(expanded)
}

fn expand(
    func: &mut Function,
    block: BasicBlockId,
    inst: Instruction,
    template: Template,
) -> CompileResult<Vec<Instruction>> {
    match template {
        Template::RemainderViaDivide { divide } => expand_remainder(func, block, inst, divide),
        Template::MaterializeA => materialize_a(func, block, inst),
    }
}

fn expand_remainder(
    func: &mut Function,
    block: BasicBlockId,
    inst: Instruction,
    divide: Opcode,
) -> CompileResult<Vec<Instruction>> {
    let id = inst.id();
    let guard = inst.guard().clone();
    let InstructionKind::Binary {
        d: Some(d),
        a: Some(a),
        b: Some(b),
        ..
    } = inst.kind
    else {
        return Err(CompileError::malformed_at(
            &func.name,
            block,
            Some(id),
            "remainder with missing operands",
        ));
    };
    let ty = d.as_register().map(|r| r.ty).unwrap_or(Type::I64);
    let quotient = func.new_register_operand(ty);
    let product = func.new_register_operand(ty);

    let mut binary = |opcode: Opcode, d: Operand, a: Operand, b: Operand| {
        let mut new = func.instruction(InstructionKind::Binary {
            opcode,
            d: Some(d),
            a: Some(a),
            b: Some(b),
        });
        new.set_guard(guard.clone());
        new
    };
    Ok(vec![
        binary(divide, quotient.clone(), a.clone(), b.clone()),
        binary(Opcode::Mul, product.clone(), quotient, b),
        binary(Opcode::Sub, d, a, product),
    ])
}

fn materialize_a(
    func: &mut Function,
    block: BasicBlockId,
    mut inst: Instruction,
) -> CompileResult<Vec<Instruction>> {
    let Some(Operand::Immediate(imm)) = inst.a().cloned() else {
        return Err(CompileError::malformed_at(
            &func.name,
            block,
            Some(inst.id()),
            "expected an immediate operand",
        ));
    };
    let temp = func.new_register_operand(imm.ty);
    let mut mov = func.instruction(InstructionKind::Unary {
        opcode: Opcode::Bitcast,
        d: Some(temp.clone()),
        a: Some(Operand::Immediate(imm)),
    });
    mov.set_guard(inst.guard().clone());
    inst.set_a(temp)?;
    Ok(vec![mov, inst])
}
