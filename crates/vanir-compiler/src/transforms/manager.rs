//! Pass manager
//!
//! Builds a pipeline from `(name, options)` pairs and runs it over a module.
//! Every name is resolved before any pass runs. Passes work on a scratch copy
//! of the module, and the copy only replaces the caller's module once the
//! whole pipeline has succeeded.

use super::pass::{Pass, PassOptions};
use super::registry::PassRegistry;
use crate::context::Context;
use crate::error::{CompileError, CompileResult};
use crate::ir::{verify_module, Module};

/// A sequence of configured passes
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    verify: bool,
}

impl PassManager {
    /// Create an empty pipeline
    pub fn new() -> Self {
        PassManager {
            passes: Vec::new(),
            verify: true,
        }
    }

    /// Build a pipeline from names and options. The first unknown name fails
    /// the whole construction and nothing is run.
    pub fn from_pipeline<N: AsRef<str>>(
        registry: &PassRegistry,
        pipeline: &[(N, PassOptions)],
    ) -> CompileResult<Self> {
        if let Some((name, _)) = pipeline
            .iter()
            .find(|(name, _)| !registry.contains(name.as_ref()))
        {
            return Err(CompileError::UnknownPass(name.as_ref().to_string()));
        }

        let mut manager = Self::new();
        for (name, options) in pipeline {
            let pass = registry
                .create_pass(name.as_ref(), options)
                .ok_or_else(|| CompileError::UnknownPass(name.as_ref().to_string()))?;
            manager.add_pass(pass);
        }
        Ok(manager)
    }

    /// Build a pipeline from bare names with no options
    pub fn from_names(registry: &PassRegistry, names: &[&str]) -> CompileResult<Self> {
        let pipeline: Vec<(&str, PassOptions)> =
            names.iter().map(|&n| (n, PassOptions::new())).collect();
        Self::from_pipeline(registry, &pipeline)
    }

    /// Add a pass to the pipeline
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Enable or disable the well-formedness check after each pass
    pub fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    /// Names of the passes, in run order
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run all passes in order. On failure `module` is left untouched.
    pub fn run(&self, module: &mut Module, ctx: &Context) -> CompileResult<()> {
        let mut scratch = module.clone();
        for pass in &self.passes {
            log::debug!("running pass '{}' on module '{}'", pass.name(), scratch.name);
            let wrap = |source: CompileError| CompileError::PassFailed {
                pass: pass.name().to_string(),
                source: Box::new(source),
            };
            pass.run_on_module(&mut scratch, ctx).map_err(wrap)?;
            if self.verify {
                verify_module(&scratch).map_err(wrap)?;
            }
        }
        *module = scratch;
        Ok(())
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, FunctionBuilder, Global, Opcode, Operand, Type};

    struct Breaker;

    impl Pass for Breaker {
        fn name(&self) -> &str {
            "breaker"
        }

        fn run_on_function(&self, func: &mut Function, _ctx: &Context) -> CompileResult<()> {
            if let Some(entry) = func.entry() {
                if let Some(block) = func.block_mut(entry) {
                    block.take_terminator();
                }
            }
            Ok(())
        }
    }

    fn make_module() -> Module {
        let mut func = Function::new("main");
        let mut b = FunctionBuilder::new(&mut func);
        let x = b.const_int(Type::I32, 2).unwrap();
        let y = b
            .binary(
                Opcode::Add,
                Type::I32,
                Operand::register(x, Type::I32),
                Operand::register(x, Type::I32),
            )
            .unwrap();
        b.store(Operand::address("out", 0), Operand::register(y, Type::I32))
            .unwrap();
        b.ret().unwrap();
        let mut module = Module::new("m");
        module.add_global(Global::new("out", Type::I32));
        module.add_function(func);
        module
    }

    #[test]
    fn test_unknown_name_rejected_before_running() {
        let registry = PassRegistry::new();
        let err = PassManager::from_names(&registry, &["list", "bogus", "also-bogus"])
            .err()
            .unwrap();
        assert!(matches!(err, CompileError::UnknownPass(name) if name == "bogus"));
    }

    #[test]
    fn test_failed_verification_names_pass_and_keeps_module() {
        let mut module = make_module();
        let before = module.to_string();
        let mut manager = PassManager::new();
        manager.add_pass(Box::new(Breaker));

        let err = manager.run(&mut module, &Context::default()).unwrap_err();
        assert_eq!(err.pass_name(), Some("breaker"));
        assert!(matches!(err.root_cause(), CompileError::MalformedIr { .. }));
        assert_eq!(module.to_string(), before);
    }

    #[test]
    fn test_runs_in_order() {
        let registry = PassRegistry::new();
        let manager =
            PassManager::from_names(&registry, &["translation-table", "list"]).unwrap();
        assert_eq!(
            manager.pass_names(),
            vec![
                "TranslationTableInstructionSelectionPass",
                "ListInstructionSchedulerPass"
            ]
        );
        let mut module = make_module();
        manager.run(&mut module, &Context::default()).unwrap();
        let func = module.function_by_name("main").unwrap();
        assert!(func.state.selected);
        assert!(func.state.scheduled);
    }
}
