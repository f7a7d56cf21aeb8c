//! Pass registry
//!
//! Maps pass names (and their short aliases) to constructors. Lookup never
//! panics: an unknown name simply yields `None`, and nothing is constructed.

use super::pass::{Pass, PassOptions};
use super::ssa::{ConvertFromSsa, ConvertToSsa};
use crate::codegen::{
    ChaitinBriggsAllocator, EnforceArchaeopteryxAbi, GenericSpillCode, ListScheduler,
    TranslationTableSelection,
};
use rustc_hash::FxHashMap;

/// Creates a fresh, unconfigured pass
pub type PassConstructor = fn() -> Box<dyn Pass>;

/// Name -> constructor table
#[derive(Clone)]
pub struct PassRegistry {
    constructors: FxHashMap<String, PassConstructor>,
    /// alias -> canonical name
    aliases: FxHashMap<String, String>,
}

impl PassRegistry {
    /// Registry with every built-in lowering pass
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(ConvertToSsa::NAME, || Box::new(ConvertToSsa::new()));
        registry.register(ConvertFromSsa::NAME, || Box::new(ConvertFromSsa::new()));
        registry.register(TranslationTableSelection::NAME, || {
            Box::new(TranslationTableSelection::new())
        });
        registry.register(ListScheduler::NAME, || Box::new(ListScheduler::new()));
        registry.register(ChaitinBriggsAllocator::NAME, || {
            Box::new(ChaitinBriggsAllocator::new())
        });
        registry.register(GenericSpillCode::NAME, || Box::new(GenericSpillCode::new()));
        registry.register(EnforceArchaeopteryxAbi::NAME, || {
            Box::new(EnforceArchaeopteryxAbi::new())
        });

        registry.register_alias("ConvertToSSA", ConvertToSsa::NAME);
        registry.register_alias("ConvertFromSSA", ConvertFromSsa::NAME);
        registry.register_alias("translation-table", TranslationTableSelection::NAME);
        registry.register_alias("list", ListScheduler::NAME);
        registry.register_alias("chaitin-briggs", ChaitinBriggsAllocator::NAME);
        registry.register_alias("generic-spiller", GenericSpillCode::NAME);
        registry
    }

    /// Registry with no passes
    pub fn empty() -> Self {
        PassRegistry {
            constructors: FxHashMap::default(),
            aliases: FxHashMap::default(),
        }
    }

    /// Register a pass under its canonical name, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, constructor: PassConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Make `alias` resolve to `canonical`
    pub fn register_alias(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.aliases.insert(alias.into(), canonical.into());
    }

    /// Resolve an alias or canonical name to the canonical name
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        let canonical = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.constructors
            .get_key_value(canonical)
            .map(|(key, _)| key.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.canonical_name(name).is_some()
    }

    /// Every accepted name, canonical names and aliases, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .constructors
            .keys()
            .map(String::as_str)
            .chain(
                self.aliases
                    .iter()
                    .filter(|(_, canonical)| self.constructors.contains_key(*canonical))
                    .map(|(alias, _)| alias.as_str()),
            )
            .collect();
        names.sort_unstable();
        names
    }

    /// Construct and configure the pass registered under `name`
    pub fn create_pass(&self, name: &str, options: &PassOptions) -> Option<Box<dyn Pass>> {
        let canonical = self.canonical_name(name)?;
        let constructor = self.constructors.get(canonical)?;
        let mut pass = constructor();
        pass.configure(options);
        Some(pass)
    }
}

impl Default for PassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Create a built-in pass by name
pub fn create_pass(name: &str, options: &PassOptions) -> Option<Box<dyn Pass>> {
    PassRegistry::new().create_pass(name, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::CompileResult;
    use crate::ir::Function;

    struct Nop;

    impl Pass for Nop {
        fn name(&self) -> &str {
            "nop"
        }

        fn run_on_function(&self, _func: &mut Function, _ctx: &Context) -> CompileResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_aliases_resolve() {
        let registry = PassRegistry::new();
        assert_eq!(registry.canonical_name("list"), Some("ListInstructionSchedulerPass"));
        assert_eq!(
            registry.canonical_name("chaitin-briggs"),
            Some("ChaitinBriggsRegisterAllocatorPass")
        );
        assert_eq!(
            registry.canonical_name("ConvertToSSAPass"),
            Some("ConvertToSSAPass")
        );
        assert_eq!(registry.canonical_name("dce"), None);
    }

    #[test]
    fn test_create_pass_by_alias() {
        let registry = PassRegistry::new();
        let pass = registry
            .create_pass("generic-spiller", &PassOptions::new())
            .unwrap();
        assert_eq!(pass.name(), "GenericSpillCodePass");
        assert!(registry.create_pass("no-such-pass", &PassOptions::new()).is_none());
    }

    #[test]
    fn test_register_custom_pass() {
        let mut registry = PassRegistry::empty();
        assert!(!registry.contains("nop"));
        registry.register("nop", || Box::new(Nop));
        registry.register_alias("noop", "nop");
        assert!(registry.contains("noop"));
        assert_eq!(registry.names(), vec!["nop", "noop"]);
    }

    #[test]
    fn test_dangling_alias_is_unknown() {
        let mut registry = PassRegistry::empty();
        registry.register_alias("ghost", "Missing");
        assert!(!registry.contains("ghost"));
        assert!(registry.names().is_empty());
    }
}
