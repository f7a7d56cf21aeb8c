//! IR Module
//!
//! Top-level container for a compilation unit.

use super::function::{Function, FunctionId};
use super::global::Global;
use super::verify;
use crate::error::CompileResult;
use rustc_hash::FxHashMap;

/// An IR module (compilation unit)
#[derive(Debug, Clone)]
pub struct Module {
    /// Module name
    pub name: String,
    functions: Vec<Function>,
    globals: Vec<Global>,
    /// Function lookup by name
    function_map: FxHashMap<String, FunctionId>,
    /// Global lookup by name
    global_map: FxHashMap<String, usize>,
}

impl Module {
    /// Create a new empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
            function_map: FxHashMap::default(),
            global_map: FxHashMap::default(),
        }
    }

    /// Add a function to the module
    pub fn add_function(&mut self, mut func: Function) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        func.set_id(id);
        self.function_map.insert(func.name.clone(), id);
        self.functions.push(func);
        id
    }

    /// Add a global, replacing any existing global of the same name
    pub fn add_global(&mut self, global: Global) {
        match self.global_map.get(&global.name) {
            Some(&index) => self.globals[index] = global,
            None => {
                self.global_map.insert(global.name.clone(), self.globals.len());
                self.globals.push(global);
            }
        }
    }

    /// Get a function by ID
    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.0 as usize)
    }

    /// Get a function by ID mutably
    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut Function> {
        self.functions.get_mut(id.0 as usize)
    }

    /// Get a function by name
    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.function_map
            .get(name)
            .and_then(|&id| self.function(id))
    }

    /// Get a function by name mutably
    pub fn function_by_name_mut(&mut self, name: &str) -> Option<&mut Function> {
        let id = self.function_map.get(name).copied()?;
        self.function_mut(id)
    }

    /// Get a function ID by name
    pub fn function_id(&self, name: &str) -> Option<FunctionId> {
        self.function_map.get(name).copied()
    }

    /// Get a global by name
    pub fn global(&self, name: &str) -> Option<&Global> {
        self.global_map.get(name).map(|&index| &self.globals[index])
    }

    /// Get the number of functions
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Iterate over all functions
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    /// Iterate over all functions mutably
    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.functions.iter_mut()
    }

    /// Iterate over all globals
    pub fn globals(&self) -> impl Iterator<Item = &Global> {
        self.globals.iter()
    }

    /// Check every function and every global reference
    pub fn validate(&self) -> CompileResult<()> {
        verify::verify_module(self)
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for global in &self.globals {
            writeln!(f, "{}", global)?;
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
