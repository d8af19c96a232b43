//! IR definitions the inliner can splice in, indexed by routine name.

use std::path::Path;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use sable_ir::{Function, IrError, Module};
use tracing::{debug, warn};

#[derive(Default)]
pub struct ModuleRegistry {
    functions: RwLock<AHashMap<String, Arc<Function>>>,
    /// Names defined by more than one module.
    ambiguous: RwLock<AHashSet<String>>,
    modules: RwLock<Vec<String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every function with a body. Returns how many were added.
    pub fn register_module(&self, module: Module) -> usize {
        let mut functions = self.functions.write();
        let mut ambiguous = self.ambiguous.write();
        let mut added = 0;
        for func in module.functions {
            if func.is_declaration() {
                continue;
            }
            if ambiguous.contains(&func.name) {
                continue;
            }
            if functions.remove(&func.name).is_some() {
                warn!(name = %func.name, module = %module.name, "IR definition is ambiguous");
                ambiguous.insert(func.name);
                continue;
            }
            functions.insert(func.name.clone(), Arc::new(func));
            added += 1;
        }
        debug!(module = %module.name, added, "registered IR module");
        self.modules.write().push(module.name);
        added
    }

    pub fn register_function(&self, func: Function) -> usize {
        let mut module = Module::new(func.name.clone());
        module.push(func);
        self.register_module(module)
    }

    /// Loads every `.json` module under `dir`.
    pub fn load_dir(&self, dir: &Path) -> Result<usize, IrError> {
        let mut added = 0;
        for module in Module::load_dir(dir)? {
            added += self.register_module(module);
        }
        Ok(added)
    }

    pub fn definition(&self, name: &str) -> Option<Arc<Function>> {
        self.functions.read().get(name).cloned()
    }

    pub fn is_ambiguous(&self, name: &str) -> bool {
        self.ambiguous.read().contains(name)
    }

    pub fn len(&self) -> usize {
        self.functions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }

    pub fn modules(&self) -> Vec<String> {
        self.modules.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ir::{FunctionBuilder, Signature, Type};

    fn identity(name: &str) -> Function {
        let mut func = Function::new(name, Signature::new(vec![Type::I64], Type::I64));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let x = b.param(0);
        b.ret(Some(x));
        func
    }

    #[test]
    fn test_duplicates_are_ambiguous() {
        let registry = ModuleRegistry::new();
        let mut first = Module::new("a");
        first.push(identity("id"));
        first.push(Function::new("decl", Signature::new(vec![], Type::Void)));
        assert_eq!(registry.register_module(first), 1);

        let mut second = Module::new("b");
        second.push(identity("id"));
        second.push(identity("other"));
        assert_eq!(registry.register_module(second), 1);

        assert!(registry.definition("id").is_none());
        assert!(registry.is_ambiguous("id"));
        assert!(registry.definition("other").is_some());
        assert!(registry.definition("decl").is_none());
        assert_eq!(registry.modules(), vec!["a", "b"]);
    }

    #[test]
    fn test_load_dir_reads_json_modules() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = Module::new("lib");
        module.push(identity("id"));
        module.save(&dir.path().join("lib.json")).unwrap();

        let registry = ModuleRegistry::new();
        assert_eq!(registry.load_dir(dir.path()).unwrap(), 1);
        assert_eq!(registry.definition("id").unwrap().name, "id");
    }
}
