//! Collections of functions and their JSON form.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IrError;
use crate::function::Function;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn push(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|func| func.name == name)
    }

    pub fn from_json(path: &Path, text: &str) -> Result<Self, IrError> {
        let mut module: Module = serde_json::from_str(text).map_err(|err| IrError::Decode {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        for func in &mut module.functions {
            func.reindex();
        }
        Ok(module)
    }

    pub fn to_json(&self) -> Result<String, IrError> {
        serde_json::to_string_pretty(self).map_err(|err| IrError::Decode {
            path: self.name.clone().into(),
            message: err.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, IrError> {
        let text = fs::read_to_string(path).map_err(|source| IrError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(path, &text)
    }

    pub fn save(&self, path: &Path) -> Result<(), IrError> {
        let text = self.to_json()?;
        fs::write(path, text).map_err(|source| IrError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads every `.json` module below `dir`, in path order.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>, IrError> {
        let mut paths = Vec::new();
        collect_json(dir, &mut paths)?;
        paths.sort();

        let mut modules = Vec::with_capacity(paths.len());
        for path in paths {
            debug!(path = %path.display(), "loading IR module");
            modules.push(Self::load(&path)?);
        }
        Ok(modules)
    }
}

fn collect_json(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> Result<(), IrError> {
    let entries = fs::read_dir(dir).map_err(|source| IrError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| IrError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_json(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;
    use crate::instructions::BinaryOp;
    use crate::types::{Signature, Type};

    fn sample() -> Module {
        let mut func = Function::new("inc", Signature::new(vec![Type::I64], Type::I64));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let x = b.param(0);
        let one = b.iconst(Type::I64, 1);
        let sum = b.binary(BinaryOp::Add, x, one);
        b.ret(Some(sum));

        let mut module = Module::new("sample");
        module.push(func);
        module.push(Function::new("puts", Signature::new(vec![Type::Ptr], Type::I32)));
        module
    }

    #[test]
    fn test_load_dir_restores_constant_pools() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("lib");
        fs::create_dir(&nested).unwrap();
        sample().save(&nested.join("sample.json")).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let modules = Module::load_dir(dir.path()).unwrap();
        assert_eq!(modules.len(), 1);
        let mut func = modules[0].function("inc").unwrap().clone();
        let before = func.values.len();
        func.iconst(Type::I64, 1);
        assert_eq!(func.values.len(), before);
        assert!(modules[0].function("puts").unwrap().is_declaration());
    }

    #[test]
    fn test_bad_json_is_decode_error() {
        let err = Module::from_json(Path::new("bad.json"), "{").unwrap_err();
        assert!(matches!(err, IrError::Decode { .. }));
    }
}
