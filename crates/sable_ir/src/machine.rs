//! The memory and call surface IR executes against.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use sable_symbol::ImageModule;

use crate::error::ExecError;

pub trait Machine {
    fn load(&mut self, address: u64, size: u32) -> Result<u64, ExecError>;

    fn store(&mut self, address: u64, size: u32, value: u64) -> Result<(), ExecError>;

    /// Calls the routine at `address`.
    fn call(&mut self, address: u64, args: &[u64]) -> Result<u64, ExecError>;

    /// Reads memory without side effects. `None` if unmapped.
    fn peek(&self, address: u64, size: u32) -> Option<u64>;
}

pub type NativeFn =
    Arc<dyn Fn(&mut SimulatedMachine, &[u64]) -> Result<u64, ExecError> + Send + Sync>;

const CODE_BASE: u64 = 0x0010_0000;
const CODE_STRIDE: u64 = 0x10;
const HEAP_BASE: u64 = 0x1000_0000;

/// A little-endian byte-addressed machine with a bump allocator and
/// native routines at fixed addresses.
pub struct SimulatedMachine {
    memory: AHashMap<u64, u8>,
    /// start -> end (exclusive) of every mapped range.
    mapped: BTreeMap<u64, u64>,
    next_heap: u64,
    next_code: u64,
    natives: AHashMap<u64, NativeFn>,
    exports: Vec<(String, u64)>,
}

impl Default for SimulatedMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimulatedMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedMachine")
            .field("mapped", &self.mapped.len())
            .field("natives", &self.natives.len())
            .field("exports", &self.exports)
            .finish()
    }
}

impl SimulatedMachine {
    pub fn new() -> Self {
        Self {
            memory: AHashMap::new(),
            mapped: BTreeMap::new(),
            next_heap: HEAP_BASE,
            next_code: CODE_BASE,
            natives: AHashMap::new(),
            exports: Vec::new(),
        }
    }

    /// Maps `size` zeroed bytes aligned to `align` and returns their address.
    pub fn alloc(&mut self, size: u64, align: u64) -> u64 {
        let align = align.max(1);
        let address = self.next_heap.div_ceil(align) * align;
        self.next_heap = address + size.max(1);
        self.mapped.insert(address, address + size.max(1));
        address
    }

    /// Registers a native routine under `name` and returns its address.
    pub fn define_native<F>(&mut self, name: &str, f: F) -> u64
    where
        F: Fn(&mut SimulatedMachine, &[u64]) -> Result<u64, ExecError> + Send + Sync + 'static,
    {
        let address = self.next_code;
        self.next_code += CODE_STRIDE;
        self.natives.insert(address, Arc::new(f));
        self.export(name, address);
        address
    }

    /// Allocates and initializes a named data object.
    pub fn define_data(&mut self, name: &str, bytes: &[u8]) -> u64 {
        let address = self.alloc(bytes.len() as u64, 8);
        self.write_bytes(address, bytes);
        self.export(name, address);
        address
    }

    /// Adds `name` to the export table without defining anything.
    pub fn export(&mut self, name: &str, address: u64) {
        self.exports.push((name.to_string(), address));
    }

    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) {
        for (offset, byte) in bytes.iter().enumerate() {
            self.memory.insert(address + offset as u64, *byte);
        }
    }

    pub fn write_u64(&mut self, address: u64, value: u64) {
        self.write_bytes(address, &value.to_le_bytes());
    }

    /// The export table, ready for a `SymbolResolver`.
    pub fn exports(&self) -> ImageModule {
        let mut module = ImageModule::new("simulated");
        for (name, address) in &self.exports {
            module.push(name.clone(), *address);
        }
        module
    }

    pub fn is_native(&self, address: u64) -> bool {
        self.natives.contains_key(&address)
    }

    fn is_mapped(&self, address: u64, size: u32) -> bool {
        let Some(end) = address.checked_add(u64::from(size)) else {
            return false;
        };
        self.mapped
            .range(..=address)
            .next_back()
            .is_some_and(|(_, region_end)| end <= *region_end)
    }

    fn read(&self, address: u64, size: u32) -> u64 {
        let mut value = 0u64;
        for offset in (0..u64::from(size.min(8))).rev() {
            let byte = self.memory.get(&(address + offset)).copied().unwrap_or(0);
            value = (value << 8) | u64::from(byte);
        }
        value
    }
}

impl Machine for SimulatedMachine {
    fn load(&mut self, address: u64, size: u32) -> Result<u64, ExecError> {
        if !self.is_mapped(address, size) {
            return Err(ExecError::Fault { address, size });
        }
        Ok(self.read(address, size))
    }

    fn store(&mut self, address: u64, size: u32, value: u64) -> Result<(), ExecError> {
        if !self.is_mapped(address, size) {
            return Err(ExecError::Fault { address, size });
        }
        let bytes = value.to_le_bytes();
        self.write_bytes(address, &bytes[..size.min(8) as usize]);
        Ok(())
    }

    fn call(&mut self, address: u64, args: &[u64]) -> Result<u64, ExecError> {
        let native = self
            .natives
            .get(&address)
            .cloned()
            .ok_or(ExecError::UnknownCallee(address))?;
        native(self, args)
    }

    fn peek(&self, address: u64, size: u32) -> Option<u64> {
        self.is_mapped(address, size)
            .then(|| self.read(address, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_is_little_endian_and_bounded() {
        let mut machine = SimulatedMachine::new();
        let base = machine.alloc(16, 8);
        machine.store(base, 4, 0x1122_3344).unwrap();
        assert_eq!(machine.load(base, 2).unwrap(), 0x3344);
        assert_eq!(machine.peek(base + 1, 1), Some(0x33));
        assert!(matches!(
            machine.load(base + 12, 8),
            Err(ExecError::Fault { .. })
        ));
        assert_eq!(machine.peek(0x10, 1), None);
    }

    #[test]
    fn test_natives_are_callable_and_exported() {
        let mut machine = SimulatedMachine::new();
        let add = machine.define_native("add", |_, args| Ok(args[0] + args[1]));
        let data = machine.define_data("answer", &42u64.to_le_bytes());
        assert_eq!(machine.call(add, &[2, 3]).unwrap(), 5);
        assert!(matches!(
            machine.call(add + 1, &[]),
            Err(ExecError::UnknownCallee(_))
        ));
        assert_eq!(machine.peek(data, 8), Some(42));

        let exports = machine.exports();
        assert_eq!(exports.symbols.len(), 2);
        assert_eq!(exports.symbols[0].name, "add");
    }
}
