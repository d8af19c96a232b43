use std::fs;
use std::path::Path;

use ahash::{AHashMap, AHashSet};
use object::{Object, ObjectSymbol};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::SymbolError;
use crate::image::{ImageModule, scan_process_image};

/// Names that several modules legitimately define; the first definition wins.
pub const DEFAULT_ALLOWED_DUPLICATES: &[&str] = &["__clear_cache"];

#[derive(Debug, Clone)]
enum NameEntry {
    Unique { address: u64, module: usize },
    Ambiguous { modules: Vec<usize> },
}

#[derive(Debug, Clone)]
enum AddressEntry {
    Unique(String),
    Ambiguous,
}

/// Bidirectional address <-> name table of the process image.
///
/// Reads are lock-shared; registration of new modules takes the write lock,
/// so registrations are serialized.
pub struct SymbolResolver {
    names: RwLock<AHashMap<String, NameEntry>>,
    addresses: RwLock<AHashMap<u64, AddressEntry>>,
    modules: RwLock<Vec<String>>,
    allowed_duplicates: AHashSet<String>,
    libraries: Mutex<Vec<libloading::Library>>,
    process_fallback: bool,
}

impl Default for SymbolResolver {
    fn default() -> Self {
        Self::with_allowed_duplicates(DEFAULT_ALLOWED_DUPLICATES.iter().copied())
    }
}

impl SymbolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowed_duplicates<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: RwLock::new(AHashMap::new()),
            addresses: RwLock::new(AHashMap::new()),
            modules: RwLock::new(Vec::new()),
            allowed_duplicates: names.into_iter().map(Into::into).collect(),
            libraries: Mutex::new(Vec::new()),
            process_fallback: false,
        }
    }

    pub fn from_modules<I>(modules: I) -> Self
    where
        I: IntoIterator<Item = ImageModule>,
    {
        let resolver = Self::new();
        for module in modules {
            resolver.register_module(module);
        }
        resolver
    }

    /// Scans every file mapped into the current process.
    ///
    /// Names missing from the scanned tables are looked up through the
    /// dynamic loader.
    pub fn from_process() -> Result<Self, SymbolError> {
        let mut resolver = Self::from_modules(scan_process_image()?);
        resolver.process_fallback = true;
        debug!(
            modules = resolver.module_count(),
            "loaded process symbol table"
        );
        Ok(resolver)
    }

    /// Adds one module's exports and returns its index.
    ///
    /// A name already bound by another module becomes ambiguous unless it is
    /// on the duplicate allow-list. An address exported under two names is
    /// ambiguous in the reverse direction.
    pub fn register_module(&self, module: ImageModule) -> usize {
        let index = {
            let mut modules = self.modules.write();
            modules.push(module.name.clone());
            modules.len() - 1
        };

        // a module that defines a name twice cannot be told apart either
        let mut local: AHashMap<&str, Option<u64>> = AHashMap::new();
        for symbol in &module.symbols {
            local
                .entry(symbol.name.as_str())
                .and_modify(|slot| *slot = None)
                .or_insert(Some(symbol.address));
        }

        let mut names = self.names.write();
        let mut addresses = self.addresses.write();
        for (name, address) in local {
            let allowed = self.allowed_duplicates.contains(name);
            match names.get_mut(name) {
                None => {
                    let entry = match address {
                        Some(address) => NameEntry::Unique {
                            address,
                            module: index,
                        },
                        None => NameEntry::Ambiguous {
                            modules: vec![index],
                        },
                    };
                    names.insert(name.to_string(), entry);
                }
                Some(_) if allowed => {}
                Some(entry) => {
                    let modules = match entry {
                        NameEntry::Unique { module, .. } => vec![*module, index],
                        NameEntry::Ambiguous { modules } => {
                            let mut modules = std::mem::take(modules);
                            modules.push(index);
                            modules
                        }
                    };
                    *entry = NameEntry::Ambiguous { modules };
                }
            }

            if let Some(address) = address {
                addresses
                    .entry(address)
                    .and_modify(|entry| {
                        if matches!(entry, AddressEntry::Unique(existing) if existing.as_str() != name) {
                            *entry = AddressEntry::Ambiguous;
                        }
                    })
                    .or_insert_with(|| AddressEntry::Unique(name.to_string()));
            }
        }

        index
    }

    /// Opens a shared library, keeps it loaded, and registers its dynamic
    /// exports at the addresses the loader assigned.
    pub fn load_library(&self, path: &Path) -> Result<usize, SymbolError> {
        let data = fs::read(path).map_err(|source| SymbolError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = object::File::parse(&*data).map_err(|err| SymbolError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let library =
            unsafe { libloading::Library::new(path) }.map_err(|err| SymbolError::Library {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        let mut module = ImageModule::new(path.display().to_string());
        for symbol in file.dynamic_symbols() {
            if !symbol.is_definition() || !symbol.is_global() {
                continue;
            }
            let Ok(name) = symbol.name() else {
                continue;
            };
            let found = unsafe { library.get::<*const ()>(name.as_bytes()) };
            match found {
                Ok(pointer) => module.push(name, *pointer as u64),
                Err(err) => debug!(error = %err, name, "export not resolvable"),
            }
        }

        self.libraries.lock().push(library);
        Ok(self.register_module(module))
    }

    /// Address of `name`. Unknown and ambiguous names are errors.
    pub fn resolve_address(&self, name: &str) -> Result<u64, SymbolError> {
        match self.names.read().get(name) {
            Some(NameEntry::Unique { address, .. }) => return Ok(*address),
            Some(NameEntry::Ambiguous { modules }) => {
                let known = self.modules.read();
                let modules = modules
                    .iter()
                    .filter_map(|index| known.get(*index).cloned())
                    .collect();
                return Err(SymbolError::Ambiguous {
                    name: name.to_string(),
                    modules,
                });
            }
            None => {}
        }

        if self.process_fallback {
            if let Some(address) = lookup_dynamic(name) {
                return Ok(address);
            }
        }

        Err(SymbolError::Unknown(name.to_string()))
    }

    /// Name exported at `address`, or `None` when the address is not a known
    /// export, is exported under more than one name, or its name is defined
    /// in more than one module.
    pub fn resolve_name(&self, address: u64) -> Option<String> {
        // same lock order as `register_module`
        let names = self.names.read();
        let addresses = self.addresses.read();
        match addresses.get(&address) {
            Some(AddressEntry::Unique(name)) => match names.get(name) {
                Some(NameEntry::Ambiguous { .. }) => None,
                _ => Some(name.clone()),
            },
            Some(AddressEntry::Ambiguous) | None => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.read().contains_key(name)
    }

    pub fn is_ambiguous(&self, name: &str) -> bool {
        matches!(
            self.names.read().get(name),
            Some(NameEntry::Ambiguous { .. })
        )
    }

    pub fn module_count(&self) -> usize {
        self.modules.read().len()
    }

    pub fn modules(&self) -> Vec<String> {
        self.modules.read().clone()
    }
}

#[cfg(unix)]
fn lookup_dynamic(name: &str) -> Option<u64> {
    let this = libloading::os::unix::Library::this();
    match unsafe { this.get::<*const ()>(name.as_bytes()) } {
        Ok(pointer) => Some(*pointer as u64),
        Err(err) => {
            warn!(error = %err, name, "dynamic lookup failed");
            None
        }
    }
}

#[cfg(not(unix))]
fn lookup_dynamic(_name: &str) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SymbolResolver {
        SymbolResolver::from_modules([
            ImageModule::new("libmain.so")
                .with_symbol("list_append", 0x1000)
                .with_symbol("dict_lookup", 0x2000)
                .with_symbol("__clear_cache", 0x3000),
            ImageModule::new("libext.so")
                .with_symbol("dict_lookup", 0x9000)
                .with_symbol("__clear_cache", 0x9100)
                .with_symbol("ext_init", 0x9200),
        ])
    }

    #[test]
    fn test_unique_names_resolve_both_ways() {
        let resolver = resolver();
        assert_eq!(resolver.resolve_address("list_append").unwrap(), 0x1000);
        assert_eq!(resolver.resolve_name(0x1000).as_deref(), Some("list_append"));
        assert_eq!(resolver.resolve_address("ext_init").unwrap(), 0x9200);
    }

    #[test]
    fn test_name_in_two_modules_is_ambiguous() {
        let resolver = resolver();
        assert!(resolver.is_ambiguous("dict_lookup"));
        match resolver.resolve_address("dict_lookup") {
            Err(SymbolError::Ambiguous { name, modules }) => {
                assert_eq!(name, "dict_lookup");
                assert_eq!(modules, vec!["libmain.so", "libext.so"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
        assert_eq!(resolver.resolve_name(0x2000), None);
        assert_eq!(resolver.resolve_name(0x9000), None);
    }

    #[test]
    fn test_allowed_duplicate_keeps_first_definition() {
        let resolver = resolver();
        assert!(!resolver.is_ambiguous("__clear_cache"));
        assert_eq!(resolver.resolve_address("__clear_cache").unwrap(), 0x3000);
    }

    #[test]
    fn test_unknown_name_is_error() {
        let resolver = resolver();
        assert!(matches!(
            resolver.resolve_address("missing"),
            Err(SymbolError::Unknown(_))
        ));
    }

    #[test]
    fn test_unknown_address_is_empty() {
        assert_eq!(resolver().resolve_name(0xdead), None);
    }

    #[test]
    fn test_aliased_address_is_ambiguous() {
        let resolver = SymbolResolver::from_modules([ImageModule::new("libc.so")
            .with_symbol("malloc", 0x4000)
            .with_symbol("__libc_malloc", 0x4000)]);
        assert_eq!(resolver.resolve_name(0x4000), None);
        assert_eq!(resolver.resolve_address("malloc").unwrap(), 0x4000);
    }

    #[test]
    fn test_duplicate_within_one_module_is_ambiguous() {
        let resolver = SymbolResolver::from_modules([ImageModule::new("a.out")
            .with_symbol("helper", 0x10)
            .with_symbol("helper", 0x20)]);
        assert!(resolver.is_ambiguous("helper"));
        assert_eq!(resolver.resolve_name(0x10), None);
    }

    #[test]
    fn test_incremental_registration_keeps_existing_entries() {
        let resolver = resolver();
        let index = resolver.register_module(
            ImageModule::new("libplugin.so").with_symbol("plugin_entry", 0xa000),
        );
        assert_eq!(index, 2);
        assert_eq!(resolver.module_count(), 3);
        assert_eq!(resolver.resolve_address("list_append").unwrap(), 0x1000);
        assert_eq!(resolver.resolve_address("plugin_entry").unwrap(), 0xa000);
    }

    #[test]
    fn test_late_duplicate_hides_name_at_every_address() {
        let resolver = resolver();
        resolver.register_module(ImageModule::new("late.so").with_symbol("list_append", 0xb000));
        assert!(resolver.is_ambiguous("list_append"));
        assert_eq!(resolver.resolve_name(0x1000), None);
        assert_eq!(resolver.resolve_name(0xb000), None);
        assert!(resolver.resolve_address("list_append").is_err());
    }
}
