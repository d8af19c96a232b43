//! Export tables of loaded modules.

use std::fs;
use std::path::{Path, PathBuf};

use object::{Object, ObjectKind, ObjectSegment, ObjectSymbol, SymbolKind};
use tracing::debug;

use crate::error::SymbolError;

const PAGE_MASK: u64 = !0xfff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSymbol {
    pub name: String,
    pub address: u64,
}

/// The name -> address table of one loaded module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageModule {
    pub name: String,
    pub symbols: Vec<ExportedSymbol>,
}

impl ImageModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: Vec::new(),
        }
    }

    pub fn with_symbol(mut self, name: impl Into<String>, address: u64) -> Self {
        self.push(name, address);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, address: u64) {
        self.symbols.push(ExportedSymbol {
            name: name.into(),
            address,
        });
    }

    /// Reads the symbol table of an object file mapped at `load_address`.
    pub fn from_object_file(path: &Path, load_address: u64) -> Result<Self, SymbolError> {
        let data = fs::read(path).map_err(|source| SymbolError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_object_bytes(path, &data, load_address)
    }

    /// Position independent images are relocated by the distance between
    /// `load_address` and their lowest segment; executables are not.
    pub fn from_object_bytes(
        path: &Path,
        data: &[u8],
        load_address: u64,
    ) -> Result<Self, SymbolError> {
        let file = object::File::parse(data).map_err(|err| SymbolError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let bias = match file.kind() {
            ObjectKind::Executable => 0,
            _ => {
                let lowest = file
                    .segments()
                    .map(|segment| segment.address())
                    .min()
                    .unwrap_or(0);
                load_address.wrapping_sub(lowest & PAGE_MASK)
            }
        };

        let mut module = Self::new(path.display().to_string());
        let mut has_static_table = false;
        for symbol in file.symbols() {
            has_static_table = true;
            module.push_object_symbol(&symbol, bias);
        }
        // stripped images only carry the dynamic table
        if !has_static_table {
            for symbol in file.dynamic_symbols() {
                module.push_object_symbol(&symbol, bias);
            }
        }

        Ok(module)
    }

    fn push_object_symbol<'data>(&mut self, symbol: &impl ObjectSymbol<'data>, bias: u64) {
        if !symbol.is_definition() || !matches!(symbol.kind(), SymbolKind::Text | SymbolKind::Data)
        {
            return;
        }
        let Ok(name) = symbol.name() else {
            return;
        };
        if name.is_empty() {
            return;
        }
        self.push(name, symbol.address().wrapping_add(bias));
    }
}

/// A file-backed mapping of the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFile {
    pub path: PathBuf,
    pub load_address: u64,
}

/// Parses `/proc/<pid>/maps` text, keeping the first mapping of each file.
pub fn parse_memory_map(contents: &str) -> Vec<MappedFile> {
    let mut files: Vec<MappedFile> = Vec::new();

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(range), Some(perms)) = (fields.next(), fields.next()) else {
            continue;
        };
        // offset, device, inode
        if fields.by_ref().take(3).count() != 3 {
            continue;
        }
        let path = fields.collect::<Vec<_>>().join(" ");

        if perms == "r--s" || path.is_empty() || path.starts_with('[') {
            continue;
        }
        if files.iter().any(|file| file.path == Path::new(&path)) {
            continue;
        }

        let Some((start, _)) = range.split_once('-') else {
            continue;
        };
        let Ok(load_address) = u64::from_str_radix(start, 16) else {
            continue;
        };

        files.push(MappedFile {
            path: PathBuf::from(path),
            load_address,
        });
    }

    files
}

/// Collects the export tables of every file mapped into this process.
///
/// Files that cannot be read or parsed are skipped.
pub fn scan_process_image() -> Result<Vec<ImageModule>, SymbolError> {
    let maps = Path::new("/proc/self/maps");
    let contents = fs::read_to_string(maps).map_err(|source| SymbolError::Io {
        path: maps.to_path_buf(),
        source,
    })?;

    let mut modules = Vec::new();
    for mapped in parse_memory_map(&contents) {
        match ImageModule::from_object_file(&mapped.path, mapped.load_address) {
            Ok(module) => modules.push(module),
            Err(err) => debug!(error = %err, "skipping mapping"),
        }
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
5581c1a00000-5581c1a2e000 r--p 00000000 fd:01 1835021 /usr/bin/python3.8
5581c1a2e000-5581c1c4a000 r-xp 0002e000 fd:01 1835021 /usr/bin/python3.8
7f1e8c000000-7f1e8c021000 rw-p 00000000 00:00 0
7f1e8d2b4000-7f1e8d2d9000 r--p 00000000 fd:01 1838329 /usr/lib/x86_64-linux-gnu/libc-2.31.so
7f1e8d400000-7f1e8d401000 r--s 00000000 fd:01 1838330 /tmp/shared segment
7ffd4a1e3000-7ffd4a204000 rw-p 00000000 00:00 0 [stack]
";

    #[test]
    fn test_parse_memory_map_keeps_first_mapping() {
        let files = parse_memory_map(MAPS);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, PathBuf::from("/usr/bin/python3.8"));
        assert_eq!(files[0].load_address, 0x5581_c1a0_0000);
        assert_eq!(
            files[1].path,
            PathBuf::from("/usr/lib/x86_64-linux-gnu/libc-2.31.so")
        );
    }

    #[test]
    fn test_parse_memory_map_skips_shared_and_anonymous() {
        let files = parse_memory_map(MAPS);
        assert!(files.iter().all(|file| !file.path.starts_with("/tmp")));
        assert!(files.iter().all(|file| !file.path.starts_with("[")));
    }

    #[test]
    fn test_garbage_object_is_parse_error() {
        let err = ImageModule::from_object_bytes(Path::new("junk.so"), b"not an object", 0)
            .unwrap_err();
        assert!(matches!(err, SymbolError::Parse { .. }));
    }

    #[test]
    fn test_module_builder() {
        let module = ImageModule::new("libdemo.so")
            .with_symbol("alpha", 0x1000)
            .with_symbol("beta", 0x2000);
        assert_eq!(module.symbols.len(), 2);
        assert_eq!(module.symbols[1].name, "beta");
        assert_eq!(module.symbols[1].address, 0x2000);
    }
}
