//! Import resolution.
//!
//! `import` names resolve in three steps: the value cache, then file
//! modules (for names carrying the source extension, through the pluggable
//! [`ModuleLoader`] seam), then the native-package registry. Anything else
//! is a thrown `no such package`.

use std::collections::HashMap;
use std::rc::Rc;

use bytecode_system::Module;
use core_types::{Handle, NativeFn};

use crate::vm::VmOptions;

/// Source-file extension import names are matched against.
pub const SOURCE_EXTENSION: &str = ".tern";

/// Compiled-module extension the default loader looks for.
pub const COMPILED_EXTENSION: &str = ".tbc";

/// The external compiler's seam. Given a source path, produce a compiled
/// module, honoring the host's import size cap.
///
/// This repository ships [`BinaryModuleLoader`], which loads the sibling
/// `.tbc` binary; hosts embedding a compiler install their own loader.
pub trait ModuleLoader {
    /// Load and compile `path`. `max_size` is the byte cap on the file.
    fn load(&mut self, path: &str, max_size: u32) -> Result<Rc<Module>, String>;
}

impl<F> ModuleLoader for F
where
    F: FnMut(&str, u32) -> Result<Rc<Module>, String>,
{
    fn load(&mut self, path: &str, max_size: u32) -> Result<Rc<Module>, String> {
        self(path, max_size)
    }
}

/// Default loader: swaps the source extension for [`COMPILED_EXTENSION`]
/// and deserializes the module binary.
#[derive(Debug, Default)]
pub struct BinaryModuleLoader;

impl ModuleLoader for BinaryModuleLoader {
    fn load(&mut self, path: &str, max_size: u32) -> Result<Rc<Module>, String> {
        let compiled = match path.strip_suffix(SOURCE_EXTENSION) {
            Some(stem) => format!("{}{}", stem, COMPILED_EXTENSION),
            None => path.to_string(),
        };
        let bytes = std::fs::read(&compiled)
            .map_err(|e| format!("cannot read module '{}': {}", compiled, e))?;
        if bytes.len() as u64 > max_size as u64 {
            return Err(format!(
                "module '{}' exceeds import size limit ({} > {} bytes)",
                compiled,
                bytes.len(),
                max_size
            ));
        }
        Module::from_bytes(&bytes)
    }
}

/// What an `import` opcode should do next.
pub(crate) enum Resolution {
    /// The value is cached; reuse it.
    Cached(Handle),
    /// A file module whose `main` still has to run.
    Execute(Rc<Module>),
    /// A registered native package thunk.
    Native(NativeFn),
    /// Resolution failed; throw this message.
    Failed(String),
}

/// Maps import names to native packages or compiled file modules, caching
/// the resulting values.
pub struct ImportResolver {
    packages: HashMap<String, NativeFn>,
    modules: HashMap<String, Rc<Module>>,
    values: HashMap<String, Handle>,
    loader: Box<dyn ModuleLoader>,
}

impl std::fmt::Debug for ImportResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportResolver")
            .field("packages", &self.packages.len())
            .field("modules", &self.modules.len())
            .field("values", &self.values.len())
            .finish()
    }
}

impl ImportResolver {
    /// A resolver with the default binary loader and no packages.
    pub fn new() -> Self {
        Self {
            packages: HashMap::new(),
            modules: HashMap::new(),
            values: HashMap::new(),
            loader: Box::new(BinaryModuleLoader),
        }
    }

    /// Register a native package thunk under an import name.
    pub fn register_package(&mut self, name: &str, thunk: NativeFn) {
        self.packages.insert(name.to_string(), thunk);
    }

    /// Replace the file-module loader.
    pub fn set_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.loader = loader;
    }

    /// Load a module through the loader without import-name semantics.
    /// This is the host's compile-and-run entry point.
    pub fn load_entry(&mut self, path: &str, max_size: u32) -> Result<Rc<Module>, String> {
        if let Some(module) = self.modules.get(path) {
            return Ok(module.clone());
        }
        let module = self.loader.load(path, max_size)?;
        self.modules.insert(path.to_string(), module.clone());
        Ok(module)
    }

    pub(crate) fn resolve(&mut self, name: &str, options: &VmOptions) -> Resolution {
        if let Some(value) = self.values.get(name) {
            return Resolution::Cached(value.clone());
        }
        if name.ends_with(SOURCE_EXTENSION) {
            if !options.import_files {
                return Resolution::Failed("importing disabled by host".to_string());
            }
            if let Some(module) = self.modules.get(name) {
                // Loaded earlier but its main has not produced a value yet.
                return Resolution::Execute(module.clone());
            }
            return match self.loader.load(name, options.max_import_size) {
                Ok(module) => {
                    self.modules.insert(name.to_string(), module.clone());
                    Resolution::Execute(module)
                }
                Err(message) => Resolution::Failed(message),
            };
        }
        match self.packages.get(name) {
            Some(&thunk) => Resolution::Native(thunk),
            None => Resolution::Failed(format!("no such package: {}", name)),
        }
    }

    pub(crate) fn cache_value(&mut self, name: &str, value: Handle) {
        self.values.insert(name.to_string(), value);
    }

    /// Whether a value is cached for an import name.
    pub fn is_cached(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

impl Default for ImportResolver {
    fn default() -> Self {
        Self::new()
    }
}
