//! VM state and host entry points.

use std::cell::RefCell;
use std::rc::Rc;

use bytecode_system::Module;
use core_types::{ErrorReporter, FatalError, Handle, NativeFn};
use memory_manager::{Heap, DEFAULT_PAGE_LIMIT};

use crate::frame::{BodyRef, Frame, Slots};
use crate::frame_cache::FrameCache;
use crate::handlers::ErrorHandlerStack;
use crate::import::{ImportResolver, ModuleLoader};

/// Hard recursion cap.
pub const MAX_CALL_DEPTH: u32 = 512;

/// Host-facing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmOptions {
    /// Whether `import` may read files.
    pub import_files: bool,
    /// Whether the module frame's globals persist across runs.
    pub repl: bool,
    /// Byte cap on imported files.
    pub max_import_size: u32,
    /// Heap budget in pages.
    pub page_limit: u32,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            import_files: true,
            repl: false,
            max_import_size: 5 * 1024 * 1024,
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// The virtual machine: heap, frame cache, resolver, reporter, and the
/// dispatch loop (in `dispatch.rs`).
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) cache: FrameCache,
    pub(crate) resolver: ImportResolver,
    pub(crate) reporter: ErrorReporter,
    pub(crate) options: VmOptions,
    pub(crate) call_depth: u32,
    repl_slots: Option<Slots>,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("heap", &self.heap)
            .field("resolver", &self.resolver)
            .field("options", &self.options)
            .field("call_depth", &self.call_depth)
            .finish()
    }
}

impl Vm {
    /// A VM with the standard packages registered.
    pub fn new(options: VmOptions) -> Self {
        let mut resolver = ImportResolver::new();
        for &(name, thunk) in stdlib::packages() {
            resolver.register_package(name, thunk);
        }
        Self {
            heap: Heap::new(options.page_limit),
            cache: FrameCache::new(),
            resolver,
            reporter: ErrorReporter::new(),
            options,
            call_depth: 0,
            repl_slots: None,
        }
    }

    /// Execute a module's top level and return its result value.
    ///
    /// In `repl` mode the module frame's slot storage is carried from one
    /// call to the next, so later inputs see earlier definitions.
    pub fn run_module(&mut self, module: Rc<Module>) -> Result<Handle, FatalError> {
        let slots: Slots = match self.repl_slots.take() {
            Some(slots) if self.options.repl => slots,
            _ => Rc::new(RefCell::new(Vec::new())),
        };
        let mut frame = Frame {
            module,
            body: BodyRef::Main,
            slots: slots.clone(),
            handlers: ErrorHandlerStack::new(),
            captures: Vec::new(),
            this: None,
            params: 0,
            globals: slots.clone(),
            ip: 0,
            code_index: 0,
        };
        let result = self.run_frame(&mut frame);
        if self.options.repl && result.is_ok() {
            self.repl_slots = Some(slots);
        }
        result
    }

    /// Load a module through the loader without executing it.
    pub fn load_module(&mut self, path: &str) -> Result<Rc<Module>, String> {
        let max = self.options.max_import_size;
        self.resolver.load_entry(path, max)
    }

    /// Compile-and-run entry: load `path` through the module loader, then
    /// execute it.
    pub fn run_path(&mut self, path: &str) -> Result<Handle, FatalError> {
        let module = match self.load_module(path) {
            Ok(module) => module,
            Err(message) => {
                self.reporter.report(core_types::Diagnostic {
                    kind: core_types::DiagnosticKind::Err,
                    message: message.clone(),
                    source_path: path.to_string(),
                    byte_offset: 0,
                    line: 1,
                    column: 1,
                });
                return Err(FatalError::new(message));
            }
        };
        self.run_module(module)
    }

    /// Register a native package thunk.
    pub fn register_package(&mut self, name: &str, thunk: NativeFn) {
        self.resolver.register_package(name, thunk);
    }

    /// Replace the file-module loader.
    pub fn set_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.resolver.set_loader(loader);
    }

    /// Collected diagnostics.
    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// Clear collected diagnostics (REPL-style hosts reuse the VM).
    pub fn clear_diagnostics(&mut self) {
        self.reporter.clear();
    }

    /// The value heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Current call depth; zero outside `run_module`.
    pub fn call_depth(&self) -> u32 {
        self.call_depth
    }

    /// The active configuration.
    pub fn options(&self) -> &VmOptions {
        &self.options
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmOptions::default())
    }
}
