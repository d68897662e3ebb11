//! Thin driver around the VM for the CLI.

use core_types::{Handle, Value};
use interpreter::{Vm, VmOptions};

use crate::error::{CliError, CliResult};

/// Owns a VM configured from the command line.
pub struct Runtime {
    vm: Vm,
}

impl Runtime {
    /// A runtime with the given options.
    pub fn new(options: VmOptions) -> Self {
        Self {
            vm: Vm::new(options),
        }
    }

    /// Load and execute a compiled module, returning its result value.
    pub fn execute_file(&mut self, path: &str) -> CliResult<Handle> {
        let module = self
            .vm
            .load_module(path)
            .map_err(CliError::LoadError)?;
        self.vm.run_module(module).map_err(CliError::from)
    }

    /// Load a module and render its listing.
    pub fn disassemble_file(&mut self, path: &str) -> CliResult<String> {
        let module = self
            .vm
            .load_module(path)
            .map_err(CliError::LoadError)?;
        Ok(bytecode_system::disassemble(&module))
    }

    /// Render a result value for the terminal; `null` prints nothing.
    pub fn render_result(value: &Handle) -> Option<String> {
        match &*value.borrow() {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// The diagnostics collected so far, as display lines.
    pub fn render_diagnostics(&self) -> String {
        self.vm.reporter().render()
    }

    /// The diagnostics collected so far, as a JSON array.
    pub fn diagnostics_json(&self) -> String {
        serde_json::to_string_pretty(self.vm.reporter().diagnostics())
            .unwrap_or_else(|_| "[]".to_string())
    }

    /// Access the underlying VM.
    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }
}
