//! Test-only `NativeEnv` implementation.

use core_types::{handle, FatalSignal, Handle, NativeCall, NativeEnv, Value};

/// Minimal environment for exercising natives outside the VM.
#[derive(Default)]
pub struct TestEnv {
    /// Bound receiver, if any.
    pub this: Option<Handle>,
    /// Last thrown message.
    pub thrown: Option<String>,
}

impl TestEnv {
    /// An environment with a bound receiver.
    pub fn with_this(this: Handle) -> Self {
        Self {
            this: Some(this),
            thrown: None,
        }
    }
}

impl NativeEnv for TestEnv {
    fn throw(&mut self, message: &str) -> NativeCall {
        self.thrown = Some(message.to_string());
        NativeCall::Thrown
    }

    fn this(&self) -> Option<Handle> {
        self.this.clone()
    }

    fn alloc(&mut self, value: Value) -> Result<Handle, FatalSignal> {
        Ok(handle(value))
    }
}
