//! Line stepping of native binaries through a symbolic debugger.

use crate::config::NativeConfig;
use crate::errors::TraceError;
use crate::runtime::ProcessRunner;
use crate::types::NativeStep;
use std::path::Path;

pub mod driver;
pub mod gdb;
pub mod mi;

use driver::NativeDriver;
use gdb::GdbMi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
}

/// The operations the stepping driver needs from a debugger. Every call may
/// fail with a protocol error; the driver decides what each failure means.
pub trait SymbolicDebugger {
    fn load_binary(&mut self, binary: &Path) -> Result<(), TraceError>;
    fn disable_pagination(&mut self) -> Result<(), TraceError>;
    fn set_breakpoint(&mut self, location: &str) -> Result<(), TraceError>;
    fn run(&mut self) -> Result<(), TraceError>;
    fn step(&mut self) -> Result<(), TraceError>;
    /// `Ok(None)` when the frame has no line information.
    fn current_location(&mut self) -> Result<Option<SourceLocation>, TraceError>;
    fn block_symbols(&mut self) -> Result<Vec<Symbol>, TraceError>;
    fn evaluate(&mut self, symbol: &Symbol) -> Result<String, TraceError>;
}

pub fn trace_native(
    process_runner: &dyn ProcessRunner,
    config: &NativeConfig,
) -> Result<Vec<NativeStep>, TraceError> {
    let gdb = GdbMi::launch(process_runner, &config.debugger)?
        .with_inferior_tty(config.inferior_tty.clone());
    NativeDriver::new(gdb, &config.binary, config.entry.as_str()).run()
}
