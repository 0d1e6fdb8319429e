//! Compilation and dispatch of 6502 functions
//!
//! [`JitCompiler::run`] looks up the unit for an entry address, compiling it
//! on first use: decompile, translate, let the customizer rewrite the IR,
//! generate, insert. Units are inserted exactly once and never evicted.

pub mod codegen;
pub mod persist;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::decompiler::{self, CodeRegion, DecompiledFunction};
use crate::error::{ExecutionError, JitError, Result};
use crate::hardware::NesHardware;
use crate::ir::IrKind;
use crate::opcodes::Mnemonic;
use crate::translator::{self, ConvertedInstruction};

pub use codegen::{CodeGenerator, CompiledFunction, CustomGenerator, Flow, Frame, Op};

/// Hook for rewriting IR and replacing code generation per IR kind
pub trait JitCustomizer: Send + Sync {
    /// Rewrite the translated instructions of `function` before generation
    fn mutate_instructions(&self, _function: &DecompiledFunction, _instructions: &mut Vec<ConvertedInstruction>) {}

    /// Generators that replace the default for specific IR kinds
    fn custom_generators(&self) -> HashMap<IrKind, CustomGenerator> {
        HashMap::new()
    }
}

/// Observer notified around every unit invocation
pub trait DebugHook: Send + Sync {
    fn on_function_enter(&self, _address: u16, _hardware: &NesHardware) {}

    fn on_function_exit(&self, _address: u16, _hardware: &NesHardware) {}

    /// Called when a unit reaches an IR hook point
    fn on_hook_point(&self, _tag: u32, _hardware: &mut NesHardware) -> std::result::Result<(), ExecutionError> {
        Ok(())
    }
}

/// Default hook: trace-level log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDebugHook;

impl DebugHook for LogDebugHook {
    fn on_function_enter(&self, address: u16, hardware: &NesHardware) {
        trace!("enter ${:04X} {}", address, hardware.cpu_state());
    }

    fn on_function_exit(&self, address: u16, hardware: &NesHardware) {
        trace!("exit  ${:04X} {}", address, hardware.cpu_state());
    }
}

/// Decides whether compiled code handles the CPU at `address`
pub trait FunctionDispatch {
    /// Ok(true) when a unit ran, Ok(false) to fall back to interpretation
    fn dispatch(&self, address: u16, hardware: &mut NesHardware) -> Result<bool>;
}

/// Dispatch that never runs compiled code
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompiledCode;

impl FunctionDispatch for NoCompiledCode {
    fn dispatch(&self, _address: u16, _hardware: &mut NesHardware) -> Result<bool> {
        Ok(false)
    }
}

/// Counters exposed by [`JitCompiler::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JitStats {
    pub compiled_functions: usize,
    pub compilations: u64,
    pub cache_hits: u64,
    pub invocations: u64,
}

/// Outcome of [`JitCompiler::precompile`]
#[derive(Debug, Default)]
pub struct PrecompileReport {
    pub compiled: Vec<u16>,
    pub failed: Vec<(u16, JitError)>,
}

/// Lazily compiling function cache
pub struct JitCompiler {
    code_regions: Vec<CodeRegion>,
    customizer: Option<Arc<dyn JitCustomizer>>,
    debug_hook: Arc<dyn DebugHook>,
    cache: RwLock<HashMap<u16, Arc<CompiledFunction>>>,
    /// Serialises compilation so each address is generated once
    compile_lock: Mutex<()>,
    compilations: AtomicU64,
    cache_hits: AtomicU64,
    invocations: AtomicU64,
}

impl JitCompiler {
    pub fn new(code_regions: Vec<CodeRegion>) -> Self {
        Self {
            code_regions,
            customizer: None,
            debug_hook: Arc::new(LogDebugHook),
            cache: RwLock::new(HashMap::new()),
            compile_lock: Mutex::new(()),
            compilations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
        }
    }

    pub fn with_customizer(mut self, customizer: Arc<dyn JitCustomizer>) -> Self {
        self.customizer = Some(customizer);
        self
    }

    pub fn with_debug_hook(mut self, debug_hook: Arc<dyn DebugHook>) -> Self {
        self.debug_hook = debug_hook;
        self
    }

    pub fn code_regions(&self) -> &[CodeRegion] {
        &self.code_regions
    }

    /// Run the function at `address`, compiling it first if needed
    pub fn run(&self, address: u16, hardware: &mut NesHardware) -> Result<()> {
        let function = self.get_or_compile(address)?;
        self.invocations.fetch_add(1, Ordering::Relaxed);

        self.debug_hook.on_function_enter(address, hardware);
        let result = function.invoke(hardware);
        self.debug_hook.on_function_exit(address, hardware);

        result.map_err(|source| JitError::Execution { address, source })
    }

    pub fn is_compiled(&self, address: u16) -> bool {
        self.cache.read().contains_key(&address)
    }

    pub fn get(&self, address: u16) -> Option<Arc<CompiledFunction>> {
        self.cache.read().get(&address).cloned()
    }

    /// Cached unit for `address`, compiling on a miss
    pub fn get_or_compile(&self, address: u16) -> Result<Arc<CompiledFunction>> {
        if let Some(function) = self.get(address) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(function);
        }

        let _guard = self.compile_lock.lock();
        if let Some(function) = self.get(address) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(function);
        }

        let function = Arc::new(self.compile(address)?);
        self.cache.write().insert(address, Arc::clone(&function));
        Ok(function)
    }

    fn compile(&self, address: u16) -> Result<CompiledFunction> {
        let function = decompiler::decompile(address, &self.code_regions)
            .map_err(|source| JitError::Decode { entry: address, source })?;
        if function.instructions.is_empty() {
            return Err(JitError::EmptyFunction(address));
        }

        let mut instructions = translator::convert_function(&function);
        if let Some(customizer) = &self.customizer {
            customizer.mutate_instructions(&function, &mut instructions);
        }

        let compiled = self.compile_ir(address, instructions)?;
        debug!(
            "compiled ${:04X}: {} instructions, {} ops",
            address,
            compiled.instructions().len(),
            compiled.op_count()
        );
        Ok(compiled)
    }

    /// Generate a unit from already translated (and customised) IR
    pub fn compile_ir(&self, address: u16, instructions: Vec<ConvertedInstruction>) -> Result<CompiledFunction> {
        if instructions.is_empty() {
            return Err(JitError::EmptyFunction(address));
        }
        let custom = self
            .customizer
            .as_ref()
            .map(|c| c.custom_generators())
            .unwrap_or_default();
        let generator = CodeGenerator::new(Arc::clone(&self.debug_hook), custom);
        let compiled = generator
            .generate(address, instructions)
            .map_err(|source| JitError::Generation { address, source })?;
        self.compilations.fetch_add(1, Ordering::Relaxed);
        Ok(compiled)
    }

    /// Insert a unit unless one already exists; returns whether it was added
    pub(crate) fn insert(&self, function: CompiledFunction) -> bool {
        let mut cache = self.cache.write();
        if cache.contains_key(&function.entry()) {
            return false;
        }
        cache.insert(function.entry(), Arc::new(function));
        true
    }

    /// Compile everything reachable from `entries` through static call
    /// edges: subroutine targets, their return points and BRK resume points
    pub fn precompile(&self, entries: &[u16]) -> PrecompileReport {
        let mut report = PrecompileReport::default();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<u16> = entries.iter().copied().collect();

        while let Some(address) = queue.pop_front() {
            if !seen.insert(address) {
                continue;
            }
            match self.get_or_compile(address) {
                Ok(function) => {
                    report.compiled.push(address);
                    for converted in function.instructions() {
                        let instruction = &converted.original;
                        match instruction.mnemonic {
                            Mnemonic::Jsr => {
                                queue.push_back(instruction.operand_word());
                                queue.push_back(instruction.next_address());
                            }
                            Mnemonic::Brk => queue.push_back(instruction.address.wrapping_add(2)),
                            _ => {}
                        }
                    }
                }
                Err(err) => {
                    debug!("precompile skipped ${:04X}: {}", address, err);
                    report.failed.push((address, err));
                }
            }
        }

        report
    }

    pub fn stats(&self) -> JitStats {
        JitStats {
            compiled_functions: self.cache.read().len(),
            compilations: self.compilations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
        }
    }

    /// Entry addresses currently cached, ascending
    pub fn compiled_entries(&self) -> Vec<u16> {
        let mut entries: Vec<u16> = self.cache.read().keys().copied().collect();
        entries.sort_unstable();
        entries
    }
}

/// What the dispatcher does when compiling or running a unit fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Propagate the error to the caller
    Abort,
    /// Log it, remember the address and let the CPU interpret it instead
    #[default]
    MarkAbsent,
}

/// Routes CPU steps to compiled units
pub struct Dispatcher {
    jit: Arc<JitCompiler>,
    policy: FailurePolicy,
    absent: Mutex<HashSet<u16>>,
}

impl Dispatcher {
    pub fn new(jit: Arc<JitCompiler>, policy: FailurePolicy) -> Self {
        Self {
            jit,
            policy,
            absent: Mutex::new(HashSet::new()),
        }
    }

    pub fn jit(&self) -> &Arc<JitCompiler> {
        &self.jit
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn is_absent(&self, address: u16) -> bool {
        self.absent.lock().contains(&address)
    }

    pub fn absent_count(&self) -> usize {
        self.absent.lock().len()
    }
}

impl FunctionDispatch for Dispatcher {
    fn dispatch(&self, address: u16, hardware: &mut NesHardware) -> Result<bool> {
        if self.is_absent(address) {
            return Ok(false);
        }
        match self.jit.run(address, hardware) {
            Ok(()) => Ok(true),
            Err(err) => match self.policy {
                FailurePolicy::Abort => Err(err),
                FailurePolicy::MarkAbsent => {
                    warn!("no compiled code for ${:04X}: {}", address, err);
                    self.absent.lock().insert(address);
                    Ok(false)
                }
            },
        }
    }
}
