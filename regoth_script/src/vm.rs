use std::rc::Rc;
use std::sync::Arc;

use log::{debug, warn};
use regoth_formats::{Instruction, SlotType, SymbolKind};

use crate::error::VmError;
use crate::external::{ExternalTable, ScriptHost, TrapContext};
use crate::instance::GlobalStore;
use crate::symbol::{SymbolIndex, SymbolTable};
use crate::value::{InstanceRef, SlotValues, SlotWriteError, Value, ValueType};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 128;
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmLimits {
    pub max_call_depth: usize,
    /// Instructions executed per top-level call before it is abandoned.
    pub max_steps: u64,
}

impl Default for VmLimits {
    fn default() -> Self {
        VmLimits {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// One activation record.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub function: SymbolIndex,
    /// Where the caller resumes; `None` for the frame entered by [`Vm::call`].
    pub return_address: Option<usize>,
    pub saved_instance: Option<InstanceRef>,
    pub stack_base: usize,
    saved_params: Vec<(SymbolIndex, SlotValues)>,
}

/// Stack machine executing compiled script functions against a host.
pub struct Vm<H> {
    symbols: Arc<SymbolTable>,
    externals: Rc<ExternalTable<H>>,
    /// Trap slot per symbol, resolved once for every external.
    bindings: Vec<Option<usize>>,
    globals: GlobalStore,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    current_instance: Option<InstanceRef>,
    limits: VmLimits,
}

impl<H: ScriptHost> Vm<H> {
    pub fn new(symbols: Arc<SymbolTable>, externals: Rc<ExternalTable<H>>) -> Self {
        Self::with_limits(symbols, externals, VmLimits::default())
    }

    pub fn with_limits(
        symbols: Arc<SymbolTable>,
        externals: Rc<ExternalTable<H>>,
        limits: VmLimits,
    ) -> Self {
        let mut bindings = vec![None; symbols.len()];
        for (index, symbol) in symbols.iter() {
            if symbol.kind != SymbolKind::External {
                continue;
            }
            let Some(slot) = externals.slot_of(&symbol.name) else {
                warn!("external {} has no registered trap", symbol.name);
                continue;
            };
            let registered = externals.get(slot).map(|entry| entry.signature.params.len());
            if registered != Some(symbol.param_count) {
                warn!(
                    "external {} declares {} parameters but its trap takes {:?}; leaving it unresolved",
                    symbol.name, symbol.param_count, registered
                );
                continue;
            }
            bindings[index.as_usize()] = Some(slot);
        }

        let globals = GlobalStore::new(&symbols);
        Vm {
            symbols,
            externals,
            bindings,
            globals,
            stack: Vec::new(),
            frames: Vec::new(),
            current_instance: None,
            limits,
        }
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn globals(&self) -> &GlobalStore {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut GlobalStore {
        &mut self.globals
    }

    pub fn limits(&self) -> VmLimits {
        self.limits
    }

    /// Number of live call frames; zero between top-level calls.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    pub fn current_instance(&self) -> Option<InstanceRef> {
        self.current_instance
    }

    pub fn is_resolved(&self, external: SymbolIndex) -> bool {
        self.bindings
            .get(external.as_usize())
            .is_some_and(Option::is_some)
    }

    pub fn unresolved_externals(&self) -> Vec<&str> {
        self.symbols
            .iter()
            .filter(|(index, symbol)| {
                symbol.kind == SymbolKind::External && !self.is_resolved(*index)
            })
            .map(|(_, symbol)| symbol.name.as_str())
            .collect()
    }

    /// Run `function` to completion with `instance` bound.
    ///
    /// Instance and prototype symbols may be called too; that runs their
    /// constructor body. On failure the frame and operand stacks are unwound
    /// to where they were before the call.
    pub fn call(
        &mut self,
        host: &mut H,
        function: SymbolIndex,
        args: &[Value],
        instance: Option<InstanceRef>,
    ) -> Result<Value, VmError> {
        let base_depth = self.frames.len();
        let base_stack = self.stack.len();
        let base_instance = self.current_instance;

        let result = self.start(host, function, args, instance, base_depth);

        if let Err(err) = &result {
            debug!(
                "vm call {} failed: {err}",
                self.symbols.get(function).map_or("?", |symbol| symbol.name.as_str())
            );
            while self.frames.len() > base_depth {
                if let Some(frame) = self.frames.pop() {
                    self.restore_params(frame.saved_params);
                }
            }
            self.stack.truncate(base_stack);
            self.current_instance = base_instance;
        }
        result
    }

    fn start(
        &mut self,
        host: &mut H,
        function: SymbolIndex,
        args: &[Value],
        instance: Option<InstanceRef>,
        base_depth: usize,
    ) -> Result<Value, VmError> {
        let entry_point = self.check_callable(function, true)?;
        let expected = self.symbols.symbol(function).param_count;
        if args.len() != expected {
            return Err(VmError::ArityMismatch {
                name: self.symbols.name(function).to_string(),
                expected,
                given: args.len(),
            });
        }
        self.current_instance = instance;
        self.enter(function, args.to_vec(), None)?;
        self.run(host, entry_point, base_depth)
    }

    /// Entry offset of a callable symbol.
    fn check_callable(&self, function: SymbolIndex, top_level: bool) -> Result<usize, VmError> {
        let symbol = self
            .symbols
            .get(function)
            .ok_or(VmError::BadSymbol(function.0))?;
        let kind_ok = match symbol.kind {
            SymbolKind::Function => true,
            SymbolKind::Instance | SymbolKind::Prototype => top_level,
            _ => false,
        };
        match symbol.code_offset {
            Some(offset) if kind_ok => Ok(offset),
            _ => Err(VmError::NotAFunction(function)),
        }
    }

    fn enter(
        &mut self,
        function: SymbolIndex,
        args: Vec<Value>,
        return_address: Option<usize>,
    ) -> Result<(), VmError> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(VmError::StackOverflow {
                limit: self.limits.max_call_depth,
            });
        }

        let symbols = Arc::clone(&self.symbols);
        let mut saved_params = Vec::with_capacity(args.len());
        for (param, value) in symbols.params_of(function).zip(args) {
            let Some(slots) = self.globals.slots_mut(param) else {
                self.restore_params(saved_params);
                return Err(VmError::TypeMismatch {
                    offset: 0,
                    detail: format!("parameter {} has no storage", symbols.name(param)),
                });
            };
            let previous = slots.clone();
            let given = value.value_type();
            if slots.set(0, value).is_err() {
                // Put back what was already bound before failing.
                self.restore_params(saved_params);
                return Err(VmError::TypeMismatch {
                    offset: 0,
                    detail: format!(
                        "argument {} expects {}, got {}",
                        symbols.name(param),
                        previous.value_type().name(),
                        given.name()
                    ),
                });
            }
            saved_params.push((param, previous));
        }

        self.frames.push(CallFrame {
            function,
            return_address,
            saved_instance: self.current_instance,
            stack_base: self.stack.len(),
            saved_params,
        });
        Ok(())
    }

    fn restore_params(&mut self, saved: Vec<(SymbolIndex, SlotValues)>) {
        for (param, values) in saved.into_iter().rev() {
            if let Some(slots) = self.globals.slots_mut(param) {
                *slots = values;
            }
        }
    }

    fn run(&mut self, host: &mut H, entry_point: usize, base_depth: usize) -> Result<Value, VmError> {
        let symbols = Arc::clone(&self.symbols);
        let code = symbols.code();
        let mut pc = entry_point;
        let mut steps: u64 = 0;

        loop {
            steps += 1;
            if steps > self.limits.max_steps {
                return Err(VmError::StepLimit(self.limits.max_steps));
            }

            let offset = pc;
            let (instruction, len) = Instruction::decode(code, pc)?;
            pc += len;

            match instruction {
                Instruction::Add => self.int_binary(offset, i32::wrapping_add)?,
                Instruction::Sub => self.int_binary(offset, i32::wrapping_sub)?,
                Instruction::Mul => self.int_binary(offset, i32::wrapping_mul)?,
                Instruction::Div => {
                    self.int_binary(offset, |a, b| if b == 0 { 0 } else { a.wrapping_div(b) })?
                }
                Instruction::Mod => {
                    self.int_binary(offset, |a, b| if b == 0 { 0 } else { a.wrapping_rem(b) })?
                }
                Instruction::Less => self.int_binary(offset, |a, b| i32::from(a < b))?,
                Instruction::Greater => self.int_binary(offset, |a, b| i32::from(a > b))?,
                Instruction::Eq => self.int_binary(offset, |a, b| i32::from(a == b))?,
                Instruction::NotEq => self.int_binary(offset, |a, b| i32::from(a != b))?,
                Instruction::LessEq => self.int_binary(offset, |a, b| i32::from(a <= b))?,
                Instruction::GreaterEq => self.int_binary(offset, |a, b| i32::from(a >= b))?,
                Instruction::And => self.int_binary(offset, |a, b| i32::from(a != 0 && b != 0))?,
                Instruction::Or => self.int_binary(offset, |a, b| i32::from(a != 0 || b != 0))?,
                Instruction::BitAnd => self.int_binary(offset, |a, b| a & b)?,
                Instruction::BitOr => self.int_binary(offset, |a, b| a | b)?,
                Instruction::Shl => self.int_binary(offset, |a, b| a.wrapping_shl(b as u32))?,
                Instruction::Shr => self.int_binary(offset, |a, b| a.wrapping_shr(b as u32))?,
                Instruction::Neg => {
                    let value = self.pop_int(offset)?;
                    self.stack.push(Value::Int(value.wrapping_neg()));
                }
                Instruction::Not => {
                    let value = self.pop_int(offset)?;
                    self.stack.push(Value::Int(i32::from(value == 0)));
                }
                Instruction::AddF => self.float_binary(offset, |a, b| Value::Float(a + b))?,
                Instruction::SubF => self.float_binary(offset, |a, b| Value::Float(a - b))?,
                Instruction::MulF => self.float_binary(offset, |a, b| Value::Float(a * b))?,
                Instruction::DivF => self.float_binary(offset, |a, b| Value::Float(a / b))?,
                Instruction::LessF => self.float_binary(offset, |a, b| Value::Int(i32::from(a < b)))?,
                Instruction::GreaterF => {
                    self.float_binary(offset, |a, b| Value::Int(i32::from(a > b)))?
                }
                Instruction::EqF => self.float_binary(offset, |a, b| Value::Int(i32::from(a == b)))?,
                Instruction::NegF => {
                    let value = self.pop_float(offset)?;
                    self.stack.push(Value::Float(-value));
                }
                Instruction::IntToFloat => {
                    let value = self.pop_int(offset)?;
                    self.stack.push(Value::Float(value as f32));
                }
                Instruction::FloatToInt => {
                    let value = self.pop_float(offset)?;
                    self.stack.push(Value::Int(value as i32));
                }
                Instruction::Concat => {
                    let right = self.pop(offset)?;
                    let left = self.pop(offset)?;
                    match (left.stringify(), right.stringify()) {
                        (Some(mut text), Some(tail)) => {
                            text.push_str(&tail);
                            self.stack.push(Value::Str(text));
                        }
                        _ => {
                            return Err(VmError::TypeMismatch {
                                offset,
                                detail: format!(
                                    "cannot concatenate {} and {}",
                                    left.value_type().name(),
                                    right.value_type().name()
                                ),
                            });
                        }
                    }
                }
                Instruction::PushInt(value) => self.stack.push(Value::Int(value)),
                Instruction::PushFloat(value) => self.stack.push(Value::Float(value)),
                Instruction::PushString(symbol) => {
                    let index = self.symbol_operand(symbol)?;
                    match self.globals.get(index, 0) {
                        Some(value @ Value::Str(_)) => self.stack.push(value),
                        _ => {
                            return Err(VmError::TypeMismatch {
                                offset,
                                detail: format!("{} is not a string constant", symbols.name(index)),
                            });
                        }
                    }
                }
                Instruction::PushVar { symbol, element } => {
                    let index = self.symbol_operand(symbol)?;
                    let value = self.read_var(host, index, element as usize, offset)?;
                    self.stack.push(value);
                }
                Instruction::StoreVar { symbol, element } => {
                    let index = self.symbol_operand(symbol)?;
                    let value = self.pop(offset)?;
                    self.write_var(host, index, element as usize, value, offset)?;
                }
                Instruction::PushInstance(symbol) => {
                    let index = self.symbol_operand(symbol)?;
                    let reference = self.resolve_instance(host, index, offset)?;
                    self.stack.push(Value::Instance(reference));
                }
                Instruction::SetInstance(symbol) => {
                    let index = self.symbol_operand(symbol)?;
                    self.current_instance = self.resolve_instance(host, index, offset)?;
                }
                Instruction::Jump(target) => pc = target as usize,
                Instruction::JumpIfZero(target) => {
                    if self.pop_int(offset)? == 0 {
                        pc = target as usize;
                    }
                }
                Instruction::Call(symbol) => {
                    let index = self.symbol_operand(symbol)?;
                    let entry_point = self.check_callable(index, false)?;
                    let args = self.pop_args(symbols.symbol(index).param_count, offset)?;
                    self.enter(index, args, Some(pc))?;
                    pc = entry_point;
                }
                Instruction::CallExternal(symbol) => {
                    let index = self.symbol_operand(symbol)?;
                    self.call_external(host, index, offset)?;
                }
                Instruction::Pop => {
                    self.pop(offset)?;
                }
                Instruction::Return => {
                    let Some(frame) = self.frames.last() else {
                        return Err(VmError::StackUnderflow { offset });
                    };
                    let function = symbols.symbol(frame.function);
                    let value = if function.has_return() {
                        let value = self.pop(offset)?;
                        let declared = ValueType::from_slot_type(function.return_type);
                        if declared != Some(value.value_type()) {
                            return Err(VmError::TypeMismatch {
                                offset,
                                detail: format!(
                                    "{} returns {}, got {}",
                                    function.name,
                                    declared.map_or("nothing", ValueType::name),
                                    value.value_type().name()
                                ),
                            });
                        }
                        Some(value)
                    } else {
                        None
                    };

                    let Some(frame) = self.frames.pop() else {
                        return Err(VmError::StackUnderflow { offset });
                    };
                    self.stack.truncate(frame.stack_base);
                    self.restore_params(frame.saved_params);
                    self.current_instance = frame.saved_instance;

                    match frame.return_address {
                        Some(address) if self.frames.len() > base_depth => {
                            if let Some(value) = value {
                                self.stack.push(value);
                            }
                            pc = address;
                        }
                        _ => return Ok(value.unwrap_or_default()),
                    }
                }
            }
        }
    }

    fn call_external(&mut self, host: &mut H, external: SymbolIndex, offset: usize) -> Result<(), VmError> {
        let symbols = Arc::clone(&self.symbols);
        let symbol = symbols.symbol(external);
        if symbol.kind != SymbolKind::External {
            return Err(VmError::NotAFunction(external));
        }
        let Some(slot) = self.bindings.get(external.as_usize()).copied().flatten() else {
            warn!("call to unresolved external {}", symbol.name);
            return Err(VmError::UnresolvedExternal {
                name: symbol.name.clone(),
            });
        };
        let externals = Rc::clone(&self.externals);
        let Some(trap) = externals.get(slot) else {
            return Err(VmError::UnresolvedExternal {
                name: symbol.name.clone(),
            });
        };

        let args = self.pop_args(symbol.param_count, offset)?;
        for (position, (value, expected)) in args.iter().zip(&trap.signature.params).enumerate() {
            if value.value_type() != *expected {
                return Err(VmError::TypeMismatch {
                    offset,
                    detail: format!(
                        "{} argument {position} expects {}, got {}",
                        symbol.name,
                        expected.name(),
                        value.value_type().name()
                    ),
                });
            }
        }

        let mut context = TrapContext {
            host,
            globals: &mut self.globals,
            symbols: &symbols,
            args: &args,
            instance: self.current_instance,
        };
        let value = (trap.function)(&mut context).map_err(|source| VmError::Trap {
            name: symbol.name.clone(),
            source,
        })?;

        if let Some(declared) = ValueType::from_slot_type(symbol.return_type) {
            if value.value_type() != declared {
                return Err(VmError::TypeMismatch {
                    offset,
                    detail: format!(
                        "{} returned {}, declared {}",
                        symbol.name,
                        value.value_type().name(),
                        declared.name()
                    ),
                });
            }
            self.stack.push(value);
        }
        Ok(())
    }

    fn symbol_operand(&self, raw: u32) -> Result<SymbolIndex, VmError> {
        let index = SymbolIndex(raw);
        if self.symbols.get(index).is_some() {
            Ok(index)
        } else {
            Err(VmError::BadSymbol(raw))
        }
    }

    fn resolve_instance(
        &self,
        host: &H,
        symbol: SymbolIndex,
        offset: usize,
    ) -> Result<Option<InstanceRef>, VmError> {
        let entry = self.symbols.symbol(symbol);
        match entry.kind {
            SymbolKind::Instance => Ok(host.resolve_instance_symbol(symbol)),
            _ if entry.slot_type == SlotType::Instance => {
                match self.read_var(host, symbol, 0, offset)? {
                    Value::Instance(reference) => Ok(reference),
                    _ => Ok(None),
                }
            }
            _ => Err(VmError::TypeMismatch {
                offset,
                detail: format!("{} does not name an instance", entry.name),
            }),
        }
    }

    fn read_var(
        &self,
        host: &H,
        symbol: SymbolIndex,
        element: usize,
        offset: usize,
    ) -> Result<Value, VmError> {
        let slots = if self.symbols.symbol(symbol).is_member() {
            let reference = self.current_instance.ok_or(VmError::NoInstance { offset })?;
            let instance = host
                .instance(reference)
                .ok_or(VmError::NoInstance { offset })?;
            instance
                .member(&self.symbols, symbol)
                .ok_or_else(|| not_a_member(&self.symbols, symbol, offset))?
        } else {
            self.globals
                .slots(symbol)
                .ok_or_else(|| no_storage(&self.symbols, symbol, offset))?
        };
        slots
            .get(element)
            .ok_or(VmError::IndexOutOfRange { symbol, element })
    }

    fn write_var(
        &mut self,
        host: &mut H,
        symbol: SymbolIndex,
        element: usize,
        value: Value,
        offset: usize,
    ) -> Result<(), VmError> {
        let given = value.value_type();
        let result = if self.symbols.symbol(symbol).is_member() {
            let reference = self.current_instance.ok_or(VmError::NoInstance { offset })?;
            let instance = host
                .instance_mut(reference)
                .ok_or(VmError::NoInstance { offset })?;
            instance
                .member_mut(&self.symbols, symbol)
                .ok_or_else(|| not_a_member(&self.symbols, symbol, offset))?
                .set(element, value)
        } else if self.symbols.symbol(symbol).kind == SymbolKind::Constant {
            return Err(read_only(&self.symbols, symbol, offset));
        } else {
            self.globals
                .slots_mut(symbol)
                .ok_or_else(|| no_storage(&self.symbols, symbol, offset))?
                .set(element, value)
        };
        result.map_err(|err| match err {
            SlotWriteError::OutOfRange => VmError::IndexOutOfRange { symbol, element },
            SlotWriteError::Type(expected) => VmError::TypeMismatch {
                offset,
                detail: format!(
                    "cannot store {} into {} slot {}",
                    given.name(),
                    expected.name(),
                    self.symbols.name(symbol)
                ),
            },
        })
    }

    fn pop(&mut self, offset: usize) -> Result<Value, VmError> {
        let floor = self.frames.last().map_or(0, |frame| frame.stack_base);
        if self.stack.len() <= floor {
            return Err(VmError::StackUnderflow { offset });
        }
        self.stack.pop().ok_or(VmError::StackUnderflow { offset })
    }

    fn pop_args(&mut self, count: usize, offset: usize) -> Result<Vec<Value>, VmError> {
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.pop(offset)?);
        }
        args.reverse();
        Ok(args)
    }

    fn pop_int(&mut self, offset: usize) -> Result<i32, VmError> {
        match self.pop(offset)? {
            Value::Int(value) => Ok(value),
            other => Err(VmError::TypeMismatch {
                offset,
                detail: format!("expected int, got {}", other.value_type().name()),
            }),
        }
    }

    fn pop_float(&mut self, offset: usize) -> Result<f32, VmError> {
        match self.pop(offset)? {
            Value::Float(value) => Ok(value),
            other => Err(VmError::TypeMismatch {
                offset,
                detail: format!("expected float, got {}", other.value_type().name()),
            }),
        }
    }

    fn int_binary(&mut self, offset: usize, op: impl Fn(i32, i32) -> i32) -> Result<(), VmError> {
        let right = self.pop_int(offset)?;
        let left = self.pop_int(offset)?;
        self.stack.push(Value::Int(op(left, right)));
        Ok(())
    }

    fn float_binary(&mut self, offset: usize, op: impl Fn(f32, f32) -> Value) -> Result<(), VmError> {
        let right = self.pop_float(offset)?;
        let left = self.pop_float(offset)?;
        self.stack.push(op(left, right));
        Ok(())
    }
}

fn not_a_member(symbols: &SymbolTable, symbol: SymbolIndex, offset: usize) -> VmError {
    VmError::TypeMismatch {
        offset,
        detail: format!("bound instance has no member {}", symbols.name(symbol)),
    }
}

fn no_storage(symbols: &SymbolTable, symbol: SymbolIndex, offset: usize) -> VmError {
    VmError::TypeMismatch {
        offset,
        detail: format!("{} has no value storage", symbols.name(symbol)),
    }
}

fn read_only(symbols: &SymbolTable, symbol: SymbolIndex, offset: usize) -> VmError {
    VmError::TypeMismatch {
        offset,
        detail: format!("{} is a constant", symbols.name(symbol)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use regoth_formats::{ScriptImageBuilder, SlotData};

    #[derive(Default)]
    struct Host {
        instances: Vec<Instance>,
    }

    impl ScriptHost for Host {
        fn instance(&self, reference: InstanceRef) -> Option<&Instance> {
            self.instances.get(reference.0 as usize)
        }

        fn instance_mut(&mut self, reference: InstanceRef) -> Option<&mut Instance> {
            self.instances.get_mut(reference.0 as usize)
        }
    }

    fn vm_for(builder: ScriptImageBuilder) -> Vm<Host> {
        let table = SymbolTable::load(&builder.build().unwrap()).unwrap();
        Vm::new(Arc::new(table), Rc::new(ExternalTable::new()))
    }

    #[test]
    fn integer_arithmetic_wraps_and_division_by_zero_is_zero() {
        let mut builder = ScriptImageBuilder::new();
        builder.function("Overflow", &[], SlotType::Int, |body| {
            body.int(i32::MAX).int(1).emit(Instruction::Add).ret();
        });
        builder.function("DivZero", &[], SlotType::Int, |body| {
            body.int(7).int(0).emit(Instruction::Div).ret();
        });
        let mut vm = vm_for(builder);
        let mut host = Host::default();
        let overflow = vm.symbols().lookup("OVERFLOW").unwrap();
        let div = vm.symbols().lookup("DIVZERO").unwrap();
        assert_eq!(vm.call(&mut host, overflow, &[], None), Ok(Value::Int(i32::MIN)));
        assert_eq!(vm.call(&mut host, div, &[], None), Ok(Value::Int(0)));
    }

    #[test]
    fn concat_stringifies_numbers() {
        let mut builder = ScriptImageBuilder::new();
        builder.function("Label", &[SlotType::Int], SlotType::String, |body| {
            body.string("hp=")
                .load("LABEL.PAR0")
                .emit(Instruction::Concat)
                .float(0.5)
                .emit(Instruction::Concat)
                .ret();
        });
        let mut vm = vm_for(builder);
        let label = vm.symbols().lookup("LABEL").unwrap();
        let result = vm.call(&mut Host::default(), label, &[Value::Int(12)], None);
        assert_eq!(result, Ok(Value::Str("hp=120.5".into())));
    }

    #[test]
    fn recursion_restores_parameters() {
        let mut builder = ScriptImageBuilder::new();
        // Fact(n) = n <= 1 ? 1 : n * Fact(n - 1)
        builder.function("Fact", &[SlotType::Int], SlotType::Int, |body| {
            body.load("FACT.PAR0")
                .int(1)
                .emit(Instruction::LessEq)
                .jump_if_zero("recurse")
                .int(1)
                .ret()
                .label("recurse")
                .load("FACT.PAR0")
                .load("FACT.PAR0")
                .int(1)
                .emit(Instruction::Sub)
                .call("Fact")
                .emit(Instruction::Mul)
                .ret();
        });
        let mut vm = vm_for(builder);
        let fact = vm.symbols().lookup("FACT").unwrap();
        assert_eq!(
            vm.call(&mut Host::default(), fact, &[Value::Int(5)], None),
            Ok(Value::Int(120))
        );
        assert_eq!(vm.depth(), 0);
        let param = vm.symbols().lookup("FACT.PAR0").unwrap();
        assert_eq!(vm.globals().get(param, 0), Some(Value::Int(0)));
    }

    #[test]
    fn unbounded_recursion_overflows_and_unwinds() {
        let mut builder = ScriptImageBuilder::new();
        builder.function("Forever", &[], SlotType::None, |body| {
            body.call("Forever").ret();
        });
        let mut vm = vm_for(builder);
        let forever = vm.symbols().lookup("FOREVER").unwrap();
        let err = vm.call(&mut Host::default(), forever, &[], None).unwrap_err();
        assert_eq!(
            err,
            VmError::StackOverflow {
                limit: DEFAULT_MAX_CALL_DEPTH
            }
        );
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn member_access_uses_bound_instance() {
        let mut builder = ScriptImageBuilder::new();
        builder.class("C_Npc", &[("attribute", SlotType::Int, 2)]);
        builder.instance("NPC_Bert", "C_Npc", |body| {
            body.int(40).store_element("C_NPC.ATTRIBUTE", 0).ret();
        });
        builder.function("Hurt", &[], SlotType::Int, |body| {
            body.load_element("C_NPC.ATTRIBUTE", 0)
                .int(15)
                .emit(Instruction::Sub)
                .store_element("C_NPC.ATTRIBUTE", 0)
                .load_element("C_NPC.ATTRIBUTE", 0)
                .ret();
        });
        let mut vm = vm_for(builder);
        let table = Arc::clone(vm.symbols());
        let bert = table.lookup("NPC_BERT").unwrap();
        let mut host = Host {
            instances: vec![Instance::new(&table, bert).unwrap()],
        };
        let me = Some(InstanceRef(0));
        vm.call(&mut host, bert, &[], me).unwrap();
        let hurt = table.lookup("HURT").unwrap();
        assert_eq!(vm.call(&mut host, hurt, &[], me), Ok(Value::Int(25)));

        assert_eq!(
            vm.call(&mut host, hurt, &[], None),
            Err(VmError::NoInstance { offset: table.symbol(hurt).code_offset.unwrap() })
        );
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut builder = ScriptImageBuilder::new();
        builder.variable("counter", SlotData::Int(vec![0]));
        builder.function("Bad", &[], SlotType::None, |body| {
            body.float(1.0).store("COUNTER").ret();
        });
        let mut vm = vm_for(builder);
        let bad = vm.symbols().lookup("BAD").unwrap();
        assert!(matches!(
            vm.call(&mut Host::default(), bad, &[], None),
            Err(VmError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn constants_refuse_stores() {
        let mut builder = ScriptImageBuilder::new();
        builder.constant("LOOP_END", SlotData::Int(vec![1]));
        builder.function("Clobber", &[], SlotType::None, |body| {
            body.int(0).store("LOOP_END").ret();
        });
        let mut vm = vm_for(builder);
        let clobber = vm.symbols().lookup("CLOBBER").unwrap();
        let loop_end = vm.symbols().lookup("LOOP_END").unwrap();
        match vm.call(&mut Host::default(), clobber, &[], None) {
            Err(VmError::TypeMismatch { detail, .. }) => {
                assert_eq!(detail, "LOOP_END is a constant")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(vm.globals().get(loop_end, 0), Some(Value::Int(1)));
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn invalid_opcode_and_step_limit() {
        let mut builder = ScriptImageBuilder::new();
        builder.function("Spin", &[], SlotType::None, |body| {
            body.label("top").jump("top");
        });
        let table = SymbolTable::load(&builder.build().unwrap()).unwrap();
        let limits = VmLimits {
            max_steps: 50,
            ..VmLimits::default()
        };
        let mut vm: Vm<Host> = Vm::with_limits(Arc::new(table), Rc::new(ExternalTable::new()), limits);
        let spin = vm.symbols().lookup("SPIN").unwrap();
        assert_eq!(
            vm.call(&mut Host::default(), spin, &[], None),
            Err(VmError::StepLimit(50))
        );

        let mut image = ScriptImageBuilder::new().build().unwrap();
        let mut record = regoth_formats::SymbolRecord::new("JUNK", SymbolKind::Function);
        record.code_offset = Some(0);
        image.symbols.push(record);
        image.code = vec![0xEE];
        let table = SymbolTable::load(&image).unwrap();
        let mut vm: Vm<Host> = Vm::new(Arc::new(table), Rc::new(ExternalTable::new()));
        let junk = vm.symbols().lookup("JUNK").unwrap();
        assert!(matches!(
            vm.call(&mut Host::default(), junk, &[], None),
            Err(VmError::InvalidOpcode(_))
        ));
    }

    #[test]
    fn arity_is_checked_for_top_level_calls() {
        let mut builder = ScriptImageBuilder::new();
        builder.function("One", &[SlotType::Int], SlotType::None, |body| {
            body.ret();
        });
        let mut vm = vm_for(builder);
        let one = vm.symbols().lookup("ONE").unwrap();
        assert!(matches!(
            vm.call(&mut Host::default(), one, &[], None),
            Err(VmError::ArityMismatch { expected: 1, given: 0, .. })
        ));
    }
}
