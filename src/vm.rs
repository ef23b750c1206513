// ABOUTME: Frame-based interpreter executing IR modules

use crate::config::DEFAULT_GC_THRESHOLD;
use crate::env::Scope;
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::heap::{GcCycle, Heap, HeapData, HeapStats};
use crate::ir::{is_temp_name, Function, Module, OpCode, Operand};
use crate::lower::THROW_INTRINSIC;
use crate::natives::{NativeCtx, NativeFn, NativeRegistry};
use crate::trace::{TraceEvent, TraceSink};
use crate::value::{values_equal, Closure, ErrorValue, Value};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Guard against runaway recursion blowing host memory.
const MAX_CALL_DEPTH: usize = 4096;

/// One call-stack entry: the function being executed, the position within
/// it, the local scope, the temporary registers, and where in the caller
/// the return value lands.
struct Frame {
    function: Rc<Function>,
    block: usize,
    ip: usize,
    scope: Rc<Scope>,
    temps: HashMap<String, Value>,
    return_to: Option<String>,
}

/// The virtual machine. Owns the heap, the globals, the native registry,
/// and the output sink. Loading merges modules, so a REPL can feed it
/// incrementally.
pub struct Vm {
    module: Module,
    functions: HashMap<String, Rc<Function>>,
    globals: Rc<Scope>,
    heap: Heap,
    registry: NativeRegistry,
    frames: Vec<Frame>,
    out: Box<dyn Write>,
    stop: Arc<AtomicBool>,
    trace: Option<TraceSink>,
}

impl Vm {
    pub fn new(registry: NativeRegistry) -> Self {
        Self::with_output(registry, Box::new(std::io::stdout()))
    }

    pub fn with_output(registry: NativeRegistry, out: Box<dyn Write>) -> Self {
        Vm {
            module: Module::new(),
            functions: HashMap::new(),
            globals: Scope::new(),
            heap: Heap::new(DEFAULT_GC_THRESHOLD),
            registry,
            frames: Vec::new(),
            out,
            stop: Arc::new(AtomicBool::new(false)),
            trace: None,
        }
    }

    pub fn set_trace(&mut self, sink: TraceSink) {
        self.trace = Some(sink);
    }

    pub fn set_gc_threshold(&mut self, threshold: usize) {
        self.heap.set_threshold(threshold);
    }

    /// Cooperative cancellation handle. Setting the flag makes the current
    /// frame raise a `Cancelled` runtime error at the next block transfer.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn define_native(&mut self, name: impl Into<String>, func: NativeFn) {
        self.registry.define(name, func);
    }

    pub fn registry(&self) -> &NativeRegistry {
        &self.registry
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Render a value the way `print` would.
    pub fn display(&self, value: &Value) -> String {
        crate::value::display_value(value, &self.heap)
    }

    /// Merge a compiled module into the VM. Later definitions win.
    pub fn load(&mut self, module: Module) {
        self.module.merge(module);
        self.functions = self
            .module
            .functions
            .iter()
            .map(|(name, func)| (name.clone(), Rc::new(func.clone())))
            .collect();
        let main = Function::from_flat(
            "__main__",
            &self.module.globals,
            self.module.global_handlers.clone(),
        );
        self.functions.insert("__main__".to_string(), Rc::new(main));
    }

    /// Execute the loaded module's top-level instructions to completion.
    /// Returns the module's last value.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let main = self
            .functions
            .get("__main__")
            .cloned()
            .ok_or_else(|| RuntimeError::name_error("no module loaded"))?;
        self.frames.clear();
        self.frames.push(Frame {
            function: main,
            block: 0,
            ip: 0,
            scope: self.globals.clone(),
            temps: HashMap::new(),
            return_to: None,
        });
        let result = self.execute();
        self.frames.clear();
        result
    }

    /// Force a full mark-and-sweep cycle.
    pub fn collect_now(&mut self) -> GcCycle {
        let mut roots: Vec<Value> = Vec::new();
        let mut scopes: Vec<Rc<Scope>> = vec![self.globals.clone()];
        for frame in &self.frames {
            roots.extend(frame.temps.values().cloned());
            scopes.push(frame.scope.clone());
        }
        let cycle = self.heap.collect(roots, &scopes);
        if let Some(trace) = &self.trace {
            trace(&TraceEvent::GcCycle {
                freed: cycle.freed,
                live: cycle.live,
            });
        }
        cycle
    }

    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_now();
        }
    }

    // ===== Main loop =====

    fn execute(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let (function, block, ip) = {
                let frame = match self.frames.last() {
                    Some(frame) => frame,
                    None => return Ok(Value::Null),
                };
                (frame.function.clone(), frame.block, frame.ip)
            };

            let instructions = match function.blocks.get(block) {
                Some(block) => &block.instructions,
                None => return Err(RuntimeError::name_error("invalid block index")),
            };

            if ip >= instructions.len() {
                // Fall through to the next block, or return null at the
                // end of the function
                if block + 1 < function.blocks.len() {
                    if self.stop.load(Ordering::Relaxed) {
                        match self.raise(RuntimeError::cancelled()) {
                            Ok(()) => continue,
                            Err(err) => return Err(err),
                        }
                    }
                    let frame = self.frames.last_mut().expect("frame exists");
                    frame.block = block + 1;
                    frame.ip = 0;
                    continue;
                }
                match self.pop_frame(Value::Null) {
                    Some(value) => return Ok(value),
                    None => continue,
                }
            } else {
                let instr = &instructions[ip];
                self.frames.last_mut().expect("frame exists").ip = ip + 1;
                let outcome = self
                    .exec_instruction(instr, &function)
                    .map_err(|err| err.at(instr.line, instr.column));
                match outcome {
                    Ok(Some(value)) => return Ok(value),
                    Ok(None) => {}
                    Err(err) => match self.raise(err) {
                        Ok(()) => {}
                        Err(err) => return Err(err),
                    },
                }
            }
        }
    }

    /// Transfer control to the innermost handler covering the faulting
    /// block, unwinding frames as needed. Errors with no handler propagate
    /// out.
    fn raise(&mut self, mut error: RuntimeError) -> Result<(), RuntimeError> {
        loop {
            let frame = match self.frames.last() {
                Some(frame) => frame,
                None => return Err(error),
            };
            let block_id = match frame.function.blocks.get(frame.block) {
                Some(block) => block.id.clone(),
                None => {
                    self.frames.pop();
                    continue;
                }
            };
            let handler = frame
                .function
                .handlers
                .iter()
                .rev()
                .find(|handler| {
                    handler.covered.contains(&block_id)
                        && (handler.catch_all || error.is_catchable())
                })
                .cloned();
            match handler {
                Some(handler) => {
                    let bound = self.error_to_value(&error);
                    let frame = self.frames.last_mut().expect("frame exists");
                    frame.scope.define(handler.error_var.clone(), bound);
                    let target = frame
                        .function
                        .block_position(&handler.catch_block)
                        .ok_or_else(|| {
                            RuntimeError::name_error(format!(
                                "handler block '{}' not found",
                                handler.catch_block
                            ))
                        })?;
                    frame.block = target;
                    frame.ip = 0;
                    return Ok(());
                }
                None => {
                    self.frames.pop();
                    if self.frames.is_empty() {
                        return Err(error);
                    }
                }
            }
        }
    }

    fn error_to_value(&self, error: &RuntimeError) -> Value {
        match &error.kind {
            RuntimeErrorKind::Thrown(value) => value.clone(),
            kind => Value::Error(Rc::new(ErrorValue {
                kind: kind.name().to_string(),
                message: error.message.clone(),
                exit_code: match kind {
                    RuntimeErrorKind::Exit(code) => Some(*code),
                    _ => None,
                },
            })),
        }
    }

    /// Rebuild a runtime error from a value given to the throw intrinsic.
    /// Error values keep their original kind, so a rethrown exit or
    /// cancellation unwind stays what it was.
    fn value_to_error(&self, value: Value) -> RuntimeError {
        if let Value::Error(e) = &value {
            let kind = match e.kind.as_str() {
                "TypeError" => Some(RuntimeErrorKind::Type),
                "NameError" => Some(RuntimeErrorKind::Name),
                "IndexError" => Some(RuntimeErrorKind::Index),
                "KeyError" => Some(RuntimeErrorKind::Key),
                "DivisionByZero" => Some(RuntimeErrorKind::DivisionByZero),
                "AssertionError" => Some(RuntimeErrorKind::Assertion),
                "Cancelled" => Some(RuntimeErrorKind::Cancelled),
                "Exit" => Some(RuntimeErrorKind::Exit(e.exit_code.unwrap_or(1))),
                _ => None,
            };
            if let Some(kind) = kind {
                return RuntimeError::new(kind, e.message.clone());
            }
        }
        let message = crate::value::display_value(&value, &self.heap);
        RuntimeError::thrown(value, message)
    }

    // ===== Instruction dispatch =====

    /// Execute one instruction. `Ok(Some(v))` means the program finished
    /// with value `v`.
    fn exec_instruction(
        &mut self,
        instr: &crate::ir::Instruction,
        function: &Rc<Function>,
    ) -> Result<Option<Value>, RuntimeError> {
        match instr.opcode {
            OpCode::ADD
            | OpCode::SUB
            | OpCode::MUL
            | OpCode::DIV
            | OpCode::MOD
            | OpCode::POW => {
                let a = self.resolve(instr.arg1.as_ref())?;
                let b = self.resolve(instr.arg2.as_ref())?;
                let value = self.arith(instr.opcode, a, b)?;
                self.set_result(instr.result.as_deref(), value);
                Ok(None)
            }
            OpCode::EQ | OpCode::NEQ => {
                let a = self.resolve(instr.arg1.as_ref())?;
                let b = self.resolve(instr.arg2.as_ref())?;
                let equal = values_equal(&a, &b, &self.heap);
                let value = Value::Bool(if instr.opcode == OpCode::EQ {
                    equal
                } else {
                    !equal
                });
                self.set_result(instr.result.as_deref(), value);
                Ok(None)
            }
            OpCode::LT | OpCode::LTE | OpCode::GT | OpCode::GTE => {
                let a = self.resolve(instr.arg1.as_ref())?;
                let b = self.resolve(instr.arg2.as_ref())?;
                let ordering = self.ordered_compare(&a, &b)?;
                let value = Value::Bool(match instr.opcode {
                    OpCode::LT => ordering.is_lt(),
                    OpCode::LTE => ordering.is_le(),
                    OpCode::GT => ordering.is_gt(),
                    _ => ordering.is_ge(),
                });
                self.set_result(instr.result.as_deref(), value);
                Ok(None)
            }
            OpCode::AND | OpCode::OR => {
                let a = self.resolve(instr.arg1.as_ref())?;
                let b = self.resolve(instr.arg2.as_ref())?;
                let (a, b) = (a.is_truthy(&self.heap), b.is_truthy(&self.heap));
                let value = Value::Bool(if instr.opcode == OpCode::AND {
                    a && b
                } else {
                    a || b
                });
                self.set_result(instr.result.as_deref(), value);
                Ok(None)
            }
            OpCode::NOT => {
                let a = self.resolve(instr.arg1.as_ref())?;
                let value = Value::Bool(!a.is_truthy(&self.heap));
                self.set_result(instr.result.as_deref(), value);
                Ok(None)
            }
            OpCode::LOAD | OpCode::MOVE => {
                let value = self.resolve(instr.arg1.as_ref())?;
                self.set_result(instr.result.as_deref(), value);
                Ok(None)
            }
            OpCode::STORE => {
                let value = self.resolve(instr.arg1.as_ref())?;
                let name = instr
                    .result
                    .as_deref()
                    .ok_or_else(|| RuntimeError::name_error("STORE without a target"))?;
                let frame = self.frames.last().expect("frame exists");
                if !frame.scope.assign(name, value.clone()) {
                    frame.scope.define(name, value);
                }
                Ok(None)
            }
            OpCode::LABEL | OpCode::NOOP | OpCode::PHI => Ok(None),
            OpCode::JUMP => {
                let label = self.label_operand(instr.arg1.as_ref())?;
                self.jump_to(&label, function)?;
                Ok(None)
            }
            OpCode::JUMP_IF => {
                let condition = self.resolve(instr.arg1.as_ref())?;
                let label = if condition.is_truthy(&self.heap) {
                    self.label_operand(instr.arg2.as_ref())?
                } else {
                    self.label_operand(instr.arg3.as_ref())?
                };
                self.jump_to(&label, function)?;
                Ok(None)
            }
            OpCode::CALL => self.exec_call(instr),
            OpCode::RETURN => {
                let value = match &instr.arg1 {
                    Some(op) => self.resolve(Some(op))?,
                    None => Value::Null,
                };
                Ok(self.pop_frame(value))
            }
            OpCode::NEW_LIST => {
                let items = self.resolve_args(instr.arg1.as_ref())?;
                let id = self.heap.alloc_list(items);
                self.set_result(instr.result.as_deref(), Value::List(id));
                self.maybe_collect();
                Ok(None)
            }
            OpCode::NEW_DICT => {
                let flat = self.resolve_args(instr.arg1.as_ref())?;
                let mut entries = IndexMap::new();
                for pair in flat.chunks(2) {
                    match pair {
                        [Value::Str(key), value] => {
                            entries.insert(key.to_string(), value.clone());
                        }
                        [other, _] => {
                            return Err(RuntimeError::type_error(format!(
                                "dictionary keys must be strings, got {}",
                                other.type_name(&self.heap)
                            )))
                        }
                        _ => return Err(RuntimeError::type_error("malformed dictionary literal")),
                    }
                }
                let id = self.heap.alloc_dict(entries);
                self.set_result(instr.result.as_deref(), Value::Dict(id));
                self.maybe_collect();
                Ok(None)
            }
            OpCode::GET_ATTR => {
                let object = self.resolve(instr.arg1.as_ref())?;
                let name = self.str_operand(instr.arg2.as_ref())?;
                let value = self.get_attr(&object, &name)?;
                self.set_result(instr.result.as_deref(), value);
                Ok(None)
            }
            OpCode::SET_ATTR => {
                let object = self.resolve(instr.arg1.as_ref())?;
                let name = self.str_operand(instr.arg2.as_ref())?;
                let value = self.resolve(instr.arg3.as_ref())?;
                self.set_attr(&object, &name, value)?;
                Ok(None)
            }
            OpCode::GET_INDEX => {
                let target = self.resolve(instr.arg1.as_ref())?;
                let index = self.resolve(instr.arg2.as_ref())?;
                let value = self.get_index(&target, &index)?;
                self.set_result(instr.result.as_deref(), value);
                Ok(None)
            }
            OpCode::SET_INDEX => {
                let target = self.resolve(instr.arg1.as_ref())?;
                let index = self.resolve(instr.arg2.as_ref())?;
                let value = self.resolve(instr.arg3.as_ref())?;
                self.set_index(&target, &index, value)?;
                Ok(None)
            }
        }
    }

    fn jump_to(&mut self, label: &str, function: &Rc<Function>) -> Result<(), RuntimeError> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(RuntimeError::cancelled());
        }
        let target = function
            .block_position(label)
            .ok_or_else(|| RuntimeError::name_error(format!("label '{label}' not found")))?;
        let frame = self.frames.last_mut().expect("frame exists");
        frame.block = target;
        frame.ip = 0;
        Ok(())
    }

    // ===== Operand resolution =====

    fn resolve(&mut self, operand: Option<&Operand>) -> Result<Value, RuntimeError> {
        let operand =
            operand.ok_or_else(|| RuntimeError::name_error("missing instruction operand"))?;
        match operand {
            Operand::Int(n) => Ok(Value::Int(*n)),
            Operand::Float(n) => Ok(Value::Float(*n)),
            Operand::Bool(b) => Ok(Value::Bool(*b)),
            Operand::Str(s) => Ok(Value::str(s)),
            Operand::Null => Ok(Value::Null),
            Operand::Temp(name) => {
                let frame = self.frames.last().expect("frame exists");
                frame
                    .temps
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RuntimeError::name_error(format!("undefined temporary '{name}'")))
            }
            Operand::Var(name) => self.resolve_name(name),
            Operand::Func(name) => {
                let frame = self.frames.last().expect("frame exists");
                Ok(Value::Function(Rc::new(Closure {
                    function: name.clone(),
                    env: Some(frame.scope.clone()),
                    receiver: None,
                })))
            }
            Operand::Label(_) | Operand::Args(_) => {
                Err(RuntimeError::name_error("operand is not a value"))
            }
        }
    }

    /// Name lookup order: scope chain (covers globals), module function,
    /// class, native.
    fn resolve_name(&mut self, name: &str) -> Result<Value, RuntimeError> {
        let frame = self.frames.last().expect("frame exists");
        if let Some(value) = frame.scope.get(name) {
            return Ok(value);
        }
        if self.functions.contains_key(name) || self.module.classes.contains_key(name) {
            return Ok(Value::Function(Rc::new(Closure {
                function: name.to_string(),
                env: None,
                receiver: None,
            })));
        }
        if self.registry.contains(name) {
            return Ok(Value::Native(Rc::from(name)));
        }
        Err(RuntimeError::name_error(format!("undefined name '{name}'")))
    }

    fn resolve_args(&mut self, operand: Option<&Operand>) -> Result<Vec<Value>, RuntimeError> {
        match operand {
            None => Ok(Vec::new()),
            Some(Operand::Args(items)) => {
                items.iter().map(|item| self.resolve(Some(item))).collect()
            }
            Some(other) => Ok(vec![self.resolve(Some(other))?]),
        }
    }

    fn label_operand(&self, operand: Option<&Operand>) -> Result<String, RuntimeError> {
        match operand {
            Some(Operand::Label(label)) => Ok(label.clone()),
            _ => Err(RuntimeError::name_error("expected a label operand")),
        }
    }

    fn str_operand(&mut self, operand: Option<&Operand>) -> Result<String, RuntimeError> {
        match self.resolve(operand)? {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(RuntimeError::type_error(format!(
                "expected a name, got {}",
                other.type_name(&self.heap)
            ))),
        }
    }

    fn set_result(&mut self, result: Option<&str>, value: Value) {
        let Some(name) = result else { return };
        let frame = self.frames.last_mut().expect("frame exists");
        if is_temp_name(name) {
            frame.temps.insert(name.to_string(), value);
        } else {
            frame.scope.define(name, value);
        }
    }

    // ===== Calls =====

    fn exec_call(
        &mut self,
        instr: &crate::ir::Instruction,
    ) -> Result<Option<Value>, RuntimeError> {
        if let Some(Operand::Var(name)) = &instr.arg1 {
            if name == THROW_INTRINSIC {
                let mut args = self.resolve_args(instr.arg2.as_ref())?;
                let value = args.pop().unwrap_or(Value::Null);
                return Err(self.value_to_error(value));
            }
        }

        let args = self.resolve_args(instr.arg2.as_ref())?;
        let dst = instr.result.clone();

        match &instr.arg1 {
            Some(Operand::Var(name)) => {
                let frame = self.frames.last().expect("frame exists");
                if let Some(value) = frame.scope.get(name) {
                    return self.call_value(value, args, dst).map(|_| None);
                }
                if self.functions.contains_key(name.as_str()) {
                    self.push_call(name, None, None, args, dst)?;
                    return Ok(None);
                }
                if self.module.classes.contains_key(name.as_str()) {
                    self.construct(name, args, dst)?;
                    return Ok(None);
                }
                if let Some(native) = self.registry.get(name) {
                    self.call_native(native, args, dst)?;
                    return Ok(None);
                }
                Err(RuntimeError::name_error(format!(
                    "undefined function '{name}'"
                )))
            }
            other => {
                let callee = self.resolve(other.as_ref())?;
                self.call_value(callee, args, dst).map(|_| None)
            }
        }
    }

    fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        dst: Option<String>,
    ) -> Result<(), RuntimeError> {
        match callee {
            Value::Function(closure) => {
                if self.functions.contains_key(&closure.function) {
                    self.push_call(
                        &closure.function.clone(),
                        closure.env.clone(),
                        closure.receiver.clone(),
                        args,
                        dst,
                    )
                } else if self.module.classes.contains_key(&closure.function) {
                    self.construct(&closure.function.clone(), args, dst)
                } else {
                    Err(RuntimeError::name_error(format!(
                        "undefined function '{}'",
                        closure.function
                    )))
                }
            }
            Value::Native(name) => match self.registry.get(&name) {
                Some(native) => self.call_native(native, args, dst),
                None => Err(RuntimeError::name_error(format!(
                    "undefined native '{name}'"
                ))),
            },
            other => Err(RuntimeError::type_error(format!(
                "value of type {} is not callable",
                other.type_name(&self.heap)
            ))),
        }
    }

    fn push_call(
        &mut self,
        name: &str,
        env: Option<Rc<Scope>>,
        receiver: Option<Value>,
        args: Vec<Value>,
        return_to: Option<String>,
    ) -> Result<(), RuntimeError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(RuntimeError::type_error("maximum call depth exceeded"));
        }
        if self.stop.load(Ordering::Relaxed) {
            return Err(RuntimeError::cancelled());
        }
        let function = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::name_error(format!("undefined function '{name}'")))?;
        if args.len() != function.params.len() {
            return Err(RuntimeError::type_error(format!(
                "{name}: expected {} arguments, got {}",
                function.params.len(),
                args.len()
            )));
        }
        let parent = env.unwrap_or_else(|| self.globals.clone());
        let scope = Scope::with_parent(parent);
        for (param, arg) in function.params.iter().zip(args) {
            scope.define(param.clone(), arg);
        }
        if let Some(receiver) = receiver {
            scope.define("this", receiver);
        }
        self.frames.push(Frame {
            function,
            block: 0,
            ip: 0,
            scope,
            temps: HashMap::new(),
            return_to,
        });
        Ok(())
    }

    fn call_native(
        &mut self,
        native: NativeFn,
        args: Vec<Value>,
        dst: Option<String>,
    ) -> Result<(), RuntimeError> {
        let value = {
            let mut ctx = NativeCtx {
                heap: &mut self.heap,
                out: &mut *self.out,
            };
            native(&mut ctx, &args)?
        };
        self.set_result(dst.as_deref(), value);
        self.maybe_collect();
        Ok(())
    }

    /// Calling a class name allocates an instance and runs `init` when the
    /// class (or an ancestor) defines one.
    fn construct(
        &mut self,
        class_name: &str,
        args: Vec<Value>,
        dst: Option<String>,
    ) -> Result<(), RuntimeError> {
        let id = self.heap.alloc_instance(class_name);
        let instance = Value::Instance(id);
        // Root the instance before any collection can run
        self.set_result(dst.as_deref(), instance.clone());
        self.maybe_collect();
        match self.find_method(class_name, "init") {
            Some(init) => {
                // The constructor's own return value is discarded; the
                // destination already holds the instance
                self.push_call(&init, None, Some(instance), args, None)
            }
            None if args.is_empty() => Ok(()),
            None => Err(RuntimeError::type_error(format!(
                "{class_name}: class has no 'init' but was called with {} arguments",
                args.len()
            ))),
        }
    }

    fn find_method(&self, class_name: &str, method: &str) -> Option<String> {
        let mut current = Some(class_name.to_string());
        while let Some(name) = current {
            let class = self.module.classes.get(&name)?;
            if let Some(ir_name) = class.methods.get(method) {
                return Some(ir_name.clone());
            }
            current = class.superclass.clone();
        }
        None
    }

    fn pop_frame(&mut self, value: Value) -> Option<Value> {
        let frame = self.frames.pop().expect("frame exists");
        match self.frames.last_mut() {
            Some(parent) => {
                if let Some(dst) = frame.return_to {
                    parent.temps.insert(dst, value);
                }
                None
            }
            None => Some(value),
        }
    }

    // ===== Value operations =====

    fn arith(&mut self, opcode: OpCode, a: Value, b: Value) -> Result<Value, RuntimeError> {
        match (&a, &b) {
            (Value::Str(x), Value::Str(y)) if opcode == OpCode::ADD => {
                return Ok(Value::str(format!("{x}{y}")));
            }
            (Value::Int(x), Value::Int(y)) => return self.int_arith(opcode, *x, *y),
            (Value::Int(x), Value::Float(y)) => return self.float_arith(opcode, *x as f64, *y),
            (Value::Float(x), Value::Int(y)) => return self.float_arith(opcode, *x, *y as f64),
            (Value::Float(x), Value::Float(y)) => return self.float_arith(opcode, *x, *y),
            _ => {}
        }
        Err(RuntimeError::type_error(format!(
            "unsupported operand types for {:?}: {} and {}",
            opcode,
            a.type_name(&self.heap),
            b.type_name(&self.heap)
        )))
    }

    fn int_arith(&self, opcode: OpCode, x: i64, y: i64) -> Result<Value, RuntimeError> {
        match opcode {
            OpCode::ADD => Ok(Value::Int(x.wrapping_add(y))),
            OpCode::SUB => Ok(Value::Int(x.wrapping_sub(y))),
            OpCode::MUL => Ok(Value::Int(x.wrapping_mul(y))),
            // Integer division produces a float
            OpCode::DIV => {
                if y == 0 {
                    Err(RuntimeError::division_by_zero())
                } else {
                    Ok(Value::Float(x as f64 / y as f64))
                }
            }
            OpCode::MOD => {
                if y == 0 {
                    Err(RuntimeError::division_by_zero())
                } else {
                    Ok(Value::Int(x.wrapping_rem(y)))
                }
            }
            OpCode::POW => {
                if (0..=u32::MAX as i64).contains(&y) {
                    Ok(Value::Int(x.wrapping_pow(y as u32)))
                } else {
                    Ok(Value::Float((x as f64).powf(y as f64)))
                }
            }
            _ => Err(RuntimeError::type_error("not an arithmetic opcode")),
        }
    }

    fn float_arith(&self, opcode: OpCode, x: f64, y: f64) -> Result<Value, RuntimeError> {
        match opcode {
            OpCode::ADD => Ok(Value::Float(x + y)),
            OpCode::SUB => Ok(Value::Float(x - y)),
            OpCode::MUL => Ok(Value::Float(x * y)),
            OpCode::DIV => {
                if y == 0.0 {
                    Err(RuntimeError::division_by_zero())
                } else {
                    Ok(Value::Float(x / y))
                }
            }
            OpCode::MOD => {
                if y == 0.0 {
                    Err(RuntimeError::division_by_zero())
                } else {
                    Ok(Value::Float(x % y))
                }
            }
            OpCode::POW => Ok(Value::Float(x.powf(y))),
            _ => Err(RuntimeError::type_error("not an arithmetic opcode")),
        }
    }

    fn ordered_compare(
        &self,
        a: &Value,
        b: &Value,
    ) -> Result<std::cmp::Ordering, RuntimeError> {
        let ordering = match (a, b) {
            (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
            (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
            (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
            (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
            _ => None,
        };
        ordering.ok_or_else(|| {
            RuntimeError::type_error(format!(
                "ordered comparison not supported between {} and {}",
                a.type_name(&self.heap),
                b.type_name(&self.heap)
            ))
        })
    }

    fn get_attr(&mut self, object: &Value, name: &str) -> Result<Value, RuntimeError> {
        match object {
            Value::Instance(id) => {
                let class = match self.heap.get(*id).map(|o| &o.data) {
                    Some(HeapData::Instance { class, fields }) => {
                        if let Some(value) = fields.get(name) {
                            return Ok(value.clone());
                        }
                        class.clone()
                    }
                    _ => return Err(RuntimeError::type_error("dangling instance reference")),
                };
                match self.find_method(&class, name) {
                    Some(ir_name) => Ok(Value::Function(Rc::new(Closure {
                        function: ir_name,
                        env: None,
                        receiver: Some(object.clone()),
                    }))),
                    None => Err(RuntimeError::key_error(format!(
                        "{class} has no attribute '{name}'"
                    ))),
                }
            }
            Value::Dict(id) => self
                .heap
                .dict(*id)
                .and_then(|entries| entries.get(name).cloned())
                .ok_or_else(|| RuntimeError::key_error(format!("key '{name}' not found"))),
            other => Err(RuntimeError::type_error(format!(
                "{} has no attributes",
                other.type_name(&self.heap)
            ))),
        }
    }

    fn set_attr(&mut self, object: &Value, name: &str, value: Value) -> Result<(), RuntimeError> {
        match object {
            Value::Instance(id) => match self.heap.get_mut(*id).map(|o| &mut o.data) {
                Some(HeapData::Instance { fields, .. }) => {
                    fields.insert(name.to_string(), value);
                    Ok(())
                }
                _ => Err(RuntimeError::type_error("dangling instance reference")),
            },
            Value::Dict(id) => match self.heap.dict_mut(*id) {
                Some(entries) => {
                    entries.insert(name.to_string(), value);
                    Ok(())
                }
                None => Err(RuntimeError::type_error("dangling dict reference")),
            },
            other => Err(RuntimeError::type_error(format!(
                "cannot set attribute on {}",
                other.type_name(&self.heap)
            ))),
        }
    }

    fn get_index(&mut self, target: &Value, index: &Value) -> Result<Value, RuntimeError> {
        match (target, index) {
            (Value::List(id), Value::Int(i)) => {
                let items = self
                    .heap
                    .list(*id)
                    .ok_or_else(|| RuntimeError::type_error("dangling list reference"))?;
                // Negative indices are not wrapped
                if *i < 0 || *i as usize >= items.len() {
                    return Err(RuntimeError::index_error(format!(
                        "index {i} out of range for length {}",
                        items.len()
                    )));
                }
                Ok(items[*i as usize].clone())
            }
            (Value::Dict(id), Value::Str(key)) => self
                .heap
                .dict(*id)
                .and_then(|entries| entries.get(key.as_ref()).cloned())
                .ok_or_else(|| RuntimeError::key_error(format!("key '{key}' not found"))),
            (Value::Dict(_), other) => Err(RuntimeError::type_error(format!(
                "dictionary keys must be strings, got {}",
                other.type_name(&self.heap)
            ))),
            (Value::Str(s), Value::Int(i)) => {
                let length = s.chars().count();
                if *i < 0 || *i as usize >= length {
                    return Err(RuntimeError::index_error(format!(
                        "index {i} out of range for length {length}"
                    )));
                }
                let c = s.chars().nth(*i as usize).expect("checked above");
                Ok(Value::str(c.to_string()))
            }
            (other, _) => Err(RuntimeError::type_error(format!(
                "{} is not indexable",
                other.type_name(&self.heap)
            ))),
        }
    }

    fn set_index(
        &mut self,
        target: &Value,
        index: &Value,
        value: Value,
    ) -> Result<(), RuntimeError> {
        match (target, index) {
            (Value::List(id), Value::Int(i)) => {
                let items = self
                    .heap
                    .list_mut(*id)
                    .ok_or_else(|| RuntimeError::type_error("dangling list reference"))?;
                if *i < 0 || *i as usize >= items.len() {
                    return Err(RuntimeError::index_error(format!(
                        "index {i} out of range for length {}",
                        items.len()
                    )));
                }
                items[*i as usize] = value;
                Ok(())
            }
            (Value::Dict(id), Value::Str(key)) => match self.heap.dict_mut(*id) {
                Some(entries) => {
                    entries.insert(key.to_string(), value);
                    Ok(())
                }
                None => Err(RuntimeError::type_error("dangling dict reference")),
            },
            (Value::Dict(_), other) => Err(RuntimeError::type_error(format!(
                "dictionary keys must be strings, got {}",
                other.type_name(&self.heap)
            ))),
            (other, _) => Err(RuntimeError::type_error(format!(
                "{} is not index-assignable",
                other.type_name(&self.heap)
            ))),
        }
    }
}
