//! Stack VM over compiled chunks. Instances are laid out by shapes and every
//! property and call instruction feeds its own inline-cache site.

pub mod chunk;
pub mod inline_cache;
pub mod natives;
pub mod shape;
pub mod value;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::compiler::CompiledScript;
use crate::diagnostic::{InternalError, RuntimeError, TraceEntry};

use chunk::*;
use inline_cache::{CacheStats, CallTarget, InlineCaches, SiteId};
use shape::{ShapeId, ShapeTable};
use value::{BoundMethod, Class, Closure, Instance, Upvalue, UpvalueRef, Value};

/// Maximum call depth before "Stack overflow.".
pub const FRAMES_MAX: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Internal(#[from] InternalError),
    #[error("failed to write program output: {0}")]
    Output(#[from] std::io::Error),
}

type VmResult<T> = Result<T, VmError>;

struct CallFrame {
    closure: Rc<Closure>,
    ip: usize,
    /// Stack index of slot 0 (the callee or receiver).
    base: usize,
}

pub struct Vm<'out> {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<Rc<str>, Value>,
    /// Upvalues still pointing into `stack`.
    open_upvalues: Vec<UpvalueRef>,
    shapes: ShapeTable,
    caches: InlineCaches,
    out: &'out mut dyn Write,
}

impl<'out> Vm<'out> {
    /// A VM whose `print` output goes to `out`, with the built-ins defined.
    pub fn new(out: &'out mut dyn Write) -> Self {
        let mut globals: HashMap<Rc<str>, Value> = HashMap::new();
        for native in natives::builtins() {
            globals.insert(Rc::from(native.name), Value::Native(Rc::new(native)));
        }
        Vm {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals,
            open_upvalues: Vec::new(),
            shapes: ShapeTable::new(),
            caches: InlineCaches::default(),
            out,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.caches.stats()
    }

    /// Number of distinct shapes created so far, the empty shape included.
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Push buffered `print` output through to the underlying writer.
    pub fn flush(&mut self) -> VmResult<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Execute `script` to completion or to the first error.
    pub fn run(&mut self, script: &CompiledScript) -> VmResult<()> {
        self.caches = InlineCaches::new(script.sites);
        let closure = Rc::new(Closure { function: Rc::clone(&script.function), upvalues: Vec::new() });
        self.push(Value::Closure(Rc::clone(&closure)));
        let result = self.call(closure, 0).and_then(|()| self.execute());
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    // ---- Dispatch loop ----

    fn execute(&mut self) -> VmResult<()> {
        loop {
            if log::log_enabled!(log::Level::Trace) {
                self.trace_instruction();
            }
            let op = self.read_byte()?;
            match op {
                OP_CONSTANT => {
                    let index = self.read_byte()? as usize;
                    let value = self.constant(index)?;
                    self.push(value);
                }
                OP_NIL => self.push(Value::Nil),
                OP_TRUE => self.push(Value::Bool(true)),
                OP_FALSE => self.push(Value::Bool(false)),
                OP_POP => {
                    self.pop()?;
                }

                OP_GET_LOCAL => {
                    let offset = self.read_byte()? as usize;
                    let slot = self.frame()?.base + offset;
                    let value = self.slot_mut(slot)?.clone();
                    self.push(value);
                }
                OP_SET_LOCAL => {
                    let offset = self.read_byte()? as usize;
                    let slot = self.frame()?.base + offset;
                    let value = self.peek(0)?.clone();
                    *self.slot_mut(slot)? = value;
                }
                OP_GET_GLOBAL => {
                    let name = self.read_string("GET_GLOBAL")?;
                    let Some(value) = self.globals.get(&name).cloned() else {
                        return Err(self.runtime_error(format!("Undefined variable '{name}'.")));
                    };
                    self.push(value);
                }
                OP_DEFINE_GLOBAL => {
                    let name = self.read_string("DEFINE_GLOBAL")?;
                    let value = self.pop()?;
                    self.globals.insert(name, value);
                }
                OP_SET_GLOBAL => {
                    let name = self.read_string("SET_GLOBAL")?;
                    if !self.globals.contains_key(&name) {
                        return Err(self.runtime_error(format!("Undefined variable '{name}'.")));
                    }
                    let value = self.peek(0)?.clone();
                    self.globals.insert(name, value);
                }
                OP_GET_UPVALUE => {
                    let index = self.read_byte()? as usize;
                    let upvalue = self.upvalue(index)?;
                    let open_slot = match &*upvalue.borrow() {
                        Upvalue::Open(slot) => Some(*slot),
                        Upvalue::Closed(value) => {
                            self.push(value.clone());
                            None
                        }
                    };
                    if let Some(slot) = open_slot {
                        let value = self.slot_mut(slot)?.clone();
                        self.push(value);
                    }
                }
                OP_SET_UPVALUE => {
                    let index = self.read_byte()? as usize;
                    let upvalue = self.upvalue(index)?;
                    let value = self.peek(0)?.clone();
                    let open_slot = match &mut *upvalue.borrow_mut() {
                        Upvalue::Open(slot) => Some(*slot),
                        Upvalue::Closed(closed) => {
                            *closed = value.clone();
                            None
                        }
                    };
                    if let Some(slot) = open_slot {
                        *self.slot_mut(slot)? = value;
                    }
                }

                OP_GET_PROPERTY => {
                    let name = self.read_string("GET_PROPERTY")?;
                    let site = self.read_u16()?;
                    self.get_property(name, site)?;
                }
                OP_SET_PROPERTY => {
                    let name = self.read_string("SET_PROPERTY")?;
                    let site = self.read_u16()?;
                    self.set_property(name, site)?;
                }
                OP_GET_SUPER => {
                    let name = self.read_string("GET_SUPER")?;
                    let superclass = match self.pop()? {
                        Value::Class(class) => class,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    let receiver = self.pop()?;
                    self.bind_method(&superclass, &name, receiver)?;
                }

                OP_EQUAL => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b));
                }
                OP_GREATER => {
                    let (a, b) = self.number_operands()?;
                    self.push(Value::Bool(a > b));
                }
                OP_GREATER_EQUAL => {
                    let (a, b) = self.number_operands()?;
                    self.push(Value::Bool(a >= b));
                }
                OP_LESS => {
                    let (a, b) = self.number_operands()?;
                    self.push(Value::Bool(a < b));
                }
                OP_LESS_EQUAL => {
                    let (a, b) = self.number_operands()?;
                    self.push(Value::Bool(a <= b));
                }
                OP_ADD => {
                    let sum = match (self.peek(1)?, self.peek(0)?) {
                        (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
                        (Value::String(a), Value::String(b)) => {
                            let mut joined = String::with_capacity(a.len() + b.len());
                            joined.push_str(a);
                            joined.push_str(b);
                            Value::string(joined)
                        }
                        _ => return Err(self.runtime_error("Operands must be numbers or strings for +.")),
                    };
                    self.pop()?;
                    self.pop()?;
                    self.push(sum);
                }
                OP_SUBTRACT => {
                    let (a, b) = self.number_operands()?;
                    self.push(Value::Number(a - b));
                }
                OP_MULTIPLY => {
                    let (a, b) = self.number_operands()?;
                    self.push(Value::Number(a * b));
                }
                OP_DIVIDE => {
                    let (a, b) = self.number_operands()?;
                    self.push(Value::Number(a / b));
                }
                OP_NOT => {
                    let value = self.pop()?;
                    self.push(Value::Bool(value.is_falsey()));
                }
                OP_NEGATE => {
                    let Value::Number(n) = *self.peek(0)? else {
                        return Err(self.runtime_error("Operand must be a number."));
                    };
                    self.pop()?;
                    self.push(Value::Number(-n));
                }

                OP_PRINT => {
                    let value = self.pop()?;
                    writeln!(self.out, "{value}")?;
                }
                OP_JUMP => {
                    let offset = self.read_u16()? as usize;
                    self.frame_mut()?.ip += offset;
                }
                OP_JUMP_IF_FALSE => {
                    let offset = self.read_u16()? as usize;
                    if self.peek(0)?.is_falsey() {
                        self.frame_mut()?.ip += offset;
                    }
                }
                OP_LOOP => {
                    let offset = self.read_u16()? as usize;
                    let frame = self.frame_mut()?;
                    frame.ip = frame.ip.saturating_sub(offset);
                }

                OP_CALL => {
                    let argc = self.read_byte()? as usize;
                    let site = self.read_u16()?;
                    let callee = self.peek(argc)?.clone();
                    self.record_call(site, &callee);
                    self.call_value(callee, argc)?;
                }
                OP_CLOSURE => self.make_closure()?,
                OP_CLOSE_UPVALUE => {
                    let top = self.stack.len().checked_sub(1).ok_or(InternalError::StackUnderflow)?;
                    self.close_upvalues(top);
                    self.pop()?;
                }
                OP_RETURN => {
                    let result = self.pop()?;
                    let frame = self.frames.pop().ok_or(InternalError::NoActiveFrame)?;
                    self.close_upvalues(frame.base);
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(result);
                }

                OP_CLASS => {
                    let name = self.read_string("CLASS")?;
                    self.push(Value::Class(Rc::new(Class::new(name))));
                }
                OP_INHERIT => {
                    let Value::Class(superclass) = self.peek(1)? else {
                        return Err(self.runtime_error("Superclass must be a class."));
                    };
                    let superclass = Rc::clone(superclass);
                    let subclass = self.class_operand(0, "INHERIT")?;
                    *subclass.superclass.borrow_mut() = Some(superclass);
                    self.pop()?;
                }
                OP_METHOD => {
                    let name = self.read_string("METHOD")?;
                    let Value::Closure(method) = self.peek(0)? else {
                        return Err(InternalError::UnexpectedOperand { op: "METHOD", expected: "closure" }.into());
                    };
                    let method = Rc::clone(method);
                    let class = self.class_operand(1, "METHOD")?;
                    class.methods.borrow_mut().insert(name, method);
                    self.pop()?;
                }

                other => {
                    let offset = self.frame()?.ip - 1;
                    return Err(InternalError::UnknownOpcode { op: other, offset }.into());
                }
            }
        }
    }

    fn trace_instruction(&self) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        let chunk = &frame.closure.function.chunk;
        if frame.ip >= chunk.code.len() {
            return;
        }
        let stack: String = self.stack.iter().map(|v| format!("[ {v:?} ]")).collect();
        let (text, _) = chunk.disassemble_instruction(frame.ip);
        log::trace!("          {stack}");
        log::trace!("{text}");
    }

    // ---- Operand access ----

    fn frame(&self) -> VmResult<&CallFrame> {
        self.frames.last().ok_or(VmError::Internal(InternalError::NoActiveFrame))
    }

    fn frame_mut(&mut self) -> VmResult<&mut CallFrame> {
        self.frames.last_mut().ok_or(VmError::Internal(InternalError::NoActiveFrame))
    }

    fn read_byte(&mut self) -> VmResult<u8> {
        let frame = self.frame_mut()?;
        let Some(byte) = frame.closure.function.chunk.code.get(frame.ip).copied() else {
            return Err(InternalError::CodeOverrun { offset: frame.ip }.into());
        };
        frame.ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> VmResult<SiteId> {
        let hi = self.read_byte()?;
        let lo = self.read_byte()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn constant(&self, index: usize) -> VmResult<Value> {
        let constants = &self.frame()?.closure.function.chunk.constants;
        match constants.get(index) {
            Some(value) => Ok(value.clone()),
            None => Err(InternalError::BadConstant { op: "CONSTANT", index }.into()),
        }
    }

    fn read_string(&mut self, op: &'static str) -> VmResult<Rc<str>> {
        let index = self.read_byte()? as usize;
        match self.constant(index)? {
            Value::String(name) => Ok(name),
            _ => Err(InternalError::BadConstant { op, index }.into()),
        }
    }

    fn upvalue(&self, index: usize) -> VmResult<UpvalueRef> {
        let upvalues = &self.frame()?.closure.upvalues;
        match upvalues.get(index) {
            Some(upvalue) => Ok(Rc::clone(upvalue)),
            None => Err(InternalError::UnexpectedOperand { op: "GET_UPVALUE", expected: "upvalue" }.into()),
        }
    }

    fn class_operand(&self, distance: usize, op: &'static str) -> VmResult<Rc<Class>> {
        match self.peek(distance)? {
            Value::Class(class) => Ok(Rc::clone(class)),
            _ => Err(InternalError::UnexpectedOperand { op, expected: "class" }.into()),
        }
    }

    // ---- Stack ----

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::Internal(InternalError::StackUnderflow))
    }

    fn peek(&self, distance: usize) -> VmResult<&Value> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .and_then(|index| self.stack.get(index))
            .ok_or(VmError::Internal(InternalError::StackUnderflow))
    }

    fn slot_mut(&mut self, index: usize) -> VmResult<&mut Value> {
        self.stack.get_mut(index).ok_or(VmError::Internal(InternalError::StackUnderflow))
    }

    /// Pop two numeric operands, left first.
    fn number_operands(&mut self) -> VmResult<(f64, f64)> {
        let (Value::Number(a), Value::Number(b)) = (self.peek(1)?, self.peek(0)?) else {
            return Err(self.runtime_error("Operands must be numbers."));
        };
        let operands = (*a, *b);
        self.stack.truncate(self.stack.len() - 2);
        Ok(operands)
    }

    // ---- Properties ----

    fn get_property(&mut self, name: Rc<str>, site: SiteId) -> VmResult<()> {
        let Value::Instance(instance) = self.peek(0)? else {
            return Err(self.runtime_error("Only instances have properties."));
        };
        let instance = Rc::clone(instance);
        let shape = instance.shape.get();
        self.record_property(site, shape, PropertyAccess::Get);

        if let Some(slot) = self.shapes.slot(shape, &name) {
            let value = instance.slots.borrow().get(slot).cloned();
            let value = value.ok_or(InternalError::MissingSlot { shape: shape.index(), slot })?;
            self.pop()?;
            self.push(value);
            return Ok(());
        }
        let receiver = self.pop()?;
        self.bind_method(&instance.class, &name, receiver)
    }

    fn set_property(&mut self, name: Rc<str>, site: SiteId) -> VmResult<()> {
        let Value::Instance(instance) = self.peek(1)? else {
            return Err(self.runtime_error("Only instances have fields."));
        };
        let instance = Rc::clone(instance);
        let value = self.pop()?;
        let shape = instance.shape.get();
        self.record_property(site, shape, PropertyAccess::Set);

        match self.shapes.slot(shape, &name) {
            Some(slot) => {
                let mut slots = instance.slots.borrow_mut();
                let field =
                    slots.get_mut(slot).ok_or(InternalError::MissingSlot { shape: shape.index(), slot })?;
                *field = value.clone();
            }
            None => {
                let fields = self.shapes.fields(shape).len();
                let slots = instance.slots.borrow().len();
                if slots != fields {
                    return Err(InternalError::ShapeMismatch { shape: shape.index(), slots, fields }.into());
                }
                let next = self.shapes.transition(shape, &name);
                instance.slots.borrow_mut().push(value.clone());
                instance.shape.set(next);
            }
        }
        self.pop()?;
        self.push(value);
        Ok(())
    }

    /// Push `receiver` bound to `class`'s method `name`.
    fn bind_method(&mut self, class: &Class, name: &str, receiver: Value) -> VmResult<()> {
        let Some(method) = class.find_method(name) else {
            return Err(self.runtime_error(format!("Undefined property '{name}'.")));
        };
        self.push(Value::BoundMethod(Rc::new(BoundMethod { receiver, method })));
        Ok(())
    }

    // ---- Inline caches ----

    fn record_property(&mut self, site: SiteId, shape: ShapeId, access: PropertyAccess) {
        if !InlineCaches::enabled() {
            return;
        }
        let cache = match access {
            PropertyAccess::Get => self.caches.property_get(site),
            PropertyAccess::Set => self.caches.property_set(site),
        };
        if let Some(cache) = cache {
            cache.observe(shape);
        }
    }

    fn record_call(&mut self, site: SiteId, callee: &Value) {
        if !InlineCaches::enabled() {
            return;
        }
        if let (Some(cache), Some(target)) = (self.caches.call(site), CallTarget::of(callee)) {
            let lookup = cache.observe(target);
            log::trace!("call site {site}: {lookup:?}");
        }
    }

    // ---- Calls ----

    fn call_value(&mut self, callee: Value, argc: usize) -> VmResult<()> {
        let callee_slot = self.stack.len() - argc - 1;
        match callee {
            Value::Closure(closure) => self.call(closure, argc),
            Value::BoundMethod(bound) => {
                *self.slot_mut(callee_slot)? = bound.receiver.clone();
                self.call(Rc::clone(&bound.method), argc)
            }
            Value::Class(class) => {
                let instance = Instance::new(Rc::clone(&class));
                *self.slot_mut(callee_slot)? = Value::Instance(Rc::new(instance));
                match class.find_method("init") {
                    Some(init) => self.call(init, argc),
                    None if argc != 0 => {
                        Err(self.runtime_error(format!("Expected 0 arguments but got {argc}.")))
                    }
                    None => Ok(()),
                }
            }
            Value::Native(native) => {
                let arity = native.arity as usize;
                if argc != arity {
                    return Err(self.runtime_error(format!("Expected {arity} arguments but got {argc}.")));
                }
                let result = (native.function)(&self.stack[callee_slot + 1..])
                    .map_err(|message| self.runtime_error(message))?;
                self.stack.truncate(callee_slot);
                self.push(result);
                Ok(())
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call(&mut self, closure: Rc<Closure>, argc: usize) -> VmResult<()> {
        let arity = closure.function.arity as usize;
        if argc != arity {
            return Err(self.runtime_error(format!("Expected {arity} arguments but got {argc}.")));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame { closure, ip: 0, base });
        Ok(())
    }

    // ---- Closures and upvalues ----

    fn make_closure(&mut self) -> VmResult<()> {
        let index = self.read_byte()? as usize;
        let Value::Function(function) = self.constant(index)? else {
            return Err(InternalError::BadConstant { op: "CLOSURE", index }.into());
        };
        let mut upvalues = Vec::with_capacity(function.upvalue_count);
        for _ in 0..function.upvalue_count {
            let is_local = self.read_byte()? == 1;
            let index = self.read_byte()? as usize;
            let upvalue = if is_local {
                let slot = self.frame()?.base + index;
                self.capture_upvalue(slot)
            } else {
                self.upvalue(index)?
            };
            upvalues.push(upvalue);
        }
        self.push(Value::Closure(Rc::new(Closure { function, upvalues })));
        Ok(())
    }

    /// Reuse the open upvalue for `slot` if one exists so that every closure
    /// over the same variable shares one cell.
    fn capture_upvalue(&mut self, slot: usize) -> UpvalueRef {
        let existing = self
            .open_upvalues
            .iter()
            .find(|upvalue| matches!(*upvalue.borrow(), Upvalue::Open(open) if open == slot));
        if let Some(upvalue) = existing {
            return Rc::clone(upvalue);
        }
        let created = Rc::new(RefCell::new(Upvalue::Open(slot)));
        self.open_upvalues.push(Rc::clone(&created));
        created
    }

    /// Close every open upvalue at or above stack index `from`.
    fn close_upvalues(&mut self, from: usize) {
        let stack = &self.stack;
        self.open_upvalues.retain(|upvalue| {
            let mut cell = upvalue.borrow_mut();
            let slot = match *cell {
                Upvalue::Open(slot) => slot,
                Upvalue::Closed(_) => return false,
            };
            if slot < from {
                return true;
            }
            *cell = Upvalue::Closed(stack.get(slot).cloned().unwrap_or_default());
            false
        });
    }

    // ---- Errors ----

    fn runtime_error(&self, message: impl Into<String>) -> VmError {
        let mut error = RuntimeError::new(message);
        for frame in self.frames.iter().rev() {
            let function = &frame.closure.function;
            error.trace.push(TraceEntry {
                line: function.chunk.line(frame.ip.saturating_sub(1)),
                function: function.name.clone(),
            });
        }
        log::debug!("runtime error: {}", error.message);
        VmError::Runtime(error)
    }
}

#[derive(Debug, Clone, Copy)]
enum PropertyAccess {
    Get,
    Set,
}
