use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::chunk::Chunk;
use super::shape::ShapeId;

/// A Lox value. Heap objects are reference counted; everything except strings
/// compares by identity.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Function(Rc<Function>),
    Closure(Rc<Closure>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    BoundMethod(Rc<BoundMethod>),
    Native(Rc<Native>),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }
}

/// Numbers by IEEE value, strings by content, objects by allocation.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Function(function) => write!(f, "{}", function),
            Value::Closure(closure) => write!(f, "{}", closure.function),
            Value::Class(class) => write!(f, "{}", class.name),
            Value::Instance(instance) => write!(f, "{} instance", instance.class.name),
            Value::BoundMethod(bound) => write!(f, "{}", bound.method.function),
            Value::Native(_) => write!(f, "<native fn>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

/// Integral values print without a fraction; everything else uses the
/// shortest representation that round-trips.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if n == 0.0 && n.is_sign_negative() {
        "-0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ── Functions and closures ───────────────────────────────────────────

/// Immutable compiled function. `name` is `None` for the top-level script.
pub struct Function {
    pub name: Option<Rc<str>>,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<fn {}>", name),
            None => write!(f, "<script>"),
        }
    }
}

/// A captured variable. Open upvalues point at a live stack slot; closing
/// copies the value out so the cell owns it from then on.
#[derive(Debug)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

pub type UpvalueRef = Rc<RefCell<Upvalue>>;

pub struct Closure {
    pub function: Rc<Function>,
    pub upvalues: Vec<UpvalueRef>,
}

// ── Classes and instances ────────────────────────────────────────────

pub struct Class {
    pub name: Rc<str>,
    pub superclass: RefCell<Option<Rc<Class>>>,
    pub methods: RefCell<HashMap<Rc<str>, Rc<Closure>>>,
    /// Shape every new instance of this class starts from.
    pub initial_shape: ShapeId,
}

impl Class {
    pub fn new(name: Rc<str>) -> Self {
        Class {
            name,
            superclass: RefCell::new(None),
            methods: RefCell::new(HashMap::new()),
            initial_shape: ShapeId::EMPTY,
        }
    }

    /// Resolve `name` on this class, then up the superclass chain.
    pub fn find_method(&self, name: &str) -> Option<Rc<Closure>> {
        if let Some(method) = self.methods.borrow().get(name) {
            return Some(Rc::clone(method));
        }
        let mut current = self.superclass.borrow().clone();
        while let Some(class) = current {
            if let Some(method) = class.methods.borrow().get(name) {
                return Some(Rc::clone(method));
            }
            current = class.superclass.borrow().clone();
        }
        None
    }
}

/// Instance fields live in a slot array whose layout is described by `shape`.
pub struct Instance {
    pub class: Rc<Class>,
    pub shape: Cell<ShapeId>,
    pub slots: RefCell<Vec<Value>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        let shape = class.initial_shape;
        Instance { class, shape: Cell::new(shape), slots: RefCell::new(Vec::new()) }
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub method: Rc<Closure>,
}

impl Drop for Instance {
    fn drop(&mut self) {
        let slots = self.slots.take();
        if !slots.is_empty() {
            release(slots);
        }
    }
}

impl Drop for Closure {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        take_captured(&mut self.upvalues, &mut pending);
        release(pending);
    }
}

impl Drop for BoundMethod {
    fn drop(&mut self) {
        release(vec![std::mem::take(&mut self.receiver)]);
    }
}

// ── Teardown ─────────────────────────────────────────────────────────

/// Frees a value graph from an explicit worklist. An object whose last
/// reference ends here hands its children to the list before it goes, so a
/// long chain of instances or closures never recurses once per link.
fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::Instance(instance) => {
                if let Some(instance) = Rc::into_inner(instance) {
                    pending.append(&mut instance.slots.take());
                }
            }
            Value::Closure(closure) => {
                if let Some(mut closure) = Rc::into_inner(closure) {
                    take_captured(&mut closure.upvalues, &mut pending);
                }
            }
            Value::BoundMethod(bound) => {
                if let Some(mut bound) = Rc::into_inner(bound) {
                    pending.push(std::mem::take(&mut bound.receiver));
                    pending.push(Value::Closure(Rc::clone(&bound.method)));
                }
            }
            _ => {}
        }
    }
}

/// Move the values of closed upvalues nobody else shares onto `pending`.
fn take_captured(upvalues: &mut Vec<UpvalueRef>, pending: &mut Vec<Value>) {
    for upvalue in upvalues.drain(..) {
        if let Some(Upvalue::Closed(value)) = Rc::into_inner(upvalue).map(RefCell::into_inner) {
            pending.push(value);
        }
    }
}

// ── Natives ──────────────────────────────────────────────────────────

pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

pub struct Native {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}
