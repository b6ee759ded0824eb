//! JavaScript-style value types
//!
//! The resolution procedure must absorb arbitrary values: primitives, plain
//! objects, functions that carry a `then` property, objects whose `then` is a
//! getter that throws, and promises of this crate's own kind. This module
//! provides a small dynamic model for exactly that. A thrown exception is an
//! `Err(Value)` completion.

use super::promise::Promise;
use crate::error::{messages, ErrorKind};
use rustc_hash::FxHashMap as HashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Outcome of running user code: `Ok` for a normal return, `Err` for a throw
pub type Completion = std::result::Result<Value, Value>;

/// Type alias for native function implementations, called with `(this, args)`
pub type NativeFn = Rc<dyn Fn(&Value, &[Value]) -> Completion>;

/// A JavaScript value
#[derive(Clone, Default)]
pub enum Value {
    /// undefined
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Object (includes arrays, functions and error objects)
    Object(Rc<RefCell<Object>>),
    /// A promise of this crate's own kind
    Promise(Promise),
}

/// A property slot on an object
#[derive(Clone)]
pub enum Property {
    /// Plain data property
    Data(Value),
    /// Accessor property; the getter is called with the object as receiver
    Accessor {
        /// Getter function
        get: Value,
    },
}

/// The kind of a heap object
pub enum ObjectKind {
    /// Ordinary object
    Ordinary,
    /// Array object
    Array(Vec<Value>),
    /// Native function
    Function { name: String, func: NativeFn },
    /// Error object
    Error { kind: ErrorKind, message: String },
}

/// A heap object with own properties and an optional prototype
pub struct Object {
    /// Object kind
    pub kind: ObjectKind,
    /// Own properties
    pub properties: HashMap<String, Property>,
    /// Prototype
    pub prototype: Option<Rc<RefCell<Object>>>,
}

impl Object {
    /// Create a new object of the given kind with no properties
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            properties: HashMap::default(),
            prototype: None,
        }
    }

    /// Find a property on this object or along its prototype chain
    pub fn lookup(&self, key: &str) -> Option<Property> {
        if let Some(prop) = self.properties.get(key) {
            return Some(prop.clone());
        }
        self.prototype
            .as_ref()
            .and_then(|proto| proto.borrow().lookup(key))
    }
}

impl Value {
    fn from_object(object: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(object)))
    }

    /// Create a new empty ordinary object
    pub fn object() -> Self {
        Self::from_object(Object::new(ObjectKind::Ordinary))
    }

    /// Create an ordinary object whose prototype is `proto`
    ///
    /// A non-object `proto` leaves the prototype empty.
    pub fn object_with_prototype(proto: &Value) -> Self {
        let mut object = Object::new(ObjectKind::Ordinary);
        if let Value::Object(p) = proto {
            object.prototype = Some(p.clone());
        }
        Self::from_object(object)
    }

    /// Create an array object
    pub fn array(items: Vec<Value>) -> Self {
        Self::from_object(Object::new(ObjectKind::Array(items)))
    }

    /// Create a native function that receives `(this, args)`
    pub fn function<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Completion + 'static,
    {
        Self::from_object(Object::new(ObjectKind::Function {
            name: name.into(),
            func: Rc::new(f),
        }))
    }

    /// Create an anonymous native function of one argument
    ///
    /// Missing arguments read as `undefined`; the receiver is ignored.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Value) -> Completion + 'static,
    {
        Self::function("", move |_this, args| {
            f(args.first().cloned().unwrap_or_default())
        })
    }

    /// Create an error object
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::from_object(Object::new(ObjectKind::Error {
            kind,
            message: message.into(),
        }))
    }

    /// Create a TypeError object
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::error(ErrorKind::TypeError, message)
    }

    /// Check if value can be called
    pub fn is_callable(&self) -> bool {
        match self {
            Value::Object(obj) => matches!(obj.borrow().kind, ObjectKind::Function { .. }),
            _ => false,
        }
    }

    /// Get the number if this is a number value
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the promise if this is a promise value
    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Get the error kind if this is an error object
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Value::Object(obj) => match &obj.borrow().kind {
                ObjectKind::Error { kind, .. } => Some(*kind),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get the message if this is an error object
    pub fn error_message(&self) -> Option<String> {
        match self {
            Value::Object(obj) => match &obj.borrow().kind {
                ObjectKind::Error { message, .. } => Some(message.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Set a data property. Non-objects ignore the write.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        if let Value::Object(obj) = self {
            obj.borrow_mut()
                .properties
                .insert(key.into(), Property::Data(value.into()));
        }
    }

    /// Define an accessor property backed by `getter`. Non-objects ignore it.
    pub fn define_getter(&self, key: impl Into<String>, getter: Value) {
        if let Value::Object(obj) = self {
            obj.borrow_mut()
                .properties
                .insert(key.into(), Property::Accessor { get: getter });
        }
    }

    /// Read a property, running getters with this value as receiver
    ///
    /// Reading a missing property, or any property of a primitive, yields
    /// `undefined`. A throwing getter yields its thrown value as `Err`.
    pub fn get(&self, key: &str) -> Completion {
        match self {
            Value::Object(obj) => {
                // Release the borrow before a getter runs; it may touch the object.
                let prop = obj.borrow().lookup(key);
                match prop {
                    Some(Property::Data(value)) => Ok(value),
                    Some(Property::Accessor { get }) => get.call(self, &[]),
                    None => Ok(Value::Undefined),
                }
            }
            Value::Promise(promise) if key == "then" => Ok(promise.then_function()),
            _ => Ok(Value::Undefined),
        }
    }

    /// Call this value as a function with the given receiver and arguments
    pub fn call(&self, this: &Value, args: &[Value]) -> Completion {
        let func = match self {
            Value::Object(obj) => match &obj.borrow().kind {
                ObjectKind::Function { func, .. } => Some(func.clone()),
                _ => None,
            },
            _ => None,
        };
        match func {
            Some(func) => func(this, args),
            None => Err(Value::type_error(messages::not_a_function(&self.to_string()))),
        }
    }

    /// Strict equality (`===`): identity for objects and promises
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n.is_sign_positive() { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        // Integer-valued doubles display without decimal point
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Object(obj) => match &obj.borrow().kind {
                ObjectKind::Ordinary => write!(f, "[object Object]"),
                ObjectKind::Array(items) => {
                    let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                    write!(f, "{}", parts.join(","))
                }
                ObjectKind::Function { name, .. } => {
                    write!(f, "function {}() {{ [native code] }}", name)
                }
                ObjectKind::Error { kind, message } => write!(f, "{}: {}", kind, message),
            },
            Value::Promise(_) => write!(f, "[object Promise]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Object(obj) => match &obj.borrow().kind {
                ObjectKind::Ordinary => write!(f, "{{...}}"),
                ObjectKind::Array(items) => write!(f, "{:?}", items),
                ObjectKind::Function { name, .. } if name.is_empty() => {
                    write!(f, "[Function: anonymous]")
                }
                ObjectKind::Function { name, .. } => write!(f, "[Function: {}]", name),
                ObjectKind::Error { kind, message } => write!(f, "[{}: {}]", kind, message),
            },
            Value::Promise(p) => write!(f, "{:?}", p),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}
