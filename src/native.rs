use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::class::SimiObject;
use crate::error::ErrorKind;
use crate::prelude::*;

/// Class name global native functions are routed under.
pub const GLOBALS_CLASS: &str = "Globals";

/// One invocation of a `native` function.
#[derive(Debug, Clone)]
pub struct NativeCall {
    pub class: String,
    pub method: String,
    /// The bound `self`, or `nil` for global functions.
    pub receiver: Value,
    pub arguments: Vec<Value>,
    /// Call site, for error locations.
    pub token: Token,
}

impl NativeCall {
    fn argument(&self, index: usize) -> Value {
        self.arguments.get(index).cloned().unwrap_or(Value::Nil)
    }
}

/// A bundle of native classes and global functions.
pub trait NativeModule {
    fn name(&self) -> &str;

    fn classes(&self) -> &[&'static str];

    fn globals(&self) -> &[&'static str];

    /// `None` when the module has no such (class, method).
    fn call(&self, call: NativeCall, interpreter: &mut Interpreter) -> Option<Result<Value, RuntimeError>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("No native module registered for '{0}'.")]
    UnknownModule(String),
}

/// Routes native calls by class name to the loaded modules.
#[derive(Default)]
pub struct NativeRegistry {
    modules: Vec<Rc<dyn NativeModule>>,
    available: HashMap<String, Rc<dyn NativeModule>>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_core() -> Self {
        let mut registry = Self::new();
        registry.register(Rc::new(CoreModule));
        registry
    }

    pub fn register(&mut self, module: Rc<dyn NativeModule>) {
        tracing::debug!("registered native module {}", module.name());
        self.modules.push(module);
    }

    /// Makes `module` loadable through `import "<path>"`.
    pub fn register_path(&mut self, path: &str, module: Rc<dyn NativeModule>) {
        self.available.insert(path.to_owned(), module);
    }

    /// Loads the module bound to an import path. Loading twice is a no-op.
    pub fn load_path(&mut self, path: &str) -> Result<(), NativeError> {
        let module = match self.available.get(path) {
            Some(module) => module.clone(),
            None => return Err(NativeError::UnknownModule(path.to_owned())),
        };

        if !self.modules.iter().any(|m| Rc::ptr_eq(m, &module)) {
            self.register(module);
        }
        Ok(())
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Modules that may answer calls on `class`, in registration order.
    pub fn modules_for(&self, class: &str) -> Vec<Rc<dyn NativeModule>> {
        self.modules
            .iter()
            .filter(|m| {
                if class == GLOBALS_CLASS {
                    !m.globals().is_empty()
                } else {
                    m.classes().iter().any(|c| *c == class)
                }
            })
            .cloned()
            .collect()
    }
}

/// Hands out the given items one per call, then `nil`.
#[derive(Debug)]
pub struct IteratorNext {
    items: Vec<Value>,
    position: Cell<usize>,
}

impl IteratorNext {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items, position: Cell::new(0) }
    }
}

impl Callable for IteratorNext {
    fn name(&self) -> &str {
        "next"
    }

    fn arity(&self) -> usize {
        0
    }

    fn call(&self, _interpreter: &mut Interpreter, _arguments: Vec<Value>) -> Result<Value, RuntimeError> {
        let position = self.position.get();
        match self.items.get(position) {
            Some(item) => {
                self.position.set(position + 1);
                Ok(item.clone())
            }
            None => Ok(Value::Nil),
        }
    }
}

/// Natives the evaluation rules depend on: collection helpers for `Object`
/// and `String`, number helpers and a few globals.
pub struct CoreModule;

impl NativeModule for CoreModule {
    fn name(&self) -> &str {
        "core"
    }

    fn classes(&self) -> &[&'static str] {
        &["Object", "String", "Number"]
    }

    fn globals(&self) -> &[&'static str] {
        &["clock", "str", "type", "annotations"]
    }

    fn call(&self, call: NativeCall, interpreter: &mut Interpreter) -> Option<Result<Value, RuntimeError>> {
        match call.class.as_str() {
            "Object" => object_method(&call, interpreter),
            "String" => string_method(&call, interpreter),
            "Number" => number_method(&call, interpreter),
            GLOBALS_CLASS => global_function(&call, interpreter),
            _ => None,
        }
    }
}

fn array(values: Vec<Value>) -> Value {
    Value::Object(SimiObject::array(values, true).into_shared())
}

fn receiver_error(call: &NativeCall, interpreter: &mut Interpreter, expected: &str) -> RuntimeError {
    interpreter.error(
        ErrorKind::TypeMismatch,
        &call.token,
        format!("{}.{} expects {expected} receiver, got {}.", call.class, call.method, call.receiver.type_name()),
    )
}

fn object_method(call: &NativeCall, interpreter: &mut Interpreter) -> Option<Result<Value, RuntimeError>> {
    let object = match &call.receiver {
        Value::Object(object) => object.clone(),
        _ => return Some(Err(receiver_error(call, interpreter, "an object"))),
    };

    let result = match call.method.as_str() {
        "len" => Ok(Value::Integer(object.borrow().len() as i64)),
        "keys" => Ok(array(object.borrow().keys())),
        "values" => Ok(array(object.borrow().values())),
        "isArray" => Ok(Value::Boolean(object.borrow().is_array())),
        "contains" => {
            let found = object.borrow().contains(&call.argument(0));
            found
                .map(Value::Boolean)
                .map_err(|message| interpreter.error(ErrorKind::TypeMismatch, &call.token, message))
        }
        "iterate" => {
            let items = {
                let object = object.borrow();
                if object.is_array() {
                    object.values()
                } else {
                    object.keys()
                }
            };
            Ok(Value::Callable(Rc::new(IteratorNext::new(items))))
        }
        "push" => interpreter.ensure_mutable(&object, &call.token).map(|_| {
            object.borrow_mut().push(call.argument(0));
            Value::Nil
        }),
        _ => return None,
    };
    Some(result)
}

fn string_method(call: &NativeCall, interpreter: &mut Interpreter) -> Option<Result<Value, RuntimeError>> {
    let string = match &call.receiver {
        Value::Str(s) => s.clone(),
        _ => return Some(Err(receiver_error(call, interpreter, "a string"))),
    };

    let result = match call.method.as_str() {
        "len" => Ok(Value::Integer(string.chars().count() as i64)),
        "contains" => match call.argument(0) {
            Value::Str(needle) => Ok(Value::Boolean(string.contains(needle.as_str()))),
            other => Err(interpreter.error(
                ErrorKind::TypeMismatch,
                &call.token,
                format!("String.contains expects a string, got {}.", other.type_name()),
            )),
        },
        "iterate" => {
            let chars = string.chars().map(|c| Value::Str(c.to_string())).collect();
            Ok(Value::Callable(Rc::new(IteratorNext::new(chars))))
        }
        _ => return None,
    };
    Some(result)
}

fn number_method(call: &NativeCall, interpreter: &mut Interpreter) -> Option<Result<Value, RuntimeError>> {
    let result = match (call.method.as_str(), &call.receiver) {
        ("floor", Value::Integer(i)) => Ok(Value::Integer(*i)),
        ("floor", Value::Float(f)) => Ok(Value::Integer(f.floor() as i64)),
        ("abs", Value::Integer(i)) => Ok(i.checked_abs().map_or(Value::Float((*i as f64).abs()), Value::Integer)),
        ("abs", Value::Float(f)) => Ok(Value::Float(f.abs())),
        ("floor" | "abs", _) => Err(receiver_error(call, interpreter, "a number")),
        _ => return None,
    };
    Some(result)
}

fn global_function(call: &NativeCall, interpreter: &mut Interpreter) -> Option<Result<Value, RuntimeError>> {
    let result = match call.method.as_str() {
        "clock" => {
            let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
            Ok(Value::Float(since_epoch.as_millis() as f64 / 1000.0))
        }
        "str" => Ok(Value::Str(call.argument(0).to_string())),
        "type" => Ok(Value::Str(call.argument(0).type_name())),
        "annotations" => {
            let annotations = match call.argument(0) {
                Value::Function(function) => function.annotations.clone(),
                Value::Class(class) => interpreter.classes.get(class.id).annotations.clone(),
                Value::Object(object) => {
                    let class = object.borrow().class.clone();
                    match class {
                        Some(class) => interpreter.classes.get(class.id).annotations.clone(),
                        None => vec![],
                    }
                }
                _ => vec![],
            };
            Ok(array(annotations))
        }
        _ => return None,
    };
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl NativeModule for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn classes(&self) -> &[&'static str] {
            &["Doubler"]
        }

        fn globals(&self) -> &[&'static str] {
            &[]
        }

        fn call(&self, call: NativeCall, _interpreter: &mut Interpreter) -> Option<Result<Value, RuntimeError>> {
            match (call.method.as_str(), call.argument(0)) {
                ("double", Value::Integer(i)) => Some(Ok(Value::Integer(i * 2))),
                _ => None,
            }
        }
    }

    fn call(class: &str, method: &str, receiver: Value, arguments: Vec<Value>) -> NativeCall {
        NativeCall {
            class: class.to_owned(),
            method: method.to_owned(),
            receiver,
            arguments,
            token: Token::new(TokenType::Identifier, method, None, 1),
        }
    }

    #[test]
    fn routes_by_class_name() {
        let mut registry = NativeRegistry::with_core();
        assert_eq!(registry.modules_for("Doubler").len(), 0);

        registry.register_path("doubler.smod", Rc::new(Doubler));
        registry.load_path("doubler.smod").unwrap();
        registry.load_path("doubler.smod").unwrap();

        assert_eq!(registry.module_names(), vec!["core", "doubler"]);
        assert_eq!(registry.modules_for("Doubler").len(), 1);
        assert_eq!(registry.modules_for(GLOBALS_CLASS).len(), 1);
    }

    #[test]
    fn unknown_paths_fail_to_load() {
        let mut registry = NativeRegistry::new();
        assert_eq!(registry.load_path("nope.so"), Err(NativeError::UnknownModule("nope.so".to_owned())));
    }

    #[test]
    fn core_object_methods() {
        let mut interpreter = Interpreter::new();
        let object = Value::Object(SimiObject::array(vec![Value::Integer(1), Value::Integer(2)], false).into_shared());

        let len = CoreModule.call(call("Object", "len", object.clone(), vec![]), &mut interpreter);
        assert_eq!(len.unwrap().unwrap(), Value::Integer(2));

        let found = CoreModule.call(call("Object", "contains", object.clone(), vec![Value::Integer(2)]), &mut interpreter);
        assert_eq!(found.unwrap().unwrap(), Value::Boolean(true));

        CoreModule.call(call("Object", "push", object.clone(), vec![Value::Integer(3)]), &mut interpreter);
        assert_eq!(object.object().unwrap().borrow().len(), 3);

        assert!(CoreModule.call(call("Object", "frobnicate", object, vec![]), &mut interpreter).is_none());
    }

    #[test]
    fn push_respects_immutability() {
        let mut interpreter = Interpreter::new();
        let object = Value::Object(SimiObject::array(vec![], true).into_shared());

        let result = CoreModule.call(call("Object", "push", object, vec![Value::Integer(3)]), &mut interpreter);
        assert!(result.unwrap().is_err());
    }

    #[test]
    fn iterators_run_dry() {
        let mut interpreter = Interpreter::new();
        let next = IteratorNext::new(vec![Value::from("a")]);

        assert_eq!(next.call(&mut interpreter, vec![]).unwrap(), Value::from("a"));
        assert_eq!(next.call(&mut interpreter, vec![]).unwrap(), Value::Nil);
    }

    #[test]
    fn globals_describe_values() {
        let mut interpreter = Interpreter::new();
        let kind = CoreModule.call(call(GLOBALS_CLASS, "type", Value::Nil, vec![Value::Float(1.5)]), &mut interpreter);
        assert_eq!(kind.unwrap().unwrap(), Value::from("Number"));

        let text = CoreModule.call(call(GLOBALS_CLASS, "str", Value::Nil, vec![Value::Integer(7)]), &mut interpreter);
        assert_eq!(text.unwrap().unwrap(), Value::from("7"));
    }
}
