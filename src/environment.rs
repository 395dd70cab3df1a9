use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::value::Value;

pub type SharedEnvironment = Rc<RefCell<Environment>>;

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentError {
    #[error("Undefined variable '{0}'.")]
    Undefined(String),
    #[error("Cannot assign to immutable '{0}'. Declare it with '$' to make it mutable.")]
    Immutable(String),
    #[error("No enclosing environment at {distance} for '{name}'.")]
    MissingAncestor { distance: usize, name: String },
}

#[derive(Debug, Default)]
pub struct Environment {
    pub enclosing: Option<SharedEnvironment>,
    values: IndexMap<String, Binding>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enclosing(self, enclosing: SharedEnvironment) -> Self {
        Self { enclosing: Some(enclosing), ..self }
    }

    pub fn as_shared(self) -> SharedEnvironment {
        Rc::new(RefCell::new(self))
    }

    pub fn define(&mut self, name: &str, value: Value, mutable: bool) {
        self.values.insert(name.to_owned(), Binding { value, mutable });
    }

    /// Assignment inside this frame. An existing binding must carry the
    /// mutable tag; a missing one is defined here with `declare_mutable`.
    pub fn assign(
        &mut self,
        name: &str,
        value: Value,
        declare_mutable: bool,
    ) -> Result<(), EnvironmentError> {
        match self.values.get_mut(name) {
            Some(binding) if binding.mutable => {
                binding.value = value;
                Ok(())
            }
            Some(_) => Err(EnvironmentError::Immutable(name.to_owned())),
            None => {
                self.define(name, value, declare_mutable);
                Ok(())
            }
        }
    }

    pub fn assign_at(
        &mut self,
        distance: usize,
        name: &str,
        value: Value,
        declare_mutable: bool,
    ) -> Result<(), EnvironmentError> {
        if distance == 0 {
            return self.assign(name, value, declare_mutable);
        }

        match self.ancestor(distance) {
            None => Err(EnvironmentError::MissingAncestor { distance, name: name.to_owned() }),
            Some(ancestor) => ancestor.borrow_mut().assign(name, value, declare_mutable),
        }
    }

    /// Looks the name up in this frame, then outward to the global frame.
    pub fn get(&self, name: &str) -> Result<Value, EnvironmentError> {
        if let Some(binding) = self.values.get(name) {
            return Ok(binding.value.clone());
        }

        match &self.enclosing {
            Some(enclosing) => enclosing.borrow().get(name),
            None => Err(EnvironmentError::Undefined(name.to_owned())),
        }
    }

    pub fn get_here(&self, name: &str) -> Option<Value> {
        self.values.get(name).map(|b| b.value.clone())
    }

    pub fn get_at(&self, distance: usize, name: &str) -> Result<Value, EnvironmentError> {
        if distance == 0 {
            return self.get_here(name).ok_or_else(|| EnvironmentError::Undefined(name.to_owned()));
        }

        match self.ancestor(distance) {
            None => Err(EnvironmentError::MissingAncestor { distance, name: name.to_owned() }),
            Some(ancestor) => ancestor
                .borrow()
                .get_here(name)
                .ok_or_else(|| EnvironmentError::Undefined(name.to_owned())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&String, &Binding)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn ancestor(&self, distance: usize) -> Option<SharedEnvironment> {
        let mut env = self.enclosing.clone()?;

        for _ in 1..distance {
            let parent = env.borrow().enclosing.clone()?;
            env = parent;
        }
        Some(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_defines_missing_names() {
        let mut env = Environment::new();
        env.assign("x", Value::Integer(1), false).unwrap();
        assert_eq!(env.get("x"), Ok(Value::Integer(1)));
    }

    #[test]
    fn immutable_bindings_reject_reassignment() {
        let mut env = Environment::new();
        env.assign("x", Value::Integer(1), false).unwrap();

        let res = env.assign("x", Value::Integer(2), false);
        assert_eq!(res, Err(EnvironmentError::Immutable("x".to_owned())));
        assert_eq!(env.get("x"), Ok(Value::Integer(1)));
    }

    #[test]
    fn mutable_bindings_accept_reassignment() {
        let mut env = Environment::new();
        env.assign("count", Value::Integer(0), true).unwrap();
        env.assign("count", Value::Integer(5), false).unwrap();
        assert_eq!(env.get("count"), Ok(Value::Integer(5)));
    }

    #[test]
    fn lookup_walks_outward() {
        let globals = Environment::new().as_shared();
        globals.borrow_mut().define("g", Value::Boolean(true), false);

        let middle = Environment::new().with_enclosing(globals.clone()).as_shared();
        let inner = Environment::new().with_enclosing(middle);

        assert_eq!(inner.get("g"), Ok(Value::Boolean(true)));
        assert_eq!(inner.get_at(2, "g"), Ok(Value::Boolean(true)));
        assert_eq!(inner.get("nope"), Err(EnvironmentError::Undefined("nope".to_owned())));
    }

    #[test]
    fn assign_at_targets_the_ancestor() {
        let outer = Environment::new().as_shared();
        outer.borrow_mut().define("i", Value::Integer(0), true);
        let mut inner = Environment::new().with_enclosing(outer.clone());

        inner.assign_at(1, "i", Value::Integer(3), false).unwrap();
        assert_eq!(outer.borrow().get_here("i"), Some(Value::Integer(3)));
        assert!(!inner.contains("i"));
    }
}
