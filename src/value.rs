use std::fmt::Display;
use std::rc::Rc;

use crate::class::{ClassHandle, SimiObject};
use crate::func::{Callable, Function};
use crate::token::Literal;
use crate::Shared;

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Str(String),
    Function(Rc<Function>),
    Callable(Rc<dyn Callable>),
    Class(ClassHandle),
    Object(Shared<SimiObject>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(left), Self::Boolean(right)) => left == right,
            (Self::Integer(left), Self::Integer(right)) => left == right,
            (Self::Str(left), Self::Str(right)) => left == right,
            (Self::Function(left), Self::Function(right)) => Rc::ptr_eq(left, right),
            (Self::Callable(left), Self::Callable(right)) => {
                std::ptr::addr_eq(Rc::as_ptr(left), Rc::as_ptr(right))
            }
            (Self::Class(left), Self::Class(right)) => left.id == right.id,
            (Self::Object(left), Self::Object(right)) => Rc::ptr_eq(left, right),
            (left, right) => match (left.number(), right.number()) {
                (Some(l), Some(r)) => l == r,
                _ => false,
            },
        }
    }
}

impl From<Literal> for Value {
    fn from(literal: Literal) -> Self {
        match literal {
            Literal::Integer(i) => Value::Integer(i),
            Literal::Float(f) => Value::Float(f),
            Literal::Str(s) => Value::Str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl Value {
    pub fn number(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn string(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn object(&self) -> Option<&Shared<SimiObject>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Boolean(false))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Callable(_) | Self::Class(_))
    }

    /// Name of the core class a value answers to in `is` checks.
    pub fn type_name(&self) -> String {
        match self {
            Self::Nil => "Nil".to_owned(),
            Self::Boolean(_) => "Boolean".to_owned(),
            Self::Integer(_) | Self::Float(_) => "Number".to_owned(),
            Self::Str(_) => "String".to_owned(),
            Self::Function(_) | Self::Callable(_) => "Function".to_owned(),
            Self::Class(_) => "Class".to_owned(),
            Self::Object(o) => match &o.borrow().class {
                Some(class) => class.name.to_string(),
                None => "Object".to_owned(),
            },
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(n) if n.is_finite() && n.fract() == 0.0 => write!(f, "{n:.1}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Function(func) => write!(f, "{func}"),
            Self::Callable(c) => write!(f, "<native def {}>", c.name()),
            Self::Class(c) => write!(f, "{}", c.name),
            Self::Object(o) => write!(f, "{}", o.borrow()),
        }
    }
}
