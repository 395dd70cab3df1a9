use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::token::{Token, TokenType};
use crate::value::Value;
use crate::Shared;

pub type SharedErrorHub = Shared<ErrorHub>;

/// Exception classes the runtime raises on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Exception,
    TypeMismatch,
    UndefinedVariable,
    ArityMismatch,
    PrivateAccess,
    MutabilityLock,
    ImmutableBinding,
    ZeroDivision,
}

impl ErrorKind {
    pub fn class_name(self) -> &'static str {
        match self {
            ErrorKind::Exception => "Exception",
            ErrorKind::TypeMismatch => "TypeMismatchException",
            ErrorKind::UndefinedVariable => "UndefinedVariableException",
            ErrorKind::ArityMismatch => "ArityMismatchException",
            ErrorKind::PrivateAccess => "PrivateAccessException",
            ErrorKind::MutabilityLock => "MutabilityLockException",
            ErrorKind::ImmutableBinding => "ImmutableBindingException",
            ErrorKind::ZeroDivision => "ZeroDivisionException",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// A language-level exception. `rescue` can recover it.
    #[error("{message}")]
    Raised {
        exception: Value,
        message: String,
        line: u32,
        /// Set once the debugger has looked at this exception.
        inspected: bool,
    },
    /// Routing failure at the native module boundary. Never rescued.
    #[error("[line {line}] No such native method: {class}.{method}")]
    NativeDispatch { class: String, method: String, line: u32 },
}

impl RuntimeError {
    pub fn line(&self) -> u32 {
        match self {
            RuntimeError::Raised { line, .. } | RuntimeError::NativeDispatch { line, .. } => *line,
        }
    }

    pub fn exception(&self) -> Option<&Value> {
        match self {
            RuntimeError::Raised { exception, .. } => Some(exception),
            RuntimeError::NativeDispatch { .. } => None,
        }
    }
}

/// Receives compile-time diagnostics before an interpreter is attached.
pub trait ErrorWatcher {
    fn on_error(&self, line: u32, location: &str, message: &str);
}

/// What the hub did with a diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Reported,
    Raise { class: String, message: String },
}

/// Diagnostics sink shared by the scanner, parser, resolver and interpreter of
/// one `Simi` driver.
#[derive(Default)]
pub struct ErrorHub {
    pub had_error: bool,
    pub had_runtime_error: bool,
    error_count: usize,
    interpreter_attached: bool,
    watchers: Vec<Box<dyn ErrorWatcher>>,
    runtime_hook: Option<Box<dyn Fn(&RuntimeError)>>,
}

impl std::fmt::Debug for ErrorHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHub")
            .field("had_error", &self.had_error)
            .field("had_runtime_error", &self.had_runtime_error)
            .field("error_count", &self.error_count)
            .field("interpreter_attached", &self.interpreter_attached)
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

impl ErrorHub {
    pub fn shared() -> SharedErrorHub {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn add_watcher(&mut self, watcher: Box<dyn ErrorWatcher>) {
        self.watchers.push(watcher);
    }

    pub fn set_runtime_hook(&mut self, hook: Box<dyn Fn(&RuntimeError)>) {
        self.runtime_hook = Some(hook);
    }

    pub fn attach_interpreter(&mut self) {
        self.interpreter_attached = true;
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    /// Clears the error flags before a new compilation unit. The interpreter
    /// attaches again when that unit starts running.
    pub fn reset(&mut self) {
        self.had_error = false;
        self.had_runtime_error = false;
        self.error_count = 0;
        self.interpreter_attached = false;
    }

    pub fn format(file: &str, line: u32, location: &str, message: &str) -> String {
        format!("[\"{file}\" line {line}] Error{location}: {message}")
    }

    pub fn location(token: &Token) -> String {
        if token.token_type == TokenType::Eof {
            " at end".to_owned()
        } else if token.lexeme.is_empty() {
            String::new()
        } else {
            format!(" at '{}'", token.lexeme)
        }
    }

    /// Generic routing entry point: reported to watchers until an interpreter
    /// is attached, raised as an in-language exception afterwards.
    pub fn error(
        &mut self,
        class: &str,
        file: &str,
        line: u32,
        location: &str,
        message: &str,
    ) -> Routed {
        if self.interpreter_attached {
            return Routed::Raise {
                class: class.to_owned(),
                message: Self::format(file, line, location, message),
            };
        }

        self.report(line, location, message);
        Routed::Reported
    }

    pub fn report(&mut self, line: u32, location: &str, message: &str) {
        eprintln!("[line {line}] Error{location}: {message}");
        tracing::debug!("diagnostic at line {line}: {message}");

        for watcher in &self.watchers {
            watcher.on_error(line, location, message);
        }

        self.error_count += 1;
        self.had_error = true;
    }

    pub fn token_error(&mut self, token: &Token, message: &str) {
        let location = Self::location(token);
        self.report(token.line, &location, message);
    }

    pub fn runtime_error(&mut self, e: &RuntimeError) {
        eprintln!("{e}");
        if let Some(hook) = &self.runtime_hook {
            hook(e);
        }
        self.had_runtime_error = true;
    }
}
