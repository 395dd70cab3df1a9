#![allow(clippy::new_without_default)]

mod ast;
mod class;
pub mod debugger;
mod environment;
mod error;
mod func;
mod interpreter;
pub mod loader;
pub mod native;
mod parser;
mod printer;
mod resolver;
mod scanner;
mod token;
mod value;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::class::*;
    pub use crate::environment::Environment;
    pub use crate::error::*;
    pub use crate::func::*;
    pub use crate::interpreter::*;
    pub use crate::parser::*;
    pub use crate::printer::Printer;
    pub use crate::resolver::{Resolver, ResolverError};
    pub use crate::scanner::*;
    pub use crate::token::*;
    pub use crate::value::Value;
    pub use crate::Shared;
}

use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use anyhow::Context;

use debugger::Debugger;
use error::{ErrorHub, ErrorKind, SharedErrorHub};
use loader::Loader;
use native::NativeModule;
use prelude::{Interpreter, Parser, Resolver};

pub type Shared<T> = Rc<RefCell<T>>;

/// Runs Simi programs. Globals persist across runs of one instance.
pub struct Simi {
    interpreter: Interpreter,
    error_hub: SharedErrorHub,
    preamble_loaded: bool,
}

impl Simi {
    pub fn new() -> Self {
        let error_hub = ErrorHub::shared();

        Self {
            interpreter: Interpreter::new().with_error_reporting(error_hub.clone()),
            error_hub,
            preamble_loaded: false,
        }
    }

    pub fn with_output(self, output: Box<dyn Write>) -> Self {
        Self { interpreter: self.interpreter.with_output(output), ..self }
    }

    pub fn with_debugger(self, debugger: Debugger) -> Self {
        Self { interpreter: self.interpreter.with_debugger(debugger), ..self }
    }

    /// Binds a native module to an import path such as `"net.smod"`.
    pub fn register_module(&mut self, path: &str, module: Rc<dyn NativeModule>) {
        self.interpreter.natives.register_path(path, module);
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn error_hub(&self) -> SharedErrorHub {
        self.error_hub.clone()
    }

    pub fn had_error(&self) -> bool {
        self.error_hub.borrow().had_error
    }

    pub fn had_runtime_error(&self) -> bool {
        self.error_hub.borrow().had_runtime_error
    }

    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<(), anyhow::Error> {
        let path = path.as_ref();
        let source =
            std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        self.run_source(&source, &path.display().to_string(), base)
    }

    /// Runs each script in turn against the same globals, stopping at the
    /// first one that fails.
    pub fn run_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<(), anyhow::Error> {
        for path in paths {
            self.run_file(path)?;
            if self.had_error() || self.had_runtime_error() {
                break;
            }
        }
        Ok(())
    }

    pub fn run(&mut self, source: &str) -> Result<(), anyhow::Error> {
        self.run_source(source, "<script>", Path::new("."))
    }

    fn run_source(&mut self, source: &str, file: &str, base: &Path) -> Result<(), anyhow::Error> {
        self.error_hub.borrow_mut().reset();

        let tokens = {
            let mut splicer = Loader::new(self.error_hub.clone(), &mut self.interpreter.natives);
            let mut tokens = vec![];
            if !self.preamble_loaded {
                tokens = splicer.load_source(&loader::preamble(), loader::PREAMBLE_FILE, base);
            }
            tokens.extend(splicer.load_source(source, file, base));
            tokens.push(loader::eof(&tokens));
            tokens
        };
        tracing::debug!("scanned {} tokens", tokens.len());

        let statements = match Parser::new(tokens).with_error_reporting(self.error_hub.clone()).parse() {
            Ok(statements) => statements,
            Err(count) => {
                tracing::debug!("parsing failed with {count} errors");
                return Ok(());
            }
        };
        if self.had_error() {
            return Ok(());
        }
        tracing::debug!("parsed {} statements", statements.len());

        let mut resolver = Resolver::new(&mut self.interpreter);
        if let Err(errors) = resolver.resolve(&statements) {
            let mut hub = self.error_hub.borrow_mut();
            for e in errors {
                hub.error(ErrorKind::Exception.class_name(), file, e.line, &e.location, &e.message);
            }
            return Ok(());
        }

        self.preamble_loaded = true;
        // Uncaught exceptions are already reported through the hub.
        let _ = self.interpreter.interpret(&statements);

        Ok(())
    }
}

/// In-memory `Write` sink whose contents stay readable through clones.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simi() -> (Simi, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (Simi::new().with_output(Box::new(buffer.clone())), buffer)
    }

    #[test]
    fn globals_persist_between_runs() {
        let (mut simi, out) = simi();
        simi.run("$x = 1\n").unwrap();
        simi.run("x = x + 1\nprint x\n").unwrap();

        assert_eq!(out.contents(), "2\n");
        assert!(!simi.had_error());
    }

    #[test]
    fn compile_errors_skip_execution() {
        let (mut simi, out) = simi();
        simi.run("print \"before\"\nprint (1 +\n").unwrap();

        assert!(simi.had_error());
        assert_eq!(out.contents(), "");
    }

    #[test]
    fn resolver_errors_skip_execution() {
        let (mut simi, out) = simi();
        simi.run("print 1\nreturn 2\n").unwrap();

        assert!(simi.had_error());
        assert_eq!(out.contents(), "");
    }

    #[test]
    fn each_run_reports_compile_errors_again() {
        let (mut simi, out) = simi();
        simi.run("print 1 // 0\n").unwrap();
        assert!(simi.had_runtime_error());

        simi.run("print 2\nreturn 3\n").unwrap();
        assert!(simi.had_error());
        assert!(!simi.had_runtime_error());
        assert_eq!(simi.error_hub().borrow().error_count(), 1);
        assert_eq!(out.contents(), "");
    }

    #[test]
    fn uncaught_exceptions_set_the_runtime_flag() {
        let (mut simi, out) = simi();
        simi.run("print 1\nprint nope\nprint 2\n").unwrap();

        assert!(simi.had_runtime_error());
        assert_eq!(out.contents(), "1\n");
    }

    #[test]
    fn runtime_exceptions_are_preamble_classes() {
        let (mut simi, out) = simi();
        let source = "
$kind = nil
if true:
    x = 1 / 0
    rescue e:
        kind = e is ZeroDivisionException
    end
end
print kind
";
        simi.run(source).unwrap();
        assert_eq!(out.contents(), "true\n");
    }

    #[test]
    fn core_natives_back_collections() {
        let (mut simi, out) = simi();
        let source = "
a = $[1, 2]
a.push(3)
print a.len(), a.isArray(), 2 in a, \"ell\" in \"hello\", \"abc\".len()
print type(1.5), type(a), str(3) + \"!\"
";
        simi.run(source).unwrap();
        assert_eq!(out.contents(), "3 true true true 3\nNumber Object 3!\n");
    }

    #[test]
    fn typed_parameters_raise_on_mismatch() {
        let (mut simi, out) = simi();
        let source = "
def twice(n is Number): return n * 2
print twice(4)
print twice(\"x\")
";
        simi.run(source).unwrap();
        assert_eq!(out.contents(), "8\n");
        assert!(simi.had_runtime_error());
    }
}
