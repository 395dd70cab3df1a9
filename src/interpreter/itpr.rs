use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::rc::Rc;

use crate::class::{ClassArena, SimiObject};
use crate::debugger::{Debugger, Frame};
use crate::environment::{Environment, EnvironmentError, SharedEnvironment};
use crate::error::{ErrorHub, ErrorKind, Routed, SharedErrorHub};
use crate::native::{NativeCall, NativeRegistry, GLOBALS_CLASS};
use crate::prelude::*;

pub type InterpreterResult = Result<Value, RuntimeError>;

/// How a statement hands control back to the block running it.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Return(Value),
    Yield(Value),
    Break,
    Continue,
}

/// Result of running a statement list: the flow that ended it and the index
/// of the statement that produced that flow.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockExit {
    pub flow: Flow,
    pub index: usize,
}

pub struct Interpreter {
    pub globals: SharedEnvironment,
    pub(crate) environment: SharedEnvironment,
    pub(crate) locals: HashMap<ExprId, usize>, // expr id -> depth
    pub classes: ClassArena,
    pub natives: NativeRegistry,
    error_hub: Option<SharedErrorHub>,
    output: Box<dyn Write>,
    pub(crate) debugger: Option<Debugger>,
    /// Number of statement lists with a `rescue` currently running.
    pub(crate) rescue_depth: usize,
    /// Variables resolve by walking the environment chain instead of the
    /// resolver's table. Used for expressions typed into the debugger.
    pub(crate) dynamic_scope: bool,
    /// Statement currently executing, for native call sites and debugger
    /// frames.
    pub(crate) current: Option<Rc<Stmt>>,
    /// Frames recorded while a `yield` unwinds, innermost first.
    pub(crate) suspended: Vec<ResumeFrame>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Environment::new().as_shared();
        let environment = globals.clone();

        Self {
            globals,
            environment,
            locals: HashMap::new(),
            classes: ClassArena::new(),
            natives: NativeRegistry::with_core(),
            error_hub: None,
            output: Box::new(std::io::stdout()),
            debugger: None,
            rescue_depth: 0,
            dynamic_scope: false,
            current: None,
            suspended: vec![],
        }
    }

    /// Runtime failures go through `error_hub`. The hub raises them as
    /// exceptions once `interpret` has attached it; before that they are
    /// reported like compile errors.
    pub fn with_error_reporting(self, error_hub: SharedErrorHub) -> Self {
        Self { error_hub: Some(error_hub), ..self }
    }

    pub fn with_output(self, output: Box<dyn Write>) -> Self {
        Self { output, ..self }
    }

    pub fn with_debugger(self, debugger: Debugger) -> Self {
        Self { debugger: Some(debugger), ..self }
    }

    pub fn debugger(&self) -> Option<&Debugger> {
        self.debugger.as_ref()
    }

    pub fn debugger_mut(&mut self) -> Option<&mut Debugger> {
        self.debugger.as_mut()
    }

    pub(crate) fn output(&mut self) -> &mut dyn Write {
        self.output.as_mut()
    }

    pub fn resolve(&mut self, id: ExprId, depth: usize) {
        self.locals.insert(id, depth);
    }

    pub fn resolved_depths(&self) -> HashMap<ExprId, usize> {
        self.locals.clone()
    }

    /// Names bound in the global frame, seeding the resolver's global set.
    pub fn global_names(&self) -> HashSet<String> {
        self.globals.borrow().bindings().map(|(name, _)| name.clone()).collect()
    }

    /// Runs a program against the persistent global environment. Uncaught
    /// exceptions are reported and returned.
    pub fn interpret(&mut self, statements: &[Rc<Stmt>]) -> Result<(), RuntimeError> {
        tracing::debug!("interpreting {} statements", statements.len());
        if let Some(hub) = &self.error_hub {
            hub.borrow_mut().attach_interpreter();
        }

        let globals = self.globals.clone();
        let result = self.execute_block_at(statements, globals, 0);
        let _ = self.output.flush();

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.report_runtime_error(&e);
                Err(e)
            }
        }
    }

    fn report_runtime_error(&mut self, e: &RuntimeError) {
        match &self.error_hub {
            Some(hub) => hub.borrow_mut().runtime_error(e),
            None => eprintln!("{e}"),
        }
    }

    /// Runs a function body, or picks it up where `trail` left it, tracking
    /// the call on the debugger's call stack.
    pub fn invoke_block(
        &mut self,
        function: &Rc<Function>,
        environment: SharedEnvironment,
        trail: Vec<ResumeFrame>,
    ) -> Result<BlockExit, RuntimeError> {
        tracing::trace!("invoking {} ({} suspended frames)", function.name, trail.len());

        let traced = self.enter_call(&environment);
        let result = if trail.is_empty() {
            self.execute_block_at(&function.block.statements, environment, 0)
        } else {
            self.resume_block(&function.block.statements, trail)
        };
        if traced {
            if let Some(debugger) = self.debugger.as_mut() {
                debugger.exit_call();
            }
        }
        result
    }

    /// Hands over the frames recorded by the `yield` that just unwound.
    pub(crate) fn take_suspended(&mut self) -> Vec<ResumeFrame> {
        std::mem::take(&mut self.suspended)
    }

    fn enter_call(&mut self, environment: &SharedEnvironment) -> bool {
        let stmt = match (&self.debugger, &self.current) {
            (Some(_), Some(stmt)) => stmt.clone(),
            _ => return false,
        };
        let frame = Frame::call(environment.clone(), self.environment.clone(), stmt);
        match self.debugger.as_mut() {
            Some(debugger) => {
                debugger.enter_call(frame);
                true
            }
            None => false,
        }
    }

    /// Routes a native function to the registry.
    pub fn call_native(&mut self, function: &Rc<Function>, arguments: Vec<Value>) -> InterpreterResult {
        let class = match &function.owner {
            Some(owner) => owner.name.to_string(),
            None => GLOBALS_CLASS.to_owned(),
        };
        let token = self.current_token();
        let call = NativeCall {
            class,
            method: function.name.clone(),
            receiver: function.receiver(),
            arguments,
            token,
        };

        let line = call.token.line;
        let (class, method) = (call.class.clone(), call.method.clone());
        let routed = self.natives.modules_for(&class).into_iter().find_map(|module| {
            tracing::trace!("dispatching {class}.{method} to module {}", module.name());
            module.call(call.clone(), self)
        });

        routed.unwrap_or(Err(RuntimeError::NativeDispatch { class, method, line }))
    }

    /// Token of the statement being executed, or a placeholder before the
    /// first statement runs.
    pub(crate) fn current_token(&self) -> Token {
        match &self.current {
            Some(stmt) => stmt.token().clone(),
            None => Token::new(TokenType::Eof, "", None, 0),
        }
    }

    /// Builds the in-language exception for a runtime failure at `token`.
    pub fn error(&mut self, kind: ErrorKind, token: &Token, message: impl AsRef<str>) -> RuntimeError {
        let location = ErrorHub::location(token);
        let routed = match &self.error_hub {
            Some(hub) => hub.borrow_mut().error(
                kind.class_name(),
                &token.file,
                token.line,
                &location,
                message.as_ref(),
            ),
            None => Routed::Raise {
                class: kind.class_name().to_owned(),
                message: ErrorHub::format(&token.file, token.line, &location, message.as_ref()),
            },
        };

        let (class, message) = match routed {
            Routed::Raise { class, message } => (class, message),
            Routed::Reported => (
                kind.class_name().to_owned(),
                ErrorHub::format(&token.file, token.line, &location, message.as_ref()),
            ),
        };

        let exception = self.make_exception(&class, &message);
        RuntimeError::Raised { exception, message, line: token.line, inspected: false }
    }

    /// An immutable exception object of the named global class, or a
    /// classless object when the class isn't defined.
    pub fn make_exception(&self, class: &str, message: &str) -> Value {
        let class = match self.globals.borrow().get_here(class) {
            Some(Value::Class(handle)) => Some(handle),
            _ => None,
        };

        let mut object = SimiObject::new(class, true);
        object.set("message", Value::Str(message.to_owned()));
        Value::Object(object.into_shared())
    }

    pub(crate) fn environment_error(&mut self, e: EnvironmentError, token: &Token) -> RuntimeError {
        let kind = match e {
            EnvironmentError::Immutable(_) => ErrorKind::ImmutableBinding,
            EnvironmentError::Undefined(_) | EnvironmentError::MissingAncestor { .. } => {
                ErrorKind::UndefinedVariable
            }
        };
        self.error(kind, token, e.to_string())
    }

    pub(crate) fn lookup_variable(&mut self, id: ExprId, name: &Token) -> InterpreterResult {
        let result = if self.dynamic_scope {
            self.environment.borrow().get(&name.lexeme)
        } else if let Some(&distance) = self.locals.get(&id) {
            self.environment.borrow().get_at(distance, &name.lexeme)
        } else {
            self.globals.borrow().get(&name.lexeme)
        };

        result.map_err(|e| self.environment_error(e, name))
    }

    pub(crate) fn assign_variable(
        &mut self,
        id: ExprId,
        name: &Token,
        value: Value,
        mutable: bool,
    ) -> Result<(), RuntimeError> {
        let result = if self.dynamic_scope {
            let target = self.frame_holding(&name.lexeme);
            let result = target.borrow_mut().assign(&name.lexeme, value, mutable);
            result
        } else if let Some(&distance) = self.locals.get(&id) {
            self.environment.borrow_mut().assign_at(distance, &name.lexeme, value, mutable)
        } else {
            self.globals.borrow_mut().assign(&name.lexeme, value, mutable)
        };

        result.map_err(|e| self.environment_error(e, name))
    }

    /// Innermost frame defining `name`, or the current frame.
    fn frame_holding(&self, name: &str) -> SharedEnvironment {
        let mut env = self.environment.clone();
        loop {
            if env.borrow().contains(name) {
                return env;
            }
            let parent = env.borrow().enclosing.clone();
            match parent {
                Some(parent) => env = parent,
                None => return self.environment.clone(),
            }
        }
    }

    /// True when `self` in the current scope is exactly `object`.
    pub(crate) fn is_current_self(&self, object: &Shared<SimiObject>) -> bool {
        match self.environment.borrow().get("self") {
            Ok(Value::Object(current)) => Rc::ptr_eq(&current, object),
            _ => false,
        }
    }

    /// Fails with `MutabilityLockException` unless `object` may be changed
    /// from here.
    pub fn ensure_mutable(&mut self, object: &Shared<SimiObject>, token: &Token) -> Result<(), RuntimeError> {
        if object.borrow().immutable && !self.is_current_self(object) {
            return Err(self.error(
                ErrorKind::MutabilityLock,
                token,
                "Cannot mutate an immutable object. Use '$' to make it mutable.",
            ));
        }
        Ok(())
    }

    /// Evaluates `source` as an expression inside `environment`, resolving
    /// names dynamically. Used by the debugger's `e` command.
    pub fn evaluate_in(&mut self, environment: SharedEnvironment, source: &str) -> Result<Value, String> {
        let hub = ErrorHub::shared();
        let tokens = Scanner::new(source, "<debugger>").with_error_reporting(hub.clone()).scan_tokens();
        let expr = Parser::new(tokens)
            .with_error_reporting(hub)
            .parse_expression()
            .map_err(|count| format!("{count} syntax errors."))?;

        let previous_env = std::mem::replace(&mut self.environment, environment);
        let previous_scope = std::mem::replace(&mut self.dynamic_scope, true);
        let result = self.evaluate_expr(&expr);
        self.dynamic_scope = previous_scope;
        self.environment = previous_env;

        result.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedBuffer;

    fn run(source: &str) -> (String, Result<(), RuntimeError>) {
        let buffer = SharedBuffer::default();
        let mut interpreter = Interpreter::new().with_output(Box::new(buffer.clone()));
        let tokens = Scanner::new(source, "test.simi").scan_tokens();
        let statements = Parser::new(tokens).parse().unwrap();
        Resolver::new(&mut interpreter).resolve(&statements).unwrap();
        let result = interpreter.interpret(&statements);
        (buffer.contents(), result)
    }

    fn output(source: &str) -> String {
        let (out, result) = run(source);
        assert!(result.is_ok(), "{result:?}");
        out
    }

    fn message(source: &str) -> String {
        match run(source).1 {
            Err(e) => e.to_string(),
            Ok(()) => panic!("expected an error"),
        }
    }

    #[test]
    fn arithmetic_keeps_integers_when_exact() {
        assert_eq!(output("print 6 / 3, 7 / 2, 7 // 2, -7 // 2, 7 % 3, 2 * 1.5\n"), "2 3.5 3 -4 1 3.0\n");
    }

    #[test]
    fn integer_division_by_zero_raises() {
        assert!(message("print 1 / 0\n").contains("Division by zero."));
        assert_eq!(output("print 1.0 / 0 > 1000\n"), "true\n");
    }

    #[test]
    fn strings_concatenate_with_anything() {
        assert_eq!(output("print \"a\" + 1 + nil\n"), "a1nil\n");
        assert_eq!(output("x = 4\nprint \"x is \\(x * 2)!\"\n"), "x is 8!\n");
    }

    #[test]
    fn undefined_variables_raise() {
        let (out, result) = run("print nope\n");
        assert_eq!(out, "");
        let error = result.unwrap_err();
        assert!(error.to_string().contains("Undefined variable 'nope'."));
        assert_eq!(error.line(), 1);
    }

    #[test]
    fn immutable_bindings_reject_reassignment() {
        assert!(message("x = 1\nx = 2\n").contains("Cannot assign to immutable 'x'"));
        assert_eq!(output("$x = 1\nx = x + 1\nprint x\n"), "2\n");
    }

    #[test]
    fn functions_close_over_their_scope() {
        let source = "
def counter():
    $count = 0
    def bump():
        count = count + 1
        return count
    end
    return bump
end
c = counter()
c()
print c()
";
        assert_eq!(output(source), "2\n");
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_eq!(output("print nil or 2, false and boom, nil ?? 3, 0 ?? 4\n"), "2 false 3 0\n");
    }

    #[test]
    fn object_literals_are_immutable_unless_marked() {
        assert!(message("a = [x = 1]\na.x = 2\n").contains("Cannot mutate an immutable object."));
        assert_eq!(output("a = $[x = 1]\na.x = 2\nprint a.x, a.missing\n"), "2 nil\n");
    }

    #[test]
    fn positional_slots_and_nesting() {
        assert_eq!(output("a = [[1, 2], [3, 4]]\nprint a.1.0, a.(0).(1)\n"), "3 2\n");
    }

    #[test]
    fn equality_uses_identity_for_objects() {
        assert_eq!(output("a = [1]\nb = [1]\nprint a == a, a == b, 1 == 1.0, nil == false\n"), "true false true false\n");
    }

    #[test]
    fn errors_outside_interpret_are_reported_to_the_hub() {
        let hub = ErrorHub::shared();
        let mut interpreter =
            Interpreter::new().with_output(Box::new(std::io::sink())).with_error_reporting(hub.clone());
        let tokens = Scanner::new("1 // 0", "test.simi").scan_tokens();
        let expr = Parser::new(tokens).parse_expression().unwrap();

        assert!(interpreter.evaluate_expr(&expr).is_err());
        assert!(hub.borrow().had_error);
        assert_eq!(hub.borrow().error_count(), 1);

        hub.borrow_mut().reset();
        let tokens = Scanner::new("print 1 // 0\n", "test.simi").scan_tokens();
        let statements = Parser::new(tokens).parse().unwrap();

        assert!(interpreter.interpret(&statements).is_err());
        assert!(!hub.borrow().had_error);
        assert!(hub.borrow().had_runtime_error);
    }

    #[test]
    fn evaluate_in_sees_local_names() {
        let mut interpreter = Interpreter::new();
        let env = Environment::new().with_enclosing(interpreter.globals.clone()).as_shared();
        env.borrow_mut().define("x", Value::Integer(20), false);

        assert_eq!(interpreter.evaluate_in(env.clone(), "x * 2 + 2"), Ok(Value::Integer(42)));
        assert!(interpreter.evaluate_in(env, "y").is_err());
    }
}
