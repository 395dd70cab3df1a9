use std::rc::Rc;

use super::itpr::{BlockExit, Flow, InterpreterResult};
use crate::class::{ClassHandle, SimiClass};
use crate::debugger::Frame;
use crate::environment::{Environment, SharedEnvironment};
use crate::error::ErrorKind;
use crate::func::FunctionKind;
use crate::prelude::*;

impl Interpreter {
    /// Runs `statements` from `start` inside `environment`. Stops at the
    /// first flow other than `Normal` and reports which statement produced
    /// it.
    pub fn execute_block_at(
        &mut self,
        statements: &[Rc<Stmt>],
        environment: SharedEnvironment,
        start: usize,
    ) -> Result<BlockExit, RuntimeError> {
        self.enter_block(statements, environment, start, vec![])
    }

    /// Picks up a statement list suspended by `yield`. The last frame of
    /// `trail` belongs to `statements`; the ones before it belong to the
    /// blocks nested inside the statement it names.
    pub fn resume_block(
        &mut self,
        statements: &[Rc<Stmt>],
        mut trail: Vec<ResumeFrame>,
    ) -> Result<BlockExit, RuntimeError> {
        let Some(frame) = trail.pop() else {
            return Ok(BlockExit { flow: Flow::Normal, index: statements.len() });
        };

        // The innermost frame names the `yield` itself; outer frames name the
        // compound statement to re-enter.
        let start = if trail.is_empty() { frame.index + 1 } else { frame.index };
        self.enter_block(statements, frame.environment, start, trail)
    }

    /// Runs `block` in a fresh scope nested in the current one.
    pub fn execute_body(&mut self, block: &Block) -> Result<Flow, RuntimeError> {
        let env = Environment::new().with_enclosing(self.environment.clone()).as_shared();
        Ok(self.execute_block_at(&block.statements, env, 0)?.flow)
    }

    fn enter_block(
        &mut self,
        statements: &[Rc<Stmt>],
        environment: SharedEnvironment,
        start: usize,
        trail: Vec<ResumeFrame>,
    ) -> Result<BlockExit, RuntimeError> {
        let previous = std::mem::replace(&mut self.environment, environment);

        let rescues = statements.iter().any(|s| matches!(s.as_ref(), Stmt::Rescue { .. }));
        if rescues {
            self.rescue_depth += 1;
        }

        let result = self.run_statements(statements, start, trail);

        if rescues {
            self.rescue_depth -= 1;
        }
        self.environment = previous;
        result
    }

    fn run_statements(
        &mut self,
        statements: &[Rc<Stmt>],
        start: usize,
        mut trail: Vec<ResumeFrame>,
    ) -> Result<BlockExit, RuntimeError> {
        let mut index = start;

        while index < statements.len() {
            let stmt = &statements[index];

            // Only reached by skipping ahead from a failure above.
            if let Stmt::Rescue { .. } = stmt.as_ref() {
                index += 1;
                continue;
            }

            let result = if trail.is_empty() {
                self.trace_statement(statements, index);
                self.execute(stmt)
            } else {
                self.current = Some(stmt.clone());
                self.resume_statement(stmt, std::mem::take(&mut trail))
            };

            match result {
                Ok(Flow::Normal) => index += 1,
                Ok(flow) => {
                    if let Flow::Yield(_) = flow {
                        self.suspended.push(ResumeFrame::new(index, self.environment.clone()));
                    }
                    return Ok(BlockExit { flow, index });
                }
                Err(mut error) => {
                    self.inspect_error(&mut error);

                    let rescue = statements[index..].iter().find_map(|s| match s.as_ref() {
                        Stmt::Rescue { block, .. } => Some(block.clone()),
                        _ => None,
                    });
                    let (exception, block) = match (&error, rescue) {
                        (RuntimeError::Raised { exception, .. }, Some(block)) => (exception.clone(), block),
                        _ => return Err(error),
                    };

                    return self.rescue(exception, &block, statements.len());
                }
            }
        }

        Ok(BlockExit { flow: Flow::Normal, index: statements.len() })
    }

    /// Runs a rescue body with its parameter bound to the exception. The
    /// enclosing block finishes once the rescue is done.
    fn rescue(&mut self, exception: Value, block: &Block, end: usize) -> Result<BlockExit, RuntimeError> {
        tracing::debug!("rescued {}", exception.type_name());

        let depth = self.suspended.len();
        let env = Environment::new().with_enclosing(self.environment.clone()).as_shared();
        if let Some(param) = block.params.first() {
            env.borrow_mut().define(&param.name.lexeme, exception, param.mutable);
        }

        let flow = self.execute_block_at(&block.statements, env, 0)?.flow;
        if let Flow::Yield(_) = flow {
            // A rescue is not re-entered: resuming finishes the rescued block.
            self.suspended.truncate(depth);
            self.suspended.push(ResumeFrame::new(end.saturating_sub(1), self.environment.clone()));
        }
        Ok(BlockExit { flow, index: end })
    }

    /// Continues a compound statement whose nested block yielded. `trail`
    /// ends with the frame of that nested block.
    fn resume_statement(&mut self, stmt: &Stmt, trail: Vec<ResumeFrame>) -> Result<Flow, RuntimeError> {
        let (branch, iterator) = match trail.last() {
            Some(frame) => (frame.branch, frame.iterator.clone()),
            None => return Ok(Flow::Normal),
        };

        match stmt {
            Stmt::If { branches, else_branch, .. } => {
                let block = match branches.get(branch) {
                    Some((_, block)) => Some(block),
                    None => else_branch.as_ref(),
                };
                match block {
                    Some(block) => {
                        let flow = self.resume_block(&block.statements, trail)?.flow;
                        Ok(self.mark_branch(flow, branch))
                    }
                    None => Ok(Flow::Normal),
                }
            }
            Stmt::While { condition, body, .. } => {
                match self.resume_block(&body.statements, trail)?.flow {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Normal | Flow::Continue => {}
                    flow => return Ok(flow),
                }
                self.execute_while(condition, body)
            }
            Stmt::For { keyword, variable, body, .. } => {
                let Some(next) = iterator else {
                    return Ok(Flow::Normal);
                };
                let flow = self.resume_block(&body.statements, trail)?.flow;
                match self.mark_iterator(flow, &next) {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Normal | Flow::Continue => {}
                    flow => return Ok(flow),
                }
                self.run_for(keyword, variable, &next, body)
            }
            _ => Ok(Flow::Normal),
        }
    }

    /// Remembers which `if` branch holds a suspended block.
    fn mark_branch(&mut self, flow: Flow, branch: usize) -> Flow {
        if let (Flow::Yield(_), Some(frame)) = (&flow, self.suspended.last_mut()) {
            frame.branch = branch;
        }
        flow
    }

    /// Remembers the iterator of a `for` loop whose body is suspended.
    fn mark_iterator(&mut self, flow: Flow, next: &Value) -> Flow {
        if let (Flow::Yield(_), Some(frame)) = (&flow, self.suspended.last_mut()) {
            frame.iterator = Some(next.clone());
        }
        flow
    }

    fn trace_statement(&mut self, statements: &[Rc<Stmt>], index: usize) {
        self.current = Some(statements[index].clone());

        if let Some(mut debugger) = self.debugger.take() {
            let frame = Frame::line(self.environment.clone(), statements, index);
            debugger.on_statement(self, frame);
            self.debugger.get_or_insert(debugger);
        }
    }

    /// Offers a fresh exception to the debugger once.
    fn inspect_error(&mut self, error: &mut RuntimeError) {
        let RuntimeError::Raised { inspected, .. } = error else {
            return;
        };
        if *inspected {
            return;
        }
        *inspected = true;

        let stmt = match &self.current {
            Some(stmt) => stmt.clone(),
            None => return,
        };
        if let Some(mut debugger) = self.debugger.take() {
            let fatal = self.rescue_depth == 0;
            let frame = Frame::call(self.environment.clone(), self.environment.clone(), stmt);
            debugger.on_exception(self, error, fatal, frame);
            self.debugger.get_or_insert(debugger);
        }
    }

    pub fn execute(&mut self, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Expression { expr, .. } => {
                self.evaluate_expr(expr)?;
            }
            Stmt::Print { exprs, .. } => {
                let mut parts = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    parts.push(self.evaluate_expr(expr)?.to_string());
                }
                let line = parts.join(" ");
                if let Err(e) = writeln!(self.output(), "{line}") {
                    tracing::warn!("failed to write output: {e}");
                }
            }
            Stmt::If { branches, else_branch, .. } => {
                for (branch, (condition, block)) in branches.iter().enumerate() {
                    if self.evaluate_expr(condition)?.is_truthy() {
                        let flow = self.execute_body(block)?;
                        return Ok(self.mark_branch(flow, branch));
                    }
                }
                if let Some(block) = else_branch {
                    let flow = self.execute_body(block)?;
                    return Ok(self.mark_branch(flow, branches.len()));
                }
            }
            Stmt::While { condition, body, .. } => return self.execute_while(condition, body),
            Stmt::For { keyword, variable, iterable, body } => {
                let iterable = self.evaluate_expr(iterable)?;
                return self.execute_for(keyword, variable, &iterable, body);
            }
            Stmt::Return { value, .. } => {
                let value = self.evaluate_optional(value)?;
                return Ok(Flow::Return(value));
            }
            Stmt::Yield { value, .. } => {
                let value = self.evaluate_optional(value)?;
                return Ok(Flow::Yield(value));
            }
            Stmt::Break { .. } => return Ok(Flow::Break),
            Stmt::Continue { .. } => return Ok(Flow::Continue),
            Stmt::Raise { keyword, value } => {
                let value = self.evaluate_expr(value)?;
                return Err(self.raise(value, keyword));
            }
            Stmt::Rescue { .. } | Stmt::Pass { .. } => {}
            Stmt::Function { name, block, annotations } => {
                let annotations = self.evaluate_all(annotations)?;
                let function = Function::new(
                    &name.lexeme,
                    block.clone(),
                    self.environment.clone(),
                    FunctionKind::Function,
                    None,
                )
                .with_annotations(annotations);

                self.declare(name, Value::Function(Rc::new(function)))?;
            }
            Stmt::Class { name, superclasses, body, mutable, annotations } => {
                self.execute_class(name, superclasses, body, *mutable, annotations)?;
            }
            Stmt::Mixin { keyword, .. } => {
                return Err(self.error(ErrorKind::Exception, keyword, "Mixins are only allowed in class bodies."));
            }
        }

        Ok(Flow::Normal)
    }

    /// Binds a `def` or `class` name in the current frame. A name already
    /// bound there must be mutable.
    fn declare(&mut self, name: &Token, value: Value) -> Result<(), RuntimeError> {
        let result = self.environment.borrow_mut().assign(&name.lexeme, value, false);
        result.map_err(|e| self.environment_error(e, name))
    }

    fn evaluate_optional(&mut self, value: &Option<Expr>) -> InterpreterResult {
        match value {
            Some(expr) => self.evaluate_expr(expr),
            None => Ok(Value::Nil),
        }
    }

    fn evaluate_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, RuntimeError> {
        exprs.iter().map(|e| self.evaluate_expr(e)).collect()
    }

    /// Turns a raised value into a runtime error. Strings become `Exception`
    /// objects.
    fn raise(&mut self, value: Value, keyword: &Token) -> RuntimeError {
        let line = keyword.line;

        match value {
            Value::Str(message) => {
                let exception = self.make_exception(ErrorKind::Exception.class_name(), &message);
                RuntimeError::Raised { exception, message, line, inspected: false }
            }
            Value::Object(ref object) => {
                let message = match object.borrow().get("message") {
                    Some(message) => message.to_string(),
                    None => object.borrow().to_string(),
                };
                RuntimeError::Raised { exception: value, message, line, inspected: false }
            }
            other => {
                let message = other.to_string();
                RuntimeError::Raised { exception: other, message, line, inspected: false }
            }
        }
    }

    fn execute_while(&mut self, condition: &Expr, body: &Block) -> Result<Flow, RuntimeError> {
        while self.evaluate_expr(condition)?.is_truthy() {
            match self.execute_body(body)? {
                Flow::Break => break,
                Flow::Normal | Flow::Continue => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn execute_for(&mut self, keyword: &Token, variable: &Param, iterable: &Value, body: &Block) -> Result<Flow, RuntimeError> {
        let next = self.iterator_next(iterable, keyword)?;
        self.run_for(keyword, variable, &next, body)
    }

    /// Calls `next` until it returns `nil`, running `body` for each item.
    fn run_for(&mut self, keyword: &Token, variable: &Param, next: &Value, body: &Block) -> Result<Flow, RuntimeError> {
        loop {
            let item = self.call_value(next, vec![], keyword)?;
            if item.is_nil() {
                break;
            }

            let env = Environment::new().with_enclosing(self.environment.clone()).as_shared();
            env.borrow_mut().define(&variable.name.lexeme, item, variable.mutable);

            let flow = self.execute_block_at(&body.statements, env, 0)?.flow;
            match self.mark_iterator(flow, next) {
                Flow::Break => break,
                Flow::Normal | Flow::Continue => {}
                flow => return Ok(flow),
            }
        }

        Ok(Flow::Normal)
    }

    /// The zero-argument callable producing successive items of `iterable`.
    fn iterator_next(&mut self, iterable: &Value, token: &Token) -> InterpreterResult {
        let callable = |v: &Value| matches!(v, Value::Function(_) | Value::Callable(_));

        if callable(iterable) {
            return Ok(iterable.clone());
        }

        let iterate = self.get_property(iterable, "iterate", Some(0), token)?;
        if !callable(&iterate) {
            return Err(self.error(ErrorKind::TypeMismatch, token, format!("{} is not iterable.", iterable.type_name())));
        }

        let iterator = self.call_value(&iterate, vec![], token)?;
        if callable(&iterator) {
            return Ok(iterator);
        }

        let next = self.get_property(&iterator, "next", Some(0), token)?;
        if !callable(&next) {
            return Err(self.error(ErrorKind::TypeMismatch, token, "Iterator has no 'next' method."));
        }
        Ok(next)
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclasses: &[Expr],
        body: &[Rc<Stmt>],
        mutable: bool,
        annotations: &[Expr],
    ) -> InterpreterResult {
        let mut supers = Vec::with_capacity(superclasses.len());
        for expr in superclasses {
            match self.evaluate_expr(expr)? {
                Value::Class(class) => supers.push(class.id),
                _ => return Err(self.error(ErrorKind::TypeMismatch, name, "Superclass must be a class.")),
            }
        }

        let mut class = SimiClass::new(&name.lexeme, supers);
        class.mutable_instances = mutable;
        class.annotations = self.evaluate_all(annotations)?;
        let handle = self.classes.alloc(class);
        self.declare(name, Value::Class(handle.clone()))?;

        tracing::debug!("declared class {} with {} superclasses", name.lexeme, superclasses.len());

        // Methods of a subclass see `super` one frame outside `self`.
        let method_env = if superclasses.is_empty() {
            self.environment.clone()
        } else {
            let env = Environment::new().with_enclosing(self.environment.clone()).as_shared();
            env.borrow_mut().define("super", Value::Class(handle.clone()), false);
            env
        };

        for member in body {
            self.class_member(&handle, member, &method_env)?;
        }

        Ok(Value::Class(handle))
    }

    fn class_member(
        &mut self,
        handle: &ClassHandle,
        member: &Stmt,
        method_env: &SharedEnvironment,
    ) -> Result<(), RuntimeError> {
        match member {
            Stmt::Function { name, block, annotations } => {
                let annotations = self.evaluate_all(annotations)?;
                let kind = if name.lexeme == "init" { FunctionKind::Initializer } else { FunctionKind::Method };
                let method =
                    Function::new(&name.lexeme, block.clone(), method_env.clone(), kind, Some(handle.clone()))
                        .with_annotations(annotations);

                self.classes.get_mut(handle.id).add_method(&name.lexeme, Rc::new(method));
            }
            Stmt::Expression { expr: Expr::Assign { name, value, .. }, .. } => {
                let value = self.evaluate_expr(value)?;
                self.classes.get_mut(handle.id).constants.insert(name.lexeme.clone(), value);
            }
            Stmt::Class { name, superclasses, body, mutable, annotations } => {
                let scope = Environment::new().with_enclosing(self.environment.clone()).as_shared();
                let previous = std::mem::replace(&mut self.environment, scope);
                let nested = self.execute_class(name, superclasses, body, *mutable, annotations);
                self.environment = previous;

                let nested = nested?;
                self.classes.get_mut(handle.id).constants.insert(name.lexeme.clone(), nested);
            }
            Stmt::Mixin { keyword, classes } => {
                for expr in classes {
                    match self.evaluate_expr(expr)? {
                        Value::Class(mixin) => self.classes.mix_in(handle.id, mixin.id),
                        _ => {
                            return Err(self.error(ErrorKind::TypeMismatch, keyword, "Only classes can be mixed in."))
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
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

    #[test]
    fn init_sugar_assigns_fields() {
        let source = "
class A:
    def init(x): pass
    def get(): return self.x
end
print A(5).get()
";
        assert_eq!(output(source), "5\n");
    }

    #[test]
    fn methods_resolve_depth_first_left_to_right() {
        let source = "
class Base:
    def foo(): return \"Base\"
end
class B(Base):
    def foo(): return \"B\"
end
class C:
    def foo(): return \"C\"
end
class A(B, C): pass
class D(Base, C): pass
print A().foo(), D().foo()
";
        assert_eq!(output(source), "B Base\n");
    }

    #[test]
    fn super_skips_the_current_class() {
        let source = "
class Animal:
    def speak(): return \"...\"
end
class Dog(Animal):
    def speak(): return \"Woof \" + super.speak()
end
print Dog().speak()
";
        assert_eq!(output(source), "Woof ...\n");
    }

    #[test]
    fn yielded_bodies_resume_and_restart() {
        let source = "
def gen():
    yield 1
    yield 2
    return 3
end
print gen(), gen(), gen(), gen()
";
        assert_eq!(output(source), "1 2 3 1\n");
    }

    #[test]
    fn resumed_bodies_keep_their_locals() {
        let source = "
def steps(start):
    $n = start
    yield n
    n = n + 10
    yield n
end
print steps(1), steps(100)
";
        assert_eq!(output(source), "1 11\n");
    }

    #[test]
    fn yields_inside_loops_resume_within_the_loop() {
        let source = "
def counter():
    $i = 0
    while i < 3:
        i = i + 1
        yield i
    end
    return nil
end
print counter(), counter(), counter(), counter(), counter()
";
        assert_eq!(output(source), "1 2 3 nil 1\n");
    }

    #[test]
    fn statements_after_a_nested_yield_still_run() {
        let source = "
def upto(n):
    $i = 0
    return def ():
        i = i + 1
        if i > n: return nil
        return i
    end
end
def evens():
    $seen = 0
    for x in upto(4):
        if x % 2 == 0:
            yield x
            seen = seen + 1
        end
    end
    return seen
end
print evens(), evens(), evens()
";
        assert_eq!(output(source), "2 4 2\n");
    }

    #[test]
    fn declarations_do_not_replace_immutable_names() {
        let (out, result) = run("x = 1\ndef x(): return 2\nprint x\n");
        assert_eq!(out, "");
        assert!(result.unwrap_err().to_string().contains("Cannot assign to immutable 'x'"));

        let (out, result) = run("class A: pass\nprint A\nclass A: pass\nprint A\n");
        assert_eq!(out, "A\n");
        assert!(result.unwrap_err().to_string().contains("Cannot assign to immutable 'A'"));

        assert_eq!(output("$f = 1\ndef f(): return 2\nprint f()\n"), "2\n");
    }

    #[test]
    fn instances_are_immutable_outside_self() {
        let source = "
class P:
    def init(x): pass
    def move(): self.x = self.x + 1
end
p = P(1)
p.move()
print p.x
p.x = 7
";
        let (out, result) = run(source);
        assert_eq!(out, "2\n");
        assert!(result.unwrap_err().to_string().contains("Cannot mutate an immutable object."));
    }

    #[test]
    fn mutable_classes_allow_outside_writes() {
        assert_eq!(output("class $Box: pass\nb = Box()\nb.v = 3\nprint b.v\n"), "3\n");
    }

    #[test]
    fn private_fields_stay_private() {
        let source = "
class Safe:
    def init(): self._code = 42
    def code(): return self._code
end
s = Safe()
print s.code()
print s._code
";
        let (out, result) = run(source);
        assert_eq!(out, "42\n");
        assert!(result.unwrap_err().to_string().contains("Cannot access private field '_code'."));
    }

    #[test]
    fn rescue_catches_preceding_statements() {
        let source = "
def risky():
    print \"before\"
    raise \"boom\"
    print \"skipped\"
    rescue e:
        print \"caught\", e.message
    end
    return 1
end
print risky()
";
        assert_eq!(output(source), "before\ncaught boom\nnil\n");
    }

    #[test]
    fn runtime_errors_become_rescuable_exceptions() {
        let source = "
$result = \"none\"
if true:
    x = 1 / 0
    rescue e:
        result = e.message
    end
end
print result
";
        let out = output(source);
        assert!(out.contains("Division by zero."), "{out}");
    }

    #[test]
    fn loops_honour_break_and_continue() {
        let source = "
$i = 0
$total = 0
while true:
    i = i + 1
    if i > 5: break
    if i % 2 == 0: continue
    total = total + i
end
print total
";
        assert_eq!(output(source), "9\n");
    }

    #[test]
    fn for_loops_call_a_callable_iterator() {
        let source = "
def counter():
    $n = 0
    return def ():
        n = n + 1
        if n > 3: return nil
        return n
    end
end
for x in counter(): print x
";
        assert_eq!(output(source), "1\n2\n3\n");
    }

    #[test]
    fn for_loops_call_iterate_and_next() {
        let source = "
class Range:
    def init(n): pass
    def iterate(): return RangeIter(self.n)
end
class $RangeIter:
    def init(n):
        self.n = n
        self.i = 0
    end
    def next():
        if self.i >= self.n: return nil
        self.i = self.i + 1
        return self.i
    end
end
for x in Range(2): print x
";
        assert_eq!(output(source), "1\n2\n");
    }

    #[test]
    fn class_constants_and_nested_classes() {
        let source = "
class Outer:
    LIMIT = 10
    class Inner:
        def value(): return 7
    end
end
print Outer.LIMIT, Outer.Inner().value()
";
        assert_eq!(output(source), "10 7\n");
    }

    #[test]
    fn mixins_copy_missing_methods() {
        let source = "
class Greeter:
    def greet(): return \"hi\"
end
class Person:
    import Greeter
end
print Person().greet()
";
        assert_eq!(output(source), "hi\n");
    }

    #[test]
    fn when_dispatches_on_the_subject() {
        let source = "
class Text: pass
def kind(v):
    when v:
        1 or 2: return \"small\"
        is Text: return \"text\"
        in [10, 20]: return \"round\"
        else: return \"other\"
    end
end
print kind(2), kind(Text()), kind(20), kind(99)
";
        assert_eq!(output(source), "small text round other\n");
    }

    #[test]
    fn is_checks_the_exact_class() {
        let source = "
class A: pass
class B(A): pass
print B() is B, B() is A, nil is A, [] is not A
";
        assert_eq!(output(source), "true false false true\n");
    }

    #[test]
    fn arity_selects_the_overload() {
        let source = "
class Shape:
    def area(): return 0
    def area(scale): return scale
end
s = Shape()
print s.area(), s.area(4)
";
        assert_eq!(output(source), "0 4\n");
    }
}
