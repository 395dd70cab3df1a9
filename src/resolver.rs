use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use thiserror::Error;

use crate::error::ErrorHub;
use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Copy)]
enum FunctionType {
    None,
    Function,
    Initializer,
    Method,
    Lambda,
}

#[derive(Debug, Clone, PartialEq, Copy)]
enum ClassType {
    None,
    Class,
    SubClass,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("[line {line}] Error{location}: {message}")]
pub struct ResolverError {
    pub line: u32,
    pub location: String,
    pub message: String,
}

impl ResolverError {
    fn new(token: &Token, message: impl AsRef<str>) -> Self {
        Self { line: token.line, location: ErrorHub::location(token), message: message.as_ref().to_owned() }
    }
}

/// Resolver uses static analysis to bind local variables to the correct
/// environment.
pub struct Resolver<'i> {
    interpreter: &'i mut Interpreter,
    scopes: Vec<HashMap<String, bool>>,
    /// Names assigned at the top level so far. Assignments to these from
    /// nested scopes target the global instead of declaring a local.
    globals: HashSet<String>,
    current_function: FunctionType,
    current_class: ClassType,
    loop_depth: usize,
    errors: Vec<ResolverError>,
}

impl<'i> Resolver<'i> {
    pub fn new(interpreter: &'i mut Interpreter) -> Self {
        let globals = interpreter.global_names();
        Self {
            interpreter,
            scopes: vec![],
            globals,
            current_function: FunctionType::None,
            current_class: ClassType::None,
            loop_depth: 0,
            errors: vec![],
        }
    }

    /// Walks every statement, collecting all errors instead of stopping at
    /// the first.
    pub fn resolve<I, R>(&mut self, statements: I) -> Result<(), Vec<ResolverError>>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<Stmt>,
    {
        self.resolve_statements(statements);
        tracing::debug!("resolution finished with {} errors", self.errors.len());

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    fn resolve_statements<I, R>(&mut self, statements: I)
    where
        I: IntoIterator<Item = R>,
        R: AsRef<Stmt>,
    {
        for stmt in statements {
            self.visit_stmt(stmt.as_ref());
        }
    }

    fn error(&mut self, token: &Token, message: &str) {
        self.errors.push(ResolverError::new(token, message));
    }
}

impl<'i> Resolver<'i> {
    fn visit_stmt(&mut self, input: &Stmt) {
        match input {
            Stmt::Expression { expr, .. } => self.resolve_expr(expr),
            Stmt::Print { exprs, .. } => {
                for expr in exprs {
                    self.resolve_expr(expr);
                }
            }
            Stmt::If { branches, else_branch, .. } => {
                for (condition, block) in branches {
                    self.resolve_expr(condition);
                    self.resolve_block(block);
                }
                if let Some(block) = else_branch {
                    self.resolve_block(block);
                }
            }
            Stmt::While { condition, body, .. } => {
                self.resolve_expr(condition);
                self.loop_depth += 1;
                self.resolve_block(body);
                self.loop_depth -= 1;
            }
            Stmt::For { variable, iterable, body, .. } => {
                self.resolve_expr(iterable);

                self.begin_scope();
                self.declare(&variable.name);
                self.define(&variable.name);
                self.loop_depth += 1;
                self.resolve_statements(&body.statements);
                self.loop_depth -= 1;
                self.end_scope();
            }
            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.error(keyword, "Can't return from top-level code.");
                }

                if let Some(expr) = value {
                    // Cannot return anything from "init" function
                    if self.current_function == FunctionType::Initializer {
                        self.error(keyword, "Can't return a value from an initializer.");
                    }
                    self.resolve_expr(expr);
                }
            }
            Stmt::Yield { keyword, value } => {
                match self.current_function {
                    FunctionType::None => self.error(keyword, "Can't yield from top-level code."),
                    FunctionType::Initializer => {
                        self.error(keyword, "Can't yield from an initializer.")
                    }
                    _ => {}
                }
                if let Some(expr) = value {
                    self.resolve_expr(expr);
                }
            }
            Stmt::Break { keyword } | Stmt::Continue { keyword } => {
                if self.loop_depth == 0 {
                    self.error(keyword, &format!("Can't use '{}' outside of a loop.", keyword.lexeme));
                }
            }
            Stmt::Raise { value, .. } => self.resolve_expr(value),
            Stmt::Rescue { block, .. } => self.resolve_block(block),
            Stmt::Function { name, block, annotations } => {
                for annotation in annotations {
                    self.resolve_expr(annotation);
                }

                // Declared before the body so functions can call themselves.
                self.declare_unique(name);
                self.define(name);

                self.resolve_function(block, FunctionType::Function);
            }
            Stmt::Class { name, superclasses, body, annotations, .. } => {
                self.resolve_class(name, superclasses, body, annotations)
            }
            Stmt::Mixin { classes, .. } => {
                for class in classes {
                    self.resolve_expr(class);
                }
            }
            Stmt::Pass { .. } => {}
        }
    }

    fn resolve_class(
        &mut self,
        name: &Token,
        superclasses: &[Expr],
        body: &[Rc<Stmt>],
        annotations: &[Expr],
    ) {
        let enclosing_class = self.current_class;
        self.current_class = ClassType::Class;

        self.declare_unique(name);
        self.define(name);

        for annotation in annotations {
            self.resolve_expr(annotation);
        }

        for superclass in superclasses {
            if let Expr::Variable { name: super_name, .. } = superclass {
                if super_name.lexeme == name.lexeme {
                    self.error(super_name, "A class can't inherit from itself.");
                }
            }
            self.resolve_expr(superclass);
        }
        if !superclasses.is_empty() {
            self.current_class = ClassType::SubClass;
        }

        // Constants, mixins and nested classes are evaluated where the class
        // is declared.
        for member in body {
            match member.as_ref() {
                Stmt::Expression { expr: Expr::Assign { value, .. }, .. } => self.resolve_expr(value),
                Stmt::Mixin { classes, .. } => {
                    for class in classes {
                        self.resolve_expr(class);
                    }
                }
                Stmt::Class { .. } => {
                    self.begin_scope();
                    self.visit_stmt(member);
                    self.end_scope();
                }
                _ => {}
            }
        }

        if !superclasses.is_empty() {
            self.begin_scope();
            self.define_name("super");
        }

        self.begin_scope();
        self.define_name("self");

        for member in body {
            if let Stmt::Function { name, block, annotations } = member.as_ref() {
                for annotation in annotations {
                    self.resolve_expr(annotation);
                }
                let func_type = if name.lexeme == "init" {
                    FunctionType::Initializer
                } else {
                    FunctionType::Method
                };
                self.resolve_function(block, func_type);
            }
        }

        self.end_scope();
        if !superclasses.is_empty() {
            self.end_scope();
        }

        self.current_class = enclosing_class;
    }

    fn resolve_function(&mut self, block: &Block, func_type: FunctionType) {
        let enclosing_func = self.current_function;
        let enclosing_loops = self.loop_depth;
        self.current_function = func_type;
        self.loop_depth = 0;

        self.begin_scope();
        for param in &block.params {
            self.declare_unique(&param.name);
            self.define(&param.name);
        }
        self.resolve_statements(&block.statements);
        self.end_scope();

        self.loop_depth = enclosing_loops;
        self.current_function = enclosing_func;
    }

    /// Bodies of branches, loops and rescues own a scope; a rescue block's
    /// parameter is declared in it.
    fn resolve_block(&mut self, block: &Block) {
        self.begin_scope();
        for param in &block.params {
            self.declare(&param.name);
            self.define(&param.name);
        }
        self.resolve_statements(&block.statements);
        self.end_scope();
    }
}

impl<'i> Resolver<'i> {
    fn resolve_expr(&mut self, input: &Expr) {
        match input {
            Expr::Variable { id, name } => {
                if let Some(false) = self.scopes.last().and_then(|s| s.get(&name.lexeme)) {
                    self.error(name, "Can't read local variable in its own initializer.");
                }

                self.resolve_local(*id, name);
            }
            Expr::Assign { id, name, value, .. } => self.resolve_assign(*id, name, value),
            Expr::SelfRef { id, keyword } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Can't use 'self' outside of a class.");
                    return;
                }
                self.resolve_local(*id, keyword);
            }
            Expr::Super { id, keyword, .. } => match self.current_class {
                ClassType::None => self.error(keyword, "Can't use 'super' outside of a class."),
                ClassType::Class => {
                    self.error(keyword, "Can't use 'super' in a class with no superclass.")
                }
                ClassType::SubClass => self.resolve_local(*id, keyword),
            },
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            Expr::Unary { right, .. } => self.resolve_expr(right),
            Expr::Grouping { expr } => self.resolve_expr(expr),
            Expr::Literal { .. } => {}
            Expr::Call { callee, arguments, .. } => {
                self.resolve_expr(callee);
                for arg in arguments {
                    self.resolve_expr(arg);
                }
            }
            Expr::Get { object, key, .. } => {
                self.resolve_expr(object);
                if let Some(key) = key {
                    self.resolve_expr(key);
                }
            }
            Expr::Set { object, key, value, .. } => {
                self.resolve_expr(object);
                if let Some(key) = key {
                    self.resolve_expr(key);
                }
                self.resolve_expr(value);
            }
            Expr::ObjectLiteral { entries, .. } => {
                for (_, value) in entries {
                    self.resolve_expr(value);
                }
            }
            Expr::Lambda { block, .. } => self.resolve_function(block, FunctionType::Lambda),
        }
    }

    /// The first assignment to a name in a local scope declares it there.
    /// Names already visible resolve to their declaring scope; known globals
    /// and top-level assignments stay global.
    fn resolve_assign(&mut self, id: ExprId, name: &Token, value: &Expr) {
        if let Some(depth) = self.depth_of(&name.lexeme) {
            self.resolve_expr(value);
            self.interpreter.resolve(id, depth);
            return;
        }

        if self.scopes.is_empty() || self.globals.contains(&name.lexeme) {
            self.resolve_expr(value);
            if self.scopes.is_empty() {
                self.globals.insert(name.lexeme.clone());
            }
            return;
        }

        self.declare(name);
        self.resolve_expr(value);
        self.define(name);
        self.interpreter.resolve(id, 0);
    }
}

impl<'i> Resolver<'i> {
    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), false);
        }
    }

    /// Declarations that may not repeat a name in the same scope.
    fn declare_unique(&mut self, name: &Token) {
        let Some(scope) = self.scopes.last_mut() else {
            self.globals.insert(name.lexeme.clone());
            return;
        };

        if scope.contains_key(&name.lexeme) {
            self.error(name, "Already a variable with this name in this scope.");
            return;
        }
        scope.insert(name.lexeme.clone(), false);
    }

    fn define(&mut self, name: &Token) {
        self.define_name(&name.lexeme);
    }

    fn define_name(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned(), true);
        }
    }

    fn depth_of(&self, name: &str) -> Option<usize> {
        self.scopes.iter().rev().position(|scope| scope.contains_key(name))
    }

    fn resolve_local(&mut self, id: ExprId, name: &Token) {
        if let Some(depth) = self.depth_of(&name.lexeme) {
            self.interpreter.resolve(id, depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(source: &str) -> (Interpreter, Result<(), Vec<ResolverError>>) {
        let tokens = Scanner::new(source, "test.simi").scan_tokens();
        let stmts = Parser::new(tokens).parse().unwrap();
        let mut interpreter = Interpreter::new();
        let result = Resolver::new(&mut interpreter).resolve(&stmts);
        (interpreter, result)
    }

    fn messages(source: &str) -> Vec<String> {
        resolve(source).1.err().unwrap_or_default().into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn top_level_return_and_yield_are_rejected() {
        assert_eq!(
            messages("return 1\nyield 2\n"),
            vec!["Can't return from top-level code.", "Can't yield from top-level code."]
        );
    }

    #[test]
    fn initializers_cannot_return_values() {
        let errors = messages("class A:\n    def init():\n        return 1\nend\n");
        assert_eq!(errors, vec!["Can't return a value from an initializer."]);
    }

    #[test]
    fn duplicate_parameters_are_rejected() {
        assert_eq!(messages("def f(a, a): pass\n"), vec!["Already a variable with this name in this scope."]);
    }

    #[test]
    fn self_and_super_need_a_class() {
        let errors = messages("print self\nclass A:\n    def f(): return super.f()\nend\n");
        assert_eq!(
            errors,
            vec![
                "Can't use 'self' outside of a class.",
                "Can't use 'super' in a class with no superclass."
            ]
        );
    }

    #[test]
    fn loop_control_needs_a_loop() {
        assert_eq!(messages("break\n"), vec!["Can't use 'break' outside of a loop."]);
        assert!(messages("while true:\n    def f(): continue\n    break\n").len() == 1);
    }

    #[test]
    fn self_referential_local_initializer_is_rejected() {
        assert_eq!(
            messages("def f():\n    a = a + 1\n"),
            vec!["Can't read local variable in its own initializer."]
        );
    }

    #[test]
    fn assignments_to_known_globals_stay_global() {
        let (interpreter, result) = resolve("$count = 0\ndef bump():\n    count = count + 1\n");
        assert!(result.is_ok());
        assert!(interpreter.resolved_depths().is_empty());
    }

    #[test]
    fn resolution_is_deterministic() {
        let source = "def outer():\n    $x = 1\n    def inner(): return x\n    return inner\n";
        let tokens = Scanner::new(source, "test.simi").scan_tokens();
        let stmts = Parser::new(tokens).parse().unwrap();

        let mut interpreter = Interpreter::new();
        Resolver::new(&mut interpreter).resolve(&stmts).unwrap();
        let first = interpreter.resolved_depths();
        Resolver::new(&mut interpreter).resolve(&stmts).unwrap();

        assert!(!first.is_empty());
        assert_eq!(first, interpreter.resolved_depths());
    }
}
