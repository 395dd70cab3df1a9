use std::rc::Rc;

use super::itpr::InterpreterResult;
use crate::class::{ClassHandle, SimiObject};
use crate::environment::{Environment, EnvironmentError};
use crate::error::ErrorKind;
use crate::func::FunctionKind;
use crate::prelude::*;

impl Interpreter {
    pub fn evaluate_expr(&mut self, expr: &Expr) -> InterpreterResult {
        match expr {
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Grouping { expr: inner } => self.evaluate_expr(inner),
            Expr::Unary { operator, right } => self.evaluate_unary(operator, right),
            Expr::Binary { left, operator, right } => self.evaluate_binary(left, operator, right),
            Expr::Logical { left, operator, right } => {
                let left = self.evaluate_expr(left)?;

                let short_circuit = match operator.token_type {
                    TokenType::Or => left.is_truthy(),
                    TokenType::And => !left.is_truthy(),
                    // TokenType::QuestionQuestion
                    _ => !left.is_nil(),
                };
                if short_circuit {
                    return Ok(left);
                }

                self.evaluate_expr(right)
            }
            Expr::Variable { id, name } => self.lookup_variable(*id, name),
            Expr::Assign { id, name, value, mutable } => {
                let value = self.evaluate_expr(value)?;
                self.assign_variable(*id, name, value.clone(), *mutable)?;
                Ok(value)
            }
            Expr::Call { callee, paren, arguments } => {
                let callee = self.evaluate_expr(callee)?;

                let mut args = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    args.push(self.evaluate_expr(arg)?);
                }

                self.call_value(&callee, args, paren)
            }
            Expr::Get { object, name, key, arity } => {
                let object = self.evaluate_expr(object)?;
                let key = self.property_key(name, key.as_deref())?;
                self.get_property(&object, &key, *arity, name)
            }
            Expr::Set { object, name, key, value } => {
                let object = self.evaluate_expr(object)?;
                let key = self.property_key(name, key.as_deref())?;
                let value = self.evaluate_expr(value)?;
                self.set_property(&object, &key, value.clone(), name)?;
                Ok(value)
            }
            Expr::SelfRef { id, keyword } => self.lookup_variable(*id, keyword),
            Expr::Super { id, keyword, method, arity } => {
                self.evaluate_super(*id, keyword, method, *arity)
            }
            Expr::ObjectLiteral { entries, mutable, .. } => {
                let mut object = SimiObject::new(None, !mutable);
                for (key, value) in entries {
                    let value = self.evaluate_expr(value)?;
                    match key {
                        Some(key) => object.set(&SimiObject::key_for(&key.lexeme), value),
                        None => object.push(value),
                    }
                }
                Ok(Value::Object(object.into_shared()))
            }
            Expr::Lambda { block, .. } => {
                let function = Function::new(
                    "lambda",
                    block.clone(),
                    self.environment.clone(),
                    FunctionKind::Lambda,
                    None,
                );
                Ok(Value::Function(Rc::new(function)))
            }
        }
    }

    /// Invokes anything callable with already evaluated arguments.
    pub fn call_value(&mut self, callee: &Value, arguments: Vec<Value>, paren: &Token) -> InterpreterResult {
        match callee {
            Value::Function(function) => {
                self.check_arity(function.arity(), arguments.len(), paren)?;
                function.call(self, arguments)
            }
            Value::Callable(callable) => {
                self.check_arity(callable.arity(), arguments.len(), paren)?;
                callable.call(self, arguments)
            }
            Value::Class(class) => self.construct(class, arguments, paren),
            _ => Err(self.error(ErrorKind::TypeMismatch, paren, "Can only call functions and classes.")),
        }
    }

    fn check_arity(&mut self, expected: usize, got: usize, paren: &Token) -> Result<(), RuntimeError> {
        if expected != got {
            return Err(self.error(
                ErrorKind::ArityMismatch,
                paren,
                format!("Expected {expected} arguments but got {got}."),
            ));
        }
        Ok(())
    }

    /// Allocates an instance and runs the `init` overload taking as many
    /// arguments as were passed.
    fn construct(&mut self, class: &ClassHandle, arguments: Vec<Value>, paren: &Token) -> InterpreterResult {
        let immutable = !self.classes.get(class.id).mutable_instances;
        let instance = Value::Object(SimiObject::new(Some(class.clone()), immutable).into_shared());

        match self.classes.find_method(class.id, "init", Some(arguments.len())) {
            Some(init) => {
                init.bind(instance.clone()).call(self, arguments)?;
            }
            None if arguments.is_empty() && !self.classes.has_init(class.id) => {}
            None => {
                return Err(self.error(
                    ErrorKind::ArityMismatch,
                    paren,
                    format!("{} has no init taking {} arguments.", class.name, arguments.len()),
                ))
            }
        }

        Ok(instance)
    }

    fn property_key(&mut self, name: &Token, key: Option<&Expr>) -> Result<String, RuntimeError> {
        let key = match key {
            None => return Ok(SimiObject::key_for(&name.lexeme)),
            Some(key) => self.evaluate_expr(key)?,
        };

        match key {
            Value::Integer(index) if index >= 0 => Ok(SimiObject::index_key(index as usize)),
            Value::Str(s) => Ok(SimiObject::key_for(&s)),
            _ => Err(self.error(
                ErrorKind::TypeMismatch,
                name,
                "Computed keys must be strings or non-negative integers.",
            )),
        }
    }

    fn find_method(&self, class: &ClassHandle, name: &str, arity: Option<usize>) -> Option<Rc<Function>> {
        self.classes
            .find_method(class.id, name, arity)
            .or_else(|| arity.and_then(|_| self.classes.find_method(class.id, name, None)))
    }

    /// Method of a core class defined by the preamble (`Object`, `String`...).
    fn core_method(&self, class: &str, name: &str, arity: Option<usize>) -> Option<Rc<Function>> {
        match self.globals.borrow().get_here(class) {
            Some(Value::Class(class)) => self.find_method(&class, name, arity),
            _ => None,
        }
    }

    /// Property read: fields, then bound methods, then class constants.
    /// Missing properties are `nil`.
    pub fn get_property(
        &mut self,
        target: &Value,
        key: &str,
        arity: Option<usize>,
        token: &Token,
    ) -> InterpreterResult {
        let bound = |method: Rc<Function>| -> InterpreterResult {
            Ok(Value::Function(method.bind(target.clone())))
        };

        match target {
            Value::Object(object) => {
                if SimiObject::is_private(key) && !self.is_current_self(object) {
                    return Err(self.error(
                        ErrorKind::PrivateAccess,
                        token,
                        format!("Cannot access private field '{key}'."),
                    ));
                }

                let (field, class) = {
                    let object = object.borrow();
                    (object.get(key), object.class.clone())
                };
                if let Some(value) = field {
                    return Ok(value);
                }

                if let Some(class) = &class {
                    if let Some(method) = self.find_method(class, key, arity) {
                        return bound(method);
                    }
                }
                if let Some(method) = self.core_method("Object", key, arity) {
                    return bound(method);
                }
                if let Some(constant) = class.and_then(|c| self.classes.find_constant(c.id, key)) {
                    return Ok(constant);
                }
                Ok(Value::Nil)
            }
            Value::Class(class) => {
                if let Some(constant) = self.classes.find_constant(class.id, key) {
                    return Ok(constant);
                }
                match self.find_method(class, key, arity) {
                    Some(method) => bound(method),
                    None => Ok(Value::Nil),
                }
            }
            Value::Str(_) => match self.core_method("String", key, arity) {
                Some(method) => bound(method),
                None => Ok(Value::Nil),
            },
            Value::Integer(_) | Value::Float(_) => match self.core_method("Number", key, arity) {
                Some(method) => bound(method),
                None => Ok(Value::Nil),
            },
            _ => Err(self.error(ErrorKind::TypeMismatch, token, "Only objects have properties.")),
        }
    }

    fn set_property(&mut self, target: &Value, key: &str, value: Value, token: &Token) -> Result<(), RuntimeError> {
        match target {
            Value::Object(object) => {
                if SimiObject::is_private(key) && !self.is_current_self(object) {
                    return Err(self.error(
                        ErrorKind::PrivateAccess,
                        token,
                        format!("Cannot access private field '{key}'."),
                    ));
                }
                self.ensure_mutable(object, token)?;

                object.borrow_mut().set(key, value);
                Ok(())
            }
            Value::Class(_) => {
                Err(self.error(ErrorKind::MutabilityLock, token, "Class constants are immutable."))
            }
            _ => Err(self.error(ErrorKind::TypeMismatch, token, "Only objects have fields.")),
        }
    }

    fn evaluate_super(
        &mut self,
        id: ExprId,
        keyword: &Token,
        method: &Token,
        arity: Option<usize>,
    ) -> InterpreterResult {
        let lookup = super_binding(&self.environment.borrow(), self.resolved_distance(id));
        let (superclass, receiver) = lookup.map_err(|e| self.environment_error(e, keyword))?;

        let found = match &superclass {
            Value::Class(class) => self.classes.find_super_method(class.id, &method.lexeme, arity).or_else(
                || arity.and_then(|_| self.classes.find_super_method(class.id, &method.lexeme, None)),
            ),
            _ => None,
        };

        match found {
            Some(found) => Ok(Value::Function(found.bind(receiver))),
            None => Err(self.error(
                ErrorKind::UndefinedVariable,
                method,
                format!("Undefined superclass method '{}'.", method.lexeme),
            )),
        }
    }

    fn evaluate_unary(&mut self, operator: &Token, right: &Expr) -> InterpreterResult {
        let right = self.evaluate_expr(right)?;

        match operator.token_type {
            TokenType::Not => Ok(Value::Boolean(!right.is_truthy())),
            // TokenType::Minus
            _ => match right {
                Value::Integer(i) => Ok(i.checked_neg().map_or(Value::Float(-(i as f64)), Value::Integer)),
                Value::Float(f) => Ok(Value::Float(-f)),
                _ => Err(self.error(ErrorKind::TypeMismatch, operator, "Operand must be a number.")),
            },
        }
    }

    fn evaluate_binary(&mut self, left: &Expr, operator: &Token, right: &Expr) -> InterpreterResult {
        let left = self.evaluate_expr(left)?;
        let right = self.evaluate_expr(right)?;

        match operator.token_type {
            TokenType::EqualEqual => Ok(Value::Boolean(left == right)),
            TokenType::BangEqual => Ok(Value::Boolean(left != right)),
            TokenType::Is => Ok(Value::Boolean(self.is_instance(&left, &right, operator)?)),
            TokenType::IsNot => Ok(Value::Boolean(!self.is_instance(&left, &right, operator)?)),
            TokenType::In => Ok(Value::Boolean(self.contains(&right, &left, operator)?)),
            TokenType::NotIn => Ok(Value::Boolean(!self.contains(&right, &left, operator)?)),
            TokenType::Greater
            | TokenType::GreaterEqual
            | TokenType::Less
            | TokenType::LessEqual => {
                let (l, r) = match (left.number(), right.number()) {
                    (Some(l), Some(r)) => (l, r),
                    _ => {
                        return Err(self.error(ErrorKind::TypeMismatch, operator, "Operands must be numbers."))
                    }
                };
                let result = match operator.token_type {
                    TokenType::Greater => l > r,
                    TokenType::GreaterEqual => l >= r,
                    TokenType::Less => l < r,
                    _ => l <= r,
                };
                Ok(Value::Boolean(result))
            }
            _ => self.arithmetic(operator, &left, &right),
        }
    }

    fn arithmetic(&mut self, operator: &Token, left: &Value, right: &Value) -> InterpreterResult {
        if operator.token_type == TokenType::Plus
            && (matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)))
        {
            return Ok(Value::Str(format!("{left}{right}")));
        }

        let (l, r) = match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => return self.integer_arithmetic(operator, *l, *r),
            _ => match (left.number(), right.number()) {
                (Some(l), Some(r)) => (l, r),
                _ => return Err(self.error(ErrorKind::TypeMismatch, operator, "Operands must be numbers.")),
            },
        };

        let result = match operator.token_type {
            TokenType::Plus => l + r,
            TokenType::Minus => l - r,
            TokenType::Star => l * r,
            TokenType::Slash => l / r,
            TokenType::SlashSlash => (l / r).floor(),
            TokenType::Mod => l % r,
            _ => return Err(self.error(ErrorKind::TypeMismatch, operator, "Unknown operator.")),
        };
        Ok(Value::Float(result))
    }

    fn integer_arithmetic(&mut self, operator: &Token, l: i64, r: i64) -> InterpreterResult {
        let widen = |checked: Option<i64>, fallback: f64| match checked {
            Some(i) => Value::Integer(i),
            None => Value::Float(fallback),
        };

        let needs_divisor =
            matches!(operator.token_type, TokenType::Slash | TokenType::SlashSlash | TokenType::Mod);
        if needs_divisor && r == 0 {
            return Err(self.error(ErrorKind::ZeroDivision, operator, "Division by zero."));
        }

        let (lf, rf) = (l as f64, r as f64);
        let result = match operator.token_type {
            TokenType::Plus => widen(l.checked_add(r), lf + rf),
            TokenType::Minus => widen(l.checked_sub(r), lf - rf),
            TokenType::Star => widen(l.checked_mul(r), lf * rf),
            TokenType::Slash => match l.checked_rem(r) {
                Some(0) => widen(l.checked_div(r), lf / rf),
                _ => Value::Float(lf / rf),
            },
            TokenType::SlashSlash => {
                let quotient = l.wrapping_div(r);
                if l.wrapping_rem(r) != 0 && ((l < 0) != (r < 0)) {
                    Value::Integer(quotient - 1)
                } else {
                    Value::Integer(quotient)
                }
            }
            TokenType::Mod => Value::Integer(l.wrapping_rem(r)),
            _ => return Err(self.error(ErrorKind::TypeMismatch, operator, "Unknown operator.")),
        };
        Ok(result)
    }

    /// `value is class`: exact class name match. `nil` is never an instance.
    fn is_instance(&mut self, value: &Value, class: &Value, operator: &Token) -> Result<bool, RuntimeError> {
        let class = match class {
            Value::Class(class) => class,
            _ => {
                return Err(self.error(
                    ErrorKind::TypeMismatch,
                    operator,
                    "Right side of 'is' must be a class.",
                ))
            }
        };

        Ok(!value.is_nil() && value.type_name() == *class.name)
    }

    fn contains(&mut self, container: &Value, needle: &Value, operator: &Token) -> Result<bool, RuntimeError> {
        let result = match container {
            Value::Object(object) => object.borrow().contains(needle),
            Value::Str(s) => match needle {
                Value::Str(needle) => Ok(s.contains(needle.as_str())),
                _ => Err("Only strings can be searched for in strings.".to_owned()),
            },
            _ => Err("Right side of 'in' must be an object or a string.".to_owned()),
        };

        result.map_err(|message| self.error(ErrorKind::TypeMismatch, operator, message))
    }

    fn resolved_distance(&self, id: ExprId) -> Option<usize> {
        if self.dynamic_scope {
            return None;
        }
        self.locals.get(&id).copied()
    }
}

/// `super` and `self` as seen from a `super.name` expression. The receiver
/// sits one frame inside the frame holding `super`.
fn super_binding(env: &Environment, distance: Option<usize>) -> Result<(Value, Value), EnvironmentError> {
    match distance {
        Some(distance) => {
            let superclass = env.get_at(distance, "super")?;
            Ok((superclass, env.get_at(distance.saturating_sub(1), "self")?))
        }
        None => Ok((env.get("super")?, env.get("self")?)),
    }
}
