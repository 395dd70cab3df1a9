use std::cell::RefCell;
use std::fmt::{Debug, Display};
use std::rc::Rc;

use crate::environment::{Environment, SharedEnvironment};
use crate::prelude::*;

/// Anything the interpreter can invoke with `callee(args)`.
pub trait Callable: Debug {
    fn name(&self) -> &str;

    fn arity(&self) -> usize;

    fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Function,
    Method,
    Initializer,
    Lambda,
}

/// One statement list suspended by `yield`: the statement that was running
/// and the scope it ran in.
#[derive(Debug, Clone)]
pub struct ResumeFrame {
    pub index: usize,
    pub environment: SharedEnvironment,
    /// Branch of the enclosing `if` that owns this list.
    pub branch: usize,
    /// Iterator of the enclosing `for` that owns this list.
    pub iterator: Option<Value>,
}

impl ResumeFrame {
    pub fn new(index: usize, environment: SharedEnvironment) -> Self {
        Self { index, environment, branch: 0, iterator: None }
    }
}

/// Where a yielded block picks up on its next call. Frames run from the
/// `yield` itself outwards to the function body.
#[derive(Debug, Clone)]
pub struct ResumePoint {
    pub trail: Vec<ResumeFrame>,
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub block: Rc<Block>,
    pub closure: SharedEnvironment,
    pub kind: FunctionKind,
    pub owner: Option<ClassHandle>,
    pub annotations: Vec<Value>,
    resume: RefCell<Option<ResumePoint>>,
}

impl Function {
    pub fn new(
        name: &str,
        block: Rc<Block>,
        closure: SharedEnvironment,
        kind: FunctionKind,
        owner: Option<ClassHandle>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            block,
            closure,
            kind,
            owner,
            annotations: vec![],
            resume: RefCell::new(None),
        }
    }

    pub fn with_annotations(self, annotations: Vec<Value>) -> Self {
        Self { annotations, ..self }
    }

    /// A copy of this function whose closure defines `self` as `receiver`.
    /// The copy starts with an empty resumption slot.
    pub fn bind(&self, receiver: Value) -> Rc<Function> {
        let env = Environment::new().with_enclosing(self.closure.clone()).as_shared();
        env.borrow_mut().define("self", receiver, false);

        Rc::new(Function {
            name: self.name.clone(),
            block: self.block.clone(),
            closure: env,
            kind: self.kind,
            owner: self.owner.clone(),
            annotations: self.annotations.clone(),
            resume: RefCell::new(None),
        })
    }

    /// The value `self` is bound to, if this function was bound.
    pub fn receiver(&self) -> Value {
        self.closure.borrow().get_here("self").unwrap_or(Value::Nil)
    }

    pub fn is_suspended(&self) -> bool {
        self.resume.borrow().is_some()
    }

    pub fn arity(&self) -> usize {
        self.block.arity()
    }

    pub fn call(
        self: &Rc<Self>,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if self.block.is_native {
            return interpreter.call_native(self, arguments);
        }

        let resume = self.resume.borrow_mut().take();
        let (environment, trail) = match resume.and_then(|point| {
            let body = point.trail.last()?.environment.clone();
            Some((body, point.trail))
        }) {
            Some(suspended) => suspended,
            None => {
                let env = Environment::new().with_enclosing(self.closure.clone()).as_shared();
                {
                    let mut env = env.borrow_mut();
                    for (param, arg) in self.block.params.iter().zip(arguments) {
                        env.define(&param.name.lexeme, arg, param.mutable);
                    }
                }
                (env, vec![])
            }
        };

        let exit = interpreter.invoke_block(self, environment, trail)?;

        match exit.flow {
            Flow::Yield(value) => {
                let trail = interpreter.take_suspended();
                *self.resume.borrow_mut() = Some(ResumePoint { trail });
                Ok(value)
            }
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Nil),
        }
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.block.is_native {
            write!(f, "<native def {}>", self.name)
        } else {
            write!(f, "<def {}>", self.name)
        }
    }
}
