mod expr;
mod itpr;
mod stmt;

pub use itpr::{BlockExit, Flow, Interpreter, InterpreterResult};
