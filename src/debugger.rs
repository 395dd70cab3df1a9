use std::collections::{HashSet, VecDeque};
use std::io::{BufRead, Write};
use std::rc::Rc;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::environment::SharedEnvironment;
use crate::prelude::*;

/// Both frame stacks keep this many entries, dropping the oldest.
pub const FRAME_CAPACITY: usize = 20;

const HELP: &str = "\
c          call stack
l          line stack
i <index>  inspect environment of a stack entry
e <expr>   evaluate expression in the focused frame
w <name>   add watch
n          step into
v          step over
a          add breakpoint here
r          remove breakpoint here
x          toggle catching all exceptions
o          toggle debugging
h          help
g          global environment
anything else resumes";

/// One statement as seen by the debugger.
#[derive(Debug, Clone)]
pub struct Frame {
    pub environment: SharedEnvironment,
    /// Environment watches are read from.
    pub source: SharedEnvironment,
    pub stmt: Rc<Stmt>,
    pub before: Option<Rc<Stmt>>,
    pub after: Option<Rc<Stmt>>,
}

impl Frame {
    /// The statement at `index` together with its neighbours.
    pub fn line(environment: SharedEnvironment, statements: &[Rc<Stmt>], index: usize) -> Self {
        Self {
            source: environment.clone(),
            environment,
            stmt: statements[index].clone(),
            before: index.checked_sub(1).and_then(|i| statements.get(i)).cloned(),
            after: statements.get(index + 1).cloned(),
        }
    }

    /// A block invocation entered from `stmt`, running in `environment`.
    pub fn call(environment: SharedEnvironment, source: SharedEnvironment, stmt: Rc<Stmt>) -> Self {
        Self { environment, source, stmt, before: None, after: None }
    }

    pub fn location(&self) -> (Rc<str>, u32) {
        let token = self.stmt.token();
        (token.file.clone(), token.line)
    }

    pub fn describe(&self) -> String {
        let (file, line) = self.location();
        format!("[\"{file}\" line {line}] {}", Printer::statement_head(&self.stmt))
    }
}

/// Fixed-capacity stack overwriting its oldest entry when full.
#[derive(Debug)]
pub struct FrameStack {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl Default for FrameStack {
    fn default() -> Self {
        Self::new(FRAME_CAPACITY)
    }
}

impl FrameStack {
    pub fn new(capacity: usize) -> Self {
        Self { frames: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Entry `index` counted from the most recent one.
    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.iter().rev().nth(index)
    }

    /// Most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev()
    }
}

/// Source of debugger command lines. `None` means no more input.
pub trait DebuggerInput {
    fn read_line(&mut self) -> Option<String>;
}

/// Reads commands from standard input.
pub struct ConsoleInput;

impl DebuggerInput for ConsoleInput {
    fn read_line(&mut self) -> Option<String> {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }
}

/// Receives commands sent through a `DebuggerHandle`.
pub struct ChannelInput {
    receiver: Receiver<String>,
}

impl DebuggerInput for ChannelInput {
    fn read_line(&mut self) -> Option<String> {
        self.receiver.recv().ok()
    }
}

/// Sending side of a debugger channel, usable from another thread.
#[derive(Clone)]
pub struct DebuggerHandle {
    sender: Sender<String>,
}

impl DebuggerHandle {
    /// Delivers a command only while the debugger waits for input. Returns
    /// whether it was taken; otherwise it is dropped.
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.sender.try_send(line.into()).is_ok()
    }
}

/// A rendezvous channel feeding a debugger.
pub fn channel() -> (ChannelInput, DebuggerHandle) {
    let (sender, receiver) = bounded(0);
    (ChannelInput { receiver }, DebuggerHandle { sender })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    None,
    StepInto,
    StepOver,
    /// Stepping over, currently inside a deeper call.
    StepOverSuspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerState {
    Output,
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Line,
    Call,
}

pub struct Debugger {
    input: Box<dyn DebuggerInput>,
    output: Box<dyn Write>,
    line_stack: FrameStack,
    call_stack: FrameStack,
    breakpoints: HashSet<(Rc<str>, u32)>,
    /// Authored `BP` markers switched off for this session.
    ignored: HashSet<(Rc<str>, u32)>,
    watches: Vec<String>,
    mode: StepMode,
    nested: usize,
    catch_all: bool,
    enabled: bool,
    state: DebuggerState,
    focus: Focus,
    focus_index: usize,
    stops: Vec<u32>,
}

impl Debugger {
    pub fn new(input: Box<dyn DebuggerInput>) -> Self {
        Self {
            input,
            output: Box::new(std::io::stdout()),
            line_stack: FrameStack::default(),
            call_stack: FrameStack::default(),
            breakpoints: HashSet::new(),
            ignored: HashSet::new(),
            watches: vec![],
            mode: StepMode::None,
            nested: 0,
            catch_all: false,
            enabled: true,
            state: DebuggerState::Output,
            focus: Focus::Line,
            focus_index: 0,
            stops: vec![],
        }
    }

    pub fn with_output(self, output: Box<dyn Write>) -> Self {
        Self { output, ..self }
    }

    pub fn with_catch_all(self, catch_all: bool) -> Self {
        Self { catch_all, ..self }
    }

    pub fn add_breakpoint(&mut self, file: &str, line: u32) {
        self.breakpoints.insert((Rc::from(file), line));
    }

    pub fn mode(&self) -> StepMode {
        self.mode
    }

    pub fn state(&self) -> DebuggerState {
        self.state
    }

    pub fn line_stack(&self) -> &FrameStack {
        &self.line_stack
    }

    pub fn call_stack(&self) -> &FrameStack {
        &self.call_stack
    }

    /// Lines of every statement the debugger stopped at, in order.
    pub fn stops(&self) -> &[u32] {
        &self.stops
    }

    pub fn enter_call(&mut self, frame: Frame) {
        self.call_stack.push(frame);
        match self.mode {
            StepMode::StepOver => {
                self.mode = StepMode::StepOverSuspended;
                self.nested = 1;
            }
            StepMode::StepOverSuspended => self.nested += 1,
            _ => {}
        }
    }

    pub fn exit_call(&mut self) {
        self.call_stack.pop();
        if self.mode == StepMode::StepOverSuspended {
            self.nested = self.nested.saturating_sub(1);
            if self.nested == 0 {
                self.mode = StepMode::StepOver;
            }
        }
    }

    /// Called before every statement runs.
    pub fn on_statement(&mut self, interpreter: &mut Interpreter, frame: Frame) {
        self.line_stack.push(frame.clone());
        if !self.enabled {
            return;
        }

        let location = frame.location();
        let authored = frame.stmt.token().has_breakpoint && !self.ignored.contains(&location);
        let stepping = matches!(self.mode, StepMode::StepInto | StepMode::StepOver);

        if authored || stepping || self.breakpoints.contains(&location) {
            self.mode = StepMode::None;
            self.write(&format!("Breakpoint at {}", frame.describe()));
            self.stop(interpreter, &frame);
        }
    }

    /// Called when a statement fails with a language-level exception.
    pub fn on_exception(&mut self, interpreter: &mut Interpreter, error: &RuntimeError, fatal: bool, frame: Frame) {
        if !self.enabled || !(self.catch_all || fatal) {
            return;
        }

        self.write(&format!("Exception at {}: {error}", frame.describe()));
        self.stop(interpreter, &frame);
    }

    fn stop(&mut self, interpreter: &mut Interpreter, frame: &Frame) {
        self.stops.push(frame.location().1);
        tracing::debug!("debugger stopped at {}", frame.describe());

        if let Some(before) = &frame.before {
            self.write(&format!("    {}", Printer::statement_head(before)));
        }
        self.write(&format!("--> {}", Printer::statement_head(&frame.stmt)));
        if let Some(after) = &frame.after {
            self.write(&format!("    {}", Printer::statement_head(after)));
        }
        self.print_watches(frame);

        self.focus = Focus::Line;
        self.focus_index = 0;

        loop {
            self.state = DebuggerState::Input;
            let line = self.input.read_line();
            self.state = DebuggerState::Output;

            let line = match line {
                Some(line) => line,
                None => break,
            };
            if !self.process(interpreter, frame, line.trim()) {
                break;
            }
        }
    }

    /// Handles one command. Returns false when execution should resume.
    fn process(&mut self, interpreter: &mut Interpreter, frame: &Frame, line: &str) -> bool {
        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, argument.trim()),
            None => (line, ""),
        };

        match command {
            "c" => {
                self.focus = Focus::Call;
                let lines = Self::listing(&self.call_stack);
                self.write(&lines);
            }
            "l" => {
                self.focus = Focus::Line;
                let lines = Self::listing(&self.line_stack);
                self.write(&lines);
            }
            "i" => match argument.parse::<usize>() {
                Ok(index) => {
                    self.focus_index = index;
                    match self.focused(frame) {
                        Some(focused) => {
                            let bindings = Self::bindings(&focused.environment);
                            self.write(&bindings);
                        }
                        None => self.write(&format!("No stack entry {index}.")),
                    }
                }
                Err(_) => self.write("Usage: i <index>"),
            },
            "e" => {
                let environment = self.focused(frame).unwrap_or_else(|| frame.clone()).environment;
                let text = match interpreter.evaluate_in(environment, argument) {
                    Ok(value) => value.to_string(),
                    Err(message) => message,
                };
                self.write(&text);
            }
            "w" => {
                if !argument.is_empty() {
                    self.watches.push(argument.to_owned());
                }
                self.print_watches(frame);
            }
            "n" => {
                self.mode = StepMode::StepInto;
                return false;
            }
            "v" => {
                self.mode = StepMode::StepOver;
                self.nested = 0;
                return false;
            }
            "a" => {
                let location = frame.location();
                self.ignored.remove(&location);
                self.write(&format!("Added breakpoint at line {}.", location.1));
                self.breakpoints.insert(location);
            }
            "r" => {
                let location = frame.location();
                self.breakpoints.remove(&location);
                if frame.stmt.token().has_breakpoint {
                    self.ignored.insert(location.clone());
                }
                self.write(&format!("Removed breakpoint at line {}.", location.1));
            }
            "x" => {
                self.catch_all = !self.catch_all;
                self.write(&format!("Catch all exceptions: {}", self.catch_all));
            }
            "o" => {
                self.enabled = !self.enabled;
                tracing::info!("debugging enabled: {}", self.enabled);
                self.write(&format!("Debugging: {}", self.enabled));
                return self.enabled;
            }
            "h" => self.write(HELP),
            "g" => {
                let bindings = Self::bindings(&interpreter.globals);
                self.write(&bindings);
            }
            _ => return false,
        }
        true
    }

    fn focused(&self, frame: &Frame) -> Option<Frame> {
        let stack = match self.focus {
            Focus::Line => &self.line_stack,
            Focus::Call => &self.call_stack,
        };
        match self.focus_index {
            0 if stack.is_empty() => Some(frame.clone()),
            index => stack.get(index).cloned(),
        }
    }

    fn listing(stack: &FrameStack) -> String {
        stack.iter().enumerate().map(|(i, f)| format!("{i}: {}", f.describe())).collect::<Vec<_>>().join("\n")
    }

    fn bindings(environment: &SharedEnvironment) -> String {
        let environment = environment.borrow();
        environment
            .bindings()
            .map(|(name, binding)| {
                let marker = if binding.mutable { "$" } else { "" };
                format!("{marker}{name} = {}", binding.value)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn print_watches(&mut self, frame: &Frame) {
        let lines = self
            .watches
            .iter()
            .map(|name| match frame.source.borrow().get(name) {
                Ok(value) => format!("{name} = {value}"),
                Err(_) => format!("{name} is undefined"),
            })
            .collect::<Vec<_>>();

        for line in lines {
            self.write(&line);
        }
    }

    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Err(e) = writeln!(self.output, "{text}") {
            tracing::warn!("debugger output failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SharedBuffer;

    /// Replays prepared commands, then resumes for good.
    struct Script(VecDeque<String>);

    impl DebuggerInput for Script {
        fn read_line(&mut self) -> Option<String> {
            self.0.pop_front()
        }
    }

    fn scripted(commands: &[&str]) -> (Debugger, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let script = Script(commands.iter().map(|c| c.to_string()).collect());
        (Debugger::new(Box::new(script)).with_output(Box::new(buffer.clone())), buffer)
    }

    fn run(source: &str, debugger: Debugger) -> (Interpreter, String) {
        let out = SharedBuffer::default();
        let mut interpreter = Interpreter::new().with_output(Box::new(out.clone())).with_debugger(debugger);
        let tokens = Scanner::new(source, "debug.simi").scan_tokens();
        let statements = Parser::new(tokens).parse().unwrap();
        Resolver::new(&mut interpreter).resolve(&statements).unwrap();
        let _ = interpreter.interpret(&statements);
        (interpreter, out.contents())
    }

    fn frame(line: u32) -> Frame {
        let token = Token::new(TokenType::Pass, "pass", None, line);
        let stmt = Rc::new(Stmt::Pass { keyword: token });
        let env = Environment::new().as_shared();
        Frame::call(env.clone(), env, stmt)
    }

    #[test]
    fn frame_stacks_drop_the_oldest_entry() {
        let mut stack = FrameStack::default();
        for line in 1..=25 {
            stack.push(frame(line));
        }

        assert_eq!(stack.len(), FRAME_CAPACITY);
        assert_eq!(stack.get(0).map(|f| f.location().1), Some(25));
        assert_eq!(stack.get(FRAME_CAPACITY - 1).map(|f| f.location().1), Some(6));
    }

    #[test]
    fn loop_breakpoint_hits_once_per_iteration() {
        let source = "
$i = 0
while i < 3:
    i = i + 1 # BP
end
print i
";
        let (debugger, _) = scripted(&[]);
        let (interpreter, out) = run(source, debugger);

        assert_eq!(out, "3\n");
        assert_eq!(interpreter.debugger().unwrap().stops(), &[4, 4, 4]);
    }

    #[test]
    fn removing_an_authored_breakpoint_ignores_it() {
        let source = "
$i = 0
while i < 3:
    i = i + 1 # BP
end
";
        let (debugger, _) = scripted(&["r", "go"]);
        let (interpreter, _) = run(source, debugger);

        assert_eq!(interpreter.debugger().unwrap().stops(), &[4]);
    }

    #[test]
    fn step_over_skips_nested_calls() {
        let source = "
def f():
    a = 1
    b = 2
end
f() # BP
x = 1
y = 2
";
        let (debugger, _) = scripted(&["v", "go"]);
        let (interpreter, _) = run(source, debugger);
        assert_eq!(interpreter.debugger().unwrap().stops(), &[6, 7]);

        let (debugger, _) = scripted(&["n", "n", "go"]);
        let (interpreter, _) = run(source, debugger);
        assert_eq!(interpreter.debugger().unwrap().stops(), &[6, 3, 4]);
    }

    #[test]
    fn call_stack_stays_bounded() {
        let source = "
def down(n):
    if n == 0: return 0
    return down(n - 1)
end
print down(30)
";
        let (debugger, _) = scripted(&[]);
        let (interpreter, out) = run(source, debugger);

        assert_eq!(out, "0\n");
        let debugger = interpreter.debugger().unwrap();
        assert!(debugger.call_stack().is_empty());
        assert_eq!(debugger.line_stack().len(), FRAME_CAPACITY);
    }

    #[test]
    fn evaluates_and_watches_in_the_stopped_frame() {
        let source = "
def f(x):
    y = x * 2 # BP
    return y
end
f(21)
";
        let (debugger, output) = scripted(&["e x + 1", "w x", "go"]);
        run(source, debugger);

        let text = output.contents();
        assert!(text.contains("Breakpoint at [\"debug.simi\" line 3] y = x * 2"), "{text}");
        assert!(text.contains("\n22\n"), "{text}");
        assert!(text.contains("x = 21"), "{text}");
    }

    #[test]
    fn fatal_exceptions_stop_the_debugger() {
        let (debugger, output) = scripted(&[]);
        run("x = 1\ny = x / 0\n", debugger);
        assert!(output.contents().contains("Exception at [\"debug.simi\" line 2]"));

        let (debugger, output) = scripted(&[]);
        run("if true:\n    y = 1 / 0\n    rescue e: pass\nend\n", debugger);
        assert!(!output.contents().contains("Exception at"));

        let (debugger, output) = scripted(&[]);
        run("if true:\n    y = 1 / 0\n    rescue e: pass\nend\n", debugger.with_catch_all(true));
        assert!(output.contents().contains("Exception at"));
    }

    #[test]
    fn handle_drops_commands_nobody_waits_for() {
        let (input, handle) = channel();
        assert!(!handle.send("c"));

        let waiter = std::thread::spawn(move || {
            let mut input = input;
            input.read_line()
        });
        while !handle.send("n") {
            std::thread::yield_now();
        }
        assert_eq!(waiter.join().unwrap(), Some("n".to_owned()));
    }
}
