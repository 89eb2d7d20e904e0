mod frame;
mod stack;

use std::{cell::RefCell, io::Write, rc::Rc};

use rustc_hash::FxHashMap;

use crate::{
    bytecode::{Bytecode, OpCode, OpCodeFromU8Error},
    object::{Closure, CompiledFunction, HashPair, Object, BUILTINS},
};

use self::{frame::Frame, stack::Stack};

pub use self::stack::STACK_SIZE;

pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Failed to read instruction")]
    UnknownOpcode(#[from] OpCodeFromU8Error),
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Frame overflow: more than {} nested calls", MAX_FRAMES)]
    FrameOverflow,
    #[error("Unsupported types for {op}: {left} {right}")]
    UnsupportedOperands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("Unsupported type for negation: {0}")]
    UnsupportedNegation(&'static str),
    #[error("Wrong number of arguments: want={expected}, got={got}")]
    WrongArgumentCount { expected: usize, got: usize },
    #[error("Calling non-function and non-built-in: {0}")]
    NotCallable(&'static str),
    #[error("Index operator not supported: {0}")]
    IndexNotSupported(&'static str),
    #[error("Unusable as hash key: {0}")]
    UnusableHashKey(&'static str),
    #[error("Not a function: {0}")]
    NotAFunction(&'static str),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Failed to write output")]
    Io(#[from] std::io::Error),
}

/// A fresh globals store for [`Vm::new_with_globals`].
pub fn new_globals() -> Vec<Object> {
    vec![Object::Null; GLOBALS_SIZE]
}

pub struct Vm {
    constants: Vec<Object>,
    stack: Stack,
    globals: Vec<Object>,
    frame: Frame,
    callers: Vec<Frame>,
    stdout: Rc<RefCell<dyn Write>>,
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        Self::new_with_globals(bytecode, new_globals())
    }

    /// Runs `bytecode` against globals left behind by an earlier run.
    pub fn new_with_globals(bytecode: Bytecode, mut globals: Vec<Object>) -> Self {
        if globals.len() < GLOBALS_SIZE {
            globals.resize(GLOBALS_SIZE, Object::Null);
        }
        let main = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        };
        let main = Closure {
            function: Rc::new(main),
            free: Vec::new(),
        };
        Self {
            constants: bytecode.constants,
            stack: Stack::new(),
            globals,
            frame: Frame::new(Rc::new(main), 0),
            callers: Vec::with_capacity(MAX_FRAMES),
            stdout: Rc::new(RefCell::new(std::io::stdout())),
        }
    }

    /// Redirects the output of `puts`.
    pub fn with_stdout(mut self, stdout: Rc<RefCell<dyn Write>>) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    /// The value most recently discarded from the stack, which after a completed
    /// run is the value of the last top-level expression.
    pub fn last_popped_stack_elem(&self) -> Object {
        self.stack.last_popped()
    }

    pub fn run(&mut self) -> Result<(), RuntimeError> {
        log::debug!(
            "running {} bytes of instructions with {} constants",
            self.frame.instructions().len(),
            self.constants.len()
        );

        while !self.frame.at_end() {
            #[cfg(feature = "trace")]
            self.trace();

            match self.frame.read_opcode()? {
                OpCode::Constant => {
                    let index = self.frame.read_u16();
                    self.stack.push(self.constants[index].clone())?;
                }
                OpCode::Pop => {
                    self.stack.pop();
                }
                op @ (OpCode::Add
                | OpCode::Subtract
                | OpCode::Multiply
                | OpCode::Divide
                | OpCode::Concat) => self.binary_operation(op)?,
                op @ (OpCode::Equal | OpCode::NotEqual | OpCode::GreaterThan) => {
                    self.comparison(op)?
                }
                OpCode::True => self.stack.push(Object::Boolean(true))?,
                OpCode::False => self.stack.push(Object::Boolean(false))?,
                OpCode::Null => self.stack.push(Object::Null)?,
                OpCode::Minus => match self.stack.pop() {
                    Object::Integer(n) => self.stack.push(Object::Integer(n.wrapping_neg()))?,
                    other => return Err(RuntimeError::UnsupportedNegation(other.type_name())),
                },
                OpCode::Bang => {
                    let value = self.stack.pop();
                    self.stack.push(Object::Boolean(!value.is_truthy()))?;
                }
                OpCode::JumpNotTruthy => {
                    let target = self.frame.read_u16();
                    if !self.stack.pop().is_truthy() {
                        self.frame.ip = target;
                    }
                }
                OpCode::Jump => {
                    self.frame.ip = self.frame.read_u16();
                }
                OpCode::GetGlobal => {
                    let index = self.frame.read_u16();
                    self.stack.push(self.globals[index].clone())?;
                }
                OpCode::SetGlobal => {
                    let index = self.frame.read_u16();
                    self.globals[index] = self.stack.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.frame.base_pointer + self.frame.read_u8();
                    self.stack.push(self.stack.get(slot).clone())?;
                }
                OpCode::SetLocal => {
                    let slot = self.frame.base_pointer + self.frame.read_u8();
                    let value = self.stack.pop();
                    self.stack.set(slot, value);
                }
                OpCode::GetBuiltin => {
                    let index = self.frame.read_u8();
                    self.stack.push(Object::Builtin(&BUILTINS[index]))?;
                }
                OpCode::GetFree => {
                    let index = self.frame.read_u8();
                    self.stack.push(self.frame.free(index))?;
                }
                OpCode::CurrentClosure => {
                    self.stack
                        .push(Object::Closure(Rc::clone(&self.frame.closure)))?;
                }
                OpCode::Array => {
                    let count = self.frame.read_u16();
                    let elements = self.stack.top(count).to_vec();
                    self.stack.set_sp(self.stack.sp() - count)?;
                    self.stack.push(Object::array(elements))?;
                }
                OpCode::Hash => {
                    let count = self.frame.read_u16();
                    let hash = build_hash(self.stack.top(count))?;
                    self.stack.set_sp(self.stack.sp() - count)?;
                    self.stack.push(hash)?;
                }
                OpCode::Index => {
                    let index = self.stack.pop();
                    let left = self.stack.pop();
                    self.stack.push(index_operation(&left, &index)?)?;
                }
                OpCode::Call => {
                    let argc = self.frame.read_u8();
                    self.call(argc)?;
                }
                OpCode::ReturnValue => {
                    let value = self.stack.pop();
                    if !self.return_from_frame(value)? {
                        break;
                    }
                }
                OpCode::Return => {
                    if !self.return_from_frame(Object::Null)? {
                        break;
                    }
                }
                OpCode::Closure => {
                    let index = self.frame.read_u16();
                    let free_count = self.frame.read_u8();
                    self.push_closure(index, free_count)?;
                }
                OpCode::Sentinel => unreachable!("Sentinel is never decoded from bytecode"),
            }
        }

        log::debug!("finished run, {} values left on the stack", self.stack.sp());
        Ok(())
    }

    #[cfg(feature = "trace")]
    fn trace(&self) {
        let mut line = String::new();
        let _ = self
            .frame
            .closure
            .function
            .instructions
            .disassemble_instruction(&mut line, self.frame.ip);
        log::trace!("{}", self.stack);
        log::trace!("{}", line.trim_end());
    }

    fn binary_operation(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let right = self.stack.pop();
        let left = self.stack.pop();
        let result = match (op, &left, &right) {
            (OpCode::Add, Object::Integer(a), Object::Integer(b)) => {
                Object::Integer(a.wrapping_add(*b))
            }
            (OpCode::Subtract, Object::Integer(a), Object::Integer(b)) => {
                Object::Integer(a.wrapping_sub(*b))
            }
            (OpCode::Multiply, Object::Integer(a), Object::Integer(b)) => {
                Object::Integer(a.wrapping_mul(*b))
            }
            (OpCode::Divide, Object::Integer(_), Object::Integer(0)) => {
                return Err(RuntimeError::DivisionByZero)
            }
            (OpCode::Divide, Object::Integer(a), Object::Integer(b)) => {
                Object::Integer(a.wrapping_div(*b))
            }
            (OpCode::Add | OpCode::Concat, Object::String(a), Object::String(b)) => {
                Object::string(format!("{a}{b}"))
            }
            _ => {
                return Err(RuntimeError::UnsupportedOperands {
                    op: op.name(),
                    left: left.type_name(),
                    right: right.type_name(),
                })
            }
        };
        self.stack.push(result)
    }

    fn comparison(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let right = self.stack.pop();
        let left = self.stack.pop();
        let result = match (op, &left, &right) {
            (OpCode::Equal, _, _) => left.equals(&right),
            (OpCode::NotEqual, _, _) => !left.equals(&right),
            (OpCode::GreaterThan, Object::Integer(a), Object::Integer(b)) => a > b,
            _ => {
                return Err(RuntimeError::UnsupportedOperands {
                    op: op.name(),
                    left: left.type_name(),
                    right: right.type_name(),
                })
            }
        };
        self.stack.push(Object::Boolean(result))
    }

    fn call(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee_slot = self.stack.sp() - 1 - argc;
        match self.stack.get(callee_slot).clone() {
            Object::Closure(closure) => {
                let function = &closure.function;
                if function.num_parameters != argc {
                    return Err(RuntimeError::WrongArgumentCount {
                        expected: function.num_parameters,
                        got: argc,
                    });
                }
                if self.callers.len() + 1 >= MAX_FRAMES {
                    return Err(RuntimeError::FrameOverflow);
                }

                let base_pointer = self.stack.sp() - argc;
                self.stack.set_sp(base_pointer + function.num_locals)?;
                for slot in base_pointer + argc..base_pointer + function.num_locals {
                    self.stack.set(slot, Object::Null);
                }
                let frame = Frame::new(closure, base_pointer);
                let caller = std::mem::replace(&mut self.frame, frame);
                self.callers.push(caller);
                Ok(())
            }
            Object::Builtin(builtin) => {
                let result = {
                    let mut stdout = self.stdout.borrow_mut();
                    (builtin.function)(&mut *stdout, self.stack.top(argc))?
                };
                self.stack.set_sp(callee_slot)?;
                self.stack.push(result)
            }
            other => Err(RuntimeError::NotCallable(other.type_name())),
        }
    }

    /// Pops the current frame and pushes `value` for the caller.
    ///
    /// Returns `false` when the main program itself returned, which ends the run
    /// with `value` as the last popped element.
    fn return_from_frame(&mut self, value: Object) -> Result<bool, RuntimeError> {
        let Some(caller) = self.callers.pop() else {
            self.stack.push(value)?;
            self.stack.pop();
            return Ok(false);
        };
        let frame = std::mem::replace(&mut self.frame, caller);
        self.stack.set_sp(frame.base_pointer - 1)?;
        self.stack.push(value)?;
        Ok(true)
    }

    fn push_closure(&mut self, index: usize, free_count: usize) -> Result<(), RuntimeError> {
        let Object::CompiledFunction(function) = &self.constants[index] else {
            return Err(RuntimeError::NotAFunction(self.constants[index].type_name()));
        };
        let closure = Closure {
            function: Rc::clone(function),
            free: self.stack.top(free_count).to_vec(),
        };
        self.stack.set_sp(self.stack.sp() - free_count)?;
        self.stack.push(Object::Closure(Rc::new(closure)))
    }
}

fn build_hash(elements: &[Object]) -> Result<Object, RuntimeError> {
    let mut pairs = FxHashMap::default();
    for pair in elements.chunks(2) {
        let (key, value) = (&pair[0], &pair[1]);
        let hash_key = key
            .hash_key()
            .ok_or(RuntimeError::UnusableHashKey(key.type_name()))?;
        pairs.insert(
            hash_key,
            HashPair {
                key: key.clone(),
                value: value.clone(),
            },
        );
    }
    Ok(Object::Hash(Rc::new(pairs)))
}

fn index_operation(left: &Object, index: &Object) -> Result<Object, RuntimeError> {
    match (left, index) {
        (Object::Array(elements), Object::Integer(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| elements.get(i))
            .cloned()
            .unwrap_or(Object::Null)),
        (Object::Hash(pairs), key) => {
            let hash_key = key
                .hash_key()
                .ok_or(RuntimeError::UnusableHashKey(key.type_name()))?;
            Ok(pairs
                .get(&hash_key)
                .map(|pair| pair.value.clone())
                .unwrap_or(Object::Null))
        }
        _ => Err(RuntimeError::IndexNotSupported(left.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compiler, parser, tokenizer::tokens};

    fn run(source: &str) -> Result<Object, RuntimeError> {
        let program = parser::program(&tokens(source).unwrap()).unwrap();
        let bytecode = compiler::compile(&program).unwrap();
        let mut vm = Vm::new(bytecode);
        vm.run()?;
        Ok(vm.last_popped_stack_elem())
    }

    fn assert_runs(source: &str, expected: &str) {
        match run(source) {
            Ok(result) => assert_eq!(result.to_string(), expected, "source: {source}"),
            Err(e) => panic!("{source} failed: {e}"),
        }
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_runs("1", "1");
        assert_runs("1 + 2", "3");
        assert_runs("50 / 2 * 2 + 10 - 5", "55");
        assert_runs("5 * (2 + 10)", "60");
        assert_runs("-50 + 100 + -50", "0");
        assert_runs("(5 + 10 * 2 + 15 / 3) * 2 + -10", "50");
        assert_runs("9223372036854775807 + 1", "-9223372036854775808");
    }

    #[test]
    fn test_boolean_expressions() {
        assert_runs("true", "true");
        assert_runs("1 < 2", "true");
        assert_runs("1 > 2", "false");
        assert_runs("1 == 1", "true");
        assert_runs("1 != 1", "false");
        assert_runs("(1 < 2) == true", "true");
        assert_runs("!5", "false");
        assert_runs("!!5", "true");
        assert_runs("!(if (false) { 5; })", "true");
        assert_runs(r#""a" == "a""#, "true");
        assert_runs("[1] == [1]", "false");
    }

    #[test]
    fn test_conditionals() {
        assert_runs("if (true) { 10 }", "10");
        assert_runs("if (true) { 10 } else { 20 }", "10");
        assert_runs("if (false) { 10 } else { 20 }", "20");
        assert_runs("if (1 > 2) { 10 }", "null");
        assert_runs("if ((if (false) { 10 })) { 10 } else { 20 }", "20");
        assert_runs("if (true) { 10 } else { 20 }; 3333;", "3333");
        assert_runs("if (false) { 10 }; 3333;", "3333");
        assert_runs("if (true) { let a = 1; }", "null");
    }

    #[test]
    fn test_global_let_statements() {
        assert_runs("let one = 1; one", "1");
        assert_runs("let one = 1; let two = one + one; one + two", "3");
        assert_runs("let a = 1; let a = a + 1; a", "2");
    }

    #[test]
    fn test_strings_arrays_and_hashes() {
        assert_runs(r#""mon" + "key""#, "monkey");
        assert_runs(r#"let a = "mon"; a + "key" + "banana""#, "monkeybanana");
        assert_runs("[1 + 2, 3 * 4]", "[3, 12]");
        assert_runs("{1: 2, 2: 3}[2]", "3");
        assert_runs("[1, 2, 3][1]", "2");
        assert_runs("[1, 2, 3][3]", "null");
        assert_runs("[1, 2, 3][-1]", "null");
        assert_runs("{1: 1}[0]", "null");
        assert_runs("{}[0]", "null");
    }

    #[test]
    fn test_calling_functions() {
        assert_runs("let f = fn() { 5 + 10 }; f()", "15");
        assert_runs("let f = fn() { return 99; 100; }; f()", "99");
        assert_runs("let f = fn() { }; f()", "null");
        assert_runs("let sum = fn(a, b) { let c = a + b; c }; sum(1, 2)", "3");
        assert_runs(
            "let one = fn() { let one = 1; one }; let two = fn() { let two = 2; two }; one() + two()",
            "3",
        );
        assert_runs(
            "let global = 50; let minus = fn() { let num = 1; global - num }; minus()",
            "49",
        );
        assert_runs(
            "let returnsOne = fn() { 1 }; let returnsOneReturner = fn() { returnsOne }; returnsOneReturner()()",
            "1",
        );
    }

    #[test]
    fn test_builtins() {
        assert_runs(r#"len("four")"#, "4");
        assert_runs("len([1, 2, 3])", "3");
        assert_runs("len(1)", "ERROR: argument to 'len' not supported, got INTEGER");
        assert_runs("first([1, 2])", "1");
        assert_runs("last([1, 2])", "2");
        assert_runs("rest([1, 2, 3])", "[2, 3]");
        assert_runs("rest([])", "null");
        assert_runs("push([], 1)", "[1]");
        assert_runs(
            "first(1)",
            "ERROR: argument to 'first' must be ARRAY, got INTEGER",
        );
    }

    #[test]
    fn test_puts_writes_to_configured_output() {
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let program = parser::program(&tokens(r#"puts("hello", 1); 7"#).unwrap()).unwrap();
        let bytecode = compiler::compile(&program).unwrap();
        let mut vm = Vm::new(bytecode).with_stdout(output.clone());
        vm.run().unwrap();

        assert!(matches!(vm.last_popped_stack_elem(), Object::Integer(7)));
        assert_eq!(String::from_utf8(output.borrow().clone()).unwrap(), "hello\n1\n");
    }

    #[test]
    fn test_closures() {
        assert_runs(
            "let newAdder = fn(x) { fn(y) { x + y } }; let addTwo = newAdder(2); addTwo(3);",
            "5",
        );
        assert_runs(
            "let newAdder = fn(x) { fn(y) { x + y } }; let a = newAdder(1); let b = newAdder(10); a(1) + b(1)",
            "13",
        );
        assert_runs(
            "let f = fn(a) { fn(b) { fn(c) { a + b + c } } }; f(1)(2)(3)",
            "6",
        );
    }

    #[test]
    fn test_recursion() {
        assert_runs(
            "let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; countDown(10);",
            "0",
        );
        assert_runs(
            "let wrapper = fn() { let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; countDown(1); }; wrapper();",
            "0",
        );
        assert_runs(
            "let fibonacci = fn(x) { if (x < 2) { x } else { fibonacci(x - 1) + fibonacci(x - 2) } }; fibonacci(15);",
            "610",
        );
    }

    #[test]
    fn test_top_level_return_halts() {
        assert_runs("1; return 2; 3;", "2");
    }

    #[test]
    fn test_runtime_errors() {
        assert!(matches!(
            run("let f = fn(a) { a }; f(1, 2)"),
            Err(RuntimeError::WrongArgumentCount {
                expected: 1,
                got: 2
            })
        ));
        assert!(matches!(
            run("let a = 1; a()"),
            Err(RuntimeError::NotCallable("INTEGER"))
        ));
        assert!(matches!(
            run("let a = 1; let b = 0; a / b"),
            Err(RuntimeError::DivisionByZero)
        ));
        assert!(matches!(
            run(r#"let a = "x"; a - 1"#),
            Err(RuntimeError::UnsupportedOperands { .. })
        ));
        assert!(matches!(
            run("let f = fn() { 1 }; {f: 1}"),
            Err(RuntimeError::UnusableHashKey("CLOSURE"))
        ));
        assert!(matches!(
            run("let a = 1; a[0]"),
            Err(RuntimeError::IndexNotSupported("INTEGER"))
        ));
    }

    fn run_to_error(source: &str) -> (RuntimeError, Object) {
        let program = parser::program(&tokens(source).unwrap()).unwrap();
        let mut vm = Vm::new(compiler::compile(&program).unwrap());
        let error = vm.run().expect_err("program should fail");
        (error, vm.last_popped_stack_elem())
    }

    #[test]
    fn test_stack_overflow_from_wide_recursion() {
        let (error, last) = run_to_error("let f = fn(a, b, c) { f(a, b, c) }; f(1, 2, 3)");
        assert!(matches!(error, RuntimeError::StackOverflow));
        assert!(matches!(last, Object::Null));
    }

    #[test]
    fn test_frame_overflow_from_deep_recursion() {
        let (error, _) = run_to_error("let f = fn() { f() }; f()");
        assert!(matches!(error, RuntimeError::FrameOverflow));
    }

    #[test]
    fn test_locals_start_as_null() {
        assert_runs(
            "let g = fn() { let a = 5; a }; let f = fn() { let b = b; b }; g(); f()",
            "null",
        );
    }

    #[test]
    fn test_globals_survive_between_runs() {
        let mut compiler = compiler::Compiler::new();
        let first = tokens("let a = 40;").unwrap();
        compiler.compile(&parser::program(&first).unwrap()).unwrap();
        let mut vm = Vm::new(compiler.bytecode());
        vm.run().unwrap();
        let globals = vm.into_globals();

        let (symbol_table, constants) = compiler.into_state();
        let mut compiler = compiler::Compiler::new_with_state(symbol_table, constants);
        let second = tokens("a + 2").unwrap();
        compiler.compile(&parser::program(&second).unwrap()).unwrap();
        let mut vm = Vm::new_with_globals(compiler.bytecode(), globals);
        vm.run().unwrap();

        assert!(matches!(vm.last_popped_stack_elem(), Object::Integer(42)));
    }
}
