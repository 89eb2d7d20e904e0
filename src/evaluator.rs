pub mod environment;
pub mod macro_expansion;
mod quote;

use std::{cell::RefCell, fmt::Debug, rc::Rc};

use rustc_hash::FxHashMap;

use crate::{
    ast::{Block, Expression, InfixOperator, PrefixOperator, Program, Statement},
    object::{builtins, Function, HashPair, Object},
};

use self::environment::Environment;

pub use self::macro_expansion::{define_macros, expand_macros};

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("identifier not found: {0}")]
    UnknownIdentifier(String),
    #[error("type mismatch: {left} {op} {right}")]
    TypeMismatch {
        left: &'static str,
        op: InfixOperator,
        right: &'static str,
    },
    #[error("unknown operator: {left} {op} {right}")]
    UnknownInfixOperator {
        left: &'static str,
        op: InfixOperator,
        right: &'static str,
    },
    #[error("unknown operator: {op}{operand}")]
    UnknownPrefixOperator {
        op: PrefixOperator,
        operand: &'static str,
    },
    #[error("wrong number of arguments: want={expected}, got={got}")]
    WrongArgumentCount { expected: usize, got: usize },
    #[error("not a function: {0}")]
    NotAFunction(&'static str),
    #[error("unusable as hash key: {0}")]
    UnusableHashKey(&'static str),
    #[error("index operator not supported: {0}")]
    IndexNotSupported(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot unquote {0} into a syntax tree")]
    UnquoteUnsupported(&'static str),
    #[error("macro must return a quote, got {0}")]
    MacroResultNotQuote(&'static str),
    #[error("macro literal outside of a top-level let: {0}")]
    UnexpandedMacro(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why evaluation stopped early: a `return` unwinding to the enclosing function,
/// or an error unwinding all the way out.
enum Interrupt {
    Return(Object),
    Error(EvalError),
}

impl From<EvalError> for Interrupt {
    fn from(e: EvalError) -> Self {
        Interrupt::Error(e)
    }
}

impl From<std::io::Error> for Interrupt {
    fn from(e: std::io::Error) -> Self {
        Interrupt::Error(e.into())
    }
}

fn catch_return(result: Result<Object, Interrupt>) -> Result<Object, EvalError> {
    match result {
        Ok(value) | Err(Interrupt::Return(value)) => Ok(value),
        Err(Interrupt::Error(e)) => Err(e),
    }
}

pub struct Interpreter {
    environment: Rc<RefCell<Environment>>,
    stdout: Rc<RefCell<dyn std::io::Write>>,
}

impl Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("environment", &self.environment)
            .finish()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Rc::new(RefCell::new(std::io::stdout())))
    }
}

impl Interpreter {
    pub fn new(stdout: Rc<RefCell<dyn std::io::Write>>) -> Self {
        Self::with_environment(Environment::boxed(), stdout)
    }

    pub fn with_environment(
        environment: Rc<RefCell<Environment>>,
        stdout: Rc<RefCell<dyn std::io::Write>>,
    ) -> Self {
        Self {
            environment,
            stdout,
        }
    }

    /// The top-level environment, which also holds macro definitions.
    pub fn environment(&self) -> Rc<RefCell<Environment>> {
        Rc::clone(&self.environment)
    }

    /// Where `puts` writes.
    pub fn stdout(&self) -> Rc<RefCell<dyn std::io::Write>> {
        Rc::clone(&self.stdout)
    }

    /// Evaluates `program`, returning the value of its last statement or of the
    /// first top-level `return`.
    pub fn interpret(&mut self, program: &Program) -> Result<Object, EvalError> {
        catch_return(self.execute_statements(&program.0))
    }

    /// Evaluates a function or macro body in `environment`.
    pub(crate) fn call_body(
        &mut self,
        body: &Block,
        environment: Rc<RefCell<Environment>>,
    ) -> Result<Object, EvalError> {
        catch_return(self.execute_in_scope(environment, |interpreter| {
            interpreter.execute_statements(&body.0)
        }))
    }

    fn execute_statements(&mut self, statements: &[Statement]) -> Result<Object, Interrupt> {
        let mut result = Object::Null;
        for statement in statements {
            result = self.execute(statement)?;
        }
        Ok(result)
    }

    fn execute(&mut self, statement: &Statement) -> Result<Object, Interrupt> {
        match statement {
            Statement::Expression(expression) => self.evaluate(expression),
            Statement::Let(name, value) => {
                let value = self.evaluate(value)?;
                self.environment.borrow_mut().set(name.as_str(), value);
                Ok(Object::Null)
            }
            Statement::Return(value) => Err(Interrupt::Return(self.evaluate(value)?)),
        }
    }

    fn execute_in_scope<T>(
        &mut self,
        environment: Rc<RefCell<Environment>>,
        f: impl FnOnce(&mut Self) -> Result<T, Interrupt>,
    ) -> Result<T, Interrupt> {
        let prev = std::mem::replace(&mut self.environment, environment);
        let result = f(self);
        self.environment = prev;
        result
    }

    fn evaluate(&mut self, expression: &Expression) -> Result<Object, Interrupt> {
        match expression {
            Expression::Identifier(name) => {
                if let Some(value) = self.environment.borrow().get(name) {
                    return Ok(value);
                }
                let builtin = builtins::lookup(name)
                    .ok_or_else(|| EvalError::UnknownIdentifier(name.clone()))?;
                Ok(Object::Builtin(builtin))
            }
            Expression::Integer(n) => Ok(Object::Integer(*n)),
            Expression::String(s) => Ok(Object::string(s.as_str())),
            Expression::Boolean(b) => Ok(Object::Boolean(*b)),
            Expression::Prefix(op, right) => {
                let right = self.evaluate(right)?;
                Ok(prefix_operation(*op, right)?)
            }
            Expression::Infix(left, op, right) => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                Ok(infix_operation(left, *op, right)?)
            }
            Expression::If(condition, consequence, alternative) => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute_statements(&consequence.0)
                } else if let Some(alternative) = alternative {
                    self.execute_statements(&alternative.0)
                } else {
                    Ok(Object::Null)
                }
            }
            Expression::Function(function) => Ok(Object::Function(Rc::new(Function {
                parameters: function.parameters.clone(),
                body: function.body.clone(),
                environment: Rc::clone(&self.environment),
            }))),
            Expression::Macro(..) => {
                Err(EvalError::UnexpandedMacro(expression.to_string()).into())
            }
            Expression::Call(function, arguments) => {
                if let Expression::Identifier(name) = &**function {
                    if name == "quote" {
                        return match arguments.as_slice() {
                            [quoted] => quote::quote(self, quoted),
                            _ => Err(EvalError::WrongArgumentCount {
                                expected: 1,
                                got: arguments.len(),
                            }
                            .into()),
                        };
                    }
                }

                let function = self.evaluate(function)?;
                let arguments = arguments
                    .iter()
                    .map(|argument| self.evaluate(argument))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.apply(function, arguments)?)
            }
            Expression::Array(elements) => {
                let elements = elements
                    .iter()
                    .map(|element| self.evaluate(element))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Object::array(elements))
            }
            Expression::Hash(pairs) => {
                let mut hash = FxHashMap::default();
                for (key, value) in pairs {
                    let key = self.evaluate(key)?;
                    let hash_key = key
                        .hash_key()
                        .ok_or(EvalError::UnusableHashKey(key.type_name()))?;
                    let value = self.evaluate(value)?;
                    hash.insert(hash_key, HashPair { key, value });
                }
                Ok(Object::Hash(Rc::new(hash)))
            }
            Expression::Index(left, index) => {
                let left = self.evaluate(left)?;
                let index = self.evaluate(index)?;
                Ok(index_operation(&left, &index)?)
            }
        }
    }

    fn apply(&mut self, function: Object, arguments: Vec<Object>) -> Result<Object, EvalError> {
        match function {
            Object::Function(function) => {
                if function.parameters.len() != arguments.len() {
                    return Err(EvalError::WrongArgumentCount {
                        expected: function.parameters.len(),
                        got: arguments.len(),
                    });
                }

                let environment = Environment::enclosed(Rc::clone(&function.environment));
                for (parameter, argument) in function.parameters.iter().zip(arguments) {
                    environment.borrow_mut().set(parameter.as_str(), argument);
                }

                self.call_body(&function.body, environment)
            }
            Object::Builtin(builtin) => {
                let mut stdout = self.stdout.borrow_mut();
                Ok((builtin.function)(&mut *stdout, &arguments)?)
            }
            other => Err(EvalError::NotAFunction(other.type_name())),
        }
    }
}

fn prefix_operation(op: PrefixOperator, right: Object) -> Result<Object, EvalError> {
    match (op, right) {
        (PrefixOperator::Not, right) => Ok(Object::Boolean(!right.is_truthy())),
        (PrefixOperator::Negate, Object::Integer(n)) => Ok(Object::Integer(n.wrapping_neg())),
        (PrefixOperator::Negate, right) => Err(EvalError::UnknownPrefixOperator {
            op,
            operand: right.type_name(),
        }),
    }
}

fn infix_operation(left: Object, op: InfixOperator, right: Object) -> Result<Object, EvalError> {
    match (&left, &right) {
        (Object::Integer(a), Object::Integer(b)) => {
            let (a, b) = (*a, *b);
            Ok(match op {
                InfixOperator::Plus => Object::Integer(a.wrapping_add(b)),
                InfixOperator::Minus => Object::Integer(a.wrapping_sub(b)),
                InfixOperator::Multiply => Object::Integer(a.wrapping_mul(b)),
                InfixOperator::Divide if b == 0 => return Err(EvalError::DivisionByZero),
                InfixOperator::Divide => Object::Integer(a.wrapping_div(b)),
                InfixOperator::LessThan => Object::Boolean(a < b),
                InfixOperator::GreaterThan => Object::Boolean(a > b),
                InfixOperator::Equal => Object::Boolean(a == b),
                InfixOperator::NotEqual => Object::Boolean(a != b),
            })
        }
        (Object::String(a), Object::String(b)) if op == InfixOperator::Plus => {
            Ok(Object::string(format!("{a}{b}")))
        }
        _ if op == InfixOperator::Equal => Ok(Object::Boolean(left.equals(&right))),
        _ if op == InfixOperator::NotEqual => Ok(Object::Boolean(!left.equals(&right))),
        _ if left.type_name() != right.type_name() => Err(EvalError::TypeMismatch {
            left: left.type_name(),
            op,
            right: right.type_name(),
        }),
        _ => Err(EvalError::UnknownInfixOperator {
            left: left.type_name(),
            op,
            right: right.type_name(),
        }),
    }
}

fn index_operation(left: &Object, index: &Object) -> Result<Object, EvalError> {
    match (left, index) {
        (Object::Array(elements), Object::Integer(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| elements.get(i))
            .cloned()
            .unwrap_or(Object::Null)),
        (Object::Hash(pairs), key) => {
            let hash_key = key
                .hash_key()
                .ok_or(EvalError::UnusableHashKey(key.type_name()))?;
            Ok(pairs
                .get(&hash_key)
                .map(|pair| pair.value.clone())
                .unwrap_or(Object::Null))
        }
        _ => Err(EvalError::IndexNotSupported(left.type_name())),
    }
}
