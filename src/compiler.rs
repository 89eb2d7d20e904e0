pub mod symbol_table;

use std::rc::Rc;

use crate::{
    ast::{
        Block, Expression, FunctionLiteral, InfixOperator, PrefixOperator, Program, Statement,
    },
    bytecode::{make, Bytecode, Instructions, OpCode, OperandOverflow},
    object::{CompiledFunction, Object},
};

use self::symbol_table::{Symbol, SymbolScope, SymbolTable};

/// Operand used for jumps whose target is patched once known.
const PLACEHOLDER: usize = 9999;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("Unsupported operand types for {op}: {left} and {right}")]
    UnsupportedOperands {
        op: InfixOperator,
        left: &'static str,
        right: &'static str,
    },
    #[error("Unsupported operand type for prefix {op}: {operand}")]
    UnsupportedOperand {
        op: PrefixOperator,
        operand: &'static str,
    },
    #[error("Macro literal found outside of a macro definition: {0}")]
    UnexpandedMacro(String),
    #[error(transparent)]
    Operand(#[from] OperandOverflow),
}

pub fn compile(program: &Program) -> Result<Bytecode, CompileError> {
    let mut compiler = Compiler::new();
    compiler.compile(program)?;
    Ok(compiler.bytecode())
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: OpCode,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scope: CompilationScope,
    enclosing_scopes: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::new_with_state(SymbolTable::with_builtins(), Vec::new())
    }

    /// Resumes compilation against the globals and constants of earlier programs.
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Object>) -> Self {
        Self {
            constants,
            symbol_table,
            scope: CompilationScope::default(),
            enclosing_scopes: Vec::new(),
        }
    }

    pub fn into_state(self) -> (SymbolTable, Vec<Object>) {
        (self.symbol_table, self.constants)
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.scope.instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    pub fn compile(&mut self, program: &Program) -> Result<(), CompileError> {
        for statement in &program.0 {
            if let Err(e) = self.statement(statement) {
                // Leave the compiler at top level so its state can be reused.
                while !self.enclosing_scopes.is_empty() {
                    self.leave_scope();
                }
                return Err(e);
            }
        }

        log::debug!(
            "compiled {} statements into {} bytes and {} constants",
            program.0.len(),
            self.scope.instructions.len(),
            self.constants.len()
        );
        #[cfg(feature = "disassemble")]
        log::debug!("{}", self.bytecode().disassemble());

        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Expression(expr) => {
                self.expression(expr)?;
                self.emit(OpCode::Pop, &[])?;
            }
            Statement::Let(name, value) => {
                // Rebinding a name in the same scope reuses its slot.
                let existing = self
                    .symbol_table
                    .defined(name)
                    .filter(|symbol| {
                        matches!(symbol.scope, SymbolScope::Global | SymbolScope::Local)
                    })
                    .cloned();
                let symbol = match existing {
                    Some(symbol) => symbol,
                    None => self.symbol_table.define(name),
                };
                self.expression(value)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(OpCode::SetGlobal, &[symbol.index])?,
                    _ => self.emit(OpCode::SetLocal, &[symbol.index])?,
                };
            }
            Statement::Return(value) => {
                self.expression(value)?;
                self.emit(OpCode::ReturnValue, &[])?;
            }
        }
        Ok(())
    }

    fn block(&mut self, block: &Block) -> Result<(), CompileError> {
        for statement in &block.0 {
            self.statement(statement)?;
        }
        Ok(())
    }

    /// Compiles a conditional branch so that it leaves exactly one value on the stack.
    fn branch(&mut self, block: &Block) -> Result<(), CompileError> {
        let start = self.scope.instructions.len();
        self.block(block)?;
        let emitted = self.scope.instructions.len() > start;

        if emitted && self.last_instruction_is(OpCode::Pop) {
            self.remove_last_pop();
        } else if !(emitted && self.last_instruction_is(OpCode::ReturnValue)) {
            self.emit(OpCode::Null, &[])?;
        }
        Ok(())
    }

    fn expression(&mut self, expression: &Expression) -> Result<(), CompileError> {
        match expression {
            Expression::Integer(n) => {
                let constant = self.add_constant(Object::Integer(*n));
                self.emit(OpCode::Constant, &[constant])?;
            }
            Expression::String(s) => {
                let constant = self.add_constant(Object::string(s.as_str()));
                self.emit(OpCode::Constant, &[constant])?;
            }
            Expression::Boolean(true) => {
                self.emit(OpCode::True, &[])?;
            }
            Expression::Boolean(false) => {
                self.emit(OpCode::False, &[])?;
            }
            Expression::Identifier(name) => {
                let symbol = self
                    .symbol_table
                    .resolve(name)
                    .ok_or_else(|| CompileError::UndefinedVariable(name.clone()))?;
                self.load_symbol(&symbol)?;
            }
            Expression::Prefix(op, right) => {
                if let Some(kind) = StaticKind::of(right) {
                    if *op == PrefixOperator::Negate && kind != StaticKind::Integer {
                        return Err(CompileError::UnsupportedOperand {
                            op: *op,
                            operand: kind.name(),
                        });
                    }
                }
                self.expression(right)?;
                match op {
                    PrefixOperator::Negate => self.emit(OpCode::Minus, &[])?,
                    PrefixOperator::Not => self.emit(OpCode::Bang, &[])?,
                };
            }
            Expression::Infix(left, op, right) => self.infix(left, *op, right)?,
            Expression::If(condition, consequence, alternative) => {
                self.expression(condition)?;
                let jump_not_truthy = self.emit(OpCode::JumpNotTruthy, &[PLACEHOLDER])?;

                self.branch(consequence)?;
                let jump = self.emit(OpCode::Jump, &[PLACEHOLDER])?;

                let after_consequence = self.scope.instructions.len();
                self.change_operand(jump_not_truthy, OpCode::JumpNotTruthy, after_consequence)?;

                match alternative {
                    Some(alternative) => self.branch(alternative)?,
                    None => {
                        self.emit(OpCode::Null, &[])?;
                    }
                }

                let after_alternative = self.scope.instructions.len();
                self.change_operand(jump, OpCode::Jump, after_alternative)?;
            }
            Expression::Function(function) => self.function(function)?,
            Expression::Macro(..) => {
                return Err(CompileError::UnexpandedMacro(expression.to_string()));
            }
            Expression::Call(function, arguments) => {
                self.expression(function)?;
                for argument in arguments {
                    self.expression(argument)?;
                }
                self.emit(OpCode::Call, &[arguments.len()])?;
            }
            Expression::Array(elements) => {
                for element in elements {
                    self.expression(element)?;
                }
                self.emit(OpCode::Array, &[elements.len()])?;
            }
            Expression::Hash(pairs) => {
                let mut pairs: Vec<_> = pairs
                    .iter()
                    .map(|(key, value)| (key.to_string(), key, value))
                    .collect();
                pairs.sort_by(|a, b| a.0.cmp(&b.0));

                for (_, key, value) in &pairs {
                    self.expression(key)?;
                    self.expression(value)?;
                }
                self.emit(OpCode::Hash, &[pairs.len() * 2])?;
            }
            Expression::Index(left, index) => {
                self.expression(left)?;
                self.expression(index)?;
                self.emit(OpCode::Index, &[])?;
            }
        }
        Ok(())
    }

    fn infix(
        &mut self,
        left: &Expression,
        op: InfixOperator,
        right: &Expression,
    ) -> Result<(), CompileError> {
        let kinds = (StaticKind::of(left), StaticKind::of(right));
        if let (Some(l), Some(r)) = kinds {
            if !StaticKind::supports(op, l, r) {
                return Err(CompileError::UnsupportedOperands {
                    op,
                    left: l.name(),
                    right: r.name(),
                });
            }
        }

        if op == InfixOperator::LessThan {
            self.expression(right)?;
            self.expression(left)?;
            self.emit(OpCode::GreaterThan, &[])?;
            return Ok(());
        }

        self.expression(left)?;
        self.expression(right)?;
        let opcode = match op {
            InfixOperator::Plus => match kinds {
                (Some(StaticKind::String), Some(StaticKind::String)) => OpCode::Concat,
                _ => OpCode::Add,
            },
            InfixOperator::Minus => OpCode::Subtract,
            InfixOperator::Multiply => OpCode::Multiply,
            InfixOperator::Divide => OpCode::Divide,
            InfixOperator::GreaterThan => OpCode::GreaterThan,
            InfixOperator::Equal => OpCode::Equal,
            InfixOperator::NotEqual => OpCode::NotEqual,
            InfixOperator::LessThan => unreachable!("compiled as a swapped greater-than"),
        };
        self.emit(opcode, &[])?;
        Ok(())
    }

    fn function(&mut self, function: &FunctionLiteral) -> Result<(), CompileError> {
        self.enter_scope();

        if let Some(name) = &function.name {
            self.symbol_table.define_function_name(name);
        }
        for parameter in &function.parameters {
            self.symbol_table.define(parameter);
        }

        self.block(&function.body)?;

        if self.last_instruction_is(OpCode::Pop) {
            self.replace_last_pop_with_return()?;
        }
        if !self.last_instruction_is(OpCode::ReturnValue) {
            self.emit(OpCode::Return, &[])?;
        }

        let num_locals = self.symbol_table.num_definitions();
        let (instructions, free_symbols) = self.leave_scope();

        for symbol in &free_symbols {
            self.load_symbol(symbol)?;
        }

        let compiled = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: function.parameters.len(),
        };
        let constant = self.add_constant(Object::CompiledFunction(Rc::new(compiled)));
        self.emit(OpCode::Closure, &[constant, free_symbols.len()])?;
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> Result<usize, CompileError> {
        match symbol.scope {
            SymbolScope::Global => self.emit(OpCode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(OpCode::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(OpCode::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(OpCode::GetFree, &[symbol.index]),
            SymbolScope::FunctionSelf => self.emit(OpCode::CurrentClosure, &[]),
        }
    }

    fn add_constant(&mut self, value: Object) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn emit(&mut self, opcode: OpCode, operands: &[usize]) -> Result<usize, CompileError> {
        let instruction = make(opcode, operands)?;
        let scope = &mut self.scope;
        let position = scope.instructions.push(&instruction);
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction { opcode, position });
        Ok(position)
    }

    fn last_instruction_is(&self, opcode: OpCode) -> bool {
        self.scope
            .last_instruction
            .is_some_and(|last| last.opcode == opcode)
    }

    fn remove_last_pop(&mut self) {
        let scope = &mut self.scope;
        if let Some(last) = scope.last_instruction {
            scope.instructions.truncate(last.position);
            scope.last_instruction = scope.previous_instruction;
        }
    }

    fn replace_last_pop_with_return(&mut self) -> Result<(), CompileError> {
        let instruction = make(OpCode::ReturnValue, &[])?;
        let scope = &mut self.scope;
        if let Some(last) = scope.last_instruction.as_mut() {
            scope.instructions.replace(last.position, &instruction);
            last.opcode = OpCode::ReturnValue;
        }
        Ok(())
    }

    /// Back-patches the operand of the `opcode` instruction at `position`.
    fn change_operand(
        &mut self,
        position: usize,
        opcode: OpCode,
        operand: usize,
    ) -> Result<(), CompileError> {
        let instruction = make(opcode, &[operand])?;
        self.scope.instructions.replace(position, &instruction);
        Ok(())
    }

    fn enter_scope(&mut self) {
        let outer_scope = std::mem::take(&mut self.scope);
        self.enclosing_scopes.push(outer_scope);
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
        log::debug!("entered compilation scope {}", self.enclosing_scopes.len());
    }

    fn leave_scope(&mut self) -> (Instructions, Vec<Symbol>) {
        let outer_scope = self.enclosing_scopes.pop().unwrap_or_default();
        let scope = std::mem::replace(&mut self.scope, outer_scope);
        let table = std::mem::take(&mut self.symbol_table);
        let free_symbols = table.free_symbols().to_vec();
        if let Some(outer) = table.into_outer() {
            self.symbol_table = outer;
        }
        log::debug!(
            "left compilation scope {} capturing {} free variables",
            self.enclosing_scopes.len() + 1,
            free_symbols.len()
        );
        (scope.instructions, free_symbols)
    }
}

/// Operand kinds that can be known without running the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaticKind {
    Integer,
    Boolean,
    String,
    Array,
    Hash,
    Function,
}

impl StaticKind {
    fn of(expression: &Expression) -> Option<Self> {
        match expression {
            Expression::Integer(_) => Some(Self::Integer),
            Expression::Boolean(_) => Some(Self::Boolean),
            Expression::String(_) => Some(Self::String),
            Expression::Array(_) => Some(Self::Array),
            Expression::Hash(_) => Some(Self::Hash),
            Expression::Function(_) => Some(Self::Function),
            Expression::Prefix(PrefixOperator::Negate, _) => Some(Self::Integer),
            Expression::Prefix(PrefixOperator::Not, _) => Some(Self::Boolean),
            Expression::Infix(left, op, right) => match op {
                InfixOperator::Equal
                | InfixOperator::NotEqual
                | InfixOperator::LessThan
                | InfixOperator::GreaterThan => Some(Self::Boolean),
                _ => match (Self::of(left)?, Self::of(right)?) {
                    (Self::String, Self::String) if *op == InfixOperator::Plus => {
                        Some(Self::String)
                    }
                    (Self::Integer, Self::Integer) => Some(Self::Integer),
                    _ => None,
                },
            },
            _ => None,
        }
    }

    fn supports(op: InfixOperator, left: Self, right: Self) -> bool {
        match op {
            InfixOperator::Equal | InfixOperator::NotEqual => true,
            InfixOperator::Plus => {
                matches!(
                    (left, right),
                    (Self::Integer, Self::Integer) | (Self::String, Self::String)
                )
            }
            _ => left == Self::Integer && right == Self::Integer,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Boolean => "BOOLEAN",
            Self::String => "STRING",
            Self::Array => "ARRAY",
            Self::Hash => "HASH",
            Self::Function => "FUNCTION",
        }
    }
}
