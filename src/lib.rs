pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod evaluator;
pub mod object;
pub mod parser;
pub mod span;
pub mod tokenizer;
pub mod vm;
