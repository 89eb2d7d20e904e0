use std::{cell::RefCell, io::Write, rc::Rc};

use clap::{Args, Parser, Subcommand, ValueEnum};
use monkey::{
    bytecode::Bytecode,
    compiler::{symbol_table::SymbolTable, CompileError, Compiler},
    evaluator::{
        define_macros, environment::Environment, expand_macros, EvalError, Interpreter,
    },
    object::Object,
    parser::ParseErrors,
    tokenizer::TokenizeError,
    vm::{self, RuntimeError, Vm},
};

#[derive(Debug, Parser)]
struct Cli {
    /// Backend used to execute programs
    #[arg(long, value_enum, global = true, default_value_t = Engine::Vm)]
    engine: Engine,
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Repl)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Engine {
    /// Compile to bytecode and run it on the virtual machine
    Vm,
    /// Walk the syntax tree directly
    Eval,
}

#[derive(Debug, Subcommand)]
enum Command {
    Run(FileArgs),
    Repl,
    Benchmark(BenchmarkArgs),
    /// Print the compiled instructions and constants of a program
    Disassemble(FileArgs),
}

#[derive(Debug, Args)]
struct FileArgs {
    file: String,
}

#[derive(Debug, Args)]
struct BenchmarkArgs {
    #[arg(long, value_enum, default_value_t = Algo::Fast)]
    algo: Algo,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Algo {
    /// Fibonacci with a single `x < 2` base case
    Fast,
    /// Fibonacci with nested base-case checks
    Slow,
}

fn main() {
    env_logger::init();
    let args = Cli::parse();

    match args.command() {
        Command::Repl => {
            repl_command(args.engine);
        }
        Command::Run(file) => {
            run_command(args.engine, file);
        }
        Command::Benchmark(benchmark) => {
            benchmark_command(args.engine, benchmark.algo);
        }
        Command::Disassemble(file) => {
            disassemble_command(file);
        }
    }
}

fn repl_command(engine: Engine) {
    println!("Welcome to the Monkey REPL! ({:?} engine)", engine);
    println!("EOF to exit. (Ctrl+D on *nix, Ctrl+Z on Windows)");

    let mut session = Session::new(engine);
    loop {
        let mut input = String::new();

        print!(">> ");
        std::io::stdout()
            .flush()
            .expect("should be able to flush stdout");

        let read = std::io::stdin()
            .read_line(&mut input)
            .expect("should be able to read line from stdin");

        if read == 0 {
            break;
        }

        match session.execute(input.trim()) {
            Ok(Object::Null) => {}
            Ok(value) => println!("{}", value),
            Err(e) => println!("Error: {}", e),
        }
    }
}

fn run_command(engine: Engine, args: &FileArgs) {
    let source = std::fs::read_to_string(&args.file).expect("should be able to read source file");
    if let Err(e) = Session::new(engine).execute(&source) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn disassemble_command(args: &FileArgs) {
    let source = std::fs::read_to_string(&args.file).expect("should be able to read source file");
    match compile(&source) {
        Ok(bytecode) => print!("{}", bytecode.disassemble()),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn benchmark_command(engine: Engine, algo: Algo) {
    let source = monkey_fib_source(algo);

    let start = std::time::Instant::now();
    let result = match Session::new(engine).execute(source) {
        Ok(result) => result,
        Err(e) => {
            println!("Failed to run monkey fib code: {e}");
            std::process::exit(1);
        }
    };
    let monkey_elapsed = start.elapsed();
    println!("engine={:?}, result={}, duration={:?}", engine, result, monkey_elapsed);

    let start = std::time::Instant::now();
    let native = fib(35);
    let fib_elapsed = start.elapsed();
    println!("native, result={}, duration={:?}", native, fib_elapsed);

    println!(
        "Rust is {}x faster than monkey",
        monkey_elapsed.as_secs_f64() / fib_elapsed.as_secs_f64()
    );
}

fn monkey_fib_source(algo: Algo) -> &'static str {
    match algo {
        Algo::Fast => {
            r#"
            let fibonacci = fn(x) {
                if (x < 2) {
                    return x;
                } else {
                    fibonacci(x - 1) + fibonacci(x - 2);
                }
            };
            fibonacci(35);
            "#
        }
        Algo::Slow => {
            r#"
            let fibonacci = fn(x) {
                if (x == 0) {
                    return 0;
                } else {
                    if (x == 1) {
                        return 1;
                    } else {
                        fibonacci(x - 1) + fibonacci(x - 2);
                    }
                }
            };
            fibonacci(35);
            "#
        }
    }
}

fn fib(n: i64) -> i64 {
    if n <= 1 {
        return n;
    }
    fib(n - 1) + fib(n - 2)
}

#[derive(Debug, thiserror::Error)]
enum InterpretError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    #[error(transparent)]
    Parse(#[from] ParseErrors),
    #[error("Compilation failed: {0}")]
    Compile(#[from] CompileError),
    #[error("Executing bytecode failed: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Evaluation failed: {0}")]
    Eval(#[from] EvalError),
}

/// State carried from one input to the next, so bindings made by earlier
/// programs stay visible.
enum Session {
    Vm {
        symbol_table: SymbolTable,
        constants: Vec<Object>,
        globals: Vec<Object>,
        macros: Rc<RefCell<Environment>>,
        stdout: Rc<RefCell<dyn Write>>,
    },
    Eval {
        interpreter: Interpreter,
    },
}

impl Session {
    fn new(engine: Engine) -> Self {
        match engine {
            Engine::Vm => Session::Vm {
                symbol_table: SymbolTable::with_builtins(),
                constants: Vec::new(),
                globals: vm::new_globals(),
                macros: Environment::boxed(),
                stdout: Rc::new(RefCell::new(std::io::stdout())),
            },
            Engine::Eval => Session::Eval {
                interpreter: Interpreter::default(),
            },
        }
    }

    fn execute(&mut self, source: &str) -> Result<Object, InterpretError> {
        let tokens = monkey::tokenizer::tokens(source)?;
        let mut program = monkey::parser::program(&tokens)?;

        match self {
            Session::Vm {
                symbol_table,
                constants,
                globals,
                macros,
                stdout,
            } => {
                define_macros(&mut program, macros);
                let program = expand_macros(program, macros, stdout)?;

                let mut compiler = Compiler::new_with_state(
                    std::mem::take(symbol_table),
                    std::mem::take(constants),
                );
                let compiled = compiler.compile(&program);
                let bytecode = compiler.bytecode();
                (*symbol_table, *constants) = compiler.into_state();
                compiled?;

                let mut machine = Vm::new_with_globals(bytecode, std::mem::take(globals))
                    .with_stdout(Rc::clone(stdout));
                let ran = machine.run().map(|()| machine.last_popped_stack_elem());
                *globals = machine.into_globals();
                Ok(ran?)
            }
            Session::Eval { interpreter } => {
                let environment = interpreter.environment();
                define_macros(&mut program, &environment);
                let program = expand_macros(program, &environment, &interpreter.stdout())?;
                Ok(interpreter.interpret(&program)?)
            }
        }
    }
}

fn compile(source: &str) -> Result<Bytecode, InterpretError> {
    let tokens = monkey::tokenizer::tokens(source)?;
    let mut program = monkey::parser::program(&tokens)?;
    let macros = Environment::boxed();
    define_macros(&mut program, &macros);
    let stdout: Rc<RefCell<dyn Write>> = Rc::new(RefCell::new(std::io::stdout()));
    let program = expand_macros(program, &macros, &stdout)?;
    Ok(monkey::compiler::compile(&program)?)
}
