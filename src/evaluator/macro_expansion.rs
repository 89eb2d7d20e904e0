use std::{cell::RefCell, io::Write, rc::Rc};

use crate::{
    ast::{modify, Expression, Program, Statement},
    object::{Macro, Object},
};

use super::{environment::Environment, EvalError, Interpreter};

/// Moves every top-level `let name = macro(...) { ... }` out of `program` and into
/// `environment`.
pub fn define_macros(program: &mut Program, environment: &Rc<RefCell<Environment>>) {
    program.0.retain(|statement| match statement {
        Statement::Let(name, Expression::Macro(parameters, body)) => {
            let definition = Macro {
                parameters: parameters.clone(),
                body: body.clone(),
                environment: Rc::clone(environment),
            };
            log::debug!("defined macro {}", name);
            environment
                .borrow_mut()
                .set(name.as_str(), Object::Macro(Rc::new(definition)));
            false
        }
        _ => true,
    });
}

/// Replaces every call of a macro bound in `environment` with the syntax its body
/// returns. Output of `puts` inside macro bodies goes to `stdout`.
pub fn expand_macros(
    program: Program,
    environment: &Rc<RefCell<Environment>>,
    stdout: &Rc<RefCell<dyn Write>>,
) -> Result<Program, EvalError> {
    modify(program, &mut |expression| {
        let Expression::Call(function, arguments) = &expression else {
            return Ok(expression);
        };
        let Expression::Identifier(name) = &**function else {
            return Ok(expression);
        };
        let Some(Object::Macro(definition)) = environment.borrow().get(name) else {
            return Ok(expression);
        };

        if definition.parameters.len() != arguments.len() {
            return Err(EvalError::WrongArgumentCount {
                expected: definition.parameters.len(),
                got: arguments.len(),
            });
        }

        let scope = Environment::enclosed(Rc::clone(&definition.environment));
        for (parameter, argument) in definition.parameters.iter().zip(arguments) {
            let quoted = Object::Quote(Rc::new(argument.clone()));
            scope.borrow_mut().set(parameter.as_str(), quoted);
        }

        let mut interpreter = Interpreter::with_environment(Rc::clone(&scope), Rc::clone(stdout));
        match interpreter.call_body(&definition.body, scope)? {
            Object::Quote(expanded) => Ok(Rc::unwrap_or_clone(expanded)),
            other => Err(EvalError::MacroResultNotQuote(other.type_name())),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser, tokenizer::tokens};

    fn no_output() -> Rc<RefCell<dyn Write>> {
        Rc::new(RefCell::new(std::io::sink()))
    }

    fn parse(source: &str) -> Program {
        parser::program(&tokens(source).unwrap()).unwrap()
    }

    #[test]
    fn test_define_macros() {
        let mut program = parse(
            "let number = 1; let function = fn(x, y) { x + y }; let mymacro = macro(x, y) { x + y; };",
        );
        let environment = Environment::boxed();
        define_macros(&mut program, &environment);

        assert_eq!(program.0.len(), 2);
        assert!(environment.borrow().get("number").is_none());
        assert!(environment.borrow().get("function").is_none());
        match environment.borrow().get("mymacro") {
            Some(Object::Macro(definition)) => {
                assert_eq!(definition.parameters, vec!["x", "y"]);
                assert_eq!(definition.body.to_string(), "(x + y)");
            }
            other => panic!("expected macro, got {other:?}"),
        };
    }

    fn assert_expands(source: &str, expected: &str) {
        let mut program = parse(source);
        let environment = Environment::boxed();
        define_macros(&mut program, &environment);
        let expanded = expand_macros(program, &environment, &no_output()).unwrap();
        assert_eq!(expanded.to_string(), parse(expected).to_string());
    }

    #[test]
    fn test_expand_macros() {
        assert_expands(
            "let infixExpression = macro() { quote(1 + 2); }; infixExpression();",
            "(1 + 2)",
        );
        assert_expands(
            "let reverse = macro(a, b) { quote(unquote(b) - unquote(a)); }; reverse(2 + 2, 10 - 5);",
            "(10 - 5) - (2 + 2)",
        );
        assert_expands(
            r#"
            let unless = macro(condition, consequence, alternative) {
                quote(if (!(unquote(condition))) {
                    unquote(consequence);
                } else {
                    unquote(alternative);
                });
            };
            unless(10 > 5, puts("not greater"), puts("greater"));
            "#,
            r#"if (!(10 > 5)) { puts("not greater") } else { puts("greater") }"#,
        );
    }

    #[test]
    fn test_macro_must_return_quote() {
        let mut program = parse("let m = macro() { 1 }; m();");
        let environment = Environment::boxed();
        define_macros(&mut program, &environment);
        assert!(matches!(
            expand_macros(program, &environment, &no_output()),
            Err(EvalError::MacroResultNotQuote("INTEGER"))
        ));
    }

    #[test]
    fn test_macro_output_goes_to_configured_sink() {
        let mut program = parse(r#"let loud = macro(x) { puts("expanding"); x }; loud(1 + 1);"#);
        let environment = Environment::boxed();
        define_macros(&mut program, &environment);
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let sink: Rc<RefCell<dyn Write>> = output.clone();
        let expanded = expand_macros(program, &environment, &sink).unwrap();

        assert_eq!(expanded.to_string(), parse("1 + 1").to_string());
        assert_eq!(String::from_utf8(output.take()).unwrap(), "expanding\n");
    }
}
