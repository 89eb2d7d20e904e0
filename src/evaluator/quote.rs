use std::rc::Rc;

use crate::{
    ast::{modify_expression, Expression},
    object::Object,
};

use super::{EvalError, Interpreter, Interrupt};

/// Evaluates `quote(expression)`: the expression is kept as syntax, except for
/// `unquote(...)` calls inside it, which are evaluated and spliced back in.
pub(super) fn quote(
    interpreter: &mut Interpreter,
    expression: &Expression,
) -> Result<Object, Interrupt> {
    let quoted = modify_expression(
        expression.clone(),
        &mut |expression| -> Result<Expression, Interrupt> {
            match unquoted_argument(&expression) {
                Some(argument) => {
                    let value = interpreter.evaluate(argument)?;
                    Ok(into_expression(value)?)
                }
                None => Ok(expression),
            }
        },
    )?;
    Ok(Object::Quote(Rc::new(quoted)))
}

fn unquoted_argument(expression: &Expression) -> Option<&Expression> {
    match expression {
        Expression::Call(function, arguments) => match (&**function, arguments.as_slice()) {
            (Expression::Identifier(name), [argument]) if name == "unquote" => Some(argument),
            _ => None,
        },
        _ => None,
    }
}

pub(super) fn into_expression(value: Object) -> Result<Expression, EvalError> {
    match value {
        Object::Integer(n) => Ok(Expression::Integer(n)),
        Object::Boolean(b) => Ok(Expression::Boolean(b)),
        Object::String(s) => Ok(Expression::String(s.to_string())),
        Object::Quote(expression) => Ok(Rc::unwrap_or_clone(expression)),
        other => Err(EvalError::UnquoteUnsupported(other.type_name())),
    }
}
