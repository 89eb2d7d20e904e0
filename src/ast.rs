use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub struct Program(pub Vec<Statement>);

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Let(String, Expression),
    Return(Expression),
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block(pub Vec<Statement>);

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    /// Set when the literal is bound directly by a `let`, so the body can refer to itself.
    pub name: Option<String>,
    pub parameters: Vec<String>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(String),
    Integer(i64),
    String(String),
    Boolean(bool),
    Prefix(PrefixOperator, Box<Expression>),
    Infix(Box<Expression>, InfixOperator, Box<Expression>),
    If(Box<Expression>, Block, Option<Block>),
    Function(FunctionLiteral),
    Macro(Vec<String>, Block),
    Call(Box<Expression>, Vec<Expression>),
    Array(Vec<Expression>),
    Hash(Vec<(Expression, Expression)>),
    Index(Box<Expression>, Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOperator {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOperator {
    Plus,
    Minus,
    Multiply,
    Divide,
    LessThan,
    GreaterThan,
    Equal,
    NotEqual,
}

/// Rewrites every expression of `program` bottom-up with `modifier`.
///
/// Children are rewritten before their parent is handed to `modifier`, so a
/// modifier always sees already-rewritten subtrees.
pub fn modify<E>(
    program: Program,
    modifier: &mut impl FnMut(Expression) -> Result<Expression, E>,
) -> Result<Program, E> {
    let statements = program
        .0
        .into_iter()
        .map(|statement| modify_statement(statement, modifier))
        .collect::<Result<_, _>>()?;
    Ok(Program(statements))
}

fn modify_statement<E>(
    statement: Statement,
    modifier: &mut impl FnMut(Expression) -> Result<Expression, E>,
) -> Result<Statement, E> {
    Ok(match statement {
        Statement::Let(name, value) => Statement::Let(name, modify_expression(value, modifier)?),
        Statement::Return(value) => Statement::Return(modify_expression(value, modifier)?),
        Statement::Expression(expr) => Statement::Expression(modify_expression(expr, modifier)?),
    })
}

fn modify_block<E>(
    block: Block,
    modifier: &mut impl FnMut(Expression) -> Result<Expression, E>,
) -> Result<Block, E> {
    let statements = block
        .0
        .into_iter()
        .map(|statement| modify_statement(statement, modifier))
        .collect::<Result<_, _>>()?;
    Ok(Block(statements))
}

pub fn modify_expression<E>(
    expression: Expression,
    modifier: &mut impl FnMut(Expression) -> Result<Expression, E>,
) -> Result<Expression, E> {
    let expression = match expression {
        Expression::Prefix(op, right) => {
            Expression::Prefix(op, Box::new(modify_expression(*right, modifier)?))
        }
        Expression::Infix(left, op, right) => Expression::Infix(
            Box::new(modify_expression(*left, modifier)?),
            op,
            Box::new(modify_expression(*right, modifier)?),
        ),
        Expression::If(condition, consequence, alternative) => Expression::If(
            Box::new(modify_expression(*condition, modifier)?),
            modify_block(consequence, modifier)?,
            alternative
                .map(|alternative| modify_block(alternative, modifier))
                .transpose()?,
        ),
        Expression::Function(FunctionLiteral {
            name,
            parameters,
            body,
        }) => Expression::Function(FunctionLiteral {
            name,
            parameters,
            body: modify_block(body, modifier)?,
        }),
        Expression::Call(function, arguments) => Expression::Call(
            Box::new(modify_expression(*function, modifier)?),
            arguments
                .into_iter()
                .map(|arg| modify_expression(arg, modifier))
                .collect::<Result<_, _>>()?,
        ),
        Expression::Array(elements) => Expression::Array(
            elements
                .into_iter()
                .map(|element| modify_expression(element, modifier))
                .collect::<Result<_, _>>()?,
        ),
        Expression::Hash(pairs) => Expression::Hash(
            pairs
                .into_iter()
                .map(|(key, value)| {
                    Ok::<_, E>((
                        modify_expression(key, modifier)?,
                        modify_expression(value, modifier)?,
                    ))
                })
                .collect::<Result<_, _>>()?,
        ),
        Expression::Index(left, index) => Expression::Index(
            Box::new(modify_expression(*left, modifier)?),
            Box::new(modify_expression(*index, modifier)?),
        ),
        leaf => leaf,
    };
    modifier(expression)
}

impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for statement in &self.0 {
            write!(f, "{}", statement)?;
        }
        Ok(())
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Statement::Let(name, value) => write!(f, "let {} = {};", name, value),
            Statement::Return(value) => write!(f, "return {};", value),
            Statement::Expression(expr) => write!(f, "{}", expr),
        }
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for statement in &self.0 {
            write!(f, "{}", statement)?;
        }
        Ok(())
    }
}

fn join<T: Display>(f: &mut std::fmt::Formatter<'_>, items: &[T]) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i != 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Identifier(name) => write!(f, "{}", name),
            Expression::Integer(n) => write!(f, "{}", n),
            Expression::String(s) => write!(f, "{}", s),
            Expression::Boolean(b) => write!(f, "{}", b),
            Expression::Prefix(op, right) => write!(f, "({}{})", op, right),
            Expression::Infix(left, op, right) => write!(f, "({} {} {})", left, op, right),
            Expression::If(condition, consequence, alternative) => {
                write!(f, "if{} {}", condition, consequence)?;
                if let Some(alternative) = alternative {
                    write!(f, "else {}", alternative)?;
                }
                Ok(())
            }
            Expression::Function(FunctionLiteral {
                name,
                parameters,
                body,
            }) => {
                write!(f, "fn")?;
                if let Some(name) = name {
                    write!(f, "<{}>", name)?;
                }
                write!(f, "(")?;
                join(f, parameters)?;
                write!(f, ") {}", body)
            }
            Expression::Macro(parameters, body) => {
                write!(f, "macro(")?;
                join(f, parameters)?;
                write!(f, ") {}", body)
            }
            Expression::Call(function, arguments) => {
                write!(f, "{}(", function)?;
                join(f, arguments)?;
                write!(f, ")")
            }
            Expression::Array(elements) => {
                write!(f, "[")?;
                join(f, elements)?;
                write!(f, "]")
            }
            Expression::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}:{}", key, value)?;
                }
                write!(f, "}}")
            }
            Expression::Index(left, index) => write!(f, "({}[{}])", left, index),
        }
    }
}

impl Display for InfixOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfixOperator::Plus => write!(f, "+"),
            InfixOperator::Minus => write!(f, "-"),
            InfixOperator::Multiply => write!(f, "*"),
            InfixOperator::Divide => write!(f, "/"),
            InfixOperator::LessThan => write!(f, "<"),
            InfixOperator::GreaterThan => write!(f, ">"),
            InfixOperator::Equal => write!(f, "=="),
            InfixOperator::NotEqual => write!(f, "!="),
        }
    }
}

impl Display for PrefixOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrefixOperator::Negate => write!(f, "-"),
            PrefixOperator::Not => write!(f, "!"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Expression {
        Expression::Integer(n)
    }

    #[test]
    fn test_display() {
        let program = Program(vec![
            Statement::Let(
                "myVar".to_string(),
                Expression::Identifier("anotherVar".to_string()),
            ),
            Statement::Expression(Expression::Infix(
                Box::new(int(1)),
                InfixOperator::Plus,
                Box::new(Expression::Prefix(PrefixOperator::Negate, Box::new(int(2)))),
            )),
        ]);
        assert_eq!(program.to_string(), "let myVar = anotherVar;(1 + (-2))");
    }

    #[test]
    fn test_modify_replaces_nested_integers() {
        let one_to_two = &mut |expr: Expression| -> Result<Expression, ()> {
            match expr {
                Expression::Integer(1) => Ok(int(2)),
                other => Ok(other),
            }
        };

        let program = Program(vec![
            Statement::Expression(Expression::Array(vec![int(1), int(1)])),
            Statement::Return(Expression::Index(Box::new(int(1)), Box::new(int(1)))),
            Statement::Let(
                "f".to_string(),
                Expression::Function(FunctionLiteral {
                    name: None,
                    parameters: vec![],
                    body: Block(vec![Statement::Expression(Expression::If(
                        Box::new(int(1)),
                        Block(vec![Statement::Expression(int(1))]),
                        Some(Block(vec![Statement::Expression(int(1))])),
                    ))]),
                }),
            ),
            Statement::Expression(Expression::Hash(vec![(int(1), int(1))])),
        ]);

        let modified = modify(program, one_to_two).unwrap();
        assert_eq!(
            modified.to_string(),
            "[2, 2]return (2[2]);let f = fn() if2 2else 2;{2:2}"
        );
    }
}
