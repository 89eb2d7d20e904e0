use std::cell::RefCell;

use crate::{
    ast::{Block, Expression, FunctionLiteral, InfixOperator, PrefixOperator, Program, Statement},
    tokenizer::{Token, TokenType},
};

#[derive(Debug)]
pub struct ParseErrors(pub Vec<ParseErrorWithContext>);

impl std::error::Error for ParseErrors {}

impl std::fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} errors during parsing", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl From<ParseErrorWithContext> for ParseErrors {
    fn from(error: ParseErrorWithContext) -> Self {
        ParseErrors(vec![error])
    }
}

#[derive(Debug)]
pub struct ParseErrorWithContext {
    pub error: ParseError,
    context: Vec<&'static str>,
    pub token: Option<Token>,
}

impl std::fmt::Display for ParseErrorWithContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "While parsing {}", self.context.join(" > "))?;
        write!(f, "{}", self.error)?;
        if let Some(token) = &self.token {
            write!(f, " at {} but found \"{}\"", token.span, token.token_type)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Expected \"{0}\"")]
    Expected(TokenType),
    #[error("Expected one of {0:?}")]
    ExpectedOneOf(Vec<TokenType>),
    #[error("Unexpected \"{0}\"")]
    Unexpected(TokenType),
    #[error("Expected identifier")]
    ExpectedIdentifier,
    #[error("Could not parse \"{0}\" as a 64-bit integer")]
    InvalidInteger(String),
}

#[derive(Debug)]
struct ParseContext {
    stack: RefCell<Vec<&'static str>>,
}

impl ParseContext {
    fn new() -> Self {
        Self {
            stack: RefCell::new(vec![]),
        }
    }

    fn push(&self, name: &'static str) -> ParseContextGuard {
        self.stack.borrow_mut().push(name);
        ParseContextGuard::new(self)
    }

    fn pop(&self) {
        self.stack.borrow_mut().pop();
    }

    fn error(&self, error: ParseError, tokens: &[Token]) -> ParseErrorWithContext {
        ParseErrorWithContext {
            error,
            context: self.stack.borrow().clone(),
            token: tokens.first().cloned(),
        }
    }
}

struct ParseContextGuard<'a> {
    context: &'a ParseContext,
}

impl<'a> ParseContextGuard<'a> {
    fn new(context: &'a ParseContext) -> Self {
        Self { context }
    }
}

impl<'a> Drop for ParseContextGuard<'a> {
    fn drop(&mut self) {
        self.context.pop();
    }
}

type ParseResult<'a, T> = Result<(T, &'a [Token]), ParseErrorWithContext>;

pub fn program(tokens: &[Token]) -> Result<Program, ParseErrors> {
    let context = ParseContext::new();
    let mut statements = Vec::new();
    let mut tokens = tokens;
    let mut errors = Vec::new();

    let _guard = context.push("program");

    while let Some(token) = tokens.first() {
        if token.token_type == TokenType::Eof {
            break;
        }

        match statement(&context, tokens) {
            Ok((stmt, rest)) => {
                statements.push(stmt);
                tokens = rest;
            }
            Err(err) => {
                errors.push(err);
                tokens = consume_until_after(tokens, &[TokenType::Semicolon]);
            }
        }
    }

    if !errors.is_empty() {
        return Err(ParseErrors(errors));
    }

    Ok(Program(statements))
}

fn consume_until_after<'a>(tokens: &'a [Token], token_types: &[TokenType]) -> &'a [Token] {
    let mut tokens = tokens;
    while let Some(token) = tokens.first() {
        if token.token_type == TokenType::Eof {
            return tokens;
        }
        tokens = &tokens[1..];
        if token_types.iter().any(|t| t == token.token_type()) {
            return tokens;
        }
    }
    tokens
}

fn peek(tokens: &[Token]) -> Option<&TokenType> {
    tokens.first().map(Token::token_type)
}

fn skip_semicolon(tokens: &[Token]) -> &[Token] {
    match peek(tokens) {
        Some(TokenType::Semicolon) => &tokens[1..],
        _ => tokens,
    }
}

fn statement<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Statement> {
    let _guard = context.push("statement");
    match peek(tokens) {
        Some(TokenType::Let) => let_statement(context, &tokens[1..]),
        Some(TokenType::Return) => return_statement(context, &tokens[1..]),
        _ => expression_statement(context, tokens),
    }
}

fn let_statement<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Statement> {
    let _guard = context.push("let_statement");
    let (name, tokens) = match_identifier(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::Assign)?;
    let (mut value, tokens) = expression(context, tokens)?;
    if let Expression::Function(function) = &mut value {
        function.name = Some(name.clone());
    }
    Ok((Statement::Let(name, value), skip_semicolon(tokens)))
}

fn return_statement<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Statement> {
    let _guard = context.push("return_statement");
    let (value, tokens) = expression(context, tokens)?;
    Ok((Statement::Return(value), skip_semicolon(tokens)))
}

fn expression_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> ParseResult<'a, Statement> {
    let _guard = context.push("expression_statement");
    let (expr, tokens) = expression(context, tokens)?;
    Ok((Statement::Expression(expr), skip_semicolon(tokens)))
}

fn block<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Block> {
    let _guard = context.push("block");
    let mut tokens = consume(context, tokens, TokenType::LeftBrace)?;
    let mut statements = Vec::new();

    loop {
        match peek(tokens) {
            Some(TokenType::RightBrace) => return Ok((Block(statements), &tokens[1..])),
            None | Some(TokenType::Eof) => {
                return Err(context.error(ParseError::Expected(TokenType::RightBrace), tokens))
            }
            _ => {
                let (stmt, rest) = statement(context, tokens)?;
                statements.push(stmt);
                tokens = rest;
            }
        }
    }
}

fn expression<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("expression");
    equality(context, tokens)
}

fn binary<'a>(
    context: &ParseContext,
    precedence: impl Fn(&ParseContext, &'a [Token]) -> ParseResult<'a, Expression>,
    operator: impl Fn(&TokenType) -> Option<InfixOperator>,
    tokens: &'a [Token],
) -> ParseResult<'a, Expression> {
    let (mut expr, mut tokens) = precedence(context, tokens)?;

    while let Some(token) = tokens.first() {
        let op = match operator(token.token_type()) {
            Some(op) => op,
            None => break,
        };
        tokens = &tokens[1..];
        let (right, rest) = precedence(context, tokens)?;
        expr = Expression::Infix(Box::new(expr), op, Box::new(right));
        tokens = rest;
    }

    Ok((expr, tokens))
}

fn equality<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("equality");
    binary(
        context,
        comparison,
        |token_type| match token_type {
            TokenType::EqualEqual => Some(InfixOperator::Equal),
            TokenType::BangEqual => Some(InfixOperator::NotEqual),
            _ => None,
        },
        tokens,
    )
}

fn comparison<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("comparison");
    binary(
        context,
        term,
        |token_type| match token_type {
            TokenType::Less => Some(InfixOperator::LessThan),
            TokenType::Greater => Some(InfixOperator::GreaterThan),
            _ => None,
        },
        tokens,
    )
}

fn term<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("term");
    binary(
        context,
        factor,
        |token_type| match token_type {
            TokenType::Plus => Some(InfixOperator::Plus),
            TokenType::Minus => Some(InfixOperator::Minus),
            _ => None,
        },
        tokens,
    )
}

fn factor<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("factor");
    binary(
        context,
        prefix,
        |token_type| match token_type {
            TokenType::Star => Some(InfixOperator::Multiply),
            TokenType::Slash => Some(InfixOperator::Divide),
            _ => None,
        },
        tokens,
    )
}

fn prefix<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("prefix");

    let operator = match peek(tokens) {
        Some(TokenType::Minus) => PrefixOperator::Negate,
        Some(TokenType::Bang) => PrefixOperator::Not,
        _ => return postfix(context, tokens),
    };

    let (right, rest) = prefix(context, &tokens[1..])?;
    Ok((Expression::Prefix(operator, Box::new(right)), rest))
}

fn postfix<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("postfix");
    let (mut expr, mut tokens) = primary(context, tokens)?;

    loop {
        match peek(tokens) {
            Some(TokenType::LeftParen) => {
                let (arguments, rest) =
                    expression_list(context, &tokens[1..], TokenType::RightParen)?;
                expr = Expression::Call(Box::new(expr), arguments);
                tokens = rest;
            }
            Some(TokenType::LeftBracket) => {
                let (index, rest) = expression(context, &tokens[1..])?;
                let rest = consume(context, rest, TokenType::RightBracket)?;
                expr = Expression::Index(Box::new(expr), Box::new(index));
                tokens = rest;
            }
            _ => return Ok((expr, tokens)),
        }
    }
}

fn primary<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("primary");
    let Some(token) = tokens.first() else {
        return Err(context.error(ParseError::Unexpected(TokenType::Eof), tokens));
    };
    let rest = &tokens[1..];

    match token.token_type() {
        TokenType::Identifier(name) => Ok((Expression::Identifier(name.clone()), rest)),
        TokenType::Integer(digits) => match digits.parse::<i64>() {
            Ok(n) => Ok((Expression::Integer(n), rest)),
            Err(_) => Err(context.error(ParseError::InvalidInteger(digits.clone()), tokens)),
        },
        TokenType::String(s) => Ok((Expression::String(s.clone()), rest)),
        TokenType::True => Ok((Expression::Boolean(true), rest)),
        TokenType::False => Ok((Expression::Boolean(false), rest)),
        TokenType::LeftParen => {
            let (expr, rest) = expression(context, rest)?;
            let rest = consume(context, rest, TokenType::RightParen)?;
            Ok((expr, rest))
        }
        TokenType::If => if_expression(context, rest),
        TokenType::Function => {
            let (parameters, rest) = parameters(context, rest)?;
            let (body, rest) = block(context, rest)?;
            Ok((
                Expression::Function(FunctionLiteral {
                    name: None,
                    parameters,
                    body,
                }),
                rest,
            ))
        }
        TokenType::Macro => {
            let (parameters, rest) = parameters(context, rest)?;
            let (body, rest) = block(context, rest)?;
            Ok((Expression::Macro(parameters, body), rest))
        }
        TokenType::LeftBracket => {
            let (elements, rest) = expression_list(context, rest, TokenType::RightBracket)?;
            Ok((Expression::Array(elements), rest))
        }
        TokenType::LeftBrace => hash(context, rest),
        token_type => Err(context.error(ParseError::Unexpected(token_type.clone()), tokens)),
    }
}

fn if_expression<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("if_expression");
    let (condition, tokens) = expression(context, tokens)?;
    let (consequence, tokens) = block(context, tokens)?;
    if let Some(TokenType::Else) = peek(tokens) {
        let (alternative, tokens) = block(context, &tokens[1..])?;
        Ok((
            Expression::If(Box::new(condition), consequence, Some(alternative)),
            tokens,
        ))
    } else {
        Ok((Expression::If(Box::new(condition), consequence, None), tokens))
    }
}

fn parameters<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Vec<String>> {
    let _guard = context.push("parameters");
    let mut tokens = consume(context, tokens, TokenType::LeftParen)?;
    let mut names = vec![];

    if let Some(TokenType::RightParen) = peek(tokens) {
        return Ok((names, &tokens[1..]));
    }

    loop {
        let (name, rest) = match_identifier(context, tokens)?;
        names.push(name);
        tokens = rest;

        match peek(tokens) {
            Some(TokenType::Comma) => tokens = &tokens[1..],
            Some(TokenType::RightParen) => return Ok((names, &tokens[1..])),
            _ => {
                return Err(context.error(
                    ParseError::ExpectedOneOf(vec![TokenType::Comma, TokenType::RightParen]),
                    tokens,
                ))
            }
        }
    }
}

fn expression_list<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    end: TokenType,
) -> ParseResult<'a, Vec<Expression>> {
    let _guard = context.push("expression_list");
    let mut tokens = tokens;
    let mut expressions = Vec::new();

    if peek(tokens) == Some(&end) {
        return Ok((expressions, &tokens[1..]));
    }

    loop {
        let (expr, rest) = expression(context, tokens)?;
        expressions.push(expr);
        tokens = rest;

        match peek(tokens) {
            Some(TokenType::Comma) => tokens = &tokens[1..],
            Some(t) if t == &end => return Ok((expressions, &tokens[1..])),
            _ => {
                return Err(
                    context.error(ParseError::ExpectedOneOf(vec![TokenType::Comma, end]), tokens)
                )
            }
        }
    }
}

fn hash<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("hash");
    let mut tokens = tokens;
    let mut pairs = Vec::new();

    if let Some(TokenType::RightBrace) = peek(tokens) {
        return Ok((Expression::Hash(pairs), &tokens[1..]));
    }

    loop {
        let (key, rest) = expression(context, tokens)?;
        let rest = consume(context, rest, TokenType::Colon)?;
        let (value, rest) = expression(context, rest)?;
        pairs.push((key, value));
        tokens = rest;

        match peek(tokens) {
            Some(TokenType::Comma) => tokens = &tokens[1..],
            Some(TokenType::RightBrace) => return Ok((Expression::Hash(pairs), &tokens[1..])),
            _ => {
                return Err(context.error(
                    ParseError::ExpectedOneOf(vec![TokenType::Comma, TokenType::RightBrace]),
                    tokens,
                ))
            }
        }
    }
}

fn consume<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    token_type: TokenType,
) -> Result<&'a [Token], ParseErrorWithContext> {
    match peek(tokens) {
        Some(t) if t == &token_type => Ok(&tokens[1..]),
        _ => Err(context.error(ParseError::Expected(token_type), tokens)),
    }
}

fn match_identifier<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, String> {
    match peek(tokens) {
        Some(TokenType::Identifier(name)) => Ok((name.clone(), &tokens[1..])),
        _ => Err(context.error(ParseError::ExpectedIdentifier, tokens)),
    }
}
