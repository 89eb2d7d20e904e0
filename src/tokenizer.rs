use std::fmt::Display;

use crate::span::{Position, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenType {
    // Delimiters
    Comma,
    Semicolon,
    Colon,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,

    // Operators
    Assign,
    Plus,
    Minus,
    Bang,
    Star,
    Slash,
    Less,
    Greater,
    EqualEqual,
    BangEqual,

    // Literals
    Identifier(String),
    Integer(String),
    String(String),

    // Keywords
    Function,
    Let,
    True,
    False,
    If,
    Else,
    Return,
    Macro,

    // End of file
    Eof,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Comma => write!(f, ","),
            TokenType::Semicolon => write!(f, ";"),
            TokenType::Colon => write!(f, ":"),
            TokenType::LeftParen => write!(f, "("),
            TokenType::RightParen => write!(f, ")"),
            TokenType::LeftBrace => write!(f, "{{"),
            TokenType::RightBrace => write!(f, "}}"),
            TokenType::LeftBracket => write!(f, "["),
            TokenType::RightBracket => write!(f, "]"),
            TokenType::Assign => write!(f, "="),
            TokenType::Plus => write!(f, "+"),
            TokenType::Minus => write!(f, "-"),
            TokenType::Bang => write!(f, "!"),
            TokenType::Star => write!(f, "*"),
            TokenType::Slash => write!(f, "/"),
            TokenType::Less => write!(f, "<"),
            TokenType::Greater => write!(f, ">"),
            TokenType::EqualEqual => write!(f, "=="),
            TokenType::BangEqual => write!(f, "!="),
            TokenType::Identifier(name) => write!(f, "{name}"),
            TokenType::Integer(digits) => write!(f, "{digits}"),
            TokenType::String(s) => write!(f, "\"{s}\""),
            TokenType::Function => write!(f, "fn"),
            TokenType::Let => write!(f, "let"),
            TokenType::True => write!(f, "true"),
            TokenType::False => write!(f, "false"),
            TokenType::If => write!(f, "if"),
            TokenType::Else => write!(f, "else"),
            TokenType::Return => write!(f, "return"),
            TokenType::Macro => write!(f, "macro"),
            TokenType::Eof => write!(f, "EOF"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub token_type: TokenType,
    pub span: Span,
}

impl Token {
    pub fn token_type(&self) -> &TokenType {
        &self.token_type
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenizeError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedCharacter(char, Span),
    #[error("Unterminated string starting at {0}")]
    UnterminatedString(Span),
}

pub fn tokens(source: &str) -> Result<Vec<Token>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut remaining = source;
    let mut position = Position::start();

    loop {
        let (token, rest) = token(remaining, &mut position)?;
        remaining = rest;
        let is_eof = token.token_type == TokenType::Eof;
        tokens.push(token);
        if is_eof {
            break;
        }
    }

    Ok(tokens)
}

fn token<'a>(mut source: &'a str, position: &mut Position) -> Result<(Token, &'a str), TokenizeError> {
    while let Some((_, rest)) = maximal(&[whitespace, comment], source) {
        position.advance(&source[..source.len() - rest.len()]);
        source = rest;
    }

    let start = *position;
    let Some(first) = source.chars().next() else {
        let span = Span::new(start.line, start.column, start.line, start.column);
        return Ok((
            Token {
                token_type: TokenType::Eof,
                span,
            },
            source,
        ));
    };

    let Some((token_type, rest)) = maximal(
        &[
            // delimiters
            comma,
            semicolon,
            colon,
            left_paren,
            right_paren,
            left_brace,
            right_brace,
            left_bracket,
            right_bracket,
            // one or two character operators
            assign,
            plus,
            minus,
            bang,
            star,
            slash,
            less,
            greater,
            equal_equal,
            bang_equal,
            // keywords
            function,
            let_,
            true_,
            false_,
            if_,
            else_,
            return_,
            macro_,
            // literals
            identifier,
            integer,
            string,
        ],
        source,
    ) else {
        let span = Span::new(start.line, start.column, start.line, start.column + 1);
        return Err(if first == '"' {
            TokenizeError::UnterminatedString(span)
        } else {
            TokenizeError::UnexpectedCharacter(first, span)
        });
    };

    position.advance(&source[..source.len() - rest.len()]);
    let span = Span::new(start.line, start.column, position.line, position.column);
    Ok((Token { token_type, span }, rest))
}

fn maximal<'a, T: std::fmt::Debug>(
    parsers: &[fn(&str) -> Option<(T, &str)>],
    source: &'a str,
) -> Option<(T, &'a str)> {
    let mut min_left = source.len() + 1;
    let mut max_match = None;

    let matching_parsers = parsers.iter().filter_map(|parser| parser(source));
    for (m, rest) in matching_parsers {
        let left = rest.len();
        if left < min_left {
            min_left = left;
            max_match = Some((m, rest));
        }
    }

    max_match
}

fn whitespace(source: &str) -> Option<((), &str)> {
    let len = source
        .chars()
        .take_while(|c| c.is_whitespace())
        .map(char::len_utf8)
        .sum();
    if len > 0 {
        Some(((), &source[len..]))
    } else {
        None
    }
}

fn comment(source: &str) -> Option<((), &str)> {
    if source.starts_with("//") {
        let len = source
            .chars()
            .take_while(|c| *c != '\n')
            .map(char::len_utf8)
            .sum();
        Some(((), &source[len..]))
    } else {
        None
    }
}

macro_rules! match_literal {
    ($name:ident, $word:literal, $token:expr) => {
        fn $name(source: &str) -> Option<(TokenType, &str)> {
            if source.starts_with($word) {
                Some(($token, &source[$word.len()..]))
            } else {
                None
            }
        }
    };
}

match_literal! { comma, ",", TokenType::Comma }
match_literal! { semicolon, ";", TokenType::Semicolon }
match_literal! { colon, ":", TokenType::Colon }
match_literal! { left_paren, "(", TokenType::LeftParen }
match_literal! { right_paren, ")", TokenType::RightParen }
match_literal! { left_brace, "{", TokenType::LeftBrace }
match_literal! { right_brace, "}", TokenType::RightBrace }
match_literal! { left_bracket, "[", TokenType::LeftBracket }
match_literal! { right_bracket, "]", TokenType::RightBracket }
match_literal! { assign, "=", TokenType::Assign }
match_literal! { plus, "+", TokenType::Plus }
match_literal! { minus, "-", TokenType::Minus }
match_literal! { bang, "!", TokenType::Bang }
match_literal! { star, "*", TokenType::Star }
match_literal! { slash, "/", TokenType::Slash }
match_literal! { less, "<", TokenType::Less }
match_literal! { greater, ">", TokenType::Greater }
match_literal! { equal_equal, "==", TokenType::EqualEqual }
match_literal! { bang_equal, "!=", TokenType::BangEqual }
match_literal! { function, "fn", TokenType::Function }
match_literal! { let_, "let", TokenType::Let }
match_literal! { true_, "true", TokenType::True }
match_literal! { false_, "false", TokenType::False }
match_literal! { if_, "if", TokenType::If }
match_literal! { else_, "else", TokenType::Else }
match_literal! { return_, "return", TokenType::Return }
match_literal! { macro_, "macro", TokenType::Macro }

fn identifier(source: &str) -> Option<(TokenType, &str)> {
    let mut chars = source.chars();

    let first = chars.next()?;
    if !first.is_ascii_alphabetic() && first != '_' {
        return None;
    }

    let len = first.len_utf8()
        + chars
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .map(char::len_utf8)
            .sum::<usize>();

    Some((
        TokenType::Identifier(source[..len].to_string()),
        &source[len..],
    ))
}

fn string(source: &str) -> Option<(TokenType, &str)> {
    let body = source.strip_prefix('"')?;
    let end = body.find('"')?;
    Some((
        TokenType::String(body[..end].to_string()),
        &body[end + 1..],
    ))
}

fn integer(source: &str) -> Option<(TokenType, &str)> {
    let len = source
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .map(char::len_utf8)
        .sum::<usize>();
    if len == 0 {
        return None;
    }

    Some((
        TokenType::Integer(source[..len].to_string()),
        &source[len..],
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    fn token_types(source: &str) -> Vec<TokenType> {
        tokens(source)
            .unwrap()
            .into_iter()
            .map(|token| token.token_type)
            .collect()
    }

    #[test]
    fn test_tokens() {
        let source = "let x = 1;";
        let expected = vec![
            TokenType::Let,
            TokenType::Identifier("x".to_string()),
            TokenType::Assign,
            TokenType::Integer("1".to_string()),
            TokenType::Semicolon,
            TokenType::Eof,
        ];
        assert_eq!(token_types(source), expected);
    }

    #[test]
    fn test_tokens_with_comments() {
        let source = "let x = 1; // comment";
        let expected = vec![
            TokenType::Let,
            TokenType::Identifier("x".to_string()),
            TokenType::Assign,
            TokenType::Integer("1".to_string()),
            TokenType::Semicolon,
            TokenType::Eof,
        ];
        assert_eq!(token_types(source), expected);
    }

    #[test]
    fn test_tokens_with_string() {
        let source = "let x = \"hello world\";";
        let expected = vec![
            TokenType::Let,
            TokenType::Identifier("x".to_string()),
            TokenType::Assign,
            TokenType::String("hello world".to_string()),
            TokenType::Semicolon,
            TokenType::Eof,
        ];
        assert_eq!(token_types(source), expected);
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let source = "fn letter(x) { if (x) { return true } else { false } }; macro";
        let expected = vec![
            TokenType::Function,
            TokenType::Identifier("letter".to_string()),
            TokenType::LeftParen,
            TokenType::Identifier("x".to_string()),
            TokenType::RightParen,
            TokenType::LeftBrace,
            TokenType::If,
            TokenType::LeftParen,
            TokenType::Identifier("x".to_string()),
            TokenType::RightParen,
            TokenType::LeftBrace,
            TokenType::Return,
            TokenType::True,
            TokenType::RightBrace,
            TokenType::Else,
            TokenType::LeftBrace,
            TokenType::False,
            TokenType::RightBrace,
            TokenType::RightBrace,
            TokenType::Semicolon,
            TokenType::Macro,
            TokenType::Eof,
        ];
        assert_eq!(token_types(source), expected);
    }

    #[test]
    fn test_double_character_operators() {
        let source = "a==b!=c=!d";
        let expected = vec![
            TokenType::Identifier("a".to_string()),
            TokenType::EqualEqual,
            TokenType::Identifier("b".to_string()),
            TokenType::BangEqual,
            TokenType::Identifier("c".to_string()),
            TokenType::Assign,
            TokenType::Bang,
            TokenType::Identifier("d".to_string()),
            TokenType::Eof,
        ];
        assert_eq!(token_types(source), expected);
    }

    #[test]
    fn test_collection_delimiters() {
        let source = "[1, 2][0]; {\"a\": 1}";
        let expected = vec![
            TokenType::LeftBracket,
            TokenType::Integer("1".to_string()),
            TokenType::Comma,
            TokenType::Integer("2".to_string()),
            TokenType::RightBracket,
            TokenType::LeftBracket,
            TokenType::Integer("0".to_string()),
            TokenType::RightBracket,
            TokenType::Semicolon,
            TokenType::LeftBrace,
            TokenType::String("a".to_string()),
            TokenType::Colon,
            TokenType::Integer("1".to_string()),
            TokenType::RightBrace,
            TokenType::Eof,
        ];
        assert_eq!(token_types(source), expected);
    }

    #[test]
    fn test_spans() {
        let tokens = tokens("let a = 5;\n  a").unwrap();
        assert_eq!(tokens[1].span, Span::new(1, 5, 1, 6));
        assert_eq!(tokens[5].span, Span::new(2, 3, 2, 4));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            tokens("let a = @;"),
            Err(TokenizeError::UnexpectedCharacter('@', _))
        ));
        assert!(matches!(
            tokens("\"open"),
            Err(TokenizeError::UnterminatedString(_))
        ));
    }
}
