//! Tokenizer and recursive-descent parser for `SELECT`-less UQI statements.
//!
//! ```text
//! [DISTINCT] function '(' input ')' FROM DATABASE number
//!     [WHERE predicate '(' input ')'] [LIMIT number] [';']
//! ```

use crate::error::{CoreError, CoreResult};

/// Which part of each entry is fed into a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Input {
    Key,
    Record,
    KeyAndRecord,
}

/// A function or predicate reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    /// Lower-cased name.
    pub name: String,
    pub input: Input,
}

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Statement {
    pub distinct: bool,
    pub function: Call,
    pub db: u16,
    pub predicate: Option<Call>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Variable(String),
    LeftParen,
    RightParen,
    Comma,
    Semicolon,
    Eof,
}

struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn tokenize(mut self) -> CoreResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn take_while(&mut self, accept: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while self.peek_byte().is_some_and(&accept) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn next_token(&mut self) -> CoreResult<Token> {
        while self.peek_byte().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        let Some(b) = self.peek_byte() else {
            return Ok(Token::Eof);
        };

        let single = match b {
            b'(' => Some(Token::LeftParen),
            b')' => Some(Token::RightParen),
            b',' => Some(Token::Comma),
            b';' => Some(Token::Semicolon),
            _ => None,
        };
        if let Some(token) = single {
            self.pos += 1;
            return Ok(token);
        }

        match b {
            b'"' => {
                self.pos += 1;
                let text = self.take_while(|b| b != b'"');
                if self.peek_byte() != Some(b'"') {
                    return Err(CoreError::parser("unterminated quoted name"));
                }
                self.pos += 1;
                if text.is_empty() {
                    return Err(CoreError::parser("empty quoted name"));
                }
                Ok(Token::Quoted(text))
            }
            b'$' => {
                self.pos += 1;
                let name = self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_');
                Ok(Token::Variable(name))
            }
            b if is_word_byte(b) => Ok(Token::Word(self.take_while(is_word_byte))),
            other => Err(CoreError::parser(format!(
                "unexpected character '{}' at offset {}",
                other as char, self.pos
            ))),
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        self.pos += 1;
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Word(word) if word.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &str) -> CoreResult<()> {
        if self.at_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(CoreError::parser(format!(
                "expected {keyword}, found {:?}",
                self.peek()
            )))
        }
    }

    fn expect_token(&mut self, expected: &Token) -> CoreResult<()> {
        let token = self.advance();
        if &token == expected {
            Ok(())
        } else {
            Err(CoreError::parser(format!(
                "expected {expected:?}, found {token:?}"
            )))
        }
    }

    fn parse_statement(&mut self) -> CoreResult<Statement> {
        // `distinct(...)` names a function, `distinct f(...)` is the modifier
        let distinct = self.at_keyword("distinct") && self.peek_at(1) != &Token::LeftParen;
        if distinct {
            self.pos += 1;
        }

        let function = self.parse_call()?;
        self.expect_keyword("from")?;
        self.expect_keyword("database")?;
        let db = self.parse_number()?;
        let db = u16::try_from(db)
            .map_err(|_| CoreError::parser(format!("database name {db} is out of range")))?;

        let predicate = if self.at_keyword("where") {
            self.pos += 1;
            Some(self.parse_call()?)
        } else {
            None
        };

        let limit = if self.at_keyword("limit") {
            self.pos += 1;
            let limit = self.parse_number()?;
            Some(
                u32::try_from(limit)
                    .map_err(|_| CoreError::parser(format!("limit {limit} is out of range")))?,
            )
        } else {
            None
        };

        if self.peek() == &Token::Semicolon {
            self.pos += 1;
        }
        match self.peek() {
            Token::Eof => Ok(Statement {
                distinct,
                function,
                db,
                predicate,
                limit,
            }),
            other => Err(CoreError::parser(format!(
                "unexpected trailing input {other:?}"
            ))),
        }
    }

    fn parse_call(&mut self) -> CoreResult<Call> {
        let name = match self.advance() {
            Token::Word(name) | Token::Quoted(name) => name,
            other => {
                return Err(CoreError::parser(format!(
                    "expected a function name, found {other:?}"
                )))
            }
        };
        self.expect_token(&Token::LeftParen)?;
        let input = self.parse_input()?;
        self.expect_token(&Token::RightParen)?;
        Ok(Call {
            name: name.to_ascii_lowercase(),
            input,
        })
    }

    fn parse_input(&mut self) -> CoreResult<Input> {
        match self.advance() {
            Token::Variable(name) if name == "key" => {
                if self.peek() == &Token::Comma {
                    self.pos += 1;
                    match self.advance() {
                        Token::Variable(name) if name == "record" => Ok(Input::KeyAndRecord),
                        other => Err(CoreError::parser(format!(
                            "expected $record, found {other:?}"
                        ))),
                    }
                } else {
                    Ok(Input::Key)
                }
            }
            Token::Variable(name) if name == "record" => Ok(Input::Record),
            other => Err(CoreError::parser(format!(
                "expected $key or $record, found {other:?}"
            ))),
        }
    }

    fn parse_number(&mut self) -> CoreResult<u64> {
        match self.advance() {
            Token::Word(word) => parse_number(&word),
            other => Err(CoreError::parser(format!(
                "expected a number, found {other:?}"
            ))),
        }
    }
}

/// Decimal, `0x` hexadecimal or leading-zero octal.
fn parse_number(word: &str) -> CoreResult<u64> {
    let parsed = if let Some(hex) = word
        .strip_prefix("0x")
        .or_else(|| word.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else if word.len() > 1 && word.starts_with('0') {
        u64::from_str_radix(&word[1..], 8)
    } else {
        word.parse()
    };
    parsed.map_err(|_| CoreError::parser(format!("invalid number '{word}'")))
}

/// Parses a query. Plugin references (`name@library`) are rejected with
/// `PluginNotFound` once the syntax is known to be valid.
pub(crate) fn parse(query: &str) -> CoreResult<Statement> {
    let tokens = Tokenizer::new(query).tokenize()?;
    let statement = Parser { tokens, pos: 0 }.parse_statement()?;

    let calls = std::iter::once(&statement.function).chain(statement.predicate.as_ref());
    for call in calls {
        if call.name.contains('@') {
            return Err(CoreError::plugin_not_found(call.name.clone()));
        }
    }
    Ok(statement)
}
