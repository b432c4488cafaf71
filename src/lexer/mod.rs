//! # Lexer
//!
//! Tokenizer for Cedar source. Whitespace and commas separate tokens; `;`
//! starts a line comment; everything that is not a delimiter, a number, a
//! string, or reader sugar is a symbol.

mod token;

pub use token::*;

use std::{error::Error, fmt::Display, iter::Peekable, str::Chars};

const DELIMITERS: &str = "()[]{}\"'`~;,";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError(String);

pub type LexResult<T> = Result<T, LexError>;

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl Error for LexError {}

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    tokens: Vec<Token>,
    iterator: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        let iterator = input.chars().peekable();

        Self {
            tokens: vec![],
            iterator,
            line: 1,
            col: 1,
        }
    }

    fn peek(&mut self) -> Option<&char> {
        self.iterator.peek()
    }

    fn next(&mut self) -> Option<char> {
        let next = self.iterator.next();
        match next {
            Some('\n') => {
                self.line += 1;
                self.col = 1;
            }
            Some(_) => self.col += 1,
            None => {}
        }
        next
    }

    fn next_if(&mut self, func: impl FnOnce(&char) -> bool) -> Option<char> {
        if self.peek().map(func).unwrap_or(false) {
            self.next()
        } else {
            None
        }
    }

    fn eat_whitespace(&mut self) {
        loop {
            if self.next_if(|c| c.is_whitespace() || *c == ',').is_some() {
                continue;
            }
            if self.peek() == Some(&';') {
                while self.next_if(|c| *c != '\n').is_some() {}
                continue;
            }
            break;
        }
    }

    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        self.lex_internal()?;

        Ok(self.tokens)
    }

    fn lex_internal(&mut self) -> LexResult<()> {
        self.eat_whitespace();

        let Some(next) = self.peek() else {
            return Ok(());
        };

        match next {
            '(' | ')' | '[' | ']' | '{' | '}' | '\'' | '`' | '~' => self.lex_special()?,
            '"' => self.lex_string()?,
            '0'..='9' => self.lex_numeric()?,
            '-' | '+' => {
                // a sign is a number only when digits follow; otherwise it
                // is an ordinary symbol
                let mut lookahead = self.iterator.clone();
                lookahead.next();
                if lookahead.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    self.lex_numeric()?;
                } else {
                    self.lex_symbol()?;
                }
            }
            ':' => self.lex_keyword()?,
            _ => self.lex_symbol()?,
        };

        Ok(())
    }

    fn lex_special(&mut self) -> LexResult<()> {
        let position = (self.line, self.col);
        let Some(next) = self.next() else {
            return Ok(());
        };

        let token = match next {
            '(' => Token::LParen { position },
            ')' => Token::RParen { position },
            '[' => Token::LBracket { position },
            ']' => Token::RBracket { position },
            '{' => Token::LBrace { position },
            '}' => Token::RBrace { position },
            '\'' => Token::Quote { position },
            '`' => Token::Quasiquote { position },
            '~' => {
                if self.next_if(|c| *c == '@').is_some() {
                    Token::UnquoteSplice { position }
                } else {
                    Token::Unquote { position }
                }
            }
            other => return Err(LexError(format!("failed to lex '{other}'"))),
        };

        self.tokens.push(token);
        self.lex_internal()
    }

    fn lex_string(&mut self) -> LexResult<()> {
        let position = (self.line, self.col);
        self.next();

        let mut raw = String::new();
        loop {
            let Some(next) = self.next() else {
                return Err(LexError(format!(
                    "unterminated string starting at {}:{}",
                    position.0, position.1
                )));
            };
            match next {
                '"' => break,
                '\\' => {
                    raw.push('\\');
                    let Some(escaped) = self.next() else {
                        return Err(LexError("dangling escape at end of input".into()));
                    };
                    raw.push(escaped);
                }
                other => raw.push(other),
            }
        }

        let value = unescape::unescape(&raw)
            .ok_or_else(|| LexError(format!("invalid escape sequence in \"{raw}\"")))?;

        self.tokens.push(Token::Str { value, position });
        self.lex_internal()
    }

    fn lex_numeric(&mut self) -> LexResult<()> {
        let position = (self.line, self.col);
        let mut stack = vec![];

        if let Some(sign) = self.next_if(|c| *c == '-' || *c == '+') {
            stack.push(sign);
        }
        while let Some(next) = self.next_if(|c| c.is_ascii_digit()) {
            stack.push(next);
        }

        let mut is_float = false;
        if self.peek() == Some(&'.') {
            let mut lookahead = self.iterator.clone();
            lookahead.next();
            if lookahead.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                is_float = true;
                stack.push(self.next().unwrap());
                while let Some(next) = self.next_if(|c| c.is_ascii_digit()) {
                    stack.push(next);
                }
            }
        }

        let read = stack.iter().collect::<String>();

        let token = if is_float {
            read.parse::<f64>()
                .map(|value| Token::Float { value, position })
                .map_err(|_| LexError(format!("failed to parse float '{read}'")))?
        } else {
            read.parse::<i64>()
                .map(|value| Token::Int { value, position })
                .map_err(|_| LexError(format!("failed to parse integer '{read}'")))?
        };

        self.tokens.push(token);
        self.lex_internal()
    }

    fn lex_keyword(&mut self) -> LexResult<()> {
        let position = (self.line, self.col);
        let mut stack = vec![self.next().unwrap()];

        while let Some(next) = self.next_if(is_symbol_char) {
            stack.push(next);
        }

        if stack.len() == 1 {
            return Err(LexError("':' is not a valid keyword".into()));
        }

        self.tokens.push(Token::Keyword {
            value: stack.iter().collect(),
            position,
        });
        self.lex_internal()
    }

    fn lex_symbol(&mut self) -> LexResult<()> {
        let position = (self.line, self.col);
        let mut stack = vec![];

        while let Some(next) = self.next_if(is_symbol_char) {
            stack.push(next);
        }

        if stack.is_empty() {
            let next = self.next();
            return Err(LexError(format!("failed to lex '{next:?}'")));
        }

        self.tokens.push(Token::Sym {
            value: stack.iter().collect(),
            position,
        });
        self.lex_internal()
    }
}

fn is_symbol_char(c: &char) -> bool {
    !c.is_whitespace() && !DELIMITERS.contains(*c)
}
