//! # Reader
//!
//! Shapes a token stream into s-expression values. Reader sugar expands
//! here: `'x` to `(quote x)`, `` `x `` to `(quasiquote x)`, `~x` to
//! `(unquote x)`, `~@x` to `(unquote-splicing x)`. Square brackets read as
//! vectors and curly braces as dicts.

use std::collections::HashMap;

use crate::{
    error::{EvalError, EvalResult},
    lexer::{Lexer, Token},
    value::{DictKey, Value},
};

pub struct Reader {
    tokens: Vec<Token>,
    index: usize,
}

impl Reader {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, index: 0 }
    }

    /// Lex and shape a whole source string into its top-level forms.
    pub fn read_all(source: &str) -> EvalResult<Vec<Value>> {
        let tokens = Lexer::new(source)
            .lex()
            .map_err(|e| EvalError::parse(e.to_string()))?;
        let mut reader = Reader::new(tokens);
        let mut forms = Vec::new();
        while let Some(form) = reader.read_one()? {
            forms.push(form);
        }
        Ok(forms)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    /// Read the next top-level form, or `None` at end of input.
    pub fn read_one(&mut self) -> EvalResult<Option<Value>> {
        if self.peek().is_none() {
            return Ok(None);
        }
        self.parse_expr().map(Some)
    }

    fn parse_expr(&mut self) -> EvalResult<Value> {
        let Some(token) = self.next() else {
            return Err(EvalError::parse("unexpected end of input"));
        };

        match token {
            Token::LParen { position } => self.parse_list(position),
            Token::LBracket { position } => self.parse_vector(position),
            Token::LBrace { position } => self.parse_dict(position),
            Token::Quote { .. } => self.parse_sugar("quote"),
            Token::Quasiquote { .. } => self.parse_sugar("quasiquote"),
            Token::Unquote { .. } => self.parse_sugar("unquote"),
            Token::UnquoteSplice { .. } => self.parse_sugar("unquote-splicing"),
            Token::Int { value, .. } => Ok(Value::Int(value)),
            Token::Float { value, .. } => Ok(Value::Float(value)),
            Token::Str { value, .. } => Ok(Value::string(value)),
            Token::Keyword { value, .. } => Ok(Value::keyword(&value)),
            Token::Sym { value, .. } => Ok(Value::sym(&value)),
            unexpected => Err(EvalError::parse(format!(
                "unexpected token {:?} at {}:{}",
                unexpected,
                unexpected.position().0,
                unexpected.position().1
            ))),
        }
    }

    fn parse_list(&mut self, open: (usize, usize)) -> EvalResult<Value> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(EvalError::parse(format!(
                        "unexpected end of input in list opened at {}:{}",
                        open.0, open.1
                    )))
                }
                Some(Token::RParen { .. }) => {
                    self.next();
                    // the empty list reads as nil
                    return Ok(Value::list_from_slice(&items));
                }
                Some(_) => items.push(self.parse_expr()?),
            }
        }
    }

    fn parse_vector(&mut self, open: (usize, usize)) -> EvalResult<Value> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(EvalError::parse(format!(
                        "unexpected end of input in vector opened at {}:{}",
                        open.0, open.1
                    )))
                }
                Some(Token::RBracket { .. }) => {
                    self.next();
                    return Ok(Value::vector(items));
                }
                Some(_) => items.push(self.parse_expr()?),
            }
        }
    }

    fn parse_dict(&mut self, open: (usize, usize)) -> EvalResult<Value> {
        let mut items: Vec<Value> = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(EvalError::parse(format!(
                        "unexpected end of input in dict opened at {}:{}",
                        open.0, open.1
                    )))
                }
                Some(Token::RBrace { .. }) => {
                    self.next();
                    if items.len() % 2 != 0 {
                        return Err(EvalError::parse(format!(
                            "dict literal at {}:{} needs an even number of forms",
                            open.0, open.1
                        )));
                    }
                    let mut entries = HashMap::new();
                    for pair in items.chunks(2) {
                        entries.insert(DictKey(pair[0].clone()), pair[1].clone());
                    }
                    return Ok(Value::dict(entries));
                }
                Some(_) => items.push(self.parse_expr()?),
            }
        }
    }

    fn parse_sugar(&mut self, name: &str) -> EvalResult<Value> {
        let inner = self.parse_expr()?;
        Ok(Value::list_from_slice(&[Value::sym(name), inner]))
    }
}
