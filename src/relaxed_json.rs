//! A tolerant JSON parser: single quotes, unquoted object keys, trailing
//! commas, and the Python literals `True` / `False` / `None` are all
//! accepted. Produces a plain `serde_json::Value` tree.
//!
//! This is deliberately a small hand-rolled recursive-descent parser
//! rather than a `serde_json::Value` deserialize, because `serde_json`
//! itself rejects every one of the malformations above and there is no
//! tolerant mode to opt into.

use serde_json::{Map, Number, Value};

#[derive(Debug)]
pub struct RelaxedJsonError {
    pub message: String,
    pub position: usize,
}

impl std::fmt::Display for RelaxedJsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at byte {}", self.message, self.position)
    }
}

impl std::error::Error for RelaxedJsonError {}

pub fn parse(input: &str) -> Result<Value, RelaxedJsonError> {
    let mut p = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    p.skip_ws();
    let value = p.parse_value()?;
    p.skip_ws();
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

type PResult<T> = Result<T, RelaxedJsonError>;

impl Parser {
    fn err(&self, message: impl Into<String>) -> RelaxedJsonError {
        RelaxedJsonError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '/' && self.chars.get(self.pos + 1) == Some(&'/') {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, c: char) -> PResult<()> {
        match self.bump() {
            Some(got) if got == c => Ok(()),
            Some(got) => Err(self.err(format!("expected '{c}', found '{got}'"))),
            None => Err(self.err(format!("expected '{c}', found end of input"))),
        }
    }

    fn parse_value(&mut self) -> PResult<Value> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.parse_object(),
            Some('[') => self.parse_array(),
            Some('"') | Some('\'') => self.parse_string().map(Value::String),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number(),
            Some(_) => self.parse_bareword(),
            None => Err(self.err("unexpected end of input")),
        }
    }

    fn parse_object(&mut self) -> PResult<Value> {
        self.expect('{')?;
        let mut map = Map::new();
        self.skip_ws();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump();
                break;
            }
            let key = self.parse_key()?;
            self.skip_ws();
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                    self.skip_ws();
                    if self.peek() == Some('}') {
                        self.bump();
                        break;
                    }
                }
                Some('}') => {
                    self.bump();
                    break;
                }
                Some(c) => return Err(self.err(format!("expected ',' or '}}', found '{c}'"))),
                None => return Err(self.err("unexpected end of input in object")),
            }
        }
        Ok(Value::Object(map))
    }

    fn parse_key(&mut self) -> PResult<String> {
        match self.peek() {
            Some('"') | Some('\'') => self.parse_string(),
            Some(c) if c == '_' || c == '$' || c.is_alphabetic() => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == '_' || c == '$' || c.is_alphanumeric() {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Ok(self.chars[start..self.pos].iter().collect())
            }
            Some(c) => Err(self.err(format!("unexpected key start '{c}'"))),
            None => Err(self.err("unexpected end of input in key")),
        }
    }

    fn parse_array(&mut self) -> PResult<Value> {
        self.expect('[')?;
        let mut items = Vec::new();
        self.skip_ws();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.bump();
                break;
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                    self.skip_ws();
                    if self.peek() == Some(']') {
                        self.bump();
                        break;
                    }
                }
                Some(']') => {
                    self.bump();
                    break;
                }
                Some(c) => return Err(self.err(format!("expected ',' or ']', found '{c}'"))),
                None => return Err(self.err("unexpected end of input in array")),
            }
        }
        Ok(Value::Array(items))
    }

    fn parse_string(&mut self) -> PResult<String> {
        let quote = self.bump().ok_or_else(|| self.err("expected string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('b') => out.push('\u{8}'),
                    Some('f') => out.push('\u{c}'),
                    Some('u') => {
                        let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| self.err("invalid unicode escape"))?;
                        if let Some(c) = char::from_u32(code) {
                            out.push(c);
                        }
                    }
                    Some(other) => out.push(other),
                    None => return Err(self.err("unterminated escape")),
                },
                Some(c) => out.push(c),
                None => return Err(self.err("unterminated string")),
            }
        }
        Ok(out)
    }

    fn parse_number(&mut self) -> PResult<Value> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.pos += 1;
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(i) = text.parse::<i64>() {
            Ok(Value::Number(Number::from(i)))
        } else {
            text.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| self.err(format!("invalid number literal '{text}'")))
        }
    }

    fn parse_bareword(&mut self) -> PResult<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "true" | "True" | "TRUE" => Ok(Value::Bool(true)),
            "false" | "False" | "FALSE" => Ok(Value::Bool(false)),
            "null" | "None" | "NULL" | "Null" => Ok(Value::Null),
            "" => Err(self.err("unexpected character")),
            other => Ok(Value::String(other.to_string())),
        }
    }
}
