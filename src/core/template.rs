//! Template rendering for patch mutations.
//!
//! A compact subset of Go's `text/template` syntax, enough for patch
//! documents:
//!
//! ```text
//! {{ .Values.env }}                     field lookup
//! {{ .Path | upper }}                   pipelines
//! {{ .Values.region | default "eu" }}   function calls with literals
//! {{- .Values.x -}}                     whitespace trim markers
//! {{/* comment */}}
//! ```
//!
//! The data root is a JSON value, usually built with [`context`]. Looking up
//! a key that does not exist fails the render.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

const FUNCTIONS: &[&str] = &[
    "upper",
    "lower",
    "trim",
    "trimPrefix",
    "trimSuffix",
    "replace",
    "default",
    "quote",
    "b64enc",
    "b64dec",
    "required",
];

/// Build the template data root `{ Values, Path }`.
pub fn context(values: &Value, path: Option<&str>) -> Value {
    let mut root = Map::new();
    root.insert("Values".to_string(), values.clone());
    if let Some(path) = path {
        root.insert("Path".to_string(), Value::String(path.to_string()));
    }
    Value::Object(root)
}

/// Parse and render `source` in one go.
pub fn render(source: &str, data: &Value) -> Result<String> {
    Template::parse(source)?.render(data)
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone)]
enum Command {
    Value(Operand),
    Call(String, Vec<Operand>),
}

#[derive(Debug, Clone)]
enum Operand {
    Field(Vec<String>),
    Literal(Value),
    Nested(Box<Pipeline>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Vec<String>),
    Literal(Value),
    Ident(String),
    Pipe,
    Open,
    Close,
}

impl Template {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// Returns `Error::Template` for unterminated actions, bad literals and
    /// unknown functions.
    pub fn parse(source: &str) -> Result<Self> {
        let fail = |reason: String| Error::template(source, reason);
        let mut nodes = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            let mut text = &rest[..start];
            let mut after = &rest[start + 2..];
            if after.starts_with('-') && after[1..].starts_with(char::is_whitespace) {
                text = text.trim_end();
                after = &after[1..];
            }
            if !text.is_empty() {
                nodes.push(Node::Text(text.to_string()));
            }

            let (body, trim_right, remaining) = split_action(after).map_err(fail)?;
            let body = body.trim();
            if !(body.starts_with("/*") && body.ends_with("*/")) {
                let tokens = lex(body).map_err(fail)?;
                let mut parser = Parser { tokens, pos: 0 };
                let pipeline = parser.pipeline().map_err(fail)?;
                if parser.pos != parser.tokens.len() {
                    return Err(fail("unexpected ')'".to_string()));
                }
                nodes.push(Node::Action(pipeline));
            }

            rest = if trim_right {
                remaining.trim_start()
            } else {
                remaining
            };
        }
        if !rest.is_empty() {
            nodes.push(Node::Text(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    /// Whether the template contains any action.
    pub fn is_static(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Text(_)))
    }

    /// Render against `data`.
    pub fn render(&self, data: &Value) -> Result<String> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => {
                    let value = self.eval(pipeline, data)?;
                    out.push_str(&to_text(&value));
                }
            }
        }
        Ok(out)
    }

    fn eval(&self, pipeline: &Pipeline, data: &Value) -> Result<Value> {
        let mut previous: Option<Value> = None;
        for command in &pipeline.commands {
            previous = Some(match command {
                Command::Value(operand) => {
                    if previous.is_some() {
                        return Err(Error::template(
                            &self.source,
                            "cannot pipe into a non-function",
                        ));
                    }
                    self.operand(operand, data)?
                }
                Command::Call(name, operands) => {
                    let mut args = operands
                        .iter()
                        .map(|o| self.operand(o, data))
                        .collect::<Result<Vec<_>>>()?;
                    if let Some(value) = previous.take() {
                        args.push(value);
                    }
                    self.call(name, args)?
                }
            });
        }
        Ok(previous.unwrap_or(Value::Null))
    }

    fn operand(&self, operand: &Operand, data: &Value) -> Result<Value> {
        match operand {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Nested(pipeline) => self.eval(pipeline, data),
            Operand::Field(path) => {
                let mut current = data;
                for segment in path {
                    current = match current {
                        Value::Object(map) => map.get(segment).ok_or_else(|| {
                            Error::template(
                                &self.source,
                                format!("map has no entry for key \"{}\"", segment),
                            )
                        })?,
                        other => {
                            return Err(Error::template(
                                &self.source,
                                format!("cannot read field \"{}\" of {}", segment, kind(other)),
                            ))
                        }
                    };
                }
                Ok(current.clone())
            }
        }
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let arity = match name {
            "upper" | "lower" | "trim" | "quote" | "b64enc" | "b64dec" => 1,
            "trimPrefix" | "trimSuffix" | "default" | "required" => 2,
            "replace" => 3,
            _ => 0,
        };
        if args.len() != arity {
            return Err(Error::template(
                &self.source,
                format!(
                    "wrong number of args for {}: want {} got {}",
                    name,
                    arity,
                    args.len()
                ),
            ));
        }
        match name {
            "default" => {
                let mut args = args;
                let value = args.pop().unwrap_or(Value::Null);
                let fallback = args.pop().unwrap_or(Value::Null);
                return Ok(if is_empty(&value) { fallback } else { value });
            }
            "required" => {
                if is_empty_text(&args[1]) {
                    return Err(Error::template(&self.source, to_text(&args[0])));
                }
                return Ok(args[1].clone());
            }
            _ => {}
        }

        let text = |i: usize| to_text(&args[i]);

        let result = match name {
            "upper" => text(0).to_uppercase(),
            "lower" => text(0).to_lowercase(),
            "trim" => text(0).trim().to_string(),
            "trimPrefix" => {
                let s = text(1);
                s.strip_prefix(text(0).as_str()).unwrap_or(&s).to_string()
            }
            "trimSuffix" => {
                let s = text(1);
                s.strip_suffix(text(0).as_str()).unwrap_or(&s).to_string()
            }
            "replace" => text(2).replace(text(0).as_str(), text(1).as_str()),
            "quote" => Value::String(text(0)).to_string(),
            "b64enc" => STANDARD.encode(text(0)),
            "b64dec" => {
                let decoded = STANDARD
                    .decode(text(0))
                    .map_err(|e| Error::template(&self.source, format!("b64dec: {}", e)))?;
                String::from_utf8(decoded)
                    .map_err(|e| Error::template(&self.source, format!("b64dec: {}", e)))?
            }
            other => {
                return Err(Error::template(
                    &self.source,
                    format!("function \"{}\" not defined", other),
                ))
            }
        };
        Ok(Value::String(result))
    }
}

/// Split an action body from the text following its closing `}}`.
fn split_action(s: &str) -> std::result::Result<(&str, bool, &str), String> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' && q == '"' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c == '"' || c == '`' {
            quote = Some(c);
        } else if s[i..].starts_with("}}") {
            let body = &s[..i];
            let remaining = &s[i + 2..];
            if let Some(stripped) = body.strip_suffix('-') {
                if stripped.ends_with(char::is_whitespace) {
                    return Ok((stripped, true, remaining));
                }
            }
            return Ok((body, false, remaining));
        }
    }
    Err("unclosed action".to_string())
}

fn lex(body: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '"' => {
                let mut out = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated quoted string".to_string()),
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = chars.get(i + 1).ok_or("unterminated quoted string")?;
                            out.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(other) => {
                            out.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::String(out)));
                i += 1;
            }
            '`' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|c| *c == '`')
                    .ok_or("unterminated raw string")?;
                let raw: String = chars[i + 1..i + 1 + end].iter().collect();
                tokens.push(Token::Literal(Value::String(raw)));
                i += end + 2;
            }
            '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && !is_delimiter(chars[i]) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let path: Vec<String> = if text == "." {
                    Vec::new()
                } else {
                    text[1..].split('.').map(str::to_string).collect()
                };
                if path.iter().any(String::is_empty) {
                    return Err(format!("bad field reference '{}'", text));
                }
                tokens.push(Token::Field(path));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let start = i;
                i += 1;
                while i < chars.len() && !is_delimiter(chars[i]) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = if let Ok(n) = text.parse::<i64>() {
                    Value::from(n)
                } else if let Ok(f) = text.parse::<f64>() {
                    serde_json::Number::from_f64(f)
                        .map(Value::Number)
                        .ok_or_else(|| format!("bad number '{}'", text))?
                } else {
                    return Err(format!("bad number '{}'", text));
                };
                tokens.push(Token::Literal(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "nil" => Token::Literal(Value::Null),
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '|' | '(' | ')')
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn pipeline(&mut self) -> std::result::Result<Pipeline, String> {
        let mut commands = vec![self.command()?];
        while self.tokens.get(self.pos) == Some(&Token::Pipe) {
            self.pos += 1;
            commands.push(self.command()?);
        }
        Ok(Pipeline { commands })
    }

    fn command(&mut self) -> std::result::Result<Command, String> {
        if let Some(Token::Ident(name)) = self.tokens.get(self.pos).cloned() {
            if !FUNCTIONS.contains(&name.as_str()) {
                return Err(format!("function \"{}\" not defined", name));
            }
            self.pos += 1;
            let mut args = Vec::new();
            while let Some(operand) = self.operand()? {
                args.push(operand);
            }
            return Ok(Command::Call(name, args));
        }

        let operand = self.operand()?.ok_or("missing value for command")?;
        if self.operand_follows() {
            return Err("can't give argument to non-function".to_string());
        }
        Ok(Command::Value(operand))
    }

    fn operand_follows(&self) -> bool {
        matches!(
            self.tokens.get(self.pos),
            Some(Token::Field(_) | Token::Literal(_) | Token::Open | Token::Ident(_))
        )
    }

    fn operand(&mut self) -> std::result::Result<Option<Operand>, String> {
        let operand = match self.tokens.get(self.pos).cloned() {
            Some(Token::Field(path)) => Operand::Field(path),
            Some(Token::Literal(value)) => Operand::Literal(value),
            Some(Token::Open) => {
                self.pos += 1;
                let nested = self.pipeline()?;
                if self.tokens.get(self.pos) != Some(&Token::Close) {
                    return Err("unclosed left paren".to_string());
                }
                Operand::Nested(Box::new(nested))
            }
            Some(Token::Ident(name)) => {
                return Err(format!("function \"{}\" used as an argument; wrap it in parens", name))
            }
            _ => return Ok(None),
        };
        self.pos += 1;
        Ok(Some(operand))
    }
}

/// Textual rendering of a value, as printed by an action.
fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn is_empty_text(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}
