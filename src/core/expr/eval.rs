//! Tree-walking evaluator.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use zeroize::Zeroizing;

use super::parser::{BinaryOp, Expr, Literal, UnaryOp};
use crate::core::domain::{Package, KV};
use crate::core::{cso, glob};

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Runtime value. Package and secret handles borrow from the package under
/// evaluation.
#[derive(Debug, Clone)]
pub(crate) enum Value<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value<'a>>),
    Map(BTreeMap<String, Value<'a>>),
    Package(&'a Package),
    Secret(Option<&'a KV>),
}

impl Value<'_> {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "double",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Package(_) => "package",
            Self::Secret(_) => "secret",
        }
    }
}

type Outcome<'a> = Result<Value<'a>, String>;

pub(crate) fn evaluate<'a>(expr: &Expr, package: &'a Package) -> Outcome<'a> {
    match expr {
        Expr::Literal(literal) => Ok(match literal {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::Int(*n),
            Literal::Float(n) => Value::Float(*n),
            Literal::Str(s) => Value::Str(s.clone()),
        }),
        Expr::Ident(_) => Ok(Value::Package(package)),
        Expr::List(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| evaluate(item, package))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Unary(op, operand) => match (op, evaluate(operand, package)?) {
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, Value::Int(n)) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string()),
            (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
            (_, other) => Err(format!("no such overload for {}", other.type_name())),
        },
        Expr::Binary(BinaryOp::And, left, right) => {
            if !truth(evaluate(left, package)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truth(evaluate(right, package)?)?))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            if truth(evaluate(left, package)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truth(evaluate(right, package)?)?))
        }
        Expr::Binary(op, left, right) => {
            binary(*op, evaluate(left, package)?, evaluate(right, package)?)
        }
        Expr::Ternary(condition, then, otherwise) => {
            if truth(evaluate(condition, package)?)? {
                evaluate(then, package)
            } else {
                evaluate(otherwise, package)
            }
        }
        Expr::Member(target, field) => member(evaluate(target, package)?, field),
        Expr::Index(target, index) => {
            let target = evaluate(target, package)?;
            let index = evaluate(index, package)?;
            match (target, index) {
                (Value::List(items), Value::Int(i)) => usize::try_from(i)
                    .ok()
                    .and_then(|i| items.into_iter().nth(i))
                    .ok_or_else(|| format!("index {} out of range", i)),
                (Value::Map(entries), Value::Str(key)) => lookup(entries, &key),
                (target, index) => Err(format!(
                    "cannot index {} with {}",
                    target.type_name(),
                    index.type_name()
                )),
            }
        }
        Expr::Call(target, method, args) => {
            let target = evaluate(target, package)?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, package))
                .collect::<Result<Vec<_>, _>>()?;
            call(target, method, args)
        }
    }
}

fn truth(value: Value<'_>) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(format!("expected bool, got {}", other.type_name())),
    }
}

fn lookup<'a>(mut entries: BTreeMap<String, Value<'a>>, key: &str) -> Outcome<'a> {
    entries
        .remove(key)
        .ok_or_else(|| format!("no such key: '{}'", key))
}

fn member<'a>(target: Value<'a>, field: &str) -> Outcome<'a> {
    match target {
        Value::Package(package) => match field {
            "name" => Ok(Value::Str(package.name.clone())),
            "labels" => Ok(string_map(&package.labels)),
            "annotations" => Ok(string_map(&package.annotations)),
            other => Err(format!("undefined field '{}'", other)),
        },
        Value::Map(entries) => lookup(entries, field),
        other => Err(format!(
            "cannot select field '{}' on {}",
            field,
            other.type_name()
        )),
    }
}

fn string_map<'a>(map: &BTreeMap<String, String>) -> Value<'a> {
    Value::Map(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
            .collect(),
    )
}

fn call<'a>(target: Value<'a>, method: &str, args: Vec<Value<'a>>) -> Outcome<'a> {
    let mut args = args.into_iter();

    match (target, method) {
        (Value::Package(package), "match_path") => {
            let pattern = next_string(&mut args, method)?;
            let matcher = glob::compile_glob(&pattern).map_err(|e| e.to_string())?;
            Ok(Value::Bool(matcher.is_match(&package.name)))
        }
        (Value::Package(package), "has_secret") => {
            let key = next_string(&mut args, method)?;
            Ok(Value::Bool(package.secret(&key).is_some()))
        }
        (Value::Package(package), "has_all_secrets" | "has_any_secrets") => {
            let keys = match next_list(&mut args) {
                Some(items) => items,
                None => return Err(format!("'{}' expects a list", method)),
            };
            let mut present = Vec::with_capacity(keys.len());
            for key in keys {
                match key {
                    Value::Str(key) => present.push(package.secret(&key).is_some()),
                    other => {
                        return Err(format!(
                            "secret keys must be strings, got {}",
                            other.type_name()
                        ))
                    }
                }
            }
            Ok(Value::Bool(if method == "has_all_secrets" {
                present.iter().all(|p| *p)
            } else {
                present.iter().any(|p| *p)
            }))
        }
        (Value::Package(package), "is_cso_compliant") => {
            Ok(Value::Bool(cso::is_compliant(&package.name)))
        }
        (Value::Package(package), "secret") => {
            let key = next_string(&mut args, method)?;
            Ok(Value::Secret(package.secret(&key)))
        }
        (Value::Secret(kv), validator) => secret(kv, validator).map(Value::Bool),
        (Value::Str(s), "startsWith") => {
            let needle = next_string(&mut args, method)?;
            Ok(Value::Bool(s.starts_with(needle.as_str())))
        }
        (Value::Str(s), "endsWith") => {
            let needle = next_string(&mut args, method)?;
            Ok(Value::Bool(s.ends_with(needle.as_str())))
        }
        (Value::Str(s), "contains") => {
            let needle = next_string(&mut args, method)?;
            Ok(Value::Bool(s.contains(needle.as_str())))
        }
        (Value::Str(s), "matches") => {
            let pattern = next_string(&mut args, method)?;
            let re = Regex::new(&pattern).map_err(|e| e.to_string())?;
            Ok(Value::Bool(re.is_match(&s)))
        }
        (Value::Str(s), "size") => Ok(Value::Int(count(s.chars().count()))),
        (Value::List(items), "size") => Ok(Value::Int(count(items.len()))),
        (Value::Map(entries), "size") => Ok(Value::Int(count(entries.len()))),
        (target, method) => Err(format!(
            "no such method '{}' on {}",
            method,
            target.type_name()
        )),
    }
}

fn next_string(args: &mut std::vec::IntoIter<Value<'_>>, method: &str) -> Result<String, String> {
    match args.next() {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(format!(
            "'{}' expects a string, got {}",
            method,
            other.type_name()
        )),
        None => Err(format!("'{}' expects an argument", method)),
    }
}

fn next_list<'a>(args: &mut std::vec::IntoIter<Value<'a>>) -> Option<Vec<Value<'a>>> {
    match args.next() {
        Some(Value::List(items)) => Some(items),
        _ => None,
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Syntactic validators over the unpacked secret value. A missing secret
/// satisfies none of them.
fn secret(kv: Option<&KV>, validator: &str) -> Result<bool, String> {
    let Some(kv) = kv else {
        return Ok(false);
    };
    let text = Zeroizing::new(kv.to_text().map_err(|e| e.to_string())?);

    Ok(match validator {
        "is_required" => !text.trim().is_empty(),
        "is_base64" => !text.is_empty() && STANDARD.decode(text.as_bytes()).is_ok(),
        "is_url" => url::Url::parse(&text).is_ok(),
        "is_uuid" => uuid::Uuid::parse_str(&text).is_ok(),
        "is_email" => Regex::new(EMAIL_PATTERN)
            .map_err(|e| e.to_string())?
            .is_match(&text),
        "is_json" => serde_json::from_str::<serde_json::Value>(&text).is_ok(),
        other => return Err(format!("no such method '{}' on secret", other)),
    })
}

fn binary<'a>(op: BinaryOp, left: Value<'a>, right: Value<'a>) -> Outcome<'a> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In => match right {
            Value::List(items) => Ok(Value::Bool(items.iter().any(|i| equals(&left, i)))),
            Value::Map(entries) => match left {
                Value::Str(key) => Ok(Value::Bool(entries.contains_key(&key))),
                other => Err(format!("map keys are strings, got {}", other.type_name())),
            },
            other => Err(format!("'in' needs a list or map, got {}", other.type_name())),
        },
        _ => arithmetic(op, left, right),
    }
}

fn arithmetic<'a>(op: BinaryOp, left: Value<'a>, right: Value<'a>) -> Outcome<'a> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => Ok(Value::Str(a + &b)),
        (Value::List(mut a), Value::List(b)) if op == BinaryOp::Add => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| "integer overflow or division by zero".to_string())
        }
        (a, b) => match (number(&a), number(&b)) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            })),
            _ => Err(format!(
                "no such overload for {} and {}",
                a.type_name(),
                b.type_name()
            )),
        },
    }
}

fn number(value: &Value<'_>) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    }
}

fn equals(left: &Value<'_>, right: &Value<'_>) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equals(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| equals(v, w)))
        }
        (a, b) => match (number(a), number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn compare(left: &Value<'_>, right: &Value<'_>) -> Result<Ordering, String> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (a, b) => match (number(a), number(b)) {
            (Some(x), Some(y)) => x
                .partial_cmp(&y)
                .ok_or_else(|| "cannot order NaN".to_string()),
            _ => Err(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            )),
        },
    }
}
