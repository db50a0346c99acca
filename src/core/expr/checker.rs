//! Static checks.
//!
//! Resolves identifiers, field names and method signatures before any
//! package is evaluated, and infers the result type where it is known.

use super::parser::{BinaryOp, Expr, Literal, UnaryOp};

/// Static type of an expression. `Dyn` is only known at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Type {
    Dyn,
    Null,
    Bool,
    Int,
    Float,
    String,
    List,
    Map,
    Package,
    Secret,
}

/// Name of the identifier bound to the package under evaluation.
pub(crate) const PACKAGE_IDENT: &str = "p";

/// Method signature: receiver, name, parameter types, result type.
type Signature = (Type, &'static str, &'static [Type], Type);

const METHODS: &[Signature] = &[
    (Type::Package, "match_path", &[Type::String], Type::Bool),
    (Type::Package, "has_secret", &[Type::String], Type::Bool),
    (Type::Package, "has_all_secrets", &[Type::List], Type::Bool),
    (Type::Package, "has_any_secrets", &[Type::List], Type::Bool),
    (Type::Package, "is_cso_compliant", &[], Type::Bool),
    (Type::Package, "secret", &[Type::String], Type::Secret),
    (Type::Secret, "is_base64", &[], Type::Bool),
    (Type::Secret, "is_required", &[], Type::Bool),
    (Type::Secret, "is_url", &[], Type::Bool),
    (Type::Secret, "is_uuid", &[], Type::Bool),
    (Type::Secret, "is_email", &[], Type::Bool),
    (Type::Secret, "is_json", &[], Type::Bool),
    (Type::String, "startsWith", &[Type::String], Type::Bool),
    (Type::String, "endsWith", &[Type::String], Type::Bool),
    (Type::String, "contains", &[Type::String], Type::Bool),
    (Type::String, "matches", &[Type::String], Type::Bool),
    (Type::String, "size", &[], Type::Int),
    (Type::List, "size", &[], Type::Int),
    (Type::Map, "size", &[], Type::Int),
];

pub(crate) fn check(expr: &Expr) -> Result<Type, String> {
    match expr {
        Expr::Literal(literal) => Ok(match literal {
            Literal::Null => Type::Null,
            Literal::Bool(_) => Type::Bool,
            Literal::Int(_) => Type::Int,
            Literal::Float(_) => Type::Float,
            Literal::Str(_) => Type::String,
        }),
        Expr::Ident(name) if name == PACKAGE_IDENT => Ok(Type::Package),
        Expr::Ident(name) => Err(format!("undeclared reference to '{}'", name)),
        Expr::List(items) => {
            for item in items {
                check(item)?;
            }
            Ok(Type::List)
        }
        Expr::Unary(op, operand) => {
            let ty = check(operand)?;
            match (op, ty) {
                (UnaryOp::Not, Type::Bool | Type::Dyn) => Ok(Type::Bool),
                (UnaryOp::Neg, Type::Int | Type::Float | Type::Dyn) => Ok(ty),
                (UnaryOp::Not, other) => Err(format!("cannot negate {:?}", other)),
                (UnaryOp::Neg, other) => Err(format!("cannot apply '-' to {:?}", other)),
            }
        }
        Expr::Binary(op, left, right) => binary(*op, check(left)?, check(right)?),
        Expr::Ternary(condition, then, otherwise) => {
            if !matches!(check(condition)?, Type::Bool | Type::Dyn) {
                return Err("ternary condition must be a bool".to_string());
            }
            let (a, b) = (check(then)?, check(otherwise)?);
            Ok(if a == b { a } else { Type::Dyn })
        }
        Expr::Member(target, field) => match check(target)? {
            Type::Package => match field.as_str() {
                "name" => Ok(Type::String),
                "labels" | "annotations" => Ok(Type::Map),
                other => Err(format!("undefined field '{}' on package", other)),
            },
            Type::Map | Type::Dyn => Ok(Type::Dyn),
            other => Err(format!("cannot select field '{}' on {:?}", field, other)),
        },
        Expr::Index(target, index) => {
            let index = check(index)?;
            match check(target)? {
                Type::List if matches!(index, Type::Int | Type::Dyn) => Ok(Type::Dyn),
                Type::Map if matches!(index, Type::String | Type::Dyn) => Ok(Type::Dyn),
                Type::Dyn => Ok(Type::Dyn),
                other => Err(format!("cannot index {:?} with {:?}", other, index)),
            }
        }
        Expr::Call(target, method, args) => {
            let receiver = check(target)?;
            let arg_types = args.iter().map(check).collect::<Result<Vec<_>, _>>()?;
            call(receiver, method, &arg_types)
        }
    }
}

fn call(receiver: Type, method: &str, args: &[Type]) -> Result<Type, String> {
    let candidates: Vec<&Signature> = METHODS
        .iter()
        .filter(|(on, name, _, _)| {
            *name == method && (*on == receiver || receiver == Type::Dyn)
        })
        .collect();

    let Some((_, _, params, result)) = candidates.first() else {
        return Err(format!(
            "undeclared reference to '{}' on {:?}",
            method, receiver
        ));
    };

    if params.len() != args.len() {
        return Err(format!(
            "'{}' expects {} argument(s), got {}",
            method,
            params.len(),
            args.len()
        ));
    }
    for (param, arg) in params.iter().zip(args) {
        if *arg != Type::Dyn && arg != param {
            return Err(format!(
                "'{}' expects {:?} argument, got {:?}",
                method, param, arg
            ));
        }
    }

    Ok(if receiver == Type::Dyn && candidates.len() > 1 {
        Type::Dyn
    } else {
        *result
    })
}

fn binary(op: BinaryOp, left: Type, right: Type) -> Result<Type, String> {
    use Type::*;
    let numeric = |t: Type| matches!(t, Int | Float | Dyn);

    match op {
        BinaryOp::And | BinaryOp::Or => {
            if matches!(left, Bool | Dyn) && matches!(right, Bool | Dyn) {
                Ok(Bool)
            } else {
                Err(format!("logical operator needs bools, got {:?} and {:?}", left, right))
            }
        }
        BinaryOp::Eq | BinaryOp::Ne => Ok(Bool),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let comparable = (numeric(left) && numeric(right))
                || (matches!(left, String | Dyn) && matches!(right, String | Dyn));
            if comparable {
                Ok(Bool)
            } else {
                Err(format!("cannot compare {:?} with {:?}", left, right))
            }
        }
        BinaryOp::In => match right {
            List | Map | Dyn => Ok(Bool),
            other => Err(format!("'in' needs a list or map, got {:?}", other)),
        },
        BinaryOp::Add => match (left, right) {
            (Dyn, _) | (_, Dyn) => Ok(Dyn),
            (String, String) => Ok(String),
            (List, List) => Ok(List),
            (Int, Int) => Ok(Int),
            (l, r) if numeric(l) && numeric(r) => Ok(Float),
            (l, r) => Err(format!("cannot add {:?} and {:?}", l, r)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => match (left, right) {
            (Dyn, _) | (_, Dyn) => Ok(Dyn),
            (Int, Int) => Ok(Int),
            (l, r) if numeric(l) && numeric(r) => Ok(Float),
            (l, r) => Err(format!("arithmetic on {:?} and {:?}", l, r)),
        },
    }
}
