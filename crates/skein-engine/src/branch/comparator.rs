use std::cmp::Ordering;

use skein_core::error::{Result, SkeinError};
use skein_core::node::{BooleanExpression, ComparisonOp, ConjunctionOp, Operand};
use skein_core::types::{LiteralMap, Primitive};

/// Evaluate a condition against the branch node's bound inputs.
pub fn evaluate(expr: &BooleanExpression, inputs: &LiteralMap) -> Result<bool> {
    match expr {
        BooleanExpression::Comparison { op, left, right } => {
            let left = resolve(left, inputs)?;
            let right = resolve(right, inputs)?;
            compare(*op, &left, &right)
        }
        BooleanExpression::Conjunction { op, left, right } => match op {
            ConjunctionOp::And => Ok(evaluate(left, inputs)? && evaluate(right, inputs)?),
            ConjunctionOp::Or => Ok(evaluate(left, inputs)? || evaluate(right, inputs)?),
        },
    }
}

fn resolve(operand: &Operand, inputs: &LiteralMap) -> Result<Primitive> {
    match operand {
        Operand::Primitive(p) => Ok(p.clone()),
        Operand::Var(name) => {
            let literal = inputs
                .get(name)
                .ok_or_else(|| SkeinError::Expression(format!("unknown variable '{}'", name)))?;
            literal
                .as_primitive()
                .cloned()
                .ok_or_else(|| SkeinError::Expression(format!("variable '{}' is not a scalar", name)))
        }
    }
}

/// Integers and floats compare numerically. Booleans only support equality.
pub fn compare(op: ComparisonOp, left: &Primitive, right: &Primitive) -> Result<bool> {
    let ordering = match (left, right) {
        (Primitive::Integer(a), Primitive::Integer(b)) => a.cmp(b),
        (Primitive::Float(a), Primitive::Float(b)) => float_cmp(*a, *b)?,
        (Primitive::Integer(a), Primitive::Float(b)) => float_cmp(*a as f64, *b)?,
        (Primitive::Float(a), Primitive::Integer(b)) => float_cmp(*a, *b as f64)?,
        (Primitive::String(a), Primitive::String(b)) => a.cmp(b),
        (Primitive::Boolean(a), Primitive::Boolean(b)) => {
            return match op {
                ComparisonOp::Eq => Ok(a == b),
                ComparisonOp::Neq => Ok(a != b),
                _ => Err(SkeinError::Expression(format!(
                    "operator {:?} is not defined for booleans",
                    op
                ))),
            };
        }
        _ => {
            return Err(SkeinError::Expression(format!(
                "cannot compare {:?} with {:?}",
                left, right
            )))
        }
    };

    Ok(match op {
        ComparisonOp::Eq => ordering == Ordering::Equal,
        ComparisonOp::Neq => ordering != Ordering::Equal,
        ComparisonOp::Gt => ordering == Ordering::Greater,
        ComparisonOp::Gte => ordering != Ordering::Less,
        ComparisonOp::Lt => ordering == Ordering::Less,
        ComparisonOp::Lte => ordering != Ordering::Greater,
    })
}

fn float_cmp(a: f64, b: f64) -> Result<Ordering> {
    a.partial_cmp(&b)
        .ok_or_else(|| SkeinError::Expression("cannot compare NaN".to_string()))
}
