//! Expression evaluation with Python-compatible numeric semantics.

use crate::parser::{parse, BinaryOp, Expr, Function, UnaryOp};
use crate::{ExprError, Number, Resolve};

/// Parse and evaluate `src`, resolving references through `resolver`.
pub fn evaluate<R: Resolve + ?Sized>(src: &str, resolver: &mut R) -> Result<Number, ExprError> {
    let expr = parse(src)?;
    evaluate_expr(&expr, resolver)
}

/// Evaluate an already-parsed expression.
pub fn evaluate_expr<R: Resolve + ?Sized>(
    expr: &Expr,
    resolver: &mut R,
) -> Result<Number, ExprError> {
    let value = match expr {
        Expr::Literal(n) => *n,
        Expr::Ref(reference) => {
            resolver
                .resolve(reference)
                .map_err(|reason| ExprError::Reference {
                    reference: reference.to_string(),
                    reason,
                })?
        }
        Expr::Unary(op, operand) => {
            let v = evaluate_expr(operand, resolver)?;
            match (op, v) {
                (UnaryOp::Plus, v) => v,
                (UnaryOp::Neg, Number::Int(i)) => {
                    Number::Int(i.checked_neg().ok_or(ExprError::Overflow)?)
                }
                (UnaryOp::Neg, Number::Float(f)) => Number::Float(-f),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = evaluate_expr(lhs, resolver)?;
            let b = evaluate_expr(rhs, resolver)?;
            binary(*op, a, b)?
        }
        Expr::Call(function, args) => {
            let values = args
                .iter()
                .map(|arg| evaluate_expr(arg, resolver))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, &values)?
        }
    };

    match value {
        Number::Float(f) if !f.is_finite() => Err(ExprError::NotFinite),
        v => Ok(v),
    }
}

fn binary(op: BinaryOp, a: Number, b: Number) -> Result<Number, ExprError> {
    use Number::{Float, Int};

    match (op, a, b) {
        (BinaryOp::Add, Int(x), Int(y)) => x.checked_add(y).map(Int).ok_or(ExprError::Overflow),
        (BinaryOp::Sub, Int(x), Int(y)) => x.checked_sub(y).map(Int).ok_or(ExprError::Overflow),
        (BinaryOp::Mul, Int(x), Int(y)) => x.checked_mul(y).map(Int).ok_or(ExprError::Overflow),
        (BinaryOp::Add, x, y) => Ok(Float(x.as_f64() + y.as_f64())),
        (BinaryOp::Sub, x, y) => Ok(Float(x.as_f64() - y.as_f64())),
        (BinaryOp::Mul, x, y) => Ok(Float(x.as_f64() * y.as_f64())),

        (BinaryOp::Div, x, y) => {
            if y.as_f64() == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            Ok(Float(x.as_f64() / y.as_f64()))
        }

        (BinaryOp::FloorDiv, Int(x), Int(y)) => floor_div(x, y).map(Int),
        (BinaryOp::FloorDiv, x, y) => {
            if y.as_f64() == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            Ok(Float((x.as_f64() / y.as_f64()).floor()))
        }

        (BinaryOp::Mod, Int(x), Int(y)) => floor_mod(x, y).map(Int),
        (BinaryOp::Mod, x, y) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            if y == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            let mut r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) {
                r += y;
            }
            Ok(Float(r))
        }

        (BinaryOp::Pow, Int(x), Int(y)) if y >= 0 => {
            let exp = u32::try_from(y).map_err(|_| ExprError::Overflow)?;
            x.checked_pow(exp).map(Int).ok_or(ExprError::Overflow)
        }
        (BinaryOp::Pow, x, y) => {
            if x.as_f64() == 0.0 && y.as_f64() < 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            Ok(Float(x.as_f64().powf(y.as_f64())))
        }
    }
}

fn floor_div(x: i64, y: i64) -> Result<i64, ExprError> {
    if y == 0 {
        return Err(ExprError::DivisionByZero);
    }
    let q = x.checked_div(y).ok_or(ExprError::Overflow)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floor_mod(x: i64, y: i64) -> Result<i64, ExprError> {
    if y == 0 {
        return Err(ExprError::DivisionByZero);
    }
    let r = x.checked_rem(y).ok_or(ExprError::Overflow)?;
    if r != 0 && ((r < 0) != (y < 0)) {
        Ok(r + y)
    } else {
        Ok(r)
    }
}

fn call(function: Function, args: &[Number]) -> Result<Number, ExprError> {
    let arity = |expected: &'static str| ExprError::Arity {
        function: function.name(),
        expected,
        found: args.len(),
    };

    match function {
        Function::Min | Function::Max => {
            let (first, rest) = args.split_first().ok_or_else(|| arity("at least 1"))?;
            let pick_max = function == Function::Max;
            Ok(rest.iter().fold(*first, |best, &candidate| {
                let better = if pick_max {
                    candidate.as_f64() > best.as_f64()
                } else {
                    candidate.as_f64() < best.as_f64()
                };
                if better {
                    candidate
                } else {
                    best
                }
            }))
        }
        Function::Abs => match args {
            [Number::Int(i)] => i.checked_abs().map(Number::Int).ok_or(ExprError::Overflow),
            [Number::Float(f)] => Ok(Number::Float(f.abs())),
            _ => Err(arity("1")),
        },
        Function::Int => match args {
            [Number::Int(i)] => Ok(Number::Int(*i)),
            [Number::Float(f)] => float_to_int(f.trunc()),
            _ => Err(arity("1")),
        },
        Function::Float => match args {
            [n] => Ok(Number::Float(n.as_f64())),
            _ => Err(arity("1")),
        },
        Function::Round => match args {
            [Number::Int(i)] => Ok(Number::Int(*i)),
            [Number::Float(f)] => float_to_int(round_half_even(*f)),
            [n, Number::Int(digits)] => {
                let scale = 10f64.powi(i32::try_from(*digits).map_err(|_| ExprError::Overflow)?);
                Ok(Number::Float(round_half_even(n.as_f64() * scale) / scale))
            }
            _ => Err(arity("1 or 2")),
        },
    }
}

fn float_to_int(f: f64) -> Result<Number, ExprError> {
    if !f.is_finite() {
        return Err(ExprError::NotFinite);
    }
    if f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(ExprError::Overflow);
    }
    Ok(Number::Int(f as i64))
}

fn round_half_even(x: f64) -> f64 {
    let floor = x.floor();
    let diff = x - floor;
    if diff > 0.5 {
        floor + 1.0
    } else if diff < 0.5 || floor % 2.0 == 0.0 {
        floor
    } else {
        floor + 1.0
    }
}
