//! Row-at-a-time evaluation of scalar expressions.
//!
//! Expressions are first bound to column positions,
//! then evaluated with SQL semantics:
//! nulls propagate, boolean logic is three-valued,
//! and division by zero yields null.

use std::cmp::Ordering;

use tabflow_frame::{DataType, Schema, Value};
use tabflow_verbs::check::position;
use tabflow_verbs::{BinOp, ConstructionError, Expr, ScalarFn, UnOp};

/// An expression with column references resolved to positions.
#[derive(Debug, Clone)]
pub enum Bound {
    Col(usize),
    Lit(Value),
    Cast(Box<Bound>, DataType),
    Bin(BinOp, Box<Bound>, Box<Bound>),
    Un(UnOp, Box<Bound>),
    Func(ScalarFn, Vec<Bound>),
}

pub fn bind(schema: &Schema, expr: &Expr) -> Result<Bound, ConstructionError> {
    Ok(match expr {
        Expr::Col(name) => Bound::Col(position(schema, name, "eval")?),
        Expr::Lit(v) => Bound::Lit(v.clone()),
        Expr::Cast(inner, ty) => Bound::Cast(Box::new(bind(schema, inner)?), *ty),
        Expr::Bin(op, lhs, rhs) => Bound::Bin(*op, Box::new(bind(schema, lhs)?), Box::new(bind(schema, rhs)?)),
        Expr::Un(op, inner) => Bound::Un(*op, Box::new(bind(schema, inner)?)),
        Expr::Func(func, args) => Bound::Func(
            *func,
            args.iter().map(|arg| bind(schema, arg)).collect::<Result<_, _>>()?,
        ),
    })
}

impl Bound {
    pub fn eval(&self, row: &[Value]) -> Value {
        match self {
            Self::Col(i) => row[*i].clone(),
            Self::Lit(v) => v.clone(),
            Self::Cast(inner, ty) => cast(inner.eval(row), *ty),
            Self::Bin(BinOp::And, lhs, rhs) => and(lhs.eval(row), rhs.eval(row)),
            Self::Bin(BinOp::Or, lhs, rhs) => or(lhs.eval(row), rhs.eval(row)),
            Self::Bin(op, lhs, rhs) => {
                let (lhs, rhs) = (lhs.eval(row), rhs.eval(row));
                if lhs.is_null() || rhs.is_null() {
                    return Value::Null;
                }
                if op.is_comparison() {
                    compare(*op, &lhs, &rhs)
                } else {
                    arith(*op, &lhs, &rhs)
                }
            }
            Self::Un(op, inner) => {
                let v = inner.eval(row);
                match (op, v) {
                    (UnOp::IsNull, v) => Value::Bool(v.is_null()),
                    (UnOp::IsNotNull, v) => Value::Bool(!v.is_null()),
                    (UnOp::Neg, Value::I64(v)) => v.checked_neg().map_or(Value::F64(-(v as f64)), Value::I64),
                    (UnOp::Neg, Value::F64(v)) => Value::F64(-v),
                    (UnOp::Not, Value::Bool(b)) => Value::Bool(!b),
                    _ => Value::Null,
                }
            }
            Self::Func(ScalarFn::Coalesce, args) => args
                .iter()
                .map(|arg| arg.eval(row))
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null),
            Self::Func(func, args) => {
                let args = args.iter().map(|arg| arg.eval(row)).collect::<Vec<_>>();
                if args.iter().any(Value::is_null) {
                    return Value::Null;
                }
                scalar(*func, &args)
            }
        }
    }
}

fn cast(v: Value, ty: DataType) -> Value {
    match (v, ty) {
        (Value::Bool(b), DataType::I64) => Value::I64(b as i64),
        (Value::Bool(b), DataType::F64) => Value::F64(b as i64 as f64),
        (Value::I64(v), DataType::F64) => Value::F64(v as f64),
        (Value::F64(v), DataType::I64) => Value::I64(v.trunc() as i64),
        (Value::I64(v), DataType::Str) => Value::str(&v.to_string()),
        (v, _) => v,
    }
}

fn and(lhs: Value, rhs: Value) -> Value {
    match (lhs.as_bool(), rhs.as_bool()) {
        (Some(false), _) | (_, Some(false)) => Value::Bool(false),
        (Some(true), Some(true)) => Value::Bool(true),
        _ => Value::Null,
    }
}

fn or(lhs: Value, rhs: Value) -> Value {
    match (lhs.as_bool(), rhs.as_bool()) {
        (Some(true), _) | (_, Some(true)) => Value::Bool(true),
        (Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    }
}

fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> Value {
    let Some(ord) = lhs.partial_cmp_non_null(rhs) else {
        return Value::Null;
    };
    Value::Bool(match op {
        BinOp::Eq => ord == Ordering::Equal,
        BinOp::Ne => ord != Ordering::Equal,
        BinOp::Lt => ord == Ordering::Less,
        BinOp::Lte => ord != Ordering::Greater,
        BinOp::Gt => ord == Ordering::Greater,
        BinOp::Gte => ord != Ordering::Less,
        _ => return Value::Null,
    })
}

fn arith(op: BinOp, lhs: &Value, rhs: &Value) -> Value {
    if op == BinOp::Div {
        return match (lhs.as_f64(), rhs.as_f64()) {
            (Some(_), Some(r)) if r == 0.0 => Value::Null,
            (Some(l), Some(r)) => Value::F64(l / r),
            _ => Value::Null,
        };
    }
    match (lhs, rhs) {
        // Integer results that overflow are computed in floating point instead, as SQLite does.
        (Value::I64(l), Value::I64(r)) => {
            let exact = match op {
                BinOp::Add => l.checked_add(*r),
                BinOp::Sub => l.checked_sub(*r),
                BinOp::Mul => l.checked_mul(*r),
                _ => return Value::Null,
            };
            match exact {
                Some(v) => Value::I64(v),
                None => float_arith(op, *l as f64, *r as f64),
            }
        }
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(l), Some(r)) => float_arith(op, l, r),
            _ => Value::Null,
        },
    }
}

fn float_arith(op: BinOp, l: f64, r: f64) -> Value {
    Value::F64(match op {
        BinOp::Add => l + r,
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        _ => return Value::Null,
    })
}

/// Round half away from zero to `digits` decimal digits.
pub fn round(v: f64, digits: i32) -> f64 {
    if digits >= 0 {
        let scale = 10f64.powi(digits);
        (v * scale).round() / scale
    } else {
        let scale = 10f64.powi(-digits);
        (v / scale).round() * scale
    }
}

fn scalar(func: ScalarFn, args: &[Value]) -> Value {
    match (func, args) {
        (ScalarFn::Round(digits), [v]) => v.as_f64().map_or(Value::Null, |v| Value::F64(round(v, digits))),
        (ScalarFn::Abs, [Value::I64(v)]) => v.checked_abs().map_or(Value::F64((*v as f64).abs()), Value::I64),
        (ScalarFn::Abs, [Value::F64(v)]) => Value::F64(v.abs()),
        (ScalarFn::Sqrt, [v]) => match v.as_f64() {
            Some(v) if v >= 0.0 => Value::F64(v.sqrt()),
            _ => Value::Null,
        },
        (ScalarFn::Pow, [base, exp]) => match (base.as_f64(), exp.as_f64()) {
            (Some(b), Some(e)) => Value::F64(b.powf(e)),
            _ => Value::Null,
        },
        (ScalarFn::Strip, [Value::Str(s)]) => Value::str(s.trim_matches(' ')),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabflow_verbs::{coalesce, col, lit, typed_null};

    fn schema() -> Schema {
        Schema::from_pairs([("i", DataType::I64), ("f", DataType::F64), ("b", DataType::Bool)]).unwrap()
    }

    fn eval(expr: Expr, row: &[Value]) -> Value {
        bind(&schema(), &expr).unwrap().eval(row)
    }

    #[test]
    fn nulls_propagate() {
        let row = [Value::Null, Value::F64(2.0), Value::Null];
        assert_eq!(eval(col("i") + col("f"), &row), Value::Null);
        assert_eq!(eval(col("i").is_null(), &row), Value::Bool(true));
        assert_eq!(eval(col("i").gt(lit(1i64)), &row), Value::Null);
    }

    #[test]
    fn three_valued_logic() {
        let row = [Value::I64(1), Value::F64(2.0), Value::Null];
        assert_eq!(eval(col("b").and(lit(false)), &row), Value::Bool(false));
        assert_eq!(eval(col("b").and(lit(true)), &row), Value::Null);
        assert_eq!(eval(col("b").or(lit(true)), &row), Value::Bool(true));
    }

    #[test]
    fn division() {
        let row = [Value::I64(7), Value::F64(0.0), Value::Bool(true)];
        assert_eq!(eval(col("i") / lit(2i64), &row), Value::F64(3.5));
        assert_eq!(eval(col("i") / col("f"), &row), Value::Null);
    }

    #[test]
    fn functions() {
        let row = [Value::I64(-3), Value::F64(24.999), Value::Bool(true)];
        assert_eq!(eval(col("f").round(-1), &row), Value::F64(20.0));
        assert_eq!(eval((col("f") + lit(4.999)).round(-1), &row), Value::F64(30.0));
        assert_eq!(eval(col("i").abs(), &row), Value::I64(3));
        assert_eq!(eval(col("i").sqrt(), &row), Value::Null);
        assert_eq!(eval(lit("  a b  ").strip(), &row), Value::str("a b"));
        assert_eq!(
            eval(coalesce([typed_null(DataType::F64), col("f")]), &row),
            Value::F64(24.999)
        );
        assert_eq!(eval(col("b").cast(DataType::I64), &row), Value::I64(1));
        assert_eq!(eval(col("f").cast(DataType::I64), &row), Value::I64(24));
    }

    #[test]
    fn strip_removes_spaces_only() {
        let row = [Value::Null, Value::Null, Value::Null];
        assert_eq!(eval(lit("\t a \n").strip(), &row), Value::str("\t a \n"));
        assert_eq!(eval(lit(" \ta\n ").strip(), &row), Value::str("\ta\n"));
    }

    #[test]
    fn integer_overflow_becomes_float() {
        let row = [Value::I64(i64::MAX), Value::F64(0.0), Value::Bool(true)];
        assert_eq!(eval(col("i") + lit(1i64), &row), Value::F64(i64::MAX as f64 + 1.0));
        assert_eq!(eval(col("i") * lit(2i64), &row), Value::F64(i64::MAX as f64 * 2.0));
        assert_eq!(eval(col("i") - lit(1i64), &row), Value::I64(i64::MAX - 1));

        let row = [Value::I64(i64::MIN), Value::F64(0.0), Value::Bool(true)];
        assert_eq!(eval(col("i") - lit(1i64), &row), Value::F64(i64::MIN as f64 - 1.0));
        assert_eq!(eval(-col("i"), &row), Value::F64(-(i64::MIN as f64)));
        assert_eq!(eval(col("i").abs(), &row), Value::F64(-(i64::MIN as f64)));
    }
}
