//! Type inference for scalar, aggregate and window expressions.
//!
//! Every expression is resolved against the schema snapshot of the verb's input.
//! Nullability is inferred conservatively:
//! an expression is not null only when it provably cannot produce a null.

use itertools::Itertools;
use tabflow_frame::{ColumnDef, DataType, Schema, Value};

use crate::errors::ConstructionError;
use crate::expr::{AggExpr, AggFunc, BinOp, Expr, ScalarFn, UnOp, WindowFunc};

type Result<T> = std::result::Result<T, ConstructionError>;

/// The inferred type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Typed {
    pub ty: DataType,
    pub nullable: bool,
}

impl Typed {
    fn new(ty: DataType, nullable: bool) -> Self {
        Self { ty, nullable }
    }

    pub fn column(self, name: &str) -> ColumnDef {
        ColumnDef::new(name, self.ty).nullable(self.nullable)
    }
}

/// The position of `name` in `schema`, reporting the available columns if it is missing.
pub fn position(schema: &Schema, name: &str, verb: &'static str) -> Result<usize> {
    schema.position(name).ok_or_else(|| ConstructionError::UnknownColumn {
        name: name.to_owned(),
        verb,
        available: schema.names().join(", "),
    })
}

/// Resolve `name` in `schema`.
pub fn resolve<'a>(schema: &'a Schema, name: &str, verb: &'static str) -> Result<&'a ColumnDef> {
    position(schema, name, verb).map(|i| &schema.columns()[i])
}

fn numeric(ctx: &Expr, t: Typed) -> Result<Typed> {
    if t.ty.is_numeric() {
        Ok(t)
    } else {
        Err(ConstructionError::type_mismatch(ctx, "a numeric type", t.ty))
    }
}

fn expect(ctx: &Expr, t: Typed, ty: DataType) -> Result<Typed> {
    if t.ty == ty {
        Ok(t)
    } else {
        Err(ConstructionError::type_mismatch(ctx, ty.name(), t.ty))
    }
}

/// Infer the type of a scalar expression.
pub fn type_expr(schema: &Schema, expr: &Expr, verb: &'static str) -> Result<Typed> {
    match expr {
        Expr::Col(name) => {
            let col = resolve(schema, name, verb)?;
            Ok(Typed::new(col.ty, col.nullable))
        }
        Expr::Lit(Value::Null) => Err(ConstructionError::UntypedNull),
        Expr::Lit(v) => v
            .data_type()
            .map(|ty| Typed::new(ty, false))
            .ok_or(ConstructionError::UntypedNull),
        Expr::Cast(inner, to) => {
            if let Expr::Lit(Value::Null) = **inner {
                return Ok(Typed::new(*to, true));
            }
            let from = type_expr(schema, inner, verb)?;
            match (from.ty, *to) {
                (a, b) if a == b => {}
                (DataType::I64 | DataType::F64 | DataType::Bool, DataType::I64 | DataType::F64) => {}
                (DataType::I64, DataType::Str) => {}
                (from, to) => return Err(ConstructionError::InvalidCast { from, to }),
            }
            Ok(Typed::new(*to, from.nullable))
        }
        Expr::Bin(op, lhs, rhs) => {
            let l = type_expr(schema, lhs, verb)?;
            let r = type_expr(schema, rhs, verb)?;
            let nullable = l.nullable || r.nullable;
            if op.is_arithmetic() {
                let l = numeric(expr, l)?;
                let r = numeric(expr, r)?;
                if *op == BinOp::Div {
                    // Division is always floating point and yields null on a zero divisor.
                    return Ok(Typed::new(DataType::F64, true));
                }
                let ty = l.ty.numeric_supertype(r.ty).unwrap_or(DataType::F64);
                Ok(Typed::new(ty, nullable))
            } else if op.is_comparison() {
                let comparable = l.ty == r.ty || l.ty.numeric_supertype(r.ty).is_some();
                if !comparable {
                    return Err(ConstructionError::type_mismatch(expr, l.ty.name(), r.ty));
                }
                Ok(Typed::new(DataType::Bool, nullable))
            } else {
                expect(expr, l, DataType::Bool)?;
                expect(expr, r, DataType::Bool)?;
                Ok(Typed::new(DataType::Bool, nullable))
            }
        }
        Expr::Un(op, inner) => {
            let t = type_expr(schema, inner, verb)?;
            match op {
                UnOp::Neg => numeric(expr, t),
                UnOp::Not => expect(expr, t, DataType::Bool),
                UnOp::IsNull | UnOp::IsNotNull => Ok(Typed::new(DataType::Bool, false)),
            }
        }
        Expr::Func(func, args) => {
            if let Some(n) = func.arity()
                && n != args.len()
            {
                return Err(ConstructionError::Arity {
                    func: func.name(),
                    expected: n,
                    found: args.len(),
                });
            }
            let args = args
                .iter()
                .map(|arg| type_expr(schema, arg, verb))
                .collect::<Result<Vec<_>>>()?;
            type_func(expr, *func, &args)
        }
    }
}

fn type_func(ctx: &Expr, func: ScalarFn, args: &[Typed]) -> Result<Typed> {
    match (func, args) {
        (ScalarFn::Round(_), [t]) => Ok(Typed::new(DataType::F64, numeric(ctx, *t)?.nullable)),
        (ScalarFn::Abs, [t]) => numeric(ctx, *t),
        // The root of a negative number is null.
        (ScalarFn::Sqrt, [t]) => numeric(ctx, *t).map(|_| Typed::new(DataType::F64, true)),
        (ScalarFn::Pow, [base, exp]) => {
            let nullable = numeric(ctx, *base)?.nullable || numeric(ctx, *exp)?.nullable;
            Ok(Typed::new(DataType::F64, nullable))
        }
        (ScalarFn::Strip, [t]) => expect(ctx, *t, DataType::Str),
        (ScalarFn::Coalesce, [first, rest @ ..]) => {
            let mut ty = first.ty;
            for t in rest {
                ty = if t.ty == ty {
                    ty
                } else {
                    ty.numeric_supertype(t.ty)
                        .ok_or_else(|| ConstructionError::type_mismatch(ctx, ty.name(), t.ty))?
                };
            }
            Ok(Typed::new(ty, args.iter().all(|t| t.nullable)))
        }
        (func, args) => Err(ConstructionError::Arity {
            func: func.name(),
            expected: func.arity().unwrap_or(1),
            found: args.len(),
        }),
    }
}

/// Infer the type of an aggregate.
pub fn type_agg(schema: &Schema, agg: &AggExpr) -> Result<Typed> {
    let Some(arg) = &agg.arg else {
        return match agg.func {
            AggFunc::CountRows => Ok(Typed::new(DataType::I64, false)),
            func => Err(ConstructionError::Arity {
                func: func.name(),
                expected: 1,
                found: 0,
            }),
        };
    };
    let t = type_expr(schema, arg, "summarise")?;
    match agg.func {
        AggFunc::Count | AggFunc::CountRows => Ok(Typed::new(DataType::I64, false)),
        // The sum of an empty group is null, as in SQL.
        AggFunc::Sum => numeric(arg, t).map(|t| Typed::new(t.ty, true)),
        AggFunc::Mean => numeric(arg, t).map(|_| Typed::new(DataType::F64, true)),
        AggFunc::Min | AggFunc::Max => {
            if t.ty == DataType::Bool {
                return Err(ConstructionError::type_mismatch(arg, "an ordered type", t.ty));
            }
            Ok(Typed::new(t.ty, true))
        }
    }
}

/// Infer the type of a window function.
pub fn type_window(schema: &Schema, func: &WindowFunc) -> Result<Typed> {
    match func {
        WindowFunc::RowNumber | WindowFunc::Rank => Ok(Typed::new(DataType::I64, false)),
        WindowFunc::Lead { expr, .. } | WindowFunc::Lag { expr, .. } => {
            let t = type_expr(schema, expr, "window")?;
            Ok(Typed::new(t.ty, true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, lit, mean, sum, typed_null};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("i", DataType::I64).not_null(),
            ColumnDef::new("f", DataType::F64),
            ColumnDef::new("s", DataType::Str),
            ColumnDef::new("b", DataType::Bool).not_null(),
        ])
        .unwrap()
    }

    #[test]
    fn arithmetic_widens() {
        let s = schema();
        assert_eq!(type_expr(&s, &(col("i") + lit(1i64)), "mutate").unwrap(), Typed::new(DataType::I64, false));
        assert_eq!(type_expr(&s, &(col("i") * col("f")), "mutate").unwrap(), Typed::new(DataType::F64, true));
        assert_eq!(type_expr(&s, &(col("i") / lit(2i64)), "mutate").unwrap(), Typed::new(DataType::F64, true));
    }

    #[test]
    fn type_errors() {
        let s = schema();
        assert!(matches!(
            type_expr(&s, &(col("s") + lit(1i64)), "mutate"),
            Err(ConstructionError::TypeMismatch { found: DataType::Str, .. })
        ));
        assert!(matches!(
            type_expr(&s, &col("i").and(col("b")), "filter"),
            Err(ConstructionError::TypeMismatch { found: DataType::I64, .. })
        ));
        assert!(matches!(
            type_expr(&s, &col("nope"), "filter"),
            Err(ConstructionError::UnknownColumn { name, .. }) if name == "nope"
        ));
    }

    #[test]
    fn nulls_must_be_typed() {
        let s = schema();
        assert_eq!(type_expr(&s, &lit(None::<f64>), "mutate"), Err(ConstructionError::UntypedNull));
        assert_eq!(
            type_expr(&s, &typed_null(DataType::F64), "mutate").unwrap(),
            Typed::new(DataType::F64, true)
        );
    }

    #[test]
    fn coalesce_is_nullable_only_if_every_arg_is() {
        let s = schema();
        let expr = crate::expr::coalesce([col("f"), lit(0i64)]);
        assert_eq!(type_expr(&s, &expr, "mutate").unwrap(), Typed::new(DataType::F64, false));
    }

    #[test]
    fn aggregates() {
        let s = schema();
        assert_eq!(type_agg(&s, &sum(col("i"))).unwrap(), Typed::new(DataType::I64, true));
        assert_eq!(type_agg(&s, &mean(col("i"))).unwrap(), Typed::new(DataType::F64, true));
        assert!(type_agg(&s, &sum(col("s"))).is_err());
    }
}
