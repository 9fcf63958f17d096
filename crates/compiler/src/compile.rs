//! Translate a chain into a single SQL query.
//!
//! Every step becomes a subquery over the previous one.
//! Row order is made explicit by a hidden [ORD] column that travels with every relation:
//! sources carry their insertion position,
//! joins, sorts and aggregations recompute it,
//! and window orderings use it as the final tiebreak.
//! The outermost query drops it and orders by it.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use tabflow_frame::{Schema, Value};
use tabflow_verbs::check::type_expr;
use tabflow_verbs::{AggExpr, BinOp, Chain, ConstructionError, Expr, JoinKind, Side, UnOp, Verb, WindowFunc};

use crate::dialect::Dialect;
use crate::errors::CompileError;
use crate::rules::optimize;

type Result<T> = std::result::Result<T, CompileError>;

/// The hidden row order column.
pub const ORD: &str = "__ord";

/// The output of compilation: query text, bound parameters and the result schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// The name of the result table
    pub name: Box<str>,
    pub dialect: &'static str,
    pub sql: String,
    /// Parameter `n` binds to placeholder `n + 1`
    pub params: Vec<Value>,
    pub schema: Arc<Schema>,
    /// The tables the query reads.
    /// Each must be bound with an extra integer [ORD] column holding the row position.
    pub sources: Vec<Box<str>>,
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)?;
        for (i, param) in self.params.iter().enumerate() {
            write!(f, "\n-- {} = {param:?}", i + 1)?;
        }
        Ok(())
    }
}

/// Compile `chain` for `dialect`.
///
/// Compilation is pure:
/// the same chain compiled for the same dialect always yields the same text and parameters.
pub fn compile(chain: &Chain, dialect: &dyn Dialect) -> Result<CompiledQuery> {
    let plan = optimize(chain)?;
    let mut compiler = Compiler {
        dialect,
        params: vec![],
        aliases: 0,
    };
    let inner = compiler.relation(&plan)?;
    let t = compiler.alias();
    let cols = chain.schema().names().map(|name| compiler.q(name)).join(", ");
    let sql = format!("SELECT {cols} FROM ({inner}) AS {t} ORDER BY {t}.{}", compiler.q(ORD));
    tracing::debug!(dialect = dialect.name(), %sql, "compiled chain");
    Ok(CompiledQuery {
        name: chain.name().into(),
        dialect: dialect.name(),
        sql,
        params: compiler.params,
        schema: chain.schema().clone(),
        sources: chain.sources().keys().cloned().collect(),
    })
}

struct Compiler<'a> {
    dialect: &'a dyn Dialect,
    params: Vec<Value>,
    aliases: usize,
}

impl Compiler<'_> {
    fn q(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    fn alias(&mut self) -> String {
        self.aliases += 1;
        format!("t{}", self.aliases)
    }

    fn param(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    fn unsupported(&self, verb: impl ToString) -> CompileError {
        CompileError::UnsupportedVerb {
            dialect: self.dialect.name(),
            verb: verb.to_string(),
        }
    }

    /// The columns of `schema` followed by [ORD].
    fn columns(&self, schema: &Schema) -> String {
        schema.names().chain([ORD]).map(|name| self.q(name)).join(", ")
    }

    fn relation(&mut self, chain: &Chain) -> Result<String> {
        if chain.schema().position(ORD).is_some() {
            return Err(CompileError::ReservedColumn(ORD.to_owned()));
        }
        let Some(input) = chain.input() else {
            let Verb::Source(name) = chain.verb() else {
                return Err(ConstructionError::MisplacedSource.into());
            };
            return Ok(format!("SELECT {} FROM {}", self.columns(chain.schema()), self.q(name)));
        };
        let schema = input.schema().clone();
        let ord = self.q(ORD);
        Ok(match chain.verb() {
            Verb::Source(_) => return Err(ConstructionError::MisplacedSource.into()),
            Verb::GroupBy(_) | Verb::Alias(_) => self.relation(input)?,
            Verb::Select(_) => {
                let from = self.relation(input)?;
                let t = self.alias();
                format!("SELECT {} FROM ({from}) AS {t}", self.columns(chain.schema()))
            }
            Verb::Mutate(exprs) => {
                let from = self.relation(input)?;
                let mut items = vec![];
                for name in chain.schema().names() {
                    match exprs.iter().find(|(n, _)| &**n == name) {
                        Some((_, expr)) => items.push(format!("{} AS {}", self.expr(&schema, expr)?, self.q(name))),
                        None => items.push(self.q(name)),
                    }
                }
                let t = self.alias();
                format!("SELECT {}, {ord} FROM ({from}) AS {t}", items.join(", "))
            }
            Verb::Filter(expr) => {
                let from = self.relation(input)?;
                let pred = self.expr(&schema, expr)?;
                let t = self.alias();
                format!("SELECT * FROM ({from}) AS {t} WHERE {pred}")
            }
            Verb::Join(join) => {
                let left = self.relation(input)?;
                let right = self.relation(&join.right)?;
                let (l, r) = (self.alias(), self.alias());
                let rschema = join.right.schema();
                let items = join
                    .layout()
                    .iter()
                    .zip(chain.schema().names())
                    .map(|(col, out)| {
                        let (t, src) = match col.side {
                            Side::Left => (&l, &schema.columns()[col.index].name),
                            Side::Right => (&r, &rschema.columns()[col.index].name),
                        };
                        format!("{t}.{} AS {}", self.q(src), self.q(out))
                    })
                    .join(", ");
                let on = join
                    .on
                    .iter()
                    .map(|(lc, rc)| format!("{l}.{} = {r}.{}", self.q(lc), self.q(rc)))
                    .join(" AND ");
                let kind = match join.kind {
                    JoinKind::Inner => "INNER",
                    JoinKind::Left => "LEFT",
                };
                format!(
                    "SELECT {items}, ROW_NUMBER() OVER (ORDER BY {l}.{ord}, {r}.{ord}) AS {ord} \
                     FROM ({left}) AS {l} {kind} JOIN ({right}) AS {r} ON {on}"
                )
            }
            Verb::Summarise(aggs) => {
                let from = self.relation(input)?;
                let keys = input.groups().iter().map(|k| self.q(k)).collect::<Vec<_>>();
                let mut items = keys.clone();
                for (name, agg) in aggs {
                    items.push(format!("{} AS {}", self.agg(&schema, agg)?, self.q(name)));
                }
                let t = self.alias();
                if keys.is_empty() {
                    format!("SELECT {}, 0 AS {ord} FROM ({from}) AS {t}", items.join(", "))
                } else {
                    format!(
                        "SELECT {}, MIN({ord}) AS {ord} FROM ({from}) AS {t} GROUP BY {}",
                        items.join(", "),
                        keys.join(", ")
                    )
                }
            }
            Verb::OrderBy(keys) => {
                let from = self.relation(input)?;
                let terms = keys.iter().map(|key| self.dialect.order_term(key)).join(", ");
                let cols = chain.schema().names().map(|name| self.q(name)).join(", ");
                let t = self.alias();
                format!("SELECT {cols}, ROW_NUMBER() OVER (ORDER BY {terms}, {ord}) AS {ord} FROM ({from}) AS {t}")
            }
            Verb::Window(window) => {
                let from = self.relation(input)?;
                let func = match &window.func {
                    WindowFunc::RowNumber => "ROW_NUMBER()".to_owned(),
                    WindowFunc::Rank => "RANK()".to_owned(),
                    WindowFunc::Lead { expr, offset } => format!("LEAD({}, {offset})", self.expr(&schema, expr)?),
                    WindowFunc::Lag { expr, offset } => format!("LAG({}, {offset})", self.expr(&schema, expr)?),
                };
                let mut over = vec![];
                if !window.partition_by.is_empty() {
                    over.push(format!(
                        "PARTITION BY {}",
                        window.partition_by.iter().map(|k| self.q(k)).join(", ")
                    ));
                }
                let mut terms = window
                    .order_by
                    .iter()
                    .map(|key| self.dialect.order_term(key))
                    .collect::<Vec<_>>();
                // Rank keeps ties, the other functions break them by row order.
                if window.func != WindowFunc::Rank {
                    terms.push(ord.clone());
                }
                over.push(format!("ORDER BY {}", terms.join(", ")));
                let items = chain
                    .schema()
                    .names()
                    .map(|name| {
                        if name == &*window.name {
                            format!("{func} OVER ({}) AS {}", over.join(" "), self.q(name))
                        } else {
                            self.q(name)
                        }
                    })
                    .join(", ");
                let t = self.alias();
                format!("SELECT {items}, {ord} FROM ({from}) AS {t}")
            }
        })
    }

    fn agg(&mut self, schema: &Schema, agg: &AggExpr) -> Result<String> {
        let arg = match &agg.arg {
            Some(arg) => Some(self.expr(schema, arg)?),
            None => None,
        };
        Ok(self.dialect.agg(agg.func, arg.as_deref()))
    }

    fn expr(&mut self, schema: &Schema, expr: &Expr) -> Result<String> {
        Ok(match expr {
            Expr::Col(name) => self.q(name),
            Expr::Lit(Value::Null) => "NULL".to_owned(),
            Expr::Lit(v) => self.param(v.clone()),
            Expr::Cast(inner, ty) => {
                if let Expr::Lit(Value::Null) = **inner {
                    return Ok(format!("CAST(NULL AS {})", self.dialect.type_name(*ty)));
                }
                let from = type_expr(schema, inner, "cast")?.ty;
                let inner = self.expr(schema, inner)?;
                self.dialect.cast(&inner, from, *ty)
            }
            Expr::Bin(BinOp::Div, lhs, rhs) => {
                let lhs = self.expr(schema, lhs)?;
                let rhs = self.expr(schema, rhs)?;
                self.dialect.div(&lhs, &rhs)
            }
            Expr::Bin(op, lhs, rhs) => {
                let lhs = self.expr(schema, lhs)?;
                let rhs = self.expr(schema, rhs)?;
                format!("({lhs} {} {rhs})", op.symbol())
            }
            Expr::Un(op, inner) => {
                let inner = self.expr(schema, inner)?;
                match op {
                    UnOp::Neg => format!("(-{inner})"),
                    UnOp::Not => format!("(NOT {inner})"),
                    UnOp::IsNull => format!("({inner} IS NULL)"),
                    UnOp::IsNotNull => format!("({inner} IS NOT NULL)"),
                }
            }
            Expr::Func(func, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.expr(schema, arg))
                    .collect::<Result<Vec<_>>>()?;
                self.dialect
                    .func(*func, &args)
                    .ok_or_else(|| self.unsupported(func.name()))?
            }
        })
    }
}
