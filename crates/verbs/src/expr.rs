use std::fmt;
use std::ops;

use itertools::Itertools;
use tabflow_frame::{DataType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div)
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Lte | Self::Gt | Self::Gte)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
    IsNull,
    IsNotNull,
}

/// Scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarFn {
    /// Round half away from zero to the given number of decimal digits.
    /// Negative digits round to tens, hundreds, ...
    Round(i32),
    Abs,
    Sqrt,
    Pow,
    /// Trim leading and trailing spaces, like SQL `TRIM`. Tabs and newlines are kept.
    Strip,
    /// The first non-null argument.
    Coalesce,
}

impl ScalarFn {
    pub fn name(self) -> &'static str {
        match self {
            Self::Round(_) => "round",
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Pow => "pow",
            Self::Strip => "strip",
            Self::Coalesce => "coalesce",
        }
    }

    /// The number of arguments, or [None] if variadic.
    pub fn arity(self) -> Option<usize> {
        match self {
            Self::Round(_) | Self::Abs | Self::Sqrt | Self::Strip => Some(1),
            Self::Pow => Some(2),
            Self::Coalesce => None,
        }
    }
}

/// A scalar expression over the columns of a single row.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column reference, resolved by name against the input schema
    Col(Box<str>),
    /// A literal value.
    /// A bare null has no type and must be wrapped in a [Expr::Cast].
    Lit(Value),
    Cast(Box<Expr>, DataType),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Un(UnOp, Box<Expr>),
    Func(ScalarFn, Vec<Expr>),
}

/// A reference to the column `name`.
pub fn col(name: &str) -> Expr {
    Expr::Col(name.into())
}

/// A literal.
pub fn lit(v: impl Into<Value>) -> Expr {
    Expr::Lit(v.into())
}

/// A null literal of type `ty`.
pub fn typed_null(ty: DataType) -> Expr {
    Expr::Cast(Box::new(Expr::Lit(Value::Null)), ty)
}

pub fn coalesce(args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Func(ScalarFn::Coalesce, args.into_iter().collect())
}

impl Expr {
    fn bin(self, op: BinOp, rhs: Expr) -> Expr {
        Expr::Bin(op, Box::new(self), Box::new(rhs))
    }

    pub fn eq(self, rhs: Expr) -> Expr {
        self.bin(BinOp::Eq, rhs)
    }

    pub fn ne(self, rhs: Expr) -> Expr {
        self.bin(BinOp::Ne, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Expr {
        self.bin(BinOp::Lt, rhs)
    }

    pub fn lte(self, rhs: Expr) -> Expr {
        self.bin(BinOp::Lte, rhs)
    }

    pub fn gt(self, rhs: Expr) -> Expr {
        self.bin(BinOp::Gt, rhs)
    }

    pub fn gte(self, rhs: Expr) -> Expr {
        self.bin(BinOp::Gte, rhs)
    }

    pub fn and(self, rhs: Expr) -> Expr {
        self.bin(BinOp::And, rhs)
    }

    pub fn or(self, rhs: Expr) -> Expr {
        self.bin(BinOp::Or, rhs)
    }

    pub fn is_null(self) -> Expr {
        Expr::Un(UnOp::IsNull, Box::new(self))
    }

    pub fn is_not_null(self) -> Expr {
        Expr::Un(UnOp::IsNotNull, Box::new(self))
    }

    pub fn cast(self, ty: DataType) -> Expr {
        Expr::Cast(Box::new(self), ty)
    }

    pub fn round(self, digits: i32) -> Expr {
        Expr::Func(ScalarFn::Round(digits), vec![self])
    }

    pub fn abs(self) -> Expr {
        Expr::Func(ScalarFn::Abs, vec![self])
    }

    pub fn sqrt(self) -> Expr {
        Expr::Func(ScalarFn::Sqrt, vec![self])
    }

    pub fn pow(self, exp: Expr) -> Expr {
        Expr::Func(ScalarFn::Pow, vec![self, exp])
    }

    pub fn strip(self) -> Expr {
        Expr::Func(ScalarFn::Strip, vec![self])
    }

    /// Walk the expression tree and call `f` on each node
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Self)) {
        f(self);
        match self {
            Self::Col(_) | Self::Lit(_) => {}
            Self::Cast(expr, _) | Self::Un(_, expr) => expr.visit(f),
            Self::Bin(_, lhs, rhs) => {
                lhs.visit(f);
                rhs.visit(f);
            }
            Self::Func(_, args) => {
                for arg in args {
                    arg.visit(f);
                }
            }
        }
    }

    /// The names of the columns this expression references
    pub fn columns(&self) -> Vec<&str> {
        let mut names = vec![];
        self.visit(&mut |expr| {
            if let Self::Col(name) = expr {
                names.push(&**name);
            }
        });
        names.into_iter().unique().collect()
    }

    /// Split a conjunction into its conjuncts
    pub fn conjuncts(self) -> Vec<Expr> {
        match self {
            Self::Bin(BinOp::And, lhs, rhs) => {
                let mut exprs = lhs.conjuncts();
                exprs.extend(rhs.conjuncts());
                exprs
            }
            expr => vec![expr],
        }
    }

    /// The inverse of [Expr::conjuncts]
    pub fn conjunction(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }
}

macro_rules! arith_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait for Expr {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                self.bin($op, rhs)
            }
        }
    };
}

arith_op!(Add, add, BinOp::Add);
arith_op!(Sub, sub, BinOp::Sub);
arith_op!(Mul, mul, BinOp::Mul);
arith_op!(Div, div, BinOp::Div);

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Un(UnOp::Neg, Box::new(self))
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Un(UnOp::Not, Box::new(self))
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    /// Count the non-null values of the argument
    Count,
    /// Count rows, nulls included
    CountRows,
    Sum,
    /// The arithmetic mean of the non-null values
    Mean,
    Min,
    Max,
}

impl AggFunc {
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountRows => "count_rows",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// An aggregate over the rows of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct AggExpr {
    pub func: AggFunc,
    pub arg: Option<Expr>,
}

pub fn count(arg: Expr) -> AggExpr {
    AggExpr {
        func: AggFunc::Count,
        arg: Some(arg),
    }
}

pub fn count_rows() -> AggExpr {
    AggExpr {
        func: AggFunc::CountRows,
        arg: None,
    }
}

pub fn sum(arg: Expr) -> AggExpr {
    AggExpr {
        func: AggFunc::Sum,
        arg: Some(arg),
    }
}

pub fn mean(arg: Expr) -> AggExpr {
    AggExpr {
        func: AggFunc::Mean,
        arg: Some(arg),
    }
}

pub fn min(arg: Expr) -> AggExpr {
    AggExpr {
        func: AggFunc::Min,
        arg: Some(arg),
    }
}

pub fn max(arg: Expr) -> AggExpr {
    AggExpr {
        func: AggFunc::Max,
        arg: Some(arg),
    }
}

/// Window functions.
/// All of them are defined by an ordering, see [crate::Chain::window].
#[derive(Debug, Clone, PartialEq)]
pub enum WindowFunc {
    /// 1-based position within the partition
    RowNumber,
    /// 1-based rank, equal keys share a rank and leave gaps
    Rank,
    /// The value of `expr` `offset` rows after the current one, or null
    Lead { expr: Expr, offset: u32 },
    /// The value of `expr` `offset` rows before the current one, or null
    Lag { expr: Expr, offset: u32 },
}

impl WindowFunc {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RowNumber => "row_number",
            Self::Rank => "rank",
            Self::Lead { .. } => "lead",
            Self::Lag { .. } => "lag",
        }
    }

    pub fn requires_order(&self) -> bool {
        true
    }

    pub fn arg(&self) -> Option<&Expr> {
        match self {
            Self::RowNumber | Self::Rank => None,
            Self::Lead { expr, .. } | Self::Lag { expr, .. } => Some(expr),
        }
    }
}

pub fn row_number() -> WindowFunc {
    WindowFunc::RowNumber
}

pub fn rank() -> WindowFunc {
    WindowFunc::Rank
}

pub fn lead(expr: Expr, offset: u32) -> WindowFunc {
    WindowFunc::Lead { expr, offset }
}

pub fn lag(expr: Expr, offset: u32) -> WindowFunc {
    WindowFunc::Lag { expr, offset }
}

/// Shift `expr` by `n` rows in window order.
/// A negative shift looks ahead, `shift(x, -1)` is the next row's `x`.
pub fn shift(expr: Expr, n: i64) -> WindowFunc {
    let offset = n.unsigned_abs().min(u32::MAX as u64) as u32;
    if n < 0 {
        lead(expr, offset)
    } else {
        lag(expr, offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullOrder {
    First,
    Last,
}

/// An ordering key.
/// Nulls sort last unless requested otherwise, in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub col: Box<str>,
    pub desc: bool,
    pub nulls: NullOrder,
}

impl OrderKey {
    pub fn nulls_first(mut self) -> Self {
        self.nulls = NullOrder::First;
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = NullOrder::Last;
        self
    }
}

pub fn asc(col: &str) -> OrderKey {
    OrderKey {
        col: col.into(),
        desc: false,
        nulls: NullOrder::Last,
    }
}

pub fn desc(col: &str) -> OrderKey {
    OrderKey {
        col: col.into(),
        desc: true,
        nulls: NullOrder::Last,
    }
}

fn fmt_lit(f: &mut fmt::Formatter<'_>, v: &Value) -> fmt::Result {
    match v {
        Value::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
        Value::F64(v) => write!(f, "{v:?}"),
        v => write!(f, "{v}"),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Col(name) => f.write_str(name),
            Self::Lit(v) => fmt_lit(f, v),
            Self::Cast(expr, ty) => write!(f, "cast({expr} as {ty})"),
            Self::Bin(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::Un(UnOp::Neg, expr) => write!(f, "(-{expr})"),
            Self::Un(UnOp::Not, expr) => write!(f, "(NOT {expr})"),
            Self::Un(UnOp::IsNull, expr) => write!(f, "({expr} IS NULL)"),
            Self::Un(UnOp::IsNotNull, expr) => write!(f, "({expr} IS NOT NULL)"),
            Self::Func(ScalarFn::Round(digits), args) => write!(f, "round({}, {digits})", args.iter().join(", ")),
            Self::Func(func, args) => write!(f, "{}({})", func.name(), args.iter().join(", ")),
        }
    }
}

impl fmt::Display for AggExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}({arg})", self.func.name()),
            None => write!(f, "{}()", self.func.name()),
        }
    }
}

impl fmt::Display for WindowFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowNumber | Self::Rank => write!(f, "{}()", self.name()),
            Self::Lead { expr, offset } | Self::Lag { expr, offset } => write!(f, "{}({expr}, {offset})", self.name()),
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} NULLS {}",
            self.col,
            if self.desc { "DESC" } else { "ASC" },
            match self.nulls {
                NullOrder::First => "FIRST",
                NullOrder::Last => "LAST",
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_fully_parenthesized() {
        let expr = (col("age") + lit(4.999)).round(-1);
        assert_eq!(expr.to_string(), "round((age + 4.999), -1)");
        let expr = (col("x") * col("x")).gt(lit(1i64)).and(!col("flag"));
        assert_eq!(expr.to_string(), "(((x * x) > 1) AND (NOT flag))");
        assert_eq!(lit("it's").to_string(), "'it''s'");
    }

    #[test]
    fn referenced_columns_are_unique() {
        let expr = col("x") * col("x") + col("y");
        assert_eq!(expr.columns(), vec!["x", "y"]);
    }

    #[test]
    fn conjuncts_round_trip() {
        let a = col("a").gt(lit(1i64));
        let b = col("b").is_null();
        let c = col("c").eq(lit("z"));
        let expr = a.clone().and(b.clone()).and(c.clone());
        assert_eq!(expr.conjuncts(), vec![a, b, c]);
    }

    #[test]
    fn shift_direction() {
        assert_eq!(shift(col("fare"), -1), lead(col("fare"), 1));
        assert_eq!(shift(col("fare"), 2), lag(col("fare"), 2));
    }
}
