use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools;
use tabflow_frame::{ColumnDef, FrameError, Schema};

use crate::check::{resolve, type_agg, type_expr, type_window};
use crate::errors::{ConstructionError, InvalidJoin};
use crate::expr::{AggExpr, Expr, OrderKey, WindowFunc};

type Result<T> = std::result::Result<T, ConstructionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// Where a join output column comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinColumn {
    pub side: Side,
    /// Column position in that side's schema
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub right: Chain,
    /// Equality pairs `(left column, right column)`
    pub on: Vec<(Box<str>, Box<str>)>,
    layout: Vec<JoinColumn>,
}

impl Join {
    pub fn new(kind: JoinKind, right: Chain, on: &[(&str, &str)]) -> Self {
        Self {
            kind,
            right,
            on: on.iter().map(|(l, r)| ((*l).into(), (*r).into())).collect(),
            layout: vec![],
        }
    }

    /// The same join against a different right chain.
    pub fn with_right(&self, right: Chain) -> Self {
        Self {
            kind: self.kind,
            right,
            on: self.on.clone(),
            layout: vec![],
        }
    }

    /// The output columns in order.
    ///
    /// Left columns come first, then right columns.
    /// A right key column paired with a left key column of the same name is emitted once, from the left.
    /// Any other name clash is resolved in favor of the later (right) column.
    pub fn layout(&self) -> &[JoinColumn] {
        &self.layout
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub name: Box<str>,
    pub func: WindowFunc,
    pub partition_by: Vec<Box<str>>,
    pub order_by: Vec<OrderKey>,
}

/// A single relational operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Verb {
    /// A named input table, bound at execution time
    Source(Box<str>),
    Select(Vec<Box<str>>),
    /// Expressions are evaluated simultaneously against the input row
    Mutate(Vec<(Box<str>, Expr)>),
    Filter(Expr),
    Join(Join),
    GroupBy(Vec<Box<str>>),
    Summarise(Vec<(Box<str>, AggExpr)>),
    OrderBy(Vec<OrderKey>),
    Window(Window),
    Alias(Box<str>),
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Source(_) => "source",
            Self::Select(_) => "select",
            Self::Mutate(_) => "mutate",
            Self::Filter(_) => "filter",
            Self::Join(Join { kind: JoinKind::Inner, .. }) => "inner_join",
            Self::Join(Join { kind: JoinKind::Left, .. }) => "left_join",
            Self::GroupBy(_) => "group_by",
            Self::Summarise(_) => "summarise",
            Self::OrderBy(_) => "order_by",
            Self::Window(_) => "window",
            Self::Alias(_) => "alias",
        }
    }
}

#[derive(Debug, PartialEq)]
struct Node {
    verb: Verb,
    input: Option<Chain>,
    schema: Arc<Schema>,
    groups: Vec<Box<str>>,
    name: Box<str>,
    sources: BTreeMap<Box<str>, Arc<Schema>>,
}

/// An immutable chain of verbs rooted at a single source.
///
/// Every construction method returns a new chain wrapping this one,
/// so a published chain can be shared, extended and bound to many backends.
/// Each step captures the schema of its output,
/// against which the next step's column references are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain(Arc<Node>);

fn names(cols: &[&str]) -> Vec<Box<str>> {
    cols.iter().map(|&c| c.into()).collect()
}

fn schema_of(columns: Vec<ColumnDef>) -> Result<Schema> {
    Schema::new(columns).map_err(frame_error)
}

fn frame_error(e: FrameError) -> ConstructionError {
    match e {
        FrameError::DuplicateColumn(name) | FrameError::UnknownKeyColumn(name) => {
            ConstructionError::DuplicateColumn(name)
        }
        e => ConstructionError::DuplicateColumn(e.to_string()),
    }
}

fn check_unique<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    match names.into_iter().duplicates().next() {
        Some(name) => Err(ConstructionError::DuplicateColumn(name.to_owned())),
        None => Ok(()),
    }
}

/// Add or replace named columns, keeping the position of replaced ones.
/// Keys over replaced columns are dropped.
fn assign(input: &Schema, defs: Vec<ColumnDef>) -> Result<Schema> {
    let mut columns = input.columns().to_vec();
    let mut replaced = vec![false; columns.len()];
    for def in defs {
        match input.position(&def.name) {
            Some(i) => {
                replaced[i] = true;
                columns[i] = def;
            }
            None => columns.push(def),
        }
    }
    Ok(schema_of(columns)?.retain_keys(input, |i| (!replaced[i]).then_some(i)))
}

impl Chain {
    /// Start a chain from a named input table with a known schema.
    pub fn source(name: &str, schema: impl Into<Arc<Schema>>) -> Self {
        let schema = schema.into();
        Self(Arc::new(Node {
            verb: Verb::Source(name.into()),
            input: None,
            schema: schema.clone(),
            groups: vec![],
            name: name.into(),
            sources: [(name.into(), schema)].into(),
        }))
    }

    /// The last verb of the chain.
    pub fn verb(&self) -> &Verb {
        &self.0.verb
    }

    /// The chain this one extends, or [None] for a source.
    pub fn input(&self) -> Option<&Chain> {
        self.0.input.as_ref()
    }

    /// The output schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.0.schema
    }

    /// The current table name: the source name or the last alias.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The active grouping keys.
    pub fn groups(&self) -> &[Box<str>] {
        &self.0.groups
    }

    /// Every source this chain reads, including through joins.
    pub fn sources(&self) -> &BTreeMap<Box<str>, Arc<Schema>> {
        &self.0.sources
    }

    /// The chain's steps, from its source to itself.
    pub fn lineage(&self) -> Vec<&Chain> {
        let mut steps = vec![self];
        let mut next = self.input();
        while let Some(chain) = next {
            steps.push(chain);
            next = chain.input();
        }
        steps.reverse();
        steps
    }

    pub fn select(&self, cols: &[&str]) -> Result<Self> {
        self.then(Verb::Select(names(cols)))
    }

    pub fn mutate<'a>(&self, exprs: impl IntoIterator<Item = (&'a str, Expr)>) -> Result<Self> {
        self.then(Verb::Mutate(exprs.into_iter().map(|(n, e)| (n.into(), e)).collect()))
    }

    /// Like [Chain::mutate], but keep only the new columns.
    pub fn transmute<'a>(&self, exprs: impl IntoIterator<Item = (&'a str, Expr)>) -> Result<Self> {
        let exprs = exprs.into_iter().collect::<Vec<_>>();
        let keep = exprs.iter().map(|(name, _)| *name).collect::<Vec<_>>();
        self.mutate(exprs.clone())?.select(&keep)
    }

    pub fn filter(&self, predicate: Expr) -> Result<Self> {
        self.then(Verb::Filter(predicate))
    }

    /// Join with an independent chain on equality pairs `(left column, right column)`.
    ///
    /// If either side declares keys,
    /// the pairs must cover a primary or unique key of one of the sides.
    pub fn join(&self, right: &Chain, kind: JoinKind, on: &[(&str, &str)]) -> Result<Self> {
        self.then(Verb::Join(Join::new(kind, right.clone(), on)))
    }

    pub fn inner_join(&self, right: &Chain, on: &[(&str, &str)]) -> Result<Self> {
        self.join(right, JoinKind::Inner, on)
    }

    pub fn left_join(&self, right: &Chain, on: &[(&str, &str)]) -> Result<Self> {
        self.join(right, JoinKind::Left, on)
    }

    pub fn group_by(&self, keys: &[&str]) -> Result<Self> {
        self.then(Verb::GroupBy(names(keys)))
    }

    pub fn summarise<'a>(&self, aggs: impl IntoIterator<Item = (&'a str, AggExpr)>) -> Result<Self> {
        self.then(Verb::Summarise(aggs.into_iter().map(|(n, a)| (n.into(), a)).collect()))
    }

    pub fn order_by(&self, keys: impl IntoIterator<Item = OrderKey>) -> Result<Self> {
        self.then(Verb::OrderBy(keys.into_iter().collect()))
    }

    /// Add (or replace) the column `name` with a window function
    /// evaluated over `partition_by` in `order_by` order.
    /// Ties in `order_by` are broken by input row order.
    pub fn window(
        &self,
        name: &str,
        func: WindowFunc,
        partition_by: &[&str],
        order_by: impl IntoIterator<Item = OrderKey>,
    ) -> Result<Self> {
        self.then(Verb::Window(Window {
            name: name.into(),
            func,
            partition_by: names(partition_by),
            order_by: order_by.into_iter().collect(),
        }))
    }

    pub fn alias(&self, name: &str) -> Result<Self> {
        self.then(Verb::Alias(name.into()))
    }

    /// Extend the chain with `verb`, checking it against the current schema.
    pub fn then(&self, verb: Verb) -> Result<Self> {
        if !self.groups().is_empty() && !matches!(verb, Verb::Summarise(_) | Verb::Alias(_) | Verb::GroupBy(_)) {
            return Err(ConstructionError::NotAggregate(verb.name()));
        }
        let input = &**self.schema();
        let mut groups = vec![];
        let mut name = self.name().into();
        let mut sources = self.sources().clone();
        let (verb, schema) = match verb {
            Verb::Source(_) => return Err(ConstructionError::MisplacedSource),
            Verb::Select(cols) => {
                if cols.is_empty() {
                    return Err(ConstructionError::EmptySelect);
                }
                check_unique(cols.iter().map(|c| &**c))?;
                let defs = cols
                    .iter()
                    .map(|c| resolve(input, c, "select").cloned())
                    .collect::<Result<Vec<_>>>()?;
                let schema = schema_of(defs)?.retain_keys(input, |i| {
                    let name = &input.columns()[i].name;
                    cols.iter().position(|c| c == name)
                });
                (Verb::Select(cols), schema)
            }
            Verb::Mutate(exprs) => {
                check_unique(exprs.iter().map(|(n, _)| &**n))?;
                let defs = exprs
                    .iter()
                    .map(|(n, e)| Ok(type_expr(input, e, "mutate")?.column(n)))
                    .collect::<Result<Vec<_>>>()?;
                let schema = assign(input, defs)?;
                (Verb::Mutate(exprs), schema)
            }
            Verb::Filter(predicate) => {
                let t = type_expr(input, &predicate, "filter")?;
                if t.ty != tabflow_frame::DataType::Bool {
                    return Err(ConstructionError::type_mismatch(&predicate, "bool", t.ty));
                }
                (Verb::Filter(predicate), input.clone())
            }
            Verb::Join(mut join) => {
                let (schema, layout) = join_schema(input, join.right.schema(), join.kind, &join.on)?;
                for (source, schema) in join.right.sources() {
                    match sources.get(source) {
                        Some(s) if s != schema => return Err(ConstructionError::ConflictingSource(source.to_string())),
                        Some(_) => {}
                        None => {
                            sources.insert(source.clone(), schema.clone());
                        }
                    }
                }
                join.layout = layout;
                (Verb::Join(join), schema)
            }
            Verb::GroupBy(keys) => {
                check_unique(keys.iter().map(|c| &**c))?;
                for key in &keys {
                    resolve(input, key, "group_by")?;
                }
                groups = keys.clone();
                (Verb::GroupBy(keys), input.clone())
            }
            Verb::Summarise(aggs) => {
                let keys = self.groups();
                check_unique(keys.iter().map(|k| &**k).chain(aggs.iter().map(|(n, _)| &**n)))?;
                let mut defs = keys
                    .iter()
                    .map(|k| resolve(input, k, "summarise").cloned())
                    .collect::<Result<Vec<_>>>()?;
                for (n, agg) in &aggs {
                    defs.push(type_agg(input, agg)?.column(n));
                }
                let mut schema = schema_of(defs)?;
                if !keys.is_empty() {
                    let keys = keys.iter().map(|k| &**k).collect::<Vec<_>>();
                    schema = schema.with_unique_key(&keys).map_err(frame_error)?;
                }
                (Verb::Summarise(aggs), schema)
            }
            Verb::OrderBy(keys) => {
                if keys.is_empty() {
                    return Err(ConstructionError::EmptyOrder);
                }
                for key in &keys {
                    resolve(input, &key.col, "order_by")?;
                }
                (Verb::OrderBy(keys), input.clone())
            }
            Verb::Window(window) => {
                if window.func.requires_order() && window.order_by.is_empty() {
                    return Err(ConstructionError::UnorderedWindow {
                        func: window.func.name(),
                    });
                }
                for key in &window.partition_by {
                    resolve(input, key, "window")?;
                }
                for key in &window.order_by {
                    resolve(input, &key.col, "window")?;
                }
                let def = type_window(input, &window.func)?.column(&window.name);
                let schema = assign(input, vec![def])?;
                (Verb::Window(window), schema)
            }
            Verb::Alias(alias) => {
                groups = self.groups().to_vec();
                name = alias.clone();
                (Verb::Alias(alias), input.clone())
            }
        };
        Ok(Self(Arc::new(Node {
            verb,
            input: Some(self.clone()),
            schema: Arc::new(schema),
            groups,
            name,
            sources,
        })))
    }
}

/// Compute the output schema and column layout of a join.
fn join_schema(
    left: &Schema,
    right: &Schema,
    kind: JoinKind,
    on: &[(Box<str>, Box<str>)],
) -> Result<(Schema, Vec<JoinColumn>)> {
    if on.is_empty() {
        return Err(InvalidJoin::EmptyPredicate.into());
    }
    for (l, r) in on {
        let lc = resolve(left, l, "join")?;
        let rc = resolve(right, r, "join")?;
        if lc.ty != rc.ty && lc.ty.numeric_supertype(rc.ty).is_none() {
            return Err(InvalidJoin::KeyType {
                left: l.to_string(),
                left_ty: lc.ty,
                right: r.to_string(),
                right_ty: rc.ty,
            }
            .into());
        }
    }
    let lkeys = on.iter().map(|(l, _)| &**l).collect::<Vec<_>>();
    let rkeys = on.iter().map(|(_, r)| &**r).collect::<Vec<_>>();
    let right_unique = right.covers_key(&rkeys);
    if (left.has_keys() || right.has_keys()) && !right_unique && !left.covers_key(&lkeys) {
        return Err(InvalidJoin::NotKeyEquivalent {
            on: on.iter().map(|(l, r)| format!("{l} = {r}")).join(", "),
        }
        .into());
    }

    let shared = on
        .iter()
        .filter(|(l, r)| l == r)
        .filter_map(|(_, r)| right.position(r))
        .collect::<Vec<_>>();
    let right_cols = (0..right.len()).filter(|i| !shared.contains(i)).collect::<Vec<_>>();
    let clashes = |name: &str| right_cols.iter().any(|&i| &*right.columns()[i].name == name);

    let mut layout = vec![];
    let mut columns = vec![];
    for (i, col) in left.columns().iter().enumerate() {
        if !clashes(&col.name) {
            layout.push(JoinColumn { side: Side::Left, index: i });
            columns.push(col.clone());
        }
    }
    let left_len = columns.len();
    for i in right_cols {
        let col = right.columns()[i].clone();
        let nullable = col.nullable || kind == JoinKind::Left;
        layout.push(JoinColumn {
            side: Side::Right,
            index: i,
        });
        columns.push(col.nullable(nullable));
    }

    let mut schema = schema_of(columns)?;
    if right_unique {
        // Each left row matches at most one right row, so left keys survive.
        schema = schema.retain_keys(left, |i| {
            layout[..left_len]
                .iter()
                .position(|c| c.index == i)
        });
    }
    Ok((schema, layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{asc, col, count, lag, lit, mean, row_number};
    use pretty_assertions::assert_eq;
    use tabflow_frame::DataType;

    fn left() -> Schema {
        Schema::from_pairs([("pk", DataType::I64), ("a", DataType::F64), ("x", DataType::F64)])
            .unwrap()
            .with_primary_key(&["pk"])
            .unwrap()
    }

    fn right() -> Schema {
        Schema::from_pairs([("pk", DataType::I64), ("x", DataType::F64), ("y", DataType::Str)])
            .unwrap()
            .with_primary_key(&["pk"])
            .unwrap()
    }

    fn col_names(chain: &Chain) -> Vec<&str> {
        chain.schema().names().collect()
    }

    #[test]
    fn chains_are_persistent() {
        let base = Chain::source("a", left());
        let first = base.select(&["pk"]).unwrap();
        let second = base.mutate([("z", col("a") * lit(2i64))]).unwrap();
        assert_eq!(col_names(&base), vec!["pk", "a", "x"]);
        assert_eq!(col_names(&first), vec!["pk"]);
        assert_eq!(col_names(&second), vec!["pk", "a", "x", "z"]);
        assert_eq!(first.input(), Some(&base));
    }

    #[test]
    fn unknown_column() {
        let base = Chain::source("a", left());
        let err = base.select(&["pk", "nope"]).unwrap_err();
        assert!(matches!(err, ConstructionError::UnknownColumn { name, verb: "select", .. } if name == "nope"));
        // Resolution uses the snapshot at each step.
        let narrowed = base.select(&["pk"]).unwrap();
        assert!(narrowed.filter(col("a").gt(lit(0i64))).is_err());
    }

    #[test]
    fn mutate_replaces_in_place() {
        let chain = Chain::source("a", left())
            .mutate([("a", col("pk")), ("b", col("a"))])
            .unwrap();
        assert_eq!(col_names(&chain), vec!["pk", "a", "x", "b"]);
        // Evaluated against the input: `b` sees the old float `a`.
        assert_eq!(chain.schema().column("a").unwrap().ty, DataType::I64);
        assert_eq!(chain.schema().column("b").unwrap().ty, DataType::F64);
    }

    #[test]
    fn transmute_keeps_only_new_columns() {
        let chain = Chain::source("a", left())
            .transmute([("sq", col("x") * col("x"))])
            .unwrap();
        assert_eq!(col_names(&chain), vec!["sq"]);
    }

    #[test]
    fn join_collision_rule() {
        let chain = Chain::source("a", left())
            .left_join(&Chain::source("b", right()), &[("pk", "pk")])
            .unwrap();
        // `pk` is emitted once from the left, the right `x` wins over the left one.
        assert_eq!(col_names(&chain), vec!["pk", "a", "x", "y"]);
        let Verb::Join(join) = chain.verb() else { panic!() };
        assert_eq!(
            join.layout(),
            &[
                JoinColumn { side: Side::Left, index: 0 },
                JoinColumn { side: Side::Left, index: 1 },
                JoinColumn { side: Side::Right, index: 1 },
                JoinColumn { side: Side::Right, index: 2 },
            ]
        );
        assert!(chain.schema().column("y").unwrap().nullable);
        assert_eq!(chain.schema().primary_key(), &[0]);
        assert_eq!(chain.sources().len(), 2);
    }

    #[test]
    fn join_requires_key_equivalence() {
        let a = Chain::source("a", left());
        let b = Chain::source("b", right());
        assert_eq!(
            a.inner_join(&b, &[]).unwrap_err(),
            ConstructionError::InvalidJoin(InvalidJoin::EmptyPredicate)
        );
        assert!(matches!(
            a.inner_join(&b, &[("x", "x")]).unwrap_err(),
            ConstructionError::InvalidJoin(InvalidJoin::NotKeyEquivalent { .. })
        ));
        assert!(matches!(
            a.inner_join(&b, &[("pk", "y")]).unwrap_err(),
            ConstructionError::InvalidJoin(InvalidJoin::KeyType { .. })
        ));
    }

    #[test]
    fn conflicting_sources() {
        let a = Chain::source("a", left());
        let other = Chain::source("a", right());
        assert_eq!(
            a.inner_join(&other, &[("pk", "pk")]).unwrap_err(),
            ConstructionError::ConflictingSource("a".into())
        );
    }

    #[test]
    fn unordered_window() {
        let base = Chain::source("a", left());
        assert_eq!(
            base.window("rn", row_number(), &[], []).unwrap_err(),
            ConstructionError::UnorderedWindow { func: "row_number" }
        );
        assert_eq!(
            base.window("prev", lag(col("x"), 1), &["pk"], []).unwrap_err(),
            ConstructionError::UnorderedWindow { func: "lag" }
        );
        let chain = base.window("rn", row_number(), &[], [asc("x")]).unwrap();
        assert!(!chain.schema().column("rn").unwrap().nullable);
    }

    #[test]
    fn group_by_then_summarise() {
        let chain = Chain::source("a", left())
            .mutate([("bucket", col("a").round(-1))])
            .unwrap()
            .group_by(&["bucket"])
            .unwrap()
            .summarise([("n", count(col("bucket"))), ("m", mean(col("x")))])
            .unwrap();
        assert_eq!(col_names(&chain), vec!["bucket", "n", "m"]);
        assert!(chain.groups().is_empty());
        assert!(chain.schema().covers_key(&["bucket"]));

        let grouped = Chain::source("a", left()).group_by(&["pk"]).unwrap();
        assert_eq!(
            grouped.filter(col("x").gt(lit(1.0))).unwrap_err(),
            ConstructionError::NotAggregate("filter")
        );
    }

    #[test]
    fn filter_must_be_boolean() {
        let base = Chain::source("a", left());
        assert!(matches!(
            base.filter(col("x")).unwrap_err(),
            ConstructionError::TypeMismatch { found: DataType::F64, .. }
        ));
    }

    #[test]
    fn alias_renames() {
        let chain = Chain::source("a", left()).alias("renamed").unwrap();
        assert_eq!(chain.name(), "renamed");
        assert_eq!(chain.lineage().len(), 2);
    }
}
