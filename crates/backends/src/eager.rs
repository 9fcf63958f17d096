//! The eager backend interprets a chain verb by verb over fully materialized rows.

use std::cmp::Ordering;
use std::collections::HashMap;

use tabflow_frame::{DataType, Row, Schema, Table, Value};
use tabflow_verbs::check::position;
use tabflow_verbs::{AggFunc, Chain, ConstructionError, JoinKind, NullOrder, OrderKey, Side, Verb, WindowFunc};

use crate::eval::{Bound, bind};
use crate::{Backend, BackendError, BackendKind, BoundInputs, Query, Result};

#[derive(Debug, Clone)]
pub struct Eager {
    name: String,
}

impl Default for Eager {
    fn default() -> Self {
        Self::new("eager")
    }
}

impl Eager {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }

    /// Execute `chain` immediately.
    pub fn run(&self, chain: &Chain, inputs: &BoundInputs) -> Result<Table> {
        let rows = rows(chain, inputs)?;
        let table = Table::new(chain.name(), chain.schema().clone(), rows)?;
        tracing::debug!(backend = %self.name, table = chain.name(), rows = table.num_rows(), "executed chain");
        Ok(table)
    }
}

impl Backend for Eager {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Eager
    }

    fn describe(&self, query: &Query) -> Result<String> {
        match query {
            Query::Chain(chain) => Ok(chain.to_string()),
            Query::Raw(_) => Err(self.unsupported(query)),
        }
    }

    fn execute(&self, query: &Query, inputs: &BoundInputs) -> Result<Table> {
        match query {
            Query::Chain(chain) => self.run(chain, inputs),
            Query::Raw(_) => Err(self.unsupported(query)),
        }
    }
}

impl Eager {
    fn unsupported(&self, query: &Query) -> BackendError {
        BackendError::UnsupportedQuery {
            backend: self.name.clone(),
            query: query.kind(),
        }
    }
}

fn positions<'a>(schema: &Schema, names: impl IntoIterator<Item = &'a str>, verb: &'static str) -> Result<Vec<usize>> {
    names
        .into_iter()
        .map(|name| Ok(position(schema, name, verb)?))
        .collect()
}

fn rows(chain: &Chain, inputs: &BoundInputs) -> Result<Vec<Row>> {
    let Some(input) = chain.input() else {
        let Verb::Source(name) = chain.verb() else {
            return Err(ConstructionError::MisplacedSource.into());
        };
        return Ok(inputs.source(name, chain.schema())?.rows().to_vec());
    };
    let schema = &**input.schema();
    let rows = rows(input, inputs)?;
    Ok(match chain.verb() {
        Verb::Source(_) => return Err(ConstructionError::MisplacedSource.into()),
        Verb::GroupBy(_) | Verb::Alias(_) => rows,
        Verb::Select(cols) => {
            let cols = positions(schema, cols.iter().map(|c| &**c), "select")?;
            rows.iter()
                .map(|row| cols.iter().map(|&i| row[i].clone()).collect())
                .collect()
        }
        Verb::Mutate(exprs) => {
            let bound = exprs
                .iter()
                .map(|(name, expr)| Ok((&**name, bind(schema, expr)?)))
                .collect::<Result<Vec<_>>>()?;
            // Each output column is either an input column or one of the new values.
            let plan = chain
                .schema()
                .names()
                .map(|name| match bound.iter().position(|(n, _)| *n == name) {
                    Some(j) => Ok(Err(j)),
                    None => Ok(Ok(position(schema, name, "mutate")?)),
                })
                .collect::<Result<Vec<std::result::Result<usize, usize>>>>()?;
            rows.iter()
                .map(|row| {
                    let values = bound.iter().map(|(_, expr)| expr.eval(row)).collect::<Vec<_>>();
                    plan.iter()
                        .map(|src| match src {
                            Ok(i) => row[*i].clone(),
                            Err(j) => values[*j].clone(),
                        })
                        .collect()
                })
                .collect()
        }
        Verb::Filter(expr) => {
            let pred = bind(schema, expr)?;
            rows.into_iter()
                .filter(|row| pred.eval(row) == Value::Bool(true))
                .collect()
        }
        Verb::Join(join) => {
            let right_rows = self::rows(&join.right, inputs)?;
            let rschema = &**join.right.schema();
            let lkeys = positions(schema, join.on.iter().map(|(l, _)| &**l), "join")?;
            let rkeys = positions(rschema, join.on.iter().map(|(_, r)| &**r), "join")?;
            // Integer keys compare equal to float keys of the same value.
            let widen = lkeys
                .iter()
                .zip(&rkeys)
                .map(|(&l, &r)| schema.columns()[l].ty != rschema.columns()[r].ty)
                .collect::<Vec<_>>();
            let key = |row: &Row, cols: &[usize]| -> Option<Vec<Value>> {
                cols.iter()
                    .zip(&widen)
                    .map(|(&i, &widen)| match &row[i] {
                        Value::Null => None,
                        v if widen => v.as_f64().map(Value::F64),
                        v => Some(v.clone()),
                    })
                    .collect()
            };
            let mut index = HashMap::<Vec<Value>, Vec<usize>>::new();
            for (j, row) in right_rows.iter().enumerate() {
                if let Some(k) = key(row, &rkeys) {
                    index.entry(k).or_default().push(j);
                }
            }
            let emit = |l: &Row, r: Option<&Row>| -> Row {
                join.layout()
                    .iter()
                    .map(|col| match (col.side, r) {
                        (Side::Left, _) => l[col.index].clone(),
                        (Side::Right, Some(r)) => r[col.index].clone(),
                        (Side::Right, None) => Value::Null,
                    })
                    .collect()
            };
            let mut out = vec![];
            for l in &rows {
                match key(l, &lkeys).and_then(|k| index.get(&k)) {
                    Some(matches) => out.extend(matches.iter().map(|&j| emit(l, Some(&right_rows[j])))),
                    None if join.kind == JoinKind::Left => out.push(emit(l, None)),
                    None => {}
                }
            }
            out
        }
        Verb::Summarise(aggs) => {
            let keys = positions(schema, input.groups().iter().map(|k| &**k), "summarise")?;
            let mut groups = partition(&rows, &keys);
            if keys.is_empty() && groups.is_empty() {
                groups.push(vec![]);
            }
            let bound = aggs
                .iter()
                .map(|(name, agg)| Ok((&**name, agg.func, agg.arg.as_ref().map(|arg| bind(schema, arg)).transpose()?)))
                .collect::<Result<Vec<_>>>()?;
            let out_types = chain.schema().columns()[keys.len()..].iter().map(|c| c.ty);
            let bound = bound.into_iter().zip(out_types).collect::<Vec<_>>();
            groups
                .iter()
                .map(|members| {
                    let first = members.first().map(|&i| &rows[i]);
                    let mut row: Vec<Value> = keys
                        .iter()
                        .map(|&k| first.map_or(Value::Null, |row| row[k].clone()))
                        .collect();
                    for ((name, func, arg), ty) in &bound {
                        let value = aggregate(*func, arg.as_ref(), *ty, members.iter().map(|&i| &rows[i]))
                            .ok_or_else(|| BackendError::IntegerOverflow((*name).to_owned()))?;
                        row.push(value);
                    }
                    Ok(Row::from(row))
                })
                .collect::<Result<_>>()?
        }
        Verb::OrderBy(keys) => {
            let keys = order_keys(schema, keys)?;
            let mut rows = rows;
            rows.sort_by(|a, b| compare(a, b, &keys));
            rows
        }
        Verb::Window(window) => {
            let parts = positions(schema, window.partition_by.iter().map(|k| &**k), "window")?;
            let keys = order_keys(schema, &window.order_by)?;
            let arg = window.func.arg().map(|arg| bind(schema, arg)).transpose()?;
            let mut values = vec![Value::Null; rows.len()];
            for mut members in partition(&rows, &parts) {
                // Stable, so ties keep their input order.
                members.sort_by(|&a, &b| compare(&rows[a], &rows[b], &keys));
                let at = |n: Option<usize>| -> Value {
                    match (n.and_then(|n| members.get(n)), &arg) {
                        (Some(&j), Some(arg)) => arg.eval(&rows[j]),
                        _ => Value::Null,
                    }
                };
                let mut rank = 1;
                for (n, &i) in members.iter().enumerate() {
                    values[i] = match &window.func {
                        WindowFunc::RowNumber => Value::I64(n as i64 + 1),
                        WindowFunc::Rank => {
                            if n > 0 && compare(&rows[members[n - 1]], &rows[i], &keys) != Ordering::Equal {
                                rank = n + 1;
                            }
                            Value::I64(rank as i64)
                        }
                        WindowFunc::Lead { offset, .. } => at(n.checked_add(*offset as usize)),
                        WindowFunc::Lag { offset, .. } => at(n.checked_sub(*offset as usize)),
                    };
                }
            }
            let plan = chain
                .schema()
                .names()
                .map(|name| {
                    if name == &*window.name {
                        Ok(None)
                    } else {
                        Ok(Some(position(schema, name, "window")?))
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            rows.iter()
                .zip(values)
                .map(|(row, value)| {
                    plan.iter()
                        .map(|src| match src {
                            Some(i) => row[*i].clone(),
                            None => value.clone(),
                        })
                        .collect()
                })
                .collect()
        }
    })
}

/// Group row indices by the values of `keys`, in order of first appearance.
fn partition(rows: &[Row], keys: &[usize]) -> Vec<Vec<usize>> {
    let mut groups = Vec::<Vec<usize>>::new();
    let mut lookup = HashMap::<Vec<Value>, usize>::new();
    for (i, row) in rows.iter().enumerate() {
        let key = keys.iter().map(|&k| row[k].clone()).collect::<Vec<_>>();
        let g = *lookup.entry(key).or_insert_with(|| {
            groups.push(vec![]);
            groups.len() - 1
        });
        groups[g].push(i);
    }
    groups
}

fn order_keys<'a>(schema: &Schema, keys: &'a [OrderKey]) -> Result<Vec<(usize, &'a OrderKey)>> {
    keys.iter()
        .map(|key| Ok((position(schema, &key.col, "order_by")?, key)))
        .collect()
}

/// Compare two rows by ordering keys.
/// The direction applies to values only, nulls go where the key says in both directions.
fn compare(a: &[Value], b: &[Value], keys: &[(usize, &OrderKey)]) -> Ordering {
    for &(i, key) in keys {
        let ord = match (a[i].is_null(), b[i].is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if key.nulls == NullOrder::First => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if key.nulls == NullOrder::First => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = a[i].partial_cmp_non_null(&b[i]).unwrap_or(Ordering::Equal);
                if key.desc { ord.reverse() } else { ord }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Returns [None] if an integer sum overflows.
fn aggregate<'a>(func: AggFunc, arg: Option<&Bound>, ty: DataType, rows: impl Iterator<Item = &'a Row>) -> Option<Value> {
    let Some(arg) = arg else {
        return Some(Value::I64(rows.count() as i64));
    };
    let mut values = rows.map(|row| arg.eval(row)).filter(|v| !v.is_null());
    Some(match func {
        AggFunc::CountRows | AggFunc::Count => Value::I64(values.count() as i64),
        AggFunc::Sum if ty == DataType::I64 => {
            let mut values = values.by_ref().filter_map(|v| v.as_i64());
            let Some(first) = values.next() else {
                return Some(Value::Null);
            };
            Value::I64(values.try_fold(first, i64::checked_add)?)
        }
        AggFunc::Sum => values
            .filter_map(|v| v.as_f64())
            .reduce(|a, b| a + b)
            .map_or(Value::Null, Value::F64),
        AggFunc::Mean => {
            let (sum, n) = values
                .filter_map(|v| v.as_f64())
                .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
            if n == 0 { Value::Null } else { Value::F64(sum / n as f64) }
        }
        AggFunc::Min => values
            .reduce(|a, b| if b.partial_cmp_non_null(&a) == Some(Ordering::Less) { b } else { a })
            .unwrap_or(Value::Null),
        AggFunc::Max => values
            .reduce(|a, b| if b.partial_cmp_non_null(&a) == Some(Ordering::Greater) { b } else { a })
            .unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabflow_frame::{ColumnDef, row};
    use tabflow_verbs::{asc, col, count, count_rows, desc, lead, lit, mean, rank, row_number, sum};

    fn people() -> Table {
        let schema = Schema::new(vec![
            ColumnDef::new("pk", DataType::I64),
            ColumnDef::new("age", DataType::F64),
            ColumnDef::new("sex", DataType::Str),
        ])
        .unwrap()
        .with_primary_key(&["pk"])
        .unwrap();
        Table::new(
            "people",
            schema,
            vec![
                row![1i64, 22.0, "m"],
                row![2i64, None::<f64>, "f"],
                row![3i64, 35.0, "f"],
                row![4i64, 22.0, "m"],
            ],
        )
        .unwrap()
    }

    fn run(chain: &Chain) -> Vec<Row> {
        let table = people();
        let inputs = BoundInputs::new().bind("people", table);
        Eager::default().run(chain, &inputs).unwrap().into_rows()
    }

    fn source() -> Chain {
        Chain::source("people", people().schema().clone())
    }

    #[test]
    fn order_is_stable_and_nulls_last() {
        let chain = source().order_by([asc("age")]).unwrap().select(&["pk"]).unwrap();
        assert_eq!(run(&chain), vec![row![1i64], row![4i64], row![3i64], row![2i64]]);
        let chain = source().order_by([desc("age")]).unwrap().select(&["pk"]).unwrap();
        assert_eq!(run(&chain), vec![row![3i64], row![1i64], row![4i64], row![2i64]]);
        let chain = source()
            .order_by([asc("age").nulls_first()])
            .unwrap()
            .select(&["pk"])
            .unwrap();
        assert_eq!(run(&chain), vec![row![2i64], row![1i64], row![4i64], row![3i64]]);
    }

    #[test]
    fn groups_in_first_appearance_order() {
        let chain = source()
            .group_by(&["sex"])
            .unwrap()
            .summarise([
                ("n", count_rows()),
                ("aged", count(col("age"))),
                ("mean_age", mean(col("age"))),
                ("total", sum(col("pk"))),
            ])
            .unwrap();
        assert_eq!(
            run(&chain),
            vec![row!["m", 2i64, 2i64, 22.0, 5i64], row!["f", 2i64, 1i64, 35.0, 5i64]]
        );
    }

    #[test]
    fn ungrouped_summary_of_nothing() {
        let chain = source()
            .filter(col("pk").gt(lit(100i64)))
            .unwrap()
            .summarise([("n", count_rows()), ("s", sum(col("age")))])
            .unwrap();
        assert_eq!(run(&chain), vec![row![0i64, None::<f64>]]);
    }

    #[test]
    fn windows_keep_input_order() {
        let chain = source()
            .window("rn", row_number(), &[], [asc("age")])
            .unwrap()
            .window("rk", rank(), &[], [asc("age")])
            .unwrap()
            .window("next", lead(col("pk"), 1), &["sex"], [asc("pk")])
            .unwrap()
            .select(&["pk", "rn", "rk", "next"])
            .unwrap();
        assert_eq!(
            run(&chain),
            vec![
                row![1i64, 1i64, 1i64, 4i64],
                row![2i64, 4i64, 4i64, 3i64],
                row![3i64, 3i64, 3i64, None::<i64>],
                row![4i64, 2i64, 1i64, None::<i64>],
            ]
        );
    }

    #[test]
    fn raw_queries_are_rejected() {
        let err = Eager::default()
            .execute(&Query::Raw(crate::RawQuery::new("q", "SELECT 1")), &BoundInputs::new())
            .unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedQuery { query: "raw", .. }));
    }

    #[test]
    fn missing_input() {
        let err = Eager::default().run(&source(), &BoundInputs::new()).unwrap_err();
        assert!(matches!(err, BackendError::MissingInput(name) if name == "people"));
    }
}
