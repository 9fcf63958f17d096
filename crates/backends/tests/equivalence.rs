use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tabflow_backends::{Backend, BoundInputs, Eager, LazySqlite, Query, RawQuery, RawSqlite};
use tabflow_frame::{ColumnDef, DataType, Row, Schema, Table, Value, row};
use tabflow_verbs::{Chain, asc, col, count, count_rows, desc, lag, lead, lit, mean, rank, row_number, sum};

type ResultTest<T> = anyhow::Result<T>;

fn passengers() -> Table {
    let schema = Schema::new(vec![
        ColumnDef::new("pk", DataType::I64),
        ColumnDef::new("age", DataType::F64),
        ColumnDef::new("class", DataType::I64).not_null(),
        ColumnDef::new("name", DataType::Str),
        ColumnDef::new("fare", DataType::F64),
    ])
    .unwrap()
    .with_primary_key(&["pk"])
    .unwrap();
    Table::new(
        "passengers",
        schema,
        vec![
            row![1i64, 22.0, 3i64, " Braund ", 7.25],
            row![2i64, 38.0, 1i64, "Cumings", 71.25],
            row![3i64, None::<f64>, 3i64, "Heikkinen", 7.75],
            row![4i64, 35.0, 1i64, "Futrelle", 53.0],
            row![5i64, 35.0, 3i64, "Allen", 8.0],
            row![6i64, None::<f64>, 2i64, "Moran", 8.5],
        ],
    )
    .unwrap()
}

fn cabins() -> Table {
    let schema = Schema::from_pairs([("pk", DataType::I64), ("deck", DataType::Str), ("fare", DataType::F64)])
        .unwrap()
        .with_primary_key(&["pk"])
        .unwrap();
    Table::new(
        "cabins",
        schema,
        vec![
            row![1i64, "C", 1.5],
            row![2i64, "B", 2.0],
            row![4i64, "C", 0.5],
            row![7i64, "A", 4.0],
        ],
    )
    .unwrap()
}

fn inputs() -> BoundInputs {
    BoundInputs::new().bind("passengers", passengers()).bind("cabins", cabins())
}

fn source(table: &Table) -> Chain {
    Chain::source(table.name(), table.schema().clone())
}

/// Run `chain` on the eager and the lazy backend and check they agree.
fn run_both(chain: &Chain) -> ResultTest<Vec<Row>> {
    run_both_on(chain, &inputs())
}

fn run_both_on(chain: &Chain, inputs: &BoundInputs) -> ResultTest<Vec<Row>> {
    let eager = Eager::default().execute(&Query::Chain(chain.clone()), inputs)?;
    let lazy = LazySqlite::default().execute(&Query::Chain(chain.clone()), inputs)?;
    assert_eq!(eager.schema(), lazy.schema());
    assert_eq!(eager.rows(), lazy.rows(), "{}", LazySqlite::default().compile(chain)?);
    Ok(eager.into_rows())
}

#[test]
fn join_derive_aggregate() -> ResultTest<()> {
    let chain = source(&passengers())
        .left_join(&source(&cabins()), &[("pk", "pk")])?
        .mutate([("fare2", col("fare") * col("fare"))])?
        .group_by(&["class"])?
        .summarise([
            ("n", count_rows()),
            ("cabins", count(col("deck"))),
            ("total", sum(col("fare2"))),
            ("mean_age", mean(col("age"))),
        ])?
        .order_by([asc("class")])?;
    let rows = run_both(&chain)?;
    assert_eq!(
        rows,
        vec![
            row![1i64, 2i64, 2i64, 4.25, 36.5],
            row![2i64, 1i64, 0i64, None::<f64>, None::<f64>],
            row![3i64, 3i64, 1i64, 2.25, 28.5],
        ]
    );

    let oracle = RawQuery::new(
        "oracle",
        "SELECT p.class AS class, COUNT(*) AS n, COUNT(c.deck) AS cabins, \
         SUM(c.fare * c.fare) AS total, AVG(p.age) AS mean_age \
         FROM {passengers} AS p LEFT JOIN {cabins} AS c ON p.pk = c.pk \
         GROUP BY p.class ORDER BY p.class",
    );
    let raw = RawSqlite::default().execute(&oracle.into(), &inputs())?;
    assert_eq!(raw.schema().names().collect::<Vec<_>>(), chain.schema().names().collect::<Vec<_>>());
    assert_eq!(raw.into_rows(), rows);
    Ok(())
}

#[test]
fn later_column_wins_on_every_backend() -> ResultTest<()> {
    let chain = source(&passengers()).inner_join(&source(&cabins()), &[("pk", "pk")])?;
    assert_eq!(
        chain.schema().names().collect::<Vec<_>>(),
        vec!["pk", "age", "class", "name", "deck", "fare"]
    );
    let rows = run_both(&chain)?;
    let fares = rows.iter().map(|row| row[5].clone()).collect::<Vec<_>>();
    assert_eq!(fares, vec![Value::F64(1.5), Value::F64(2.0), Value::F64(0.5)]);

    let oracle = RawQuery::new(
        "oracle",
        "SELECT p.*, c.deck, c.fare FROM {passengers} AS p JOIN {cabins} AS c ON p.pk = c.pk ORDER BY p.__ord",
    );
    let raw = RawSqlite::default().execute(&oracle.into(), &inputs())?;
    assert_eq!(raw.schema().names().collect::<Vec<_>>(), vec!["pk", "age", "class", "name", "deck", "fare"]);
    assert_eq!(raw.into_rows(), rows);
    Ok(())
}

#[test]
fn windows_agree() -> ResultTest<()> {
    let chain = source(&passengers())
        .window("rn", row_number(), &["class"], [asc("age")])?
        .window("rk", rank(), &[], [desc("age")])?
        .window("prev_fare", lag(col("fare"), 1), &["class"], [asc("pk")])?
        .window("next_age", lead(col("age"), 1), &[], [asc("age").nulls_first()])?
        .select(&["pk", "rn", "rk", "prev_fare", "next_age"])?;
    let rows = run_both(&chain)?;
    assert_eq!(
        rows,
        vec![
            row![1i64, 1i64, 4i64, None::<f64>, 35.0],
            row![2i64, 2i64, 1i64, None::<f64>, None::<f64>],
            row![3i64, 3i64, 5i64, 7.25, None::<f64>],
            row![4i64, 1i64, 2i64, 71.25, 35.0],
            row![5i64, 2i64, 2i64, 7.75, 38.0],
            row![6i64, 1i64, 5i64, None::<f64>, 22.0],
        ]
    );
    Ok(())
}

#[test]
fn nulls_sort_last_unless_asked() -> ResultTest<()> {
    let pks = |rows: Vec<Row>| rows.into_iter().map(|row| row[0].clone()).collect::<Vec<_>>();
    let chain = source(&passengers()).order_by([desc("age")])?.select(&["pk"])?;
    assert_eq!(pks(run_both(&chain)?), [2i64, 4, 5, 1, 3, 6].map(Value::from));
    let chain = source(&passengers()).order_by([asc("age")])?.select(&["pk"])?;
    assert_eq!(pks(run_both(&chain)?), [1i64, 4, 5, 2, 3, 6].map(Value::from));
    let chain = source(&passengers())
        .order_by([asc("age").nulls_first(), desc("pk")])?
        .select(&["pk"])?;
    assert_eq!(pks(run_both(&chain)?), [6i64, 3, 1, 5, 4, 2].map(Value::from));
    Ok(())
}

#[test]
fn scalar_functions_agree() -> ResultTest<()> {
    let chain = source(&passengers())
        .filter(col("fare").lt(lit(60i64)).and(col("class").ne(lit(2i64))))?
        .transmute([
            ("pk", col("pk")),
            ("bucket", (col("age") + lit(4.999)).round(-1)),
            ("per_class", col("fare") / col("class")),
            ("name", col("name").strip()),
            ("cheap", col("fare").lte(lit(7.5)).or(col("age").is_null())),
            ("dist", (col("age") - lit(30i64)).abs()),
        ])?;
    let rows = run_both(&chain)?;
    assert_eq!(
        rows,
        vec![
            row![1i64, 30.0, 7.25 / 3.0, "Braund", true, 8.0],
            row![3i64, None::<f64>, 7.75 / 3.0, "Heikkinen", true, None::<f64>],
            row![4i64, 40.0, 53.0, "Futrelle", false, 5.0],
            row![5i64, 40.0, 8.0 / 3.0, "Allen", false, 5.0],
        ]
    );
    Ok(())
}

#[test]
fn describe_is_what_runs() -> ResultTest<()> {
    let chain = source(&passengers()).filter(col("age").gt(lit(30i64)))?;
    let query = Query::Chain(chain.clone());
    let lazy = LazySqlite::default();
    assert_eq!(lazy.describe(&query)?, lazy.compile(&chain)?.to_string());
    assert_eq!(Eager::default().describe(&query)?, chain.to_string());
    assert!(RawSqlite::default().describe(&query).is_err());
    Ok(())
}

fn single_column(ty: DataType, values: Vec<Value>) -> Table {
    let schema = Schema::from_pairs([("pk", DataType::I64), ("x", ty)])
        .unwrap()
        .with_primary_key(&["pk"])
        .unwrap();
    let rows = values
        .into_iter()
        .enumerate()
        .map(|(i, x)| Row::from(vec![Value::I64(i as i64 + 1), x]))
        .collect();
    Table::new("t", schema, rows).unwrap()
}

#[test]
fn negative_zero_equals_zero() -> ResultTest<()> {
    let table = single_column(DataType::F64, vec![Value::F64(0.0), Value::F64(-0.0), Value::F64(-1.0)]);
    let inputs = BoundInputs::new().bind("t", table.clone());

    let zeros = run_both_on(&source(&table).filter(col("x").eq(lit(0.0)))?.select(&["pk"])?, &inputs)?;
    assert_eq!(zeros, vec![row![1i64], row![2i64]]);

    let sorted = run_both_on(&source(&table).order_by([asc("x")])?.select(&["pk"])?, &inputs)?;
    assert_eq!(sorted, vec![row![3i64], row![1i64], row![2i64]]);
    Ok(())
}

#[test]
fn large_integers_compare_exactly_with_floats() -> ResultTest<()> {
    let two_53 = 9_007_199_254_740_992_i64;
    let table = single_column(DataType::I64, vec![Value::I64(two_53), Value::I64(two_53 + 1)]);
    let inputs = BoundInputs::new().bind("t", table.clone());

    let equal = run_both_on(&source(&table).filter(col("x").eq(lit(two_53 as f64)))?.select(&["pk"])?, &inputs)?;
    assert_eq!(equal, vec![row![1i64]]);
    let above = run_both_on(&source(&table).filter(col("x").gt(lit(two_53 as f64)))?.select(&["pk"])?, &inputs)?;
    assert_eq!(above, vec![row![2i64]]);
    Ok(())
}

#[test]
fn integer_overflow_fails_on_every_backend() -> ResultTest<()> {
    let table = single_column(DataType::I64, vec![Value::I64(i64::MAX), Value::I64(1)]);
    let inputs = BoundInputs::new().bind("t", table.clone());
    let fails_everywhere = |chain: Chain| {
        let query = Query::Chain(chain);
        assert!(Eager::default().execute(&query, &inputs).is_err(), "eager accepted {query:?}");
        assert!(LazySqlite::default().execute(&query, &inputs).is_err(), "sqlite accepted {query:?}");
    };

    fails_everywhere(source(&table).mutate([("y", col("x") + lit(1i64))])?);
    fails_everywhere(source(&table).summarise([("total", sum(col("x")))])?);

    // An overflowing intermediate is computed in floating point, and need not fail.
    let kept = run_both_on(
        &source(&table).filter((col("x") + lit(1i64)).gt(lit(0i64)))?.select(&["pk"])?,
        &inputs,
    )?;
    assert_eq!(kept, vec![row![1i64], row![2i64]]);
    Ok(())
}

fn grouped(rows: &[(i64, Option<i64>, Option<i64>)]) -> Table {
    let schema = Schema::from_pairs([("pk", DataType::I64), ("g", DataType::I64), ("k", DataType::I64)])
        .unwrap()
        .with_primary_key(&["pk"])
        .unwrap();
    let rows = rows.iter().map(|&(pk, g, k)| row![pk, g, k]).collect();
    Table::new("t", schema, rows).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn row_numbers_are_contiguous_per_partition(
        cells in proptest::collection::vec((proptest::option::of(0i64..3), proptest::option::of(0i64..4)), 0..24)
    ) {
        let rows = cells.iter().enumerate().map(|(i, &(g, k))| (i as i64, g, k)).collect::<Vec<_>>();
        let table = grouped(&rows);
        let chain = source(&table).window("rn", row_number(), &["g"], [asc("k")]).unwrap();
        let inputs = BoundInputs::new().bind("t", table);
        let eager = Eager::default().run(&chain, &inputs).unwrap();
        let lazy = LazySqlite::default().lazy(&chain, &inputs).unwrap().collect().unwrap();
        prop_assert_eq!(eager.rows(), lazy.rows());

        for g in [None, Some(0), Some(1), Some(2)] {
            let mut members = eager
                .rows()
                .iter()
                .filter(|row| row[1] == Value::from(g))
                .map(|row| (row[2].clone(), row[3].as_i64().unwrap_or_default(), row[0].as_i64().unwrap_or_default()))
                .collect::<Vec<_>>();
            let mut numbers = members.iter().map(|m| m.1).collect::<Vec<_>>();
            numbers.sort();
            prop_assert_eq!(numbers, (1..=members.len() as i64).collect::<Vec<_>>());

            // Within equal keys, numbering follows input order.
            members.sort_by_key(|m| m.1);
            for pair in members.windows(2) {
                if pair[0].0 == pair[1].0 {
                    prop_assert!(pair[0].2 < pair[1].2);
                }
            }
        }
    }
}
