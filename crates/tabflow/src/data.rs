//! Synthetic passengers and cabins.
//!
//! Everything is drawn from a seeded generator, so the same seed always
//! produces the same tables.

use rand::Rng;
use tabflow_frame::{ColumnDef, DataType, FrameError, Row, Schema, Table, Value};

pub const PASSENGERS: &str = "passengers";
pub const CABINS: &str = "cabins";

pub fn passenger_schema() -> Result<Schema, FrameError> {
    Schema::new(vec![
        ColumnDef::new("pk", DataType::I64).not_null(),
        ColumnDef::new("class", DataType::I64).not_null(),
        ColumnDef::new("age", DataType::F64),
        ColumnDef::new("fare", DataType::F64).not_null(),
    ])?
    .with_primary_key(&["pk"])
}

pub fn cabin_schema() -> Result<Schema, FrameError> {
    Schema::new(vec![
        ColumnDef::new("pk", DataType::I64).not_null(),
        ColumnDef::new("deck", DataType::I64).not_null(),
        ColumnDef::new("surcharge", DataType::F64),
    ])?
    .with_primary_key(&["pk"])
}

/// Cents, so that fares are exact to two decimals.
fn money(rng: &mut impl Rng, low: i64, high: i64) -> f64 {
    rng.random_range(low..=high) as f64 / 100.0
}

/// `rows` passengers. About one in five has no recorded age.
pub fn passengers(rng: &mut impl Rng, rows: usize) -> Result<Table, FrameError> {
    let rows: Vec<Row> = (1..=rows as i64)
        .map(|pk| {
            let class = rng.random_range(1..=3i64);
            let age = (!rng.random_bool(0.2)).then(|| rng.random_range(1..=80i64) as f64);
            let fare = money(rng, 500, 5000) * (4 - class) as f64;
            vec![Value::I64(pk), Value::I64(class), Value::from(age), Value::F64(fare)].into_boxed_slice()
        })
        .collect();
    Table::new(PASSENGERS, passenger_schema()?, rows)
}

/// Cabins for roughly half of the `passengers`, plus a few booked by nobody.
pub fn cabins(rng: &mut impl Rng, passengers: usize) -> Result<Table, FrameError> {
    let unbooked = passengers as i64 + 1..=passengers as i64 + 3;
    let booked: Vec<i64> = (1..=passengers as i64).filter(|_| rng.random_bool(0.5)).collect();
    let rows: Vec<Row> = booked
        .into_iter()
        .chain(unbooked)
        .map(|pk| {
            let deck = rng.random_range(1..=7i64);
            let surcharge = (!rng.random_bool(0.1)).then(|| money(rng, 0, 2500));
            vec![Value::I64(pk), Value::I64(deck), Value::from(surcharge)].into_boxed_slice()
        })
        .collect();
    Table::new(CABINS, cabin_schema()?, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn same_seed_same_tables() {
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let p = passengers(&mut rng, 50).unwrap();
            let c = cabins(&mut rng, 50).unwrap();
            (p, c)
        };
        assert_eq!(draw(7), draw(7));
        assert_ne!(draw(7).0, draw(8).0);
    }

    #[test]
    fn shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        let p = passengers(&mut rng, 40).unwrap();
        assert_eq!(p.num_rows(), 40);
        assert!(p.column("class").unwrap().all(|v| (1..=3).contains(&v.as_i64().unwrap())));

        let c = cabins(&mut rng, 40).unwrap();
        let pks: Vec<i64> = c.column("pk").unwrap().filter_map(Value::as_i64).collect();
        assert_eq!(&pks[pks.len() - 3..], [41, 42, 43]);
        assert!(pks.windows(2).all(|w| w[0] < w[1]));
    }
}
