//! The canonical text form of a chain.
//!
//! The text is deterministic, so it can be used as a cache key by backends that do not compile.

use std::fmt;

use itertools::Itertools;

use crate::chain::{Chain, Join, Verb, Window};

fn assignments<T: fmt::Display>(items: &[(Box<str>, T)]) -> String {
    items.iter().map(|(name, item)| format!("{name} = {item}")).join(", ")
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            Self::Source(source) => write!(f, "{name} {source}"),
            Self::Select(cols) | Self::GroupBy(cols) => write!(f, "{name} {}", cols.iter().join(", ")),
            Self::Mutate(exprs) => write!(f, "{name} {}", assignments(exprs)),
            Self::Filter(expr) => write!(f, "{name} {expr}"),
            Self::Join(Join { right, on, .. }) => write!(
                f,
                "{name} [{}] on ({})",
                right.lineage().iter().map(|step| step.verb()).join(" | "),
                on.iter().map(|(l, r)| format!("{l} = {r}")).join(", ")
            ),
            Self::Summarise(aggs) => write!(f, "{name} {}", assignments(aggs)),
            Self::OrderBy(keys) => write!(f, "{name} {}", keys.iter().join(", ")),
            Self::Window(Window {
                name: col,
                func,
                partition_by,
                order_by,
            }) => {
                write!(f, "{name} {col} = {func} over (")?;
                if !partition_by.is_empty() {
                    write!(f, "partition by {} ", partition_by.iter().join(", "))?;
                }
                write!(f, "order by {})", order_by.iter().join(", "))
            }
            Self::Alias(alias) => write!(f, "{name} {alias}"),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (source, schema) in self.sources() {
            writeln!(f, "-- {source} {schema}")?;
        }
        write!(f, "{}", self.lineage().iter().map(|step| step.verb()).join("\n| "))
    }
}

#[cfg(test)]
mod tests {
    use crate::chain::Chain;
    use crate::expr::{asc, col, count, lead, lit, mean};
    use tabflow_frame::{DataType, Schema};

    fn titanic() -> Schema {
        Schema::from_pairs([("pk", DataType::I64), ("age", DataType::F64), ("survived", DataType::I64)]).unwrap()
    }

    #[test]
    fn canonical_text() {
        let chain = Chain::source("titanic", titanic())
            .mutate([("age_bucket", (col("age") + lit(4.999)).round(-1))])
            .unwrap()
            .group_by(&["age_bucket"])
            .unwrap()
            .summarise([("samples", count(col("age_bucket"))), ("rate", mean(col("survived")))])
            .unwrap()
            .order_by([asc("age_bucket")])
            .unwrap()
            .alias("buckets")
            .unwrap();
        let expected = "\
-- titanic (pk: i64?, age: f64?, survived: i64?)
source titanic
| mutate age_bucket = round((age + 4.999), -1)
| group_by age_bucket
| summarise samples = count(age_bucket), rate = mean(survived)
| order_by age_bucket ASC NULLS LAST
| alias buckets";
        assert_eq!(chain.to_string(), expected);
    }

    #[test]
    fn window_text() {
        let chain = Chain::source("t", titanic())
            .window("next", lead(col("age"), 1), &["survived"], [asc("age")])
            .unwrap();
        assert!(
            chain
                .to_string()
                .ends_with("| window next = lead(age, 1) over (partition by survived order by age ASC NULLS LAST)")
        );
    }

    #[test]
    fn same_chain_same_text() {
        let build = || {
            Chain::source("t", titanic())
                .filter(col("age").is_not_null())
                .unwrap()
                .to_string()
        };
        assert_eq!(build(), build());
    }
}
