//! Rewrite rules applied to a chain before it is compiled.
//!
//! These include:
//!
//! * [PushFilterBelowOrderBy]
//!     Filter before sorting
//! * [PushFilterBelowMutate]
//!     Filter before a mutate that does not define the filtered columns
//! * [PushFilterIntoJoin]
//!     Filter the left side of a join when only left columns are referenced
//!
//! None of them changes the rows, their order or their null semantics.
use tabflow_verbs::{Chain, ConstructionError, Expr, Join, Side, Verb};

type Result<T> = std::result::Result<T, ConstructionError>;

pub trait RewriteRule {
    type Plan;
    type Info;

    fn matches(plan: &Self::Plan) -> Option<Self::Info>;
    fn rewrite(plan: Self::Plan, info: Self::Info) -> Result<Self::Plan>;
}

/// The predicate of a filter and the chain below it.
fn filter_over(plan: &Chain) -> Option<(&Expr, &Chain)> {
    match (plan.verb(), plan.input()) {
        (Verb::Filter(expr), Some(input)) => Some((expr, input)),
        _ => None,
    }
}

/// Swap a filter with the verb directly below it.
fn swap(plan: Chain) -> Result<Chain> {
    let Some((expr, input)) = filter_over(&plan) else {
        return Ok(plan);
    };
    let Some(below) = input.input() else {
        return Ok(plan);
    };
    below.filter(expr.clone())?.then(input.verb().clone())
}

pub struct PushFilterBelowOrderBy;

impl RewriteRule for PushFilterBelowOrderBy {
    type Plan = Chain;
    type Info = ();

    fn matches(plan: &Chain) -> Option<()> {
        let (_, input) = filter_over(plan)?;
        matches!(input.verb(), Verb::OrderBy(_)).then_some(())
    }

    fn rewrite(plan: Chain, _: ()) -> Result<Chain> {
        swap(plan)
    }
}

pub struct PushFilterBelowMutate;

impl RewriteRule for PushFilterBelowMutate {
    type Plan = Chain;
    type Info = ();

    fn matches(plan: &Chain) -> Option<()> {
        let (expr, input) = filter_over(plan)?;
        let Verb::Mutate(exprs) = input.verb() else {
            return None;
        };
        let cols = expr.columns();
        exprs
            .iter()
            .all(|(name, _)| !cols.contains(&&**name))
            .then_some(())
    }

    fn rewrite(plan: Chain, _: ()) -> Result<Chain> {
        swap(plan)
    }
}

pub struct PushFilterIntoJoin;

impl RewriteRule for PushFilterIntoJoin {
    type Plan = Chain;
    type Info = ();

    fn matches(plan: &Chain) -> Option<()> {
        let (expr, input) = filter_over(plan)?;
        let Verb::Join(join) = input.verb() else {
            return None;
        };
        let schema = input.schema();
        expr.columns()
            .iter()
            .all(|col| {
                schema
                    .position(col)
                    .is_some_and(|i| join.layout()[i].side == Side::Left)
            })
            .then_some(())
    }

    fn rewrite(plan: Chain, _: ()) -> Result<Chain> {
        swap(plan)
    }
}

/// Apply a rule once to every step of a chain, inputs first.
/// Returns whether anything was rewritten.
fn map_if<R: RewriteRule<Plan = Chain>>(plan: Chain) -> Result<(Chain, bool)> {
    let Some(input) = plan.input() else {
        return Ok((plan, false));
    };
    let (input, mut changed) = map_if::<R>(input.clone())?;
    let mut verb = plan.verb().clone();
    if let Verb::Join(join) = &verb {
        let (right, ok) = map_if::<R>(join.right.clone())?;
        if ok {
            verb = Verb::Join(Join::with_right(join, right));
            changed = true;
        }
    }
    let plan = if changed { input.then(verb)? } else { plan };
    match R::matches(&plan) {
        Some(info) => Ok((R::rewrite(plan, info)?, true)),
        None => Ok((plan, changed)),
    }
}

/// Recursively apply a rule to all steps until a fixedpoint is reached.
pub fn apply_rec<R: RewriteRule<Plan = Chain>>(plan: Chain) -> Result<(Chain, bool)> {
    let mut any = false;
    let mut plan = plan;
    loop {
        let (next, changed) = map_if::<R>(plan)?;
        plan = next;
        if !changed {
            return Ok((plan, any));
        }
        any = true;
    }
}

/// Push filters as close to the sources as possible.
pub fn optimize(chain: &Chain) -> Result<Chain> {
    let mut plan = chain.clone();
    loop {
        let (next, a) = apply_rec::<PushFilterBelowOrderBy>(plan)?;
        let (next, b) = apply_rec::<PushFilterBelowMutate>(next)?;
        let (next, c) = apply_rec::<PushFilterIntoJoin>(next)?;
        plan = next;
        if !(a || b || c) {
            return Ok(plan);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabflow_frame::{DataType, Schema};
    use tabflow_verbs::{asc, col, lit};

    fn verbs(chain: &Chain) -> Vec<&'static str> {
        chain.lineage().iter().map(|step| step.verb().name()).collect()
    }

    fn table(name: &str) -> Chain {
        let schema = Schema::from_pairs([("pk", DataType::I64), ("x", DataType::F64)])
            .unwrap()
            .with_primary_key(&["pk"])
            .unwrap();
        Chain::source(name, schema)
    }

    #[test]
    fn filter_moves_below_mutate_and_order() {
        let chain = table("a")
            .mutate([("y", col("x") * lit(2i64))])
            .unwrap()
            .order_by([asc("x")])
            .unwrap()
            .filter(col("x").gt(lit(0i64)))
            .unwrap();
        let optimized = optimize(&chain).unwrap();
        assert_eq!(verbs(&optimized), vec!["source", "filter", "mutate", "order_by"]);
        assert_eq!(optimized.schema(), chain.schema());
    }

    #[test]
    fn filter_on_mutated_column_stays() {
        let chain = table("a")
            .mutate([("y", col("x") * lit(2i64))])
            .unwrap()
            .filter(col("y").gt(lit(0i64)))
            .unwrap();
        let optimized = optimize(&chain).unwrap();
        assert_eq!(verbs(&optimized), vec!["source", "mutate", "filter"]);
    }

    #[test]
    fn filter_moves_into_left_side() {
        let left = table("a").mutate([("z", col("x"))]).unwrap();
        let right = table("b");
        let chain = left
            .left_join(&right, &[("pk", "pk")])
            .unwrap()
            .filter(col("pk").gt(lit(1i64)))
            .unwrap();
        let optimized = optimize(&chain).unwrap();
        assert_eq!(verbs(&optimized), vec!["source", "filter", "mutate", "left_join"]);

        let chain = left
            .left_join(&right, &[("pk", "pk")])
            .unwrap()
            .filter(col("z").is_not_null())
            .unwrap();
        let optimized = optimize(&chain).unwrap();
        assert_eq!(verbs(&optimized), vec!["source", "mutate", "filter", "left_join"]);

        // `x` comes from the right side after the join, so the filter must stay.
        let chain = table("a")
            .left_join(&right, &[("pk", "pk")])
            .unwrap()
            .filter(col("x").is_not_null())
            .unwrap();
        assert_eq!(verbs(&optimize(&chain).unwrap()), vec!["source", "left_join", "filter"]);
    }

    #[test]
    fn right_chain_is_optimized() {
        let right = table("b")
            .order_by([asc("x")])
            .unwrap()
            .filter(col("x").gt(lit(1.0)))
            .unwrap();
        let chain = table("a").inner_join(&right, &[("pk", "pk")]).unwrap();
        let optimized = optimize(&chain).unwrap();
        let Verb::Join(join) = optimized.verb() else { panic!() };
        assert_eq!(verbs(&join.right), vec!["source", "filter", "order_by"]);
    }
}
