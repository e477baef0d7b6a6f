//! Owner-scoped filters for recipes and labels.
//!
//! Filters are plain values built from query parameters and combined with
//! `and` / `or`. The in-memory store evaluates them with `matches`; the
//! Postgres store renders them into the `WHERE` clause with `push_sql`.
//! Recipe SQL expects the recipe table aliased as `r`, label SQL as `l`.

use std::collections::HashSet;

use sqlx::{Postgres, QueryBuilder};

use crate::error::AppError;
use crate::recipes::repo_types::{Label, LabelKind, Recipe};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeFilter {
    OwnedBy(i64),
    HasTag(i64),
    HasIngredient(i64),
    And(Vec<RecipeFilter>),
    Or(Vec<RecipeFilter>),
}

impl RecipeFilter {
    pub fn owned_by(user_id: i64) -> Self {
        RecipeFilter::OwnedBy(user_id)
    }

    /// Recipes referencing at least one of `ids`.
    pub fn any_tag(ids: &[i64]) -> Self {
        RecipeFilter::Or(ids.iter().copied().map(RecipeFilter::HasTag).collect())
    }

    pub fn any_ingredient(ids: &[i64]) -> Self {
        RecipeFilter::Or(ids.iter().copied().map(RecipeFilter::HasIngredient).collect())
    }

    pub fn and(self, other: RecipeFilter) -> Self {
        match self {
            RecipeFilter::And(mut all) => {
                all.push(other);
                RecipeFilter::And(all)
            }
            first => RecipeFilter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: RecipeFilter) -> Self {
        match self {
            RecipeFilter::Or(mut any) => {
                any.push(other);
                RecipeFilter::Or(any)
            }
            first => RecipeFilter::Or(vec![first, other]),
        }
    }

    pub fn matches(&self, recipe: &Recipe) -> bool {
        match self {
            RecipeFilter::OwnedBy(user_id) => recipe.user_id == *user_id,
            RecipeFilter::HasTag(id) => recipe.tags.contains(id),
            RecipeFilter::HasIngredient(id) => recipe.ingredients.contains(id),
            RecipeFilter::And(all) => all.iter().all(|f| f.matches(recipe)),
            RecipeFilter::Or(any) => any.iter().any(|f| f.matches(recipe)),
        }
    }

    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            RecipeFilter::OwnedBy(user_id) => {
                qb.push("r.user_id = ").push_bind(*user_id);
            }
            RecipeFilter::HasTag(id) => {
                qb.push("EXISTS (SELECT 1 FROM recipe_tags rt WHERE rt.recipe_id = r.id AND rt.tag_id = ")
                    .push_bind(*id)
                    .push(")");
            }
            RecipeFilter::HasIngredient(id) => {
                qb.push(
                    "EXISTS (SELECT 1 FROM recipe_ingredients ri \
                     WHERE ri.recipe_id = r.id AND ri.ingredient_id = ",
                )
                .push_bind(*id)
                .push(")");
            }
            RecipeFilter::And(all) => push_joined(qb, all, " AND ", "TRUE", |f, qb| f.push_sql(qb)),
            RecipeFilter::Or(any) => push_joined(qb, any, " OR ", "FALSE", |f, qb| f.push_sql(qb)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelFilter {
    OwnedBy(i64),
    /// Referenced by at least one recipe.
    Assigned,
    And(Vec<LabelFilter>),
}

impl LabelFilter {
    pub fn owned_by(user_id: i64) -> Self {
        LabelFilter::OwnedBy(user_id)
    }

    pub fn and(self, other: LabelFilter) -> Self {
        match self {
            LabelFilter::And(mut all) => {
                all.push(other);
                LabelFilter::And(all)
            }
            first => LabelFilter::And(vec![first, other]),
        }
    }

    /// `referenced` holds the ids of this kind used by any recipe.
    pub fn matches(&self, label: &Label, referenced: &HashSet<i64>) -> bool {
        match self {
            LabelFilter::OwnedBy(user_id) => label.user_id == *user_id,
            LabelFilter::Assigned => referenced.contains(&label.id),
            LabelFilter::And(all) => all.iter().all(|f| f.matches(label, referenced)),
        }
    }

    pub fn push_sql(&self, kind: LabelKind, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            LabelFilter::OwnedBy(user_id) => {
                qb.push("l.user_id = ").push_bind(*user_id);
            }
            LabelFilter::Assigned => {
                qb.push(format!(
                    "EXISTS (SELECT 1 FROM {} j WHERE j.{} = l.id)",
                    kind.join_table(),
                    kind.join_column()
                ));
            }
            LabelFilter::And(all) => {
                push_joined(qb, all, " AND ", "TRUE", |f, qb| f.push_sql(kind, qb))
            }
        }
    }
}

fn push_joined<T>(
    qb: &mut QueryBuilder<'_, Postgres>,
    parts: &[T],
    sep: &str,
    empty: &str,
    mut push: impl FnMut(&T, &mut QueryBuilder<'_, Postgres>),
) {
    if parts.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            qb.push(sep);
        }
        push(part, qb);
    }
    qb.push(")");
}

/// Parses `"1,2,3"`. An absent or blank value means no filter.
pub fn parse_id_list(field: &str, raw: Option<&str>) -> Result<Option<Vec<i64>>, AppError> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(None);
    };
    raw.split(',')
        .map(|token| {
            token.trim().parse::<i64>().map_err(|_| {
                AppError::field(field, format!("\"{}\" is not a valid integer id.", token.trim()))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Integer flag: `0` is false, any other integer is true.
pub fn parse_flag(field: &str, raw: Option<&str>) -> Result<bool, AppError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(false),
        Some(value) => value
            .parse::<i64>()
            .map(|n| n != 0)
            .map_err(|_| AppError::field(field, "A valid integer is required.")),
    }
}

/// Recipes owned by `user_id`, optionally narrowed by tag and ingredient ids.
pub fn recipe_filter(user_id: i64, tags: Option<&[i64]>, ingredients: Option<&[i64]>) -> RecipeFilter {
    let mut filter = RecipeFilter::owned_by(user_id);
    if let Some(ids) = tags {
        filter = filter.and(RecipeFilter::any_tag(ids));
    }
    if let Some(ids) = ingredients {
        filter = filter.and(RecipeFilter::any_ingredient(ids));
    }
    filter
}

pub fn label_filter(user_id: i64, assigned_only: bool) -> LabelFilter {
    let filter = LabelFilter::owned_by(user_id);
    if assigned_only {
        filter.and(LabelFilter::Assigned)
    } else {
        filter
    }
}
