use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::recipes::repo_types::{Label, Recipe};

#[derive(Debug, Default, Deserialize)]
pub struct LabelPayload {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelResponse {
    pub id: i64,
    pub name: String,
}

impl From<Label> for LabelResponse {
    fn from(l: Label) -> Self {
        Self {
            id: l.id,
            name: l.name,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LabelQuery {
    pub assigned_only: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecipeQuery {
    pub tags: Option<String>,
    pub ingredients: Option<String>,
}

/// Body for recipe create/replace/patch. Required-ness depends on the mode.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RecipePayload {
    pub title: Option<String>,
    pub time_minutes: Option<i32>,
    pub price: Option<Decimal>,
    pub link: Option<String>,
    pub tags: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

/// List/write representation: relations as id lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeSummary {
    pub id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub ingredients: Vec<i64>,
    pub link: String,
    pub tags: Vec<i64>,
    pub price: Decimal,
}

impl From<Recipe> for RecipeSummary {
    fn from(r: Recipe) -> Self {
        Self {
            id: r.id,
            title: r.title,
            time_minutes: r.time_minutes,
            ingredients: r.ingredients,
            link: r.link,
            tags: r.tags,
            price: r.price,
        }
    }
}

/// Detail representation: relations expanded to `{id, name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeDetail {
    pub id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub ingredients: Vec<LabelResponse>,
    pub link: String,
    pub tags: Vec<LabelResponse>,
    pub price: Decimal,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeImageResponse {
    pub id: i64,
    pub image: Option<String>,
}
