use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

/// Tags and ingredients share one shape and differ only in their tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    Tag,
    Ingredient,
}

impl LabelKind {
    pub fn table(self) -> &'static str {
        match self {
            LabelKind::Tag => "tags",
            LabelKind::Ingredient => "ingredients",
        }
    }

    /// Join table linking recipes to this kind.
    pub fn join_table(self) -> &'static str {
        match self {
            LabelKind::Tag => "recipe_tags",
            LabelKind::Ingredient => "recipe_ingredients",
        }
    }

    pub fn join_column(self) -> &'static str {
        match self {
            LabelKind::Tag => "tag_id",
            LabelKind::Ingredient => "ingredient_id",
        }
    }

    /// Payload/query field carrying ids of this kind.
    pub fn field(self) -> &'static str {
        match self {
            LabelKind::Tag => "tags",
            LabelKind::Ingredient => "ingredients",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Label {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Recipe {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    /// Storage key, e.g. `uploads/recipe/<uuid>.jpg`.
    pub image: Option<String>,
    /// Sorted ascending.
    pub tags: Vec<i64>,
    /// Sorted ascending.
    pub ingredients: Vec<i64>,
}

impl Recipe {
    pub fn label_ids(&self, kind: LabelKind) -> &[i64] {
        match kind {
            LabelKind::Tag => &self.tags,
            LabelKind::Ingredient => &self.ingredients,
        }
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// Complete set of writable recipe fields, already validated and resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeDraft {
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    pub tags: Vec<i64>,
    pub ingredients: Vec<i64>,
}

impl From<&Recipe> for RecipeDraft {
    fn from(r: &Recipe) -> Self {
        Self {
            title: r.title.clone(),
            time_minutes: r.time_minutes,
            price: r.price,
            link: r.link.clone(),
            tags: r.tags.clone(),
            ingredients: r.ingredients.clone(),
        }
    }
}
