use rust_decimal::Decimal;
use tracing::info;

use crate::auth::repo_types::User;
use crate::error::{AppError, FieldErrors};
use crate::recipes::dto::RecipePayload;
use crate::recipes::filter::{label_filter, recipe_filter};
use crate::recipes::repo::CatalogRepo;
use crate::recipes::repo_types::{Label, LabelKind, Recipe, RecipeDraft};

const MAX_TEXT_LEN: usize = 255;
const PRICE_MAX_DIGITS: u32 = 5;
const PRICE_DECIMAL_PLACES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// PATCH: only supplied fields change.
    Partial,
    /// PUT: every field is replaced; omitted relations become empty.
    Full,
}

pub async fn create_label(
    repo: &dyn CatalogRepo,
    kind: LabelKind,
    user: &User,
    name: Option<&str>,
) -> Result<Label, AppError> {
    let name = match name.map(str::trim) {
        None => return Err(AppError::field("name", "This field is required.")),
        Some("") => return Err(AppError::field("name", "This field may not be blank.")),
        Some(n) if n.chars().count() > MAX_TEXT_LEN => {
            return Err(AppError::field(
                "name",
                "Ensure this field has no more than 255 characters.",
            ))
        }
        Some(n) => n,
    };
    let label = repo.insert_label(kind, user.id, name).await?;
    info!(user_id = user.id, label_id = label.id, kind = ?kind, "label created");
    Ok(label)
}

pub async fn list_labels(
    repo: &dyn CatalogRepo,
    kind: LabelKind,
    user: &User,
    assigned_only: bool,
) -> Result<Vec<Label>, AppError> {
    Ok(repo.list_labels(kind, &label_filter(user.id, assigned_only)).await?)
}

pub async fn list_recipes(
    repo: &dyn CatalogRepo,
    user: &User,
    tag_ids: Option<&[i64]>,
    ingredient_ids: Option<&[i64]>,
) -> Result<Vec<Recipe>, AppError> {
    let filter = recipe_filter(user.id, tag_ids, ingredient_ids);
    Ok(repo.list_recipes(&filter).await?)
}

/// Owner-scoped lookup; someone else's recipe is simply not found.
pub async fn get_recipe(repo: &dyn CatalogRepo, user: &User, id: i64) -> Result<Recipe, AppError> {
    repo.find_recipe(user.id, id).await?.ok_or(AppError::NotFound)
}

/// Tag and ingredient records referenced by `recipe`.
pub async fn recipe_labels(
    repo: &dyn CatalogRepo,
    user: &User,
    recipe: &Recipe,
) -> Result<(Vec<Label>, Vec<Label>), AppError> {
    let tags = repo.owned_labels(LabelKind::Tag, user.id, &recipe.tags).await?;
    let ingredients = repo
        .owned_labels(LabelKind::Ingredient, user.id, &recipe.ingredients)
        .await?;
    Ok((tags, ingredients))
}

pub async fn create_recipe(
    repo: &dyn CatalogRepo,
    user: &User,
    payload: RecipePayload,
) -> Result<Recipe, AppError> {
    let draft = build_draft(repo, user, payload, None, UpdateMode::Full).await?;
    let recipe = repo.insert_recipe(user.id, &draft).await?;
    info!(user_id = user.id, recipe_id = recipe.id, "recipe created");
    Ok(recipe)
}

pub async fn update_recipe(
    repo: &dyn CatalogRepo,
    user: &User,
    id: i64,
    payload: RecipePayload,
    mode: UpdateMode,
) -> Result<Recipe, AppError> {
    let current = get_recipe(repo, user, id).await?;
    let draft = build_draft(repo, user, payload, Some(&current), mode).await?;
    let recipe = repo.update_recipe(user.id, id, &draft).await?;
    info!(user_id = user.id, recipe_id = id, mode = ?mode, "recipe updated");
    Ok(recipe)
}

pub async fn delete_recipe(repo: &dyn CatalogRepo, user: &User, id: i64) -> Result<Recipe, AppError> {
    let recipe = get_recipe(repo, user, id).await?;
    if !repo.delete_recipe(user.id, id).await? {
        return Err(AppError::NotFound);
    }
    info!(user_id = user.id, recipe_id = id, "recipe deleted");
    Ok(recipe)
}

/// Validates `payload` against `current` and resolves relation ids.
async fn build_draft(
    repo: &dyn CatalogRepo,
    user: &User,
    payload: RecipePayload,
    current: Option<&Recipe>,
    mode: UpdateMode,
) -> Result<RecipeDraft, AppError> {
    let mut errors = FieldErrors::new();
    // Partial updates fall back to the stored values; everything else starts empty.
    let base = match mode {
        UpdateMode::Partial => current.map(RecipeDraft::from),
        UpdateMode::Full => None,
    };

    let title = match payload.title.map(|t| t.trim().to_string()) {
        Some(t) if t.is_empty() => {
            errors.add("title", "This field may not be blank.");
            None
        }
        Some(t) if t.chars().count() > MAX_TEXT_LEN => {
            errors.add("title", "Ensure this field has no more than 255 characters.");
            None
        }
        Some(t) => Some(t),
        None => base.as_ref().map(|b| b.title.clone()),
    };
    if title.is_none() && errors.get("title").is_none() {
        errors.add("title", "This field is required.");
    }

    let time_minutes = payload.time_minutes.or(base.as_ref().map(|b| b.time_minutes));
    if time_minutes.is_none() {
        errors.add("time_minutes", "This field is required.");
    }

    let price = match payload.price {
        Some(p) => match normalize_price(p) {
            Ok(p) => Some(p),
            Err(msg) => {
                errors.add("price", msg);
                None
            }
        },
        None => {
            let fallback = base.as_ref().map(|b| b.price);
            if fallback.is_none() {
                errors.add("price", "This field is required.");
            }
            fallback
        }
    };

    let link = match payload.link {
        Some(l) if l.chars().count() > MAX_TEXT_LEN => {
            errors.add("link", "Ensure this field has no more than 255 characters.");
            String::new()
        }
        Some(l) => l.trim().to_string(),
        None => base.as_ref().map(|b| b.link.clone()).unwrap_or_default(),
    };

    let tags = payload
        .tags
        .or(base.as_ref().map(|b| b.tags.clone()))
        .unwrap_or_default();
    let ingredients = payload
        .ingredients
        .or(base.as_ref().map(|b| b.ingredients.clone()))
        .unwrap_or_default();
    let tags = resolve_ids(repo, &mut errors, LabelKind::Tag, user, tags).await?;
    let ingredients = resolve_ids(repo, &mut errors, LabelKind::Ingredient, user, ingredients).await?;

    match (title, time_minutes, price) {
        (Some(title), Some(time_minutes), Some(price)) if errors.is_empty() => Ok(RecipeDraft {
            title,
            time_minutes,
            price,
            link,
            tags,
            ingredients,
        }),
        _ => Err(AppError::Validation(errors)),
    }
}

/// Keeps ids that name the caller's own labels; anything else is a field error.
async fn resolve_ids(
    repo: &dyn CatalogRepo,
    errors: &mut FieldErrors,
    kind: LabelKind,
    user: &User,
    mut ids: Vec<i64>,
) -> Result<Vec<i64>, AppError> {
    ids.sort_unstable();
    ids.dedup();
    let found = repo.owned_labels(kind, user.id, &ids).await?;
    for id in &ids {
        if !found.iter().any(|l| l.id == *id) {
            errors.add(kind.field(), format!("Invalid pk \"{id}\" - object does not exist."));
        }
    }
    Ok(ids)
}

/// At most 5 digits with 2 after the point; rendered with exactly 2.
fn normalize_price(price: Decimal) -> Result<Decimal, String> {
    let mut normalized = price.normalize();
    if normalized.scale() > PRICE_DECIMAL_PLACES {
        return Err(format!(
            "Ensure that there are no more than {PRICE_DECIMAL_PLACES} decimal places."
        ));
    }
    let limit = Decimal::from(10i64.pow(PRICE_MAX_DIGITS - PRICE_DECIMAL_PLACES));
    if normalized.abs() >= limit {
        return Err(format!(
            "Ensure that there are no more than {PRICE_MAX_DIGITS} digits in total."
        ));
    }
    normalized.rescale(PRICE_DECIMAL_PLACES);
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::UserRepo;
    use crate::auth::repo_types::{Capabilities, NewUser};
    use crate::memory::MemoryStore;

    async fn user(store: &MemoryStore, email: &str) -> User {
        store
            .insert_user(NewUser {
                email: email.into(),
                name: String::new(),
                password_hash: "hash".into(),
                caps: Capabilities::default(),
            })
            .await
            .unwrap()
    }

    fn payload(title: &str) -> RecipePayload {
        RecipePayload {
            title: Some(title.into()),
            time_minutes: Some(10),
            price: Some(Decimal::new(500, 2)),
            ..Default::default()
        }
    }

    #[test]
    fn price_normalization() {
        assert_eq!(normalize_price(Decimal::new(5, 0)).unwrap().to_string(), "5.00");
        assert_eq!(normalize_price(Decimal::new(12350, 3)).unwrap().to_string(), "12.35");
        assert!(normalize_price(Decimal::new(12345, 3)).is_err());
        assert!(normalize_price(Decimal::new(1000, 0)).is_err());
        assert_eq!(normalize_price(Decimal::new(99999, 2)).unwrap().to_string(), "999.99");
    }

    #[tokio::test]
    async fn create_label_requires_name() {
        let store = MemoryStore::new();
        let u = user(&store, "a@a.com").await;
        for name in [None, Some(""), Some("  ")] {
            let err = create_label(&store, LabelKind::Tag, &u, name).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        let tag = create_label(&store, LabelKind::Tag, &u, Some("test tag")).await.unwrap();
        assert_eq!(tag.name, "test tag");
        assert_eq!(tag.user_id, u.id);
    }

    #[tokio::test]
    async fn labels_are_owner_scoped_and_sorted_descending() {
        let store = MemoryStore::new();
        let a = user(&store, "a@a.com").await;
        let b = user(&store, "b@b.com").await;
        create_label(&store, LabelKind::Tag, &a, Some("Dessert")).await.unwrap();
        create_label(&store, LabelKind::Tag, &a, Some("Vegan")).await.unwrap();
        create_label(&store, LabelKind::Tag, &b, Some("Fruit")).await.unwrap();

        let names: Vec<String> = list_labels(&store, LabelKind::Tag, &a, false)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, ["Vegan", "Dessert"]);
    }

    #[tokio::test]
    async fn assigned_only_returns_each_tag_once() {
        let store = MemoryStore::new();
        let u = user(&store, "a@a.com").await;
        let breakfast = create_label(&store, LabelKind::Tag, &u, Some("Breakfast")).await.unwrap();
        create_label(&store, LabelKind::Tag, &u, Some("Lunch")).await.unwrap();
        for title in ["Eggs", "Pancakes"] {
            let mut p = payload(title);
            p.tags = Some(vec![breakfast.id]);
            create_recipe(&store, &u, p).await.unwrap();
        }

        let assigned = list_labels(&store, LabelKind::Tag, &u, true).await.unwrap();
        assert_eq!(assigned, vec![breakfast]);
    }

    #[tokio::test]
    async fn recipes_isolated_between_users() {
        let store = MemoryStore::new();
        let a = user(&store, "a@a.com").await;
        let b = user(&store, "b@b.com").await;
        create_recipe(&store, &a, payload("Salad")).await.unwrap();
        let theirs = create_recipe(&store, &b, payload("Soup")).await.unwrap();

        let mine = list_recipes(&store, &a, None, None).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert!(mine.iter().all(|r| r.user_id == a.id));

        assert!(matches!(
            get_recipe(&store, &a, theirs.id).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            update_recipe(&store, &a, theirs.id, payload("Hijack"), UpdateMode::Full).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            delete_recipe(&store, &a, theirs.id).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn filter_by_tags_and_ingredients() {
        let store = MemoryStore::new();
        let u = user(&store, "a@a.com").await;
        let meat = create_label(&store, LabelKind::Tag, &u, Some("Meat")).await.unwrap();
        let veg = create_label(&store, LabelKind::Tag, &u, Some("Vegetarian")).await.unwrap();
        let salt = create_label(&store, LabelKind::Ingredient, &u, Some("Salt")).await.unwrap();

        let mut chicken = payload("Chicken");
        chicken.tags = Some(vec![meat.id]);
        chicken.ingredients = Some(vec![salt.id]);
        let chicken = create_recipe(&store, &u, chicken).await.unwrap();
        let mut salad = payload("Salad");
        salad.tags = Some(vec![veg.id]);
        let salad = create_recipe(&store, &u, salad).await.unwrap();
        let fish = create_recipe(&store, &u, payload("Fish")).await.unwrap();

        let by_tags = list_recipes(&store, &u, Some(&[meat.id, veg.id][..]), None).await.unwrap();
        assert!(by_tags.contains(&chicken));
        assert!(by_tags.contains(&salad));
        assert!(!by_tags.contains(&fish));

        let by_one = list_recipes(&store, &u, Some(&[meat.id][..]), None).await.unwrap();
        assert_eq!(by_one, vec![chicken.clone()]);

        let both = list_recipes(&store, &u, Some(&[meat.id, veg.id][..]), Some(&[salt.id][..]))
            .await
            .unwrap();
        assert_eq!(both, vec![chicken]);
    }

    #[tokio::test]
    async fn create_requires_scalar_fields() {
        let store = MemoryStore::new();
        let u = user(&store, "a@a.com").await;
        match create_recipe(&store, &u, RecipePayload::default()).await.unwrap_err() {
            AppError::Validation(errors) => {
                assert!(errors.get("title").is_some());
                assert!(errors.get("time_minutes").is_some());
                assert!(errors.get("price").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn foreign_or_missing_relation_ids_are_rejected() {
        let store = MemoryStore::new();
        let a = user(&store, "a@a.com").await;
        let b = user(&store, "b@b.com").await;
        let foreign = create_label(&store, LabelKind::Tag, &b, Some("Theirs")).await.unwrap();

        let mut p = payload("Salad");
        p.tags = Some(vec![foreign.id]);
        p.ingredients = Some(vec![404]);
        match create_recipe(&store, &a, p).await.unwrap_err() {
            AppError::Validation(errors) => {
                assert!(errors.get("tags").is_some());
                assert!(errors.get("ingredients").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(list_recipes(&store, &a, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_update_merges_fields() {
        let store = MemoryStore::new();
        let u = user(&store, "a@a.com").await;
        let old = create_label(&store, LabelKind::Tag, &u, Some("Old")).await.unwrap();
        let curry = create_label(&store, LabelKind::Tag, &u, Some("Curry")).await.unwrap();
        let salt = create_label(&store, LabelKind::Ingredient, &u, Some("Salt")).await.unwrap();
        let mut p = payload("Sample");
        p.tags = Some(vec![old.id]);
        p.ingredients = Some(vec![salt.id]);
        let recipe = create_recipe(&store, &u, p).await.unwrap();

        let patch = RecipePayload {
            title: Some("Chicken".into()),
            tags: Some(vec![curry.id]),
            ..Default::default()
        };
        let updated = update_recipe(&store, &u, recipe.id, patch, UpdateMode::Partial)
            .await
            .unwrap();
        assert_eq!(updated.title, "Chicken");
        assert_eq!(updated.tags, vec![curry.id]);
        assert_eq!(updated.ingredients, vec![salt.id]);
        assert_eq!(updated.time_minutes, 10);
        assert_eq!(updated.price.to_string(), "5.00");
    }

    #[tokio::test]
    async fn full_update_replaces_fields_and_clears_omitted_relations() {
        let store = MemoryStore::new();
        let u = user(&store, "a@a.com").await;
        let tag = create_label(&store, LabelKind::Tag, &u, Some("Main")).await.unwrap();
        let mut p = payload("Sample");
        p.tags = Some(vec![tag.id]);
        p.link = Some("https://example.com".into());
        let recipe = create_recipe(&store, &u, p).await.unwrap();

        let put = RecipePayload {
            title: Some("Spaghetti Carbonara".into()),
            time_minutes: Some(25),
            price: Some(Decimal::new(5, 0)),
            ..Default::default()
        };
        let updated = update_recipe(&store, &u, recipe.id, put, UpdateMode::Full)
            .await
            .unwrap();
        assert_eq!(updated.title, "Spaghetti Carbonara");
        assert_eq!(updated.time_minutes, 25);
        assert_eq!(updated.price, Decimal::new(500, 2));
        assert!(updated.tags.is_empty());
        assert_eq!(updated.link, "");
    }

    #[tokio::test]
    async fn full_update_requires_scalars() {
        let store = MemoryStore::new();
        let u = user(&store, "a@a.com").await;
        let recipe = create_recipe(&store, &u, payload("Sample")).await.unwrap();
        let put = RecipePayload {
            title: Some("Only title".into()),
            ..Default::default()
        };
        assert!(matches!(
            update_recipe(&store, &u, recipe.id, put, UpdateMode::Full).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_recipe() {
        let store = MemoryStore::new();
        let u = user(&store, "a@a.com").await;
        let recipe = create_recipe(&store, &u, payload("Gone")).await.unwrap();
        delete_recipe(&store, &u, recipe.id).await.unwrap();
        assert!(matches!(
            get_recipe(&store, &u, recipe.id).await,
            Err(AppError::NotFound)
        ));
    }
}
