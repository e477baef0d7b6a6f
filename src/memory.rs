use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::auth::repo::UserRepo;
use crate::auth::repo_types::{NewUser, Token, User, UserChanges};
use crate::error::StoreError;
use crate::recipes::filter::{LabelFilter, RecipeFilter};
use crate::recipes::repo::CatalogRepo;
use crate::recipes::repo_types::{Label, LabelKind, Recipe, RecipeDraft};

/// In-process store used when no `DATABASE_URL` is configured, and by tests.
/// A single lock guards every table, so each call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    tokens: BTreeMap<i64, Token>, // keyed by user id
    tags: BTreeMap<i64, Label>,
    ingredients: BTreeMap<i64, Label>,
    recipes: BTreeMap<i64, Recipe>,
    seq: Sequences,
}

#[derive(Default)]
struct Sequences {
    user: i64,
    tag: i64,
    ingredient: i64,
    recipe: i64,
}

fn next(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

impl Tables {
    fn labels(&self, kind: LabelKind) -> &BTreeMap<i64, Label> {
        match kind {
            LabelKind::Tag => &self.tags,
            LabelKind::Ingredient => &self.ingredients,
        }
    }

    fn labels_mut(&mut self, kind: LabelKind) -> &mut BTreeMap<i64, Label> {
        match kind {
            LabelKind::Tag => &mut self.tags,
            LabelKind::Ingredient => &mut self.ingredients,
        }
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn owned_recipe_mut(&mut self, user_id: i64, id: i64) -> Result<&mut Recipe, StoreError> {
        self.recipes
            .get_mut(&id)
            .filter(|r| r.user_id == user_id)
            .ok_or(StoreError::NotFound)
    }
}

fn apply_draft(recipe: &mut Recipe, draft: &RecipeDraft) {
    recipe.title = draft.title.clone();
    recipe.time_minutes = draft.time_minutes;
    recipe.price = draft.price;
    recipe.link = draft.link.clone();
    recipe.tags = sorted_unique(&draft.tags);
    recipe.ingredients = sorted_unique(&draft.ingredients);
}

fn sorted_unique(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn insert_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut t = self.inner.write();
        if t.email_taken(&new.email, None) {
            return Err(StoreError::Conflict("email"));
        }
        let id = next(&mut t.seq.user);
        let user = User {
            id,
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            caps: new.caps,
            created_at: OffsetDateTime::now_utc(),
        };
        t.users.insert(id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let t = self.inner.read();
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> Result<User, StoreError> {
        let mut t = self.inner.write();
        if let Some(email) = &changes.email {
            if t.email_taken(email, Some(id)) {
                return Err(StoreError::Conflict("email"));
            }
        }
        let user = t.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some(caps) = changes.caps {
            user.caps = caps;
        }
        Ok(user.clone())
    }

    async fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        let mut t = self.inner.write();
        if t.users.remove(&id).is_none() {
            return Ok(false);
        }
        t.tokens.remove(&id);
        t.recipes.retain(|_, r| r.user_id != id);
        for kind in [LabelKind::Tag, LabelKind::Ingredient] {
            let gone: HashSet<i64> = t
                .labels(kind)
                .values()
                .filter(|l| l.user_id == id)
                .map(|l| l.id)
                .collect();
            t.labels_mut(kind).retain(|label_id, _| !gone.contains(label_id));
            for recipe in t.recipes.values_mut() {
                match kind {
                    LabelKind::Tag => recipe.tags.retain(|l| !gone.contains(l)),
                    LabelKind::Ingredient => recipe.ingredients.retain(|l| !gone.contains(l)),
                }
            }
        }
        Ok(true)
    }

    async fn replace_token(&self, user_id: i64, key: &str) -> Result<Token, StoreError> {
        let mut t = self.inner.write();
        if !t.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        if t.tokens.values().any(|tok| tok.key == key && tok.user_id != user_id) {
            return Err(StoreError::Conflict("token"));
        }
        let token = Token {
            key: key.to_string(),
            user_id,
            created_at: OffsetDateTime::now_utc(),
        };
        t.tokens.insert(user_id, token.clone());
        Ok(token)
    }

    async fn find_user_by_token(&self, key: &str) -> Result<Option<User>, StoreError> {
        let t = self.inner.read();
        Ok(t.tokens
            .values()
            .find(|tok| tok.key == key)
            .and_then(|tok| t.users.get(&tok.user_id))
            .cloned())
    }
}

#[async_trait]
impl CatalogRepo for MemoryStore {
    async fn insert_label(&self, kind: LabelKind, user_id: i64, name: &str) -> Result<Label, StoreError> {
        let mut t = self.inner.write();
        let id = match kind {
            LabelKind::Tag => next(&mut t.seq.tag),
            LabelKind::Ingredient => next(&mut t.seq.ingredient),
        };
        let label = Label {
            id,
            user_id,
            name: name.to_string(),
        };
        t.labels_mut(kind).insert(id, label.clone());
        Ok(label)
    }

    async fn list_labels(&self, kind: LabelKind, filter: &LabelFilter) -> Result<Vec<Label>, StoreError> {
        let t = self.inner.read();
        let referenced: HashSet<i64> = t
            .recipes
            .values()
            .flat_map(|r| r.label_ids(kind).iter().copied())
            .collect();
        let mut rows: Vec<Label> = t
            .labels(kind)
            .values()
            .filter(|l| filter.matches(l, &referenced))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.name.cmp(&a.name).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn owned_labels(&self, kind: LabelKind, user_id: i64, ids: &[i64]) -> Result<Vec<Label>, StoreError> {
        let t = self.inner.read();
        Ok(sorted_unique(ids)
            .into_iter()
            .filter_map(|id| t.labels(kind).get(&id))
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_recipe(&self, user_id: i64, draft: &RecipeDraft) -> Result<Recipe, StoreError> {
        let mut t = self.inner.write();
        let id = next(&mut t.seq.recipe);
        let mut recipe = Recipe {
            id,
            user_id,
            title: String::new(),
            time_minutes: 0,
            price: Default::default(),
            link: String::new(),
            image: None,
            tags: Vec::new(),
            ingredients: Vec::new(),
        };
        apply_draft(&mut recipe, draft);
        t.recipes.insert(id, recipe.clone());
        Ok(recipe)
    }

    async fn list_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>, StoreError> {
        let t = self.inner.read();
        Ok(t.recipes
            .values()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn find_recipe(&self, user_id: i64, id: i64) -> Result<Option<Recipe>, StoreError> {
        let t = self.inner.read();
        Ok(t.recipes.get(&id).filter(|r| r.user_id == user_id).cloned())
    }

    async fn update_recipe(&self, user_id: i64, id: i64, draft: &RecipeDraft) -> Result<Recipe, StoreError> {
        let mut t = self.inner.write();
        let recipe = t.owned_recipe_mut(user_id, id)?;
        apply_draft(recipe, draft);
        Ok(recipe.clone())
    }

    async fn set_recipe_image(&self, user_id: i64, id: i64, image: Option<&str>) -> Result<Recipe, StoreError> {
        let mut t = self.inner.write();
        let recipe = t.owned_recipe_mut(user_id, id)?;
        recipe.image = image.map(str::to_string);
        Ok(recipe.clone())
    }

    async fn delete_recipe(&self, user_id: i64, id: i64) -> Result<bool, StoreError> {
        let mut t = self.inner.write();
        let owned = t.recipes.get(&id).map_or(false, |r| r.user_id == user_id);
        if owned {
            t.recipes.remove(&id);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::auth::repo_types::Capabilities;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            name: String::new(),
            password_hash: "hash".into(),
            caps: Capabilities::default(),
        }
    }

    fn draft(title: &str, tags: Vec<i64>) -> RecipeDraft {
        RecipeDraft {
            title: title.into(),
            time_minutes: 10,
            price: Decimal::new(500, 2),
            link: String::new(),
            tags,
            ingredients: vec![],
        }
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MemoryStore::new();
        store.insert_user(new_user("a@a.com")).await.unwrap();
        let err = store.insert_user(new_user("a@a.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict("email")));
    }

    #[tokio::test]
    async fn replace_token_keeps_one_per_user() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("a@a.com")).await.unwrap();
        store.replace_token(user.id, "first").await.unwrap();
        store.replace_token(user.id, "second").await.unwrap();
        assert!(store.find_user_by_token("first").await.unwrap().is_none());
        let found = store.find_user_by_token("second").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn delete_user_cascades() {
        let store = MemoryStore::new();
        let a = store.insert_user(new_user("a@a.com")).await.unwrap();
        let b = store.insert_user(new_user("b@b.com")).await.unwrap();
        store.replace_token(a.id, "tok").await.unwrap();
        let tag = store.insert_label(LabelKind::Tag, a.id, "Vegan").await.unwrap();
        store.insert_recipe(a.id, &draft("Salad", vec![tag.id])).await.unwrap();
        let kept = store.insert_recipe(b.id, &draft("Soup", vec![])).await.unwrap();

        assert!(store.delete_user(a.id).await.unwrap());
        assert!(!store.delete_user(a.id).await.unwrap());

        assert!(store.find_user_by_token("tok").await.unwrap().is_none());
        assert!(store
            .list_labels(LabelKind::Tag, &LabelFilter::owned_by(a.id))
            .await
            .unwrap()
            .is_empty());
        let all = store
            .list_recipes(&RecipeFilter::Or(vec![
                RecipeFilter::owned_by(a.id),
                RecipeFilter::owned_by(b.id),
            ]))
            .await
            .unwrap();
        assert_eq!(all, vec![kept]);
    }

    #[tokio::test]
    async fn owned_labels_ignores_foreign_and_missing_ids() {
        let store = MemoryStore::new();
        let mine = store.insert_label(LabelKind::Ingredient, 1, "Salt").await.unwrap();
        let theirs = store.insert_label(LabelKind::Ingredient, 2, "Pepper").await.unwrap();
        let found = store
            .owned_labels(LabelKind::Ingredient, 1, &[mine.id, theirs.id, 99, mine.id])
            .await
            .unwrap();
        assert_eq!(found, vec![mine]);
    }

    #[tokio::test]
    async fn recipes_listed_newest_first() {
        let store = MemoryStore::new();
        let first = store.insert_recipe(1, &draft("One", vec![])).await.unwrap();
        let second = store.insert_recipe(1, &draft("Two", vec![])).await.unwrap();
        let listed = store.list_recipes(&RecipeFilter::owned_by(1)).await.unwrap();
        assert_eq!(listed, vec![second, first]);
    }

    #[tokio::test]
    async fn foreign_recipe_cannot_be_updated_or_deleted() {
        let store = MemoryStore::new();
        let recipe = store.insert_recipe(1, &draft("Mine", vec![])).await.unwrap();
        let err = store
            .update_recipe(2, recipe.id, &draft("Hijack", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert!(!store.delete_recipe(2, recipe.id).await.unwrap());
        assert!(store.find_recipe(1, recipe.id).await.unwrap().is_some());
    }
}
