use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::db::PgStore;
use crate::error::StoreError;
use crate::recipes::filter::{LabelFilter, RecipeFilter};
use crate::recipes::repo_types::{Label, LabelKind, Recipe, RecipeDraft};

#[async_trait]
pub trait CatalogRepo: Send + Sync {
    async fn insert_label(&self, kind: LabelKind, user_id: i64, name: &str) -> Result<Label, StoreError>;
    /// Ordered by name, descending.
    async fn list_labels(&self, kind: LabelKind, filter: &LabelFilter) -> Result<Vec<Label>, StoreError>;
    /// The subset of `ids` that exists and belongs to `user_id`, ordered by id.
    async fn owned_labels(&self, kind: LabelKind, user_id: i64, ids: &[i64]) -> Result<Vec<Label>, StoreError>;

    async fn insert_recipe(&self, user_id: i64, draft: &RecipeDraft) -> Result<Recipe, StoreError>;
    /// Ordered by id, descending; each recipe at most once.
    async fn list_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>, StoreError>;
    async fn find_recipe(&self, user_id: i64, id: i64) -> Result<Option<Recipe>, StoreError>;
    /// Replaces scalars and both relation sets in one step.
    async fn update_recipe(&self, user_id: i64, id: i64, draft: &RecipeDraft) -> Result<Recipe, StoreError>;
    async fn set_recipe_image(&self, user_id: i64, id: i64, image: Option<&str>) -> Result<Recipe, StoreError>;
    async fn delete_recipe(&self, user_id: i64, id: i64) -> Result<bool, StoreError>;
}

const RECIPE_SELECT: &str = r#"
    SELECT r.id, r.user_id, r.title, r.time_minutes, r.price, r.link, r.image,
           ARRAY(SELECT x.tag_id FROM recipe_tags x
                  WHERE x.recipe_id = r.id ORDER BY x.tag_id) AS tags,
           ARRAY(SELECT y.ingredient_id FROM recipe_ingredients y
                  WHERE y.recipe_id = r.id ORDER BY y.ingredient_id) AS ingredients
      FROM recipes r
     WHERE "#;

async fn write_relations(
    conn: &mut PgConnection,
    recipe_id: i64,
    draft: &RecipeDraft,
) -> Result<(), StoreError> {
    for (kind, ids) in [
        (LabelKind::Tag, &draft.tags),
        (LabelKind::Ingredient, &draft.ingredients),
    ] {
        sqlx::query(&format!("DELETE FROM {} WHERE recipe_id = $1", kind.join_table()))
            .bind(recipe_id)
            .execute(&mut *conn)
            .await?;
        if ids.is_empty() {
            continue;
        }
        sqlx::query(&format!(
            "INSERT INTO {} (recipe_id, {}) SELECT $1, UNNEST($2::BIGINT[])",
            kind.join_table(),
            kind.join_column()
        ))
        .bind(recipe_id)
        .bind(ids.clone())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl CatalogRepo for PgStore {
    async fn insert_label(&self, kind: LabelKind, user_id: i64, name: &str) -> Result<Label, StoreError> {
        let sql = format!(
            "INSERT INTO {} (user_id, name) VALUES ($1, $2) RETURNING id, user_id, name",
            kind.table()
        );
        let label = sqlx::query_as::<_, Label>(&sql)
            .bind(user_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(label)
    }

    async fn list_labels(&self, kind: LabelKind, filter: &LabelFilter) -> Result<Vec<Label>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT l.id, l.user_id, l.name FROM {} l WHERE ",
            kind.table()
        ));
        filter.push_sql(kind, &mut qb);
        qb.push(" ORDER BY l.name DESC, l.id DESC");
        let rows = qb.build_query_as::<Label>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn owned_labels(&self, kind: LabelKind, user_id: i64, ids: &[i64]) -> Result<Vec<Label>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, user_id, name FROM {} WHERE user_id = $1 AND id = ANY($2) ORDER BY id",
            kind.table()
        );
        let rows = sqlx::query_as::<_, Label>(&sql)
            .bind(user_id)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert_recipe(&self, user_id: i64, draft: &RecipeDraft) -> Result<Recipe, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO recipes (user_id, title, time_minutes, price, link)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(&draft.title)
        .bind(draft.time_minutes)
        .bind(draft.price)
        .bind(&draft.link)
        .fetch_one(&mut *tx)
        .await?;
        write_relations(&mut tx, id, draft).await?;
        tx.commit().await?;

        self.find_recipe(user_id, id).await?.ok_or(StoreError::NotFound)
    }

    async fn list_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(RECIPE_SELECT);
        filter.push_sql(&mut qb);
        qb.push(" ORDER BY r.id DESC");
        let rows = qb.build_query_as::<Recipe>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn find_recipe(&self, user_id: i64, id: i64) -> Result<Option<Recipe>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(RECIPE_SELECT);
        RecipeFilter::owned_by(user_id).push_sql(&mut qb);
        qb.push(" AND r.id = ").push_bind(id);
        let row = qb.build_query_as::<Recipe>().fetch_optional(&self.pool).await?;
        Ok(row)
    }

    async fn update_recipe(&self, user_id: i64, id: i64, draft: &RecipeDraft) -> Result<Recipe, StoreError> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            r#"
            UPDATE recipes
               SET title = $3, time_minutes = $4, price = $5, link = $6
             WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(&draft.title)
        .bind(draft.time_minutes)
        .bind(draft.price)
        .bind(&draft.link)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        write_relations(&mut tx, id, draft).await?;
        tx.commit().await?;

        self.find_recipe(user_id, id).await?.ok_or(StoreError::NotFound)
    }

    async fn set_recipe_image(&self, user_id: i64, id: i64, image: Option<&str>) -> Result<Recipe, StoreError> {
        let res = sqlx::query("UPDATE recipes SET image = $3 WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .bind(image)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.find_recipe(user_id, id).await?.ok_or(StoreError::NotFound)
    }

    async fn delete_recipe(&self, user_id: i64, id: i64) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM recipes WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
