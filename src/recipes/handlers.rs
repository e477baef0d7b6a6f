use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{extractors::AuthUser, repo_types::User},
    error::AppError,
    extract::{ApiJson, ApiPath},
    images::services::{self as images, UploadItem},
    recipes::{
        dto::{
            LabelPayload, LabelQuery, LabelResponse, RecipeDetail, RecipeImageResponse, RecipePayload,
            RecipeQuery, RecipeSummary,
        },
        filter::{parse_flag, parse_id_list},
        repo_types::{LabelKind, Recipe},
        services::{self, UpdateMode},
    },
    state::AppState,
};

const UPLOAD_LIMIT: usize = 10 * 1024 * 1024;

pub fn label_routes() -> Router<AppState> {
    Router::new()
        .route("/recipe/tags", get(list_tags).post(create_tag))
        .route("/recipe/ingredients", get(list_ingredients).post(create_ingredient))
        .route("/recipe/ingredient", get(list_ingredients).post(create_ingredient))
}

pub fn recipe_routes() -> Router<AppState> {
    Router::new()
        .route("/recipe/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/recipe/recipes/:id",
            get(get_recipe)
                .put(replace_recipe)
                .patch(patch_recipe)
                .delete(delete_recipe),
        )
}

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/recipe/recipes/:id/upload-image", post(upload_image))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
}

// --- labels ---

async fn list_labels(
    state: &AppState,
    kind: LabelKind,
    user: &User,
    query: &LabelQuery,
) -> Result<Json<Vec<LabelResponse>>, AppError> {
    let assigned_only = parse_flag("assigned_only", query.assigned_only.as_deref())?;
    let labels = services::list_labels(state.catalog.as_ref(), kind, user, assigned_only).await?;
    Ok(Json(labels.into_iter().map(Into::into).collect()))
}

async fn create_label(
    state: &AppState,
    kind: LabelKind,
    user: &User,
    payload: LabelPayload,
) -> Result<(StatusCode, Json<LabelResponse>), AppError> {
    let label =
        services::create_label(state.catalog.as_ref(), kind, user, payload.name.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(label.into())))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn list_tags(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<LabelQuery>,
) -> Result<Json<Vec<LabelResponse>>, AppError> {
    list_labels(&state, LabelKind::Tag, &user, &query).await
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn create_tag(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<LabelPayload>,
) -> Result<(StatusCode, Json<LabelResponse>), AppError> {
    create_label(&state, LabelKind::Tag, &user, payload).await
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn list_ingredients(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<LabelQuery>,
) -> Result<Json<Vec<LabelResponse>>, AppError> {
    list_labels(&state, LabelKind::Ingredient, &user, &query).await
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn create_ingredient(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<LabelPayload>,
) -> Result<(StatusCode, Json<LabelResponse>), AppError> {
    create_label(&state, LabelKind::Ingredient, &user, payload).await
}

// --- recipes ---

async fn render_detail(state: &AppState, user: &User, recipe: Recipe) -> Result<RecipeDetail, AppError> {
    let (tags, ingredients) = services::recipe_labels(state.catalog.as_ref(), user, &recipe).await?;
    let image = images::image_url(state, recipe.image.as_deref()).await?;
    Ok(RecipeDetail {
        id: recipe.id,
        title: recipe.title,
        time_minutes: recipe.time_minutes,
        ingredients: ingredients.into_iter().map(Into::into).collect(),
        link: recipe.link,
        tags: tags.into_iter().map(Into::into).collect(),
        price: recipe.price,
        image,
    })
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn list_recipes(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<RecipeQuery>,
) -> Result<Json<Vec<RecipeSummary>>, AppError> {
    let tags = parse_id_list("tags", query.tags.as_deref())?;
    let ingredients = parse_id_list("ingredients", query.ingredients.as_deref())?;
    let recipes = services::list_recipes(
        state.catalog.as_ref(),
        &user,
        tags.as_deref(),
        ingredients.as_deref(),
    )
    .await?;
    Ok(Json(recipes.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn create_recipe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(payload): ApiJson<RecipePayload>,
) -> Result<(StatusCode, Json<RecipeSummary>), AppError> {
    let recipe = services::create_recipe(state.catalog.as_ref(), &user, payload).await?;
    Ok((StatusCode::CREATED, Json(recipe.into())))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn get_recipe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<RecipeDetail>, AppError> {
    let recipe = services::get_recipe(state.catalog.as_ref(), &user, id).await?;
    Ok(Json(render_detail(&state, &user, recipe).await?))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn replace_recipe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(payload): ApiJson<RecipePayload>,
) -> Result<Json<RecipeSummary>, AppError> {
    let recipe =
        services::update_recipe(state.catalog.as_ref(), &user, id, payload, UpdateMode::Full).await?;
    Ok(Json(recipe.into()))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn patch_recipe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(payload): ApiJson<RecipePayload>,
) -> Result<Json<RecipeSummary>, AppError> {
    let recipe =
        services::update_recipe(state.catalog.as_ref(), &user, id, payload, UpdateMode::Partial)
            .await?;
    Ok(Json(recipe.into()))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_recipe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, AppError> {
    let recipe = services::delete_recipe(state.catalog.as_ref(), &user, id).await?;
    if let Some(key) = recipe.image {
        if let Err(e) = state.storage.delete_object(&key).await {
            tracing::warn!(error = %e, %key, "failed to remove image of deleted recipe");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /recipe/recipes/:id/upload-image (multipart)
/// Field: image (a single file). Other fields are ignored.
#[instrument(skip(state, user, mp), fields(user_id = user.id))]
pub async fn upload_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(id): ApiPath<i64>,
    mut mp: Multipart,
) -> Result<Json<RecipeImageResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = mp.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            return Err(AppError::field(
                "image",
                "The submitted data was not a file. Check the encoding type on the form.",
            ));
        };
        let body = field.bytes().await?;
        upload = Some(UploadItem {
            file_name: Some(file_name),
            body,
        });
        break;
    }
    let upload = upload.ok_or_else(|| AppError::field("image", "No file was submitted."))?;

    let recipe = images::attach_image(&state, &user, id, upload).await?;
    let image = images::image_url(&state, recipe.image.as_deref()).await?;
    Ok(Json(RecipeImageResponse { id: recipe.id, image }))
}
