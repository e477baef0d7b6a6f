use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use image::ImageFormat;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::error::AppError;
use crate::recipes::repo::CatalogRepo;
use crate::recipes::repo_types::Recipe;
use crate::recipes::services::get_recipe;
use crate::state::AppState;

pub const RECIPE_UPLOAD_DIR: &str = "uploads/recipe";

const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

pub struct UploadItem {
    pub file_name: Option<String>,
    pub body: Bytes,
}

/// Storage key for a new recipe image: a fresh uuid under the upload dir.
/// The client's extension is kept only when it names the detected format.
pub fn recipe_image_file_path(file_name: Option<&str>, format: ImageFormat) -> String {
    let known = format.extensions_str();
    let ext = file_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|e| known.contains(&e.as_str()))
        .or_else(|| known.first().map(|e| e.to_string()))
        .unwrap_or_else(|| "img".to_string());
    format!("{}/{}.{}", RECIPE_UPLOAD_DIR, Uuid::new_v4(), ext)
}

/// Sniffs and fully decodes `body`; anything that is not a readable image is rejected.
pub fn detect_image(body: &[u8]) -> Result<ImageFormat, AppError> {
    let invalid = || AppError::field("image", INVALID_IMAGE);
    if body.is_empty() {
        return Err(AppError::field("image", "The submitted file is empty."));
    }
    let format = image::guess_format(body).map_err(|_| invalid())?;
    image::load_from_memory_with_format(body, format).map_err(|_| invalid())?;
    Ok(format)
}

/// Stores `upload` and points the recipe at it. The previous file, if any, is removed.
pub async fn attach_image(
    st: &AppState,
    user: &User,
    recipe_id: i64,
    upload: UploadItem,
) -> Result<Recipe, AppError> {
    let current = get_recipe(st.catalog.as_ref(), user, recipe_id).await?;
    let format = detect_image(&upload.body)?;
    let key = recipe_image_file_path(upload.file_name.as_deref(), format);

    st.storage
        .put_object(&key, upload.body, format.to_mime_type())
        .await
        .with_context(|| format!("put_object {}", key))?;

    let recipe = match st.catalog.set_recipe_image(user.id, recipe_id, Some(&key)).await {
        Ok(recipe) => recipe,
        Err(e) => {
            if let Err(cleanup) = st.storage.delete_object(&key).await {
                warn!(error = %cleanup, %key, "failed to remove orphaned upload");
            }
            return Err(e.into());
        }
    };

    if let Some(old) = current.image.filter(|old| *old != key) {
        if let Err(e) = st.storage.delete_object(&old).await {
            warn!(error = %e, key = %old, "failed to remove replaced image");
        }
    }
    info!(user_id = user.id, recipe_id, %key, "recipe image stored");
    Ok(recipe)
}

/// Public URL for a stored image key.
pub async fn image_url(st: &AppState, key: Option<&str>) -> Result<Option<String>, AppError> {
    match key {
        Some(k) => {
            let url = st
                .storage
                .public_url(k)
                .await
                .with_context(|| format!("public url for {}", k))?;
            Ok(Some(url))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use image::RgbImage;
    use rust_decimal::Decimal;

    use super::*;
    use crate::auth::repo::UserRepo;
    use crate::auth::repo_types::{Capabilities, NewUser};
    use crate::recipes::dto::RecipePayload;
    use crate::recipes::services::create_recipe;

    pub(crate) fn png_bytes() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        RgbImage::new(10, 10)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    async fn setup(st: &AppState) -> (User, Recipe) {
        let user = st
            .users
            .insert_user(NewUser {
                email: "img@example.com".into(),
                name: String::new(),
                password_hash: "hash".into(),
                caps: Capabilities::default(),
            })
            .await
            .unwrap();
        let recipe = create_recipe(
            st.catalog.as_ref(),
            &user,
            RecipePayload {
                title: Some("Sample".into()),
                time_minutes: Some(5),
                price: Some(Decimal::new(500, 2)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        (user, recipe)
    }

    #[test]
    fn file_path_is_unique_and_keeps_extension() {
        let a = recipe_image_file_path(Some("example.jpg"), ImageFormat::Jpeg);
        let b = recipe_image_file_path(Some("example.jpg"), ImageFormat::Jpeg);
        assert!(a.starts_with("uploads/recipe/"));
        assert!(a.ends_with(".jpg"));
        assert!(!a.ends_with("/example.jpg"));
        assert_ne!(a, b);
    }

    #[test]
    fn file_path_falls_back_to_detected_format() {
        assert!(recipe_image_file_path(None, ImageFormat::Png).ends_with(".png"));
        assert!(recipe_image_file_path(Some("noext"), ImageFormat::Png).ends_with(".png"));
        assert!(recipe_image_file_path(Some("bad.p/g"), ImageFormat::Png).ends_with(".png"));
        assert!(recipe_image_file_path(Some("photo.JPEG"), ImageFormat::Jpeg).ends_with(".jpeg"));
    }

    #[test]
    fn file_path_ignores_extension_of_another_type() {
        for name in ["x.html", "evil.svg", "shot.jpg", "page.htm"] {
            let key = recipe_image_file_path(Some(name), ImageFormat::Png);
            assert!(key.ends_with(".png"), "{name} -> {key}");
        }
    }

    #[test]
    fn detect_rejects_non_images() {
        assert_eq!(detect_image(&png_bytes()).unwrap(), ImageFormat::Png);
        assert!(matches!(detect_image(b"notimage"), Err(AppError::Validation(_))));
        assert!(matches!(detect_image(b""), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn attach_stores_and_replaces() {
        let (st, objects) = AppState::fake_with_storage();
        let (user, recipe) = setup(&st).await;

        let first = attach_image(
            &st,
            &user,
            recipe.id,
            UploadItem {
                file_name: Some("photo.png".into()),
                body: Bytes::from(png_bytes()),
            },
        )
        .await
        .unwrap();
        let first_key = first.image.clone().unwrap();
        assert!(objects.contains(&first_key));

        let second = attach_image(
            &st,
            &user,
            recipe.id,
            UploadItem {
                file_name: Some("photo.png".into()),
                body: Bytes::from(png_bytes()),
            },
        )
        .await
        .unwrap();
        let second_key = second.image.clone().unwrap();
        assert_ne!(first_key, second_key);
        assert!(objects.contains(&second_key));
        assert!(!objects.contains(&first_key));

        let url = image_url(&st, second.image.as_deref()).await.unwrap().unwrap();
        assert!(url.contains(&second_key));
    }

    #[tokio::test]
    async fn attach_rejects_bad_upload_and_keeps_image_unset() {
        let (st, _objects) = AppState::fake_with_storage();
        let (user, recipe) = setup(&st).await;
        let err = attach_image(
            &st,
            &user,
            recipe.id,
            UploadItem {
                file_name: Some("x.png".into()),
                body: Bytes::from_static(b"notimage"),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let stored = get_recipe(st.catalog.as_ref(), &user, recipe.id).await.unwrap();
        assert!(stored.image.is_none());
    }

    #[tokio::test]
    async fn attach_to_foreign_recipe_is_not_found() {
        let (st, _objects) = AppState::fake_with_storage();
        let (_owner, recipe) = setup(&st).await;
        let other = st
            .users
            .insert_user(NewUser {
                email: "other@example.com".into(),
                name: String::new(),
                password_hash: "hash".into(),
                caps: Capabilities::default(),
            })
            .await
            .unwrap();
        let err = attach_image(
            &st,
            &other,
            recipe.id,
            UploadItem {
                file_name: None,
                body: Bytes::from(png_bytes()),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }
}
