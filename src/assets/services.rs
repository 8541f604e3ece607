use std::path::{Component, Path};

use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AssetKind, UPLOADS_PREFIX};
use crate::state::AppState;

pub struct UploadItem {
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("user not found")]
    UserNotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Stores `item` as the user's asset of `kind` and returns its public path.
///
/// The new file is written and recorded before the previous one is removed,
/// so a failure part-way leaves at worst an orphaned file, never a record
/// pointing at nothing. Removing the previous file is best-effort.
pub async fn replace_asset(
    st: &AppState,
    user_id: Uuid,
    kind: AssetKind,
    item: UploadItem,
) -> Result<String, AssetError> {
    let user = st
        .users
        .find_by_id(user_id)
        .await?
        .ok_or(AssetError::UserNotFound)?;
    let previous = kind.current(&user).map(str::to_string);

    let name = generate_name(kind, item.original_name.as_deref(), item.content_type.as_deref());
    let key = format!("{}/{}", kind.area(), name);
    st.storage
        .put_object(&key, item.body)
        .await
        .with_context(|| format!("store {key}"))?;
    let path = public_path(&key);

    let updated = match st.users.set_asset(user_id, kind, Some(&path)).await {
        Ok(updated) => updated,
        Err(e) => {
            discard(st, &key).await;
            return Err(e.into());
        }
    };
    if updated.is_none() {
        discard(st, &key).await;
        return Err(AssetError::UserNotFound);
    }

    if let Some(old) = previous.filter(|old| *old != path) {
        remove_stored(st, &old).await;
    }
    info!(%user_id, kind = kind.prefix(), %path, "asset replaced");
    Ok(path)
}

/// Deletes the user's asset of `kind` and clears the field. Succeeds when
/// there is nothing to remove.
pub async fn remove_asset(st: &AppState, user_id: Uuid, kind: AssetKind) -> Result<(), AssetError> {
    let user = st
        .users
        .find_by_id(user_id)
        .await?
        .ok_or(AssetError::UserNotFound)?;
    let Some(old) = kind.current(&user).map(str::to_string) else {
        return Ok(());
    };
    remove_stored(st, &old).await;
    st.users
        .set_asset(user_id, kind, None)
        .await?
        .ok_or(AssetError::UserNotFound)?;
    info!(%user_id, kind = kind.prefix(), path = %old, "asset removed");
    Ok(())
}

async fn remove_stored(st: &AppState, path: &str) {
    let Some(key) = key_from_public_path(path) else {
        warn!(path, "stored asset path is not under the uploads area; leaving file alone");
        return;
    };
    if let Err(e) = st.storage.delete_object(key).await {
        warn!(error = %e, key, "failed to delete previous asset");
    }
}

async fn discard(st: &AppState, key: &str) {
    if let Err(e) = st.storage.delete_object(key).await {
        warn!(error = %e, key, "failed to discard unreferenced upload");
    }
}

pub fn public_path(key: &str) -> String {
    format!("{UPLOADS_PREFIX}{key}")
}

/// Maps a stored `/uploads/...` path back to its storage key, refusing
/// anything that could point outside the uploads area.
pub fn key_from_public_path(path: &str) -> Option<&str> {
    let key = path.strip_prefix(UPLOADS_PREFIX)?;
    let normal = !key.is_empty()
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    normal.then_some(key)
}

/// `<prefix>-<uuid>[.<ext>]`. The identifier is random, so names never
/// collide regardless of clock resolution.
pub fn generate_name(kind: AssetKind, original_name: Option<&str>, content_type: Option<&str>) -> String {
    let id = Uuid::new_v4().simple();
    let ext = original_name
        .and_then(ext_from_name)
        .or_else(|| content_type.and_then(ext_from_mime).map(str::to_string));
    match ext {
        Some(ext) => format!("{}-{}.{}", kind.prefix(), id, ext),
        None => format!("{}-{}", kind.prefix(), id),
    }
}

fn ext_from_name(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    let ok = !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    ok.then(|| ext.to_ascii_lowercase())
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "application/pdf" => Some("pdf"),
        "application/msword" => Some("doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some("docx"),
        _ => None,
    }
}
