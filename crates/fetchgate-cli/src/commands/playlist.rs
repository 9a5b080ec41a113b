//! Playlist command handlers

use anyhow::{Context, Result};
use serde_json::{json, Value};

use fetchgate_core::validate::RequireFields;
use fetchgate_core::Coordinator;

use crate::api::{self, Playlist, PlaylistPage};
use crate::output::{failed, Output};

/// List one page of playlists
pub async fn list(api: &Coordinator, page: u32, output: &Output) -> Result<()> {
    let value = api.query(api::playlists(page)).await.map_err(failed)?;
    let playlists: PlaylistPage =
        serde_json::from_value(value).context("Unexpected playlist list from server")?;

    output.print_playlists(&playlists, page);
    Ok(())
}

/// Show one playlist
pub async fn show(api: &Coordinator, id: String, output: &Output) -> Result<()> {
    let value = api
        .query_validated(api::playlist(&id), RequireFields::new(["id", "name"]))
        .await
        .map_err(failed)?;
    let playlist: Playlist =
        serde_json::from_value(value).context("Unexpected playlist from server")?;

    output.print_playlist(&playlist);
    Ok(())
}

/// Create a playlist
pub async fn create(api: &Coordinator, name: String, output: &Output) -> Result<()> {
    let value = api
        .mutate(api::create_playlist(&name))
        .await
        .map_err(failed)?;
    let playlist: Playlist =
        serde_json::from_value(value).context("Unexpected playlist from server")?;

    output.success(&format!("Created playlist: {}", playlist.id));
    output.print_playlist(&playlist);
    Ok(())
}

/// Rename a playlist, showing the new name before the server confirms it
pub async fn rename(api: &Coordinator, id: String, name: String, output: &Output) -> Result<()> {
    let key = api::playlist_key(&id);
    // Make sure there is something to patch
    api.query(api::playlist(&id)).await.map_err(failed)?;

    let renamed = name.clone();
    api.mutate_optimistic(api::rename_playlist(&id, &name), &key, move |data| {
        set_name(data, &renamed)
    })
    .await
    .map_err(failed)?;

    output.success(&format!("Renamed playlist {} to {}", id, name));
    Ok(())
}

fn set_name(data: &mut Value, name: &str) {
    if let Some(object) = data.as_object_mut() {
        object.insert("name".to_string(), json!(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_name() {
        let mut data = json!({"id": "p1", "name": "Old", "tracks": []});
        set_name(&mut data, "New");
        assert_eq!(data, json!({"id": "p1", "name": "New", "tracks": []}));

        let mut not_object = json!([1]);
        set_name(&mut not_object, "New");
        assert_eq!(not_object, json!([1]));
    }
}
