//! Playlist API endpoints and payloads

use serde::{Deserialize, Serialize};
use serde_json::json;

use fetchgate_core::cache::item_tag;
use fetchgate_core::{HttpRequest, MutationSpec, QueryKey, QuerySpec};

pub const LOGIN_PATH: &str = "/auth/login";

pub const PLAYLIST_TAG: &str = "Playlist";

/// Push events that change playlists
pub const PLAYLIST_EVENTS: &[&str] = &["playlist.created", "playlist.updated", "playlist.deleted"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

/// One page of `GET /playlists`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistPage {
    pub items: Vec<Playlist>,
    #[serde(default)]
    pub total: Option<u64>,
}

pub fn playlists(page: u32) -> QuerySpec {
    QuerySpec::new(
        "getPlaylists",
        HttpRequest::get("/playlists").with_query("page", page),
    )
    .with_args(json!({ "page": page }))
    .with_tag(PLAYLIST_TAG)
}

pub fn playlist(id: &str) -> QuerySpec {
    QuerySpec::new("getPlaylist", HttpRequest::get(format!("/playlists/{}", id)))
        .with_args(json!({ "id": id }))
        .with_tag(PLAYLIST_TAG)
        .with_tag(item_tag(PLAYLIST_TAG, id))
}

pub fn playlist_key(id: &str) -> QueryKey {
    playlist(id).key()
}

pub fn create_playlist(name: &str) -> MutationSpec {
    MutationSpec::new(
        "createPlaylist",
        HttpRequest::post("/playlists", json!({ "name": name })),
    )
    .invalidating(PLAYLIST_TAG)
}

pub fn rename_playlist(id: &str, name: &str) -> MutationSpec {
    MutationSpec::new(
        "renamePlaylist",
        HttpRequest::patch(format!("/playlists/{}", id), json!({ "name": name })),
    )
    .invalidating(PLAYLIST_TAG)
}
