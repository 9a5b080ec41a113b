//! Live playlist view driven by push events

use anyhow::{bail, Result};
use tracing::debug;

use fetchgate_core::events::{spawn_listener, ListenerEvent};
use fetchgate_core::{Config, Coordinator, EventHub};

use crate::api::{self, PlaylistPage, PLAYLIST_EVENTS, PLAYLIST_TAG};
use crate::output::{failed, Output};

/// Print the playlist list, then again every time a push event changes it
pub async fn run(api: &Coordinator, config: &Config, output: &Output) -> Result<()> {
    let Some(ref events_url) = config.events_url else {
        bail!(
            "Push events not configured. Set events_url in {} or FETCHGATE_EVENTS_URL",
            Config::config_file_path().display()
        );
    };

    let (value, mut handle) = api.watch(api::playlists(1)).await.map_err(failed)?;
    print_page(value, output);

    let hub = EventHub::new();
    let _bindings: Vec<_> = PLAYLIST_EVENTS
        .iter()
        .map(|event| api.bind_event(&hub, event, vec![PLAYLIST_TAG.to_string()]))
        .collect();
    let mut listener = spawn_listener(events_url.as_str(), hub);

    output.message("Watching for playlist changes (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            update = handle.next_update() => match update {
                Some(value) => print_page(value, output),
                None => {
                    output.message("Session ended.");
                    break;
                }
            },
            event = listener.event_rx.recv() => match event {
                Some(ListenerEvent::Connected) => output.message("Connected to event stream"),
                Some(ListenerEvent::Disconnected) => output.message("Event stream disconnected, retrying..."),
                Some(ListenerEvent::Error(e)) => debug!("Listener error: {}", e),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    listener.shutdown().await;
    Ok(())
}

fn print_page(value: serde_json::Value, output: &Output) {
    match serde_json::from_value::<PlaylistPage>(value) {
        Ok(page) => output.print_playlists(&page, 1),
        Err(e) => output.message(&format!("Unexpected playlist list from server: {}", e)),
    }
}
