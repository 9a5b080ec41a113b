//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::anyhow;
use fetchgate_core::{ErrorKind, FetchError};

use crate::api::{Playlist, PlaylistPage};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a single playlist with its tracks
    pub fn print_playlist(&self, playlist: &Playlist) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:     {}", playlist.id);
                println!("Name:   {}", playlist.name);
                println!("Tracks: {}", playlist.tracks.len());

                if !playlist.tracks.is_empty() {
                    println!();
                    for (n, track) in playlist.tracks.iter().enumerate() {
                        match track.artist {
                            Some(ref artist) => {
                                println!("{:>3}. {} - {}", n + 1, truncate(&track.title, 40), artist)
                            }
                            None => println!("{:>3}. {}", n + 1, truncate(&track.title, 40)),
                        }
                    }
                }
            }
            OutputFormat::Json => print_json(playlist),
            OutputFormat::Quiet => {
                println!("{}", playlist.id);
            }
        }
    }

    /// Print a page of playlists
    pub fn print_playlists(&self, page: &PlaylistPage, number: u32) {
        match self.format {
            OutputFormat::Human => {
                if page.items.is_empty() {
                    println!("No playlists found.");
                    return;
                }
                for playlist in &page.items {
                    println!(
                        "{} | {} | {} track(s)",
                        truncate(&playlist.id, 12),
                        truncate(&playlist.name, 40),
                        playlist.tracks.len()
                    );
                }
                match page.total {
                    Some(total) => println!("\nPage {} ({} playlist(s) total)", number, total),
                    None => println!("\nPage {}", number),
                }
            }
            OutputFormat::Json => print_json(page),
            OutputFormat::Quiet => {
                for playlist in &page.items {
                    println!("{}", playlist.id);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}

/// Turn a request failure into the message shown to the user
pub fn describe(error: &FetchError) -> String {
    if error.is_session_terminated() {
        return "Session expired. Log in again with `fetchgate login`.".to_string();
    }
    if let Some(message) = error.display_message() {
        return message.to_string();
    }
    match error.kind() {
        ErrorKind::Network => "Could not reach the server.".to_string(),
        ErrorKind::Timeout => "The server took too long to answer.".to_string(),
        ErrorKind::Unauthorized => "Not logged in. Run `fetchgate login` first.".to_string(),
        ErrorKind::NotFound => "Not found.".to_string(),
        ErrorKind::RateLimited => "Too many requests, try again shortly.".to_string(),
        _ => format!("Request failed: {}", error.detail()),
    }
}

/// Wrap a request failure for `?` in command handlers
pub fn failed(error: FetchError) -> anyhow::Error {
    anyhow!(describe(&error))
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_describe() {
        let expired = FetchError::session_terminated("getPlaylists");
        assert!(describe(&expired).contains("Session expired"));

        let shown = FetchError::new(ErrorKind::Validation, "createPlaylist")
            .with_display("name must not be empty");
        assert_eq!(describe(&shown), "name must not be empty");

        let missing = FetchError::new(ErrorKind::NotFound, "getPlaylist").with_status(404);
        assert_eq!(describe(&missing), "Not found.");
    }
}
