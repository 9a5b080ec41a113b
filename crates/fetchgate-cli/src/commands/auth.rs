//! Login, logout and session status

use anyhow::Result;
use serde_json::json;

use fetchgate_core::{Config, Coordinator, SessionStatus};

use crate::api::LOGIN_PATH;
use crate::output::{failed, Output, OutputFormat};

/// Log in and persist the returned credentials
pub async fn login(api: &Coordinator, email: String, password: String, output: &Output) -> Result<()> {
    api.login(LOGIN_PATH, json!({ "email": email, "password": password }))
        .await
        .map_err(failed)?;

    output.success(&format!("Logged in as {}", email));
    Ok(())
}

pub fn logout(api: &Coordinator, output: &Output) -> Result<()> {
    api.logout();
    output.success("Logged out");
    Ok(())
}

/// Show session status
pub fn status(api: &Coordinator, config: &Config, output: &Output) -> Result<()> {
    let status = match api.status() {
        SessionStatus::Anonymous => "logged out",
        SessionStatus::Authenticated => "logged in",
        SessionStatus::Expired => "expired",
    };
    let issued_at = api.tokens().get().map(|c| c.issued_at);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                json!({
                    "session": status,
                    "issued_at": issued_at,
                    "base_url": config.base_url,
                    "events_url": config.events_url,
                    "state_file": config.state_path(),
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", status);
        }
        OutputFormat::Human => {
            println!("Session:  {}", status);
            if let Some(issued_at) = issued_at {
                println!("  Since:  {}", issued_at.format("%Y-%m-%d %H:%M"));
            }
            println!("Server:   {}", config.base_url);
            println!(
                "Events:   {}",
                config.events_url.as_deref().unwrap_or("(not set)")
            );
            println!("State:    {}", config.state_path().display());
        }
    }

    Ok(())
}
