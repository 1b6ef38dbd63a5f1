// Opening a YouTube search for the resolved query.

use async_trait::async_trait;
use reqwest::Url;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::constants::YOUTUBE_SEARCH_URL;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("failed to build search URL: {0}")]
    Url(String),
    #[error("failed to launch {opener}: {source}")]
    Launch {
        opener: String,
        #[source]
        source: std::io::Error,
    },
}

/// Side effect fired when the resolver decides a song should play.
#[async_trait]
pub trait PlaybackTrigger: Send + Sync {
    async fn play(&self, query: &str) -> Result<(), PlaybackError>;
}

pub fn search_url(query: &str) -> Result<Url, PlaybackError> {
    Url::parse_with_params(YOUTUBE_SEARCH_URL, &[("search_query", query)])
        .map_err(|e| PlaybackError::Url(e.to_string()))
}

/// Opens the YouTube search page in the desktop's browser.
#[derive(Debug, Clone, Default)]
pub struct YouTubeLauncher {
    /// Program to hand the URL to; the platform default when unset.
    opener: Option<String>,
}

impl YouTubeLauncher {
    pub fn new(opener: Option<String>) -> Self {
        Self { opener }
    }

    fn command(&self, url: &str) -> Command {
        if let Some(opener) = &self.opener {
            let mut cmd = Command::new(opener);
            cmd.arg(url);
            return cmd;
        }
        platform_command(url)
    }
}

#[cfg(target_os = "macos")]
fn platform_command(url: &str) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    cmd
}

#[cfg(target_os = "windows")]
fn platform_command(url: &str) -> Command {
    let mut cmd = Command::new("cmd");
    // The empty argument is the window title `start` expects first.
    cmd.args(["/C", "start", "", url]);
    cmd
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn platform_command(url: &str) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    cmd
}

#[async_trait]
impl PlaybackTrigger for YouTubeLauncher {
    async fn play(&self, query: &str) -> Result<(), PlaybackError> {
        let url = search_url(query)?;
        let mut cmd = self.command(url.as_str());
        let opener = cmd.as_std().get_program().to_string_lossy().into_owned();

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| {
                warn!(%opener, error = %source, "Failed to launch playback");
                PlaybackError::Launch {
                    opener: opener.clone(),
                    source,
                }
            })?;

        info!(%url, pid = ?child.id(), "Opened YouTube search");

        // The opener is not awaited by the request; reap it in the background.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!(%opener, "Opener exited"),
                Ok(status) => warn!(%opener, %status, "Opener exited with failure"),
                Err(e) => warn!(%opener, error = %e, "Failed to wait for opener"),
            }
        });
        Ok(())
    }
}

/// Only logs the search URL. Used on headless hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyPlayback;

#[async_trait]
impl PlaybackTrigger for LogOnlyPlayback {
    async fn play(&self, query: &str) -> Result<(), PlaybackError> {
        let url = search_url(query)?;
        info!(%url, "Playback requested (not opening a browser)");
        Ok(())
    }
}
