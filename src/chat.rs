// The chat pipeline shared by the web UI and the terminal chat:
// record the user turn, ask the model, resolve playback, record the reply.

use anyhow::Result;
use chrono::Local;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::llm_interaction::{CompletionClient, CompletionError};
use crate::playback::{PlaybackError, PlaybackTrigger};
use crate::resolver::{Resolver, ResolverInput};
use crate::transcript::{ChatTurn, SessionId, SessionStore, TranscriptLog, TranscriptLogError};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error(transparent)]
    Upstream(#[from] CompletionError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error(transparent)]
    TranscriptLog(#[from] TranscriptLogError),
}

pub struct ChatService {
    completion: CompletionClient,
    resolver: Resolver,
    playback: Arc<dyn PlaybackTrigger>,
    sessions: SessionStore,
    transcript_log: TranscriptLog,
}

impl ChatService {
    pub fn new(
        completion: CompletionClient,
        resolver: Resolver,
        playback: Arc<dyn PlaybackTrigger>,
        sessions: SessionStore,
        transcript_log: TranscriptLog,
    ) -> Self {
        Self {
            completion,
            resolver,
            playback,
            sessions,
            transcript_log,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handles one user message and returns the text to show the user.
    ///
    /// The user turn stays in the transcript even when a later step fails;
    /// the bot turn is only recorded once playback (if any) was started.
    pub async fn send(&self, session: SessionId, user_text: &str) -> Result<String, ChatError> {
        let history = self.sessions.history(session).await;
        self.sessions.append(session, ChatTurn::user(user_text)).await;

        let reply = self.completion.complete(&history, user_text).await?;
        let decision = self
            .resolver
            .resolve(&ResolverInput::new(user_text, reply.as_str()));

        if decision.should_play {
            info!(%session, query = %decision.playback_query, "Playback requested");
            self.playback.play(&decision.playback_query).await?;
        }

        self.sessions.append(session, ChatTurn::bot(reply)).await;
        Ok(decision.display_message)
    }

    pub async fn history(&self, session: SessionId) -> Vec<ChatTurn> {
        self.sessions.history(session).await
    }

    pub async fn save(&self, session: SessionId) -> Result<(), ChatError> {
        let turns = self.sessions.history(session).await;
        self.transcript_log.persist(&turns).await?;
        Ok(())
    }

    /// Saves the transcript, then empties it. Nothing is cleared if saving fails.
    pub async fn clear(&self, session: SessionId) -> Result<(), ChatError> {
        self.save(session).await?;
        self.sessions.clear(session).await;
        Ok(())
    }
}

/// Interactive chat on the terminal. Lines starting with `/` are commands.
pub async fn run_terminal_chat<R, W>(service: &ChatService, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session = SessionId::new();
    info!(%session, "Starting terminal chat");
    output
        .write_all(b"Chat with the bot. Commands: /save, /clear, /quit\n")
        .await?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match line {
            "/quit" | "/exit" => break,
            "/save" => service
                .save(session)
                .await
                .map(|_| "Chat history saved.".to_string()),
            "/clear" => service
                .clear(session)
                .await
                .map(|_| "Chat history cleared.".to_string()),
            text => service.send(session, text).await,
        };

        let text = reply.unwrap_or_else(|e| {
            warn!(error = %e, "Chat turn failed");
            format!("Error: {}", e)
        });
        let timestamp = Local::now().format("%H:%M:%S");
        output
            .write_all(format!("[{}] bot: {}\n", timestamp, text).as_bytes())
            .await?;
        output.flush().await?;
    }

    // Keep what was said, like the web UI's save button.
    if !service.history(session).await.is_empty() {
        service.save(session).await?;
    }
    Ok(())
}
