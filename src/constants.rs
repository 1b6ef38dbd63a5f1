// Defaults for configuration values and the keyword tables used by the resolver.

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_HISTORY_WINDOW: usize = 20;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_SESSIONS: usize = 1000;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 12 * 60 * 60;

pub const YOUTUBE_SEARCH_URL: &str = "https://www.youtube.com/results";
pub const SESSION_COOKIE: &str = "tunechat_session";
pub const END_OF_SESSION_MARKER: &str = "--- End of Session ---";

pub const SYSTEM_PROMPT: &str = "You are a friendly, talkative assistant chatting with a user in a web page. \
When you recommend a song, put its title in double quotes.";

// Use lazy_static so the keyword tables are built once and shared read-only.
lazy_static::lazy_static! {
    /// Words in the user's message that ask for playback directly.
    pub static ref USER_INTENT_KEYWORDS: Vec<String> = vec!["play".to_string()];
    /// Words in the model's reply suggesting it is talking about playable media.
    pub static ref REPLY_TOPIC_KEYWORDS: Vec<String> = ["song", "music", "track", "listen", "sing"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    /// Substrings that mark a reply as describing something other than a song.
    pub static ref IGNORE_TOKENS: Vec<String> = ["<img src=", "image.jpg", "Description of image"]
        .iter()
        .map(|s| s.to_string())
        .collect();
}
