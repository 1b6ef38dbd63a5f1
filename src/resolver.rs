//! Intent detection and response shaping.
//!
//! The resolver looks at the user's message and the model's reply and decides
//! whether a song should be played, what to search for, and what to show the
//! user. It is a pure function of its input and the keyword tables; playback
//! itself happens in the caller.
//!
//! Detection is an ordered table of [`Rule`]s. The first rule whose matcher
//! fires produces the decision; when none fires the reply is shown verbatim.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::constants;

/// Keyword tables the default rule table is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordSets {
    pub user_intent_keywords: Vec<String>,
    pub reply_topic_keywords: Vec<String>,
    pub ignore_tokens: Vec<String>,
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self {
            user_intent_keywords: constants::USER_INTENT_KEYWORDS.clone(),
            reply_topic_keywords: constants::REPLY_TOPIC_KEYWORDS.clone(),
            ignore_tokens: constants::IGNORE_TOKENS.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverInput {
    pub user_text: String,
    pub model_reply_text: String,
}

impl ResolverInput {
    pub fn new(user_text: impl Into<String>, model_reply_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            model_reply_text: model_reply_text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverDecision {
    pub should_play: bool,
    /// Empty unless `should_play` is set.
    pub playback_query: String,
    pub display_message: String,
}

impl ResolverDecision {
    fn play(query: String) -> Self {
        Self {
            should_play: true,
            display_message: confirmation_message(&query),
            playback_query: query,
        }
    }

    fn show(reply: &str) -> Self {
        Self {
            should_play: false,
            playback_query: String::new(),
            display_message: reply.to_string(),
        }
    }
}

/// Message shown to the user once playback has been requested.
pub fn confirmation_message(query: &str) -> String {
    format!("Playing \"{}\" on YouTube.", query)
}

/// Which text a rule inspects, and for which keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    UserContainsAny(Vec<String>),
    ReplyContainsAny(Vec<String>),
}

impl Matcher {
    /// Returns the first keyword (in table order) found in the inspected text.
    pub fn first_match<'a>(&'a self, input: &ResolverInput) -> Option<&'a str> {
        let (keywords, text) = match self {
            Matcher::UserContainsAny(keywords) => (keywords, input.user_text.as_str()),
            Matcher::ReplyContainsAny(keywords) => (keywords, input.model_reply_text.as_str()),
        };
        keywords
            .iter()
            .map(String::as_str)
            .find(|keyword| contains_ignore_case(text, keyword))
    }
}

/// What a rule does once its matcher fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Play the user's text with the matched keyword removed once.
    PlayUserTextWithoutKeyword,
    /// Play the first double-quoted span of the reply, unless the reply
    /// contains one of `ignore_tokens`.
    PlayFirstQuotedSpan { ignore_tokens: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub matcher: Matcher,
    pub action: Action,
}

impl Rule {
    pub fn user_command(keywords: Vec<String>) -> Self {
        Self {
            matcher: Matcher::UserContainsAny(keywords),
            action: Action::PlayUserTextWithoutKeyword,
        }
    }

    pub fn reply_topic(keywords: Vec<String>, ignore_tokens: Vec<String>) -> Self {
        Self {
            matcher: Matcher::ReplyContainsAny(keywords),
            action: Action::PlayFirstQuotedSpan { ignore_tokens },
        }
    }

    /// `None` when the matcher did not fire and the next rule should be tried.
    pub fn apply(&self, input: &ResolverInput) -> Option<ResolverDecision> {
        let keyword = self.matcher.first_match(input)?;
        let decision = match &self.action {
            Action::PlayUserTextWithoutKeyword => {
                ResolverDecision::play(strip_first_ignore_case(&input.user_text, keyword))
            }
            Action::PlayFirstQuotedSpan { ignore_tokens } => {
                let reply = input.model_reply_text.as_str();
                match first_quoted_span(reply) {
                    Some(query)
                        if !ignore_tokens
                            .iter()
                            .any(|token| contains_ignore_case(reply, token)) =>
                    {
                        ResolverDecision::play(query.to_string())
                    }
                    _ => ResolverDecision::show(reply),
                }
            }
        };
        Some(decision)
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    rules: Vec<Rule>,
}

impl Resolver {
    /// Builds the standard table: user command first, then reply topic.
    pub fn new(keywords: KeywordSets) -> Self {
        Self::with_rules(vec![
            Rule::user_command(keywords.user_intent_keywords),
            Rule::reply_topic(keywords.reply_topic_keywords, keywords.ignore_tokens),
        ])
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn resolve(&self, input: &ResolverInput) -> ResolverDecision {
        self.rules
            .iter()
            .find_map(|rule| rule.apply(input))
            .unwrap_or_else(|| ResolverDecision::show(&input.model_reply_text))
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(KeywordSets::default())
    }
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    find_ignore_case(haystack, needle).is_some()
}

/// Byte range of the first case-insensitive occurrence of `needle`.
///
/// Compares char by char so the range always lies on char boundaries of the
/// original text, even where lowercasing would change the byte length.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<Range<usize>> {
    if needle.is_empty() {
        return Some(0..0);
    }
    'outer: for (start, _) in haystack.char_indices() {
        let mut hay = haystack[start..].char_indices();
        let mut end = start;
        for n in needle.chars() {
            match hay.next() {
                Some((offset, h)) if chars_eq_ignore_case(h, n) => {
                    end = start + offset + h.len_utf8();
                }
                _ => continue 'outer,
            }
        }
        return Some(start..end);
    }
    None
}

fn chars_eq_ignore_case(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

fn strip_first_ignore_case(text: &str, keyword: &str) -> String {
    match find_ignore_case(text, keyword) {
        Some(range) => format!("{}{}", &text[..range.start], &text[range.end..])
            .trim()
            .to_string(),
        None => text.trim().to_string(),
    }
}

fn first_quoted_span(text: &str) -> Option<&str> {
    let open = text.find('"')?;
    let rest = &text[open + 1..];
    let close = rest.find('"')?;
    Some(&rest[..close])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(user: &str, reply: &str) -> ResolverDecision {
        Resolver::default().resolve(&ResolverInput::new(user, reply))
    }

    #[test]
    fn test_user_command_plays_rest_of_message() {
        let decision = resolve("play Bohemian Rhapsody", "Sure!");
        assert!(decision.should_play);
        assert_eq!(decision.playback_query, "Bohemian Rhapsody");
        assert_eq!(
            decision.display_message,
            "Playing \"Bohemian Rhapsody\" on YouTube."
        );
    }

    #[test]
    fn test_user_command_ignores_reply_content() {
        let decision = resolve(
            "please play Yesterday",
            "Here is an image.jpg of the song \"Help!\"",
        );
        assert!(decision.should_play);
        assert_eq!(decision.playback_query, "please  Yesterday");
    }

    #[test]
    fn test_user_command_strips_only_first_occurrence() {
        let decision = resolve("play Play That Funky Music", "ok");
        assert_eq!(decision.playback_query, "Play That Funky Music");
    }

    #[test]
    fn test_user_command_matches_any_case_and_keeps_query_case() {
        let decision = resolve("PLAY Hotel California", "ok");
        assert!(decision.should_play);
        assert_eq!(decision.playback_query, "Hotel California");
    }

    #[test]
    fn test_user_command_matches_inside_words() {
        // "display" contains "play"
        let decision = resolve("display the lyrics", "ok");
        assert!(decision.should_play);
        assert_eq!(decision.playback_query, "dis the lyrics");
    }

    #[test]
    fn test_user_command_with_nothing_else_plays_empty_query() {
        let decision = resolve("  play  ", "What should I play?");
        assert!(decision.should_play);
        assert_eq!(decision.playback_query, "");
        assert_eq!(decision.display_message, "Playing \"\" on YouTube.");
    }

    #[test]
    fn test_reply_topic_extracts_first_quoted_span() {
        let decision = resolve(
            "how are you",
            "You might enjoy the song \"Yesterday\" by The Beatles.",
        );
        assert!(decision.should_play);
        assert_eq!(decision.playback_query, "Yesterday");
        assert_eq!(decision.display_message, "Playing \"Yesterday\" on YouTube.");
    }

    #[test]
    fn test_reply_topic_uses_only_first_quote_pair() {
        let decision = resolve(
            "recommend something",
            "Try the track \"Let It Be\" or maybe \"Hey Jude\".",
        );
        assert_eq!(decision.playback_query, "Let It Be");
    }

    #[test]
    fn test_reply_topic_keeps_original_case_of_query() {
        let decision = resolve("hi", "LISTEN to \"Smells Like Teen Spirit\"");
        assert!(decision.should_play);
        assert_eq!(decision.playback_query, "Smells Like Teen Spirit");
    }

    #[test]
    fn test_reply_topic_without_quotes_shows_reply() {
        let reply = "Here is an image.jpg of a song book.";
        let decision = resolve("how are you", reply);
        assert!(!decision.should_play);
        assert_eq!(decision.playback_query, "");
        assert_eq!(decision.display_message, reply);
    }

    #[test]
    fn test_reply_topic_with_unclosed_quote_shows_reply() {
        let reply = "That song \"Imagine is lovely";
        let decision = resolve("hello", reply);
        assert!(!decision.should_play);
        assert_eq!(decision.display_message, reply);
    }

    #[test]
    fn test_ignore_token_suppresses_playback() {
        let reply = "<IMG SRC=\"cover.png\"> a song cover";
        let decision = resolve("hello", reply);
        assert!(!decision.should_play);
        assert_eq!(decision.playback_query, "");
        assert_eq!(decision.display_message, reply);
    }

    #[test]
    fn test_ignore_token_outside_quotes_still_suppresses() {
        let reply = "description of image: the song \"Yesterday\" on a poster";
        let decision = resolve("hello", reply);
        assert!(!decision.should_play);
        assert_eq!(decision.display_message, reply);
    }

    #[test]
    fn test_topic_keyword_embedded_in_word_counts() {
        // "using" contains "sing"
        let decision = resolve("hi", "I'm using \"quotes\" here.");
        assert!(decision.should_play);
        assert_eq!(decision.playback_query, "quotes");
    }

    #[test]
    fn test_no_keywords_shows_reply_verbatim() {
        let reply = "\"It is sunny today.\"";
        let decision = resolve("what's the weather", reply);
        assert!(!decision.should_play);
        assert_eq!(decision.playback_query, "");
        assert_eq!(decision.display_message, reply);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let resolver = Resolver::default();
        let input = ResolverInput::new("how are you", "A great song is \"Africa\".");
        assert_eq!(resolver.resolve(&input), resolver.resolve(&input));
    }

    #[test]
    fn test_custom_keyword_sets() {
        let resolver = Resolver::new(KeywordSets {
            user_intent_keywords: vec!["spiele".to_string()],
            reply_topic_keywords: vec!["lied".to_string()],
            ignore_tokens: vec![],
        });
        let decision = resolver.resolve(&ResolverInput::new("Spiele Nena", "ok"));
        assert_eq!(decision.playback_query, "Nena");

        let decision = resolver.resolve(&ResolverInput::new("hallo", "Ein Lied: \"99 Luftballons\""));
        assert_eq!(decision.playback_query, "99 Luftballons");

        // "play" is not configured
        let decision = resolver.resolve(&ResolverInput::new("play it", "ok"));
        assert!(!decision.should_play);
    }

    #[test]
    fn test_empty_rule_table_always_shows_reply() {
        let resolver = Resolver::with_rules(vec![]);
        let decision = resolver.resolve(&ResolverInput::new("play x", "reply"));
        assert!(!decision.should_play);
        assert_eq!(decision.display_message, "reply");
    }

    #[test]
    fn test_rule_apply_returns_none_when_matcher_misses() {
        let rule = Rule::reply_topic(vec!["song".to_string()], vec![]);
        assert!(rule.apply(&ResolverInput::new("song", "no match")).is_none());
        assert!(rule.apply(&ResolverInput::new("", "a Song")).is_some());
    }

    #[test]
    fn test_matcher_reports_first_keyword_in_table_order() {
        let matcher = Matcher::ReplyContainsAny(vec!["track".to_string(), "song".to_string()]);
        let input = ResolverInput::new("", "a song and a track");
        assert_eq!(matcher.first_match(&input), Some("track"));
    }

    #[test]
    fn test_find_ignore_case_handles_multibyte_text() {
        assert_eq!(find_ignore_case("Ünïcode PLAY", "play"), Some(10..14));
        assert_eq!(strip_first_ignore_case("Ça PLAY là", "play"), "Ça  là");
        assert!(contains_ignore_case("ÉCOUTE", "écoute"));
        assert!(!contains_ignore_case("pla", "play"));
    }

    #[test]
    fn test_first_quoted_span() {
        assert_eq!(first_quoted_span("a \"b\" c \"d\""), Some("b"));
        assert_eq!(first_quoted_span("\"\""), Some(""));
        assert_eq!(first_quoted_span("no quotes"), None);
        assert_eq!(first_quoted_span("one \" quote"), None);
    }
}
