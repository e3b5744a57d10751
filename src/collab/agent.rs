//! Keyword response agent.

use super::ResponseAgent;
use crate::error::Result;
use chrono::{Local, NaiveTime};

const FALLBACK: &str = "I'm sorry, I don't understand that yet. I'm just a dummy agent for now!";

#[derive(Debug, Clone, Copy)]
enum Reply {
    Fixed(&'static str),
    CurrentTime,
}

/// Keywords in match priority order.
const KEYWORDS: &[(&str, Reply)] = &[
    ("hello", Reply::Fixed("Hello! I'm your voice assistant.")),
    (
        "how are you",
        Reply::Fixed("I'm functioning normally, thank you for asking."),
    ),
    ("time", Reply::CurrentTime),
    (
        "help",
        Reply::Fixed("I'm a simple assistant. Try saying hello or asking for the time."),
    ),
];

/// Answers a handful of fixed phrases.
///
/// Matching is case-insensitive on the trimmed text: an exact keyword match
/// wins, otherwise the first keyword contained in the text.
#[derive(Debug, Clone, Default)]
pub struct KeywordAgent {
    fixed_time: Option<NaiveTime>,
}

impl KeywordAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer time questions with `time` instead of the local clock.
    pub fn with_fixed_time(mut self, time: NaiveTime) -> Self {
        self.fixed_time = Some(time);
        self
    }

    /// Keywords this agent understands, in priority order.
    pub fn commands(&self) -> Vec<&'static str> {
        KEYWORDS.iter().map(|(keyword, _)| *keyword).collect()
    }

    fn render(&self, reply: Reply) -> String {
        match reply {
            Reply::Fixed(text) => text.to_string(),
            Reply::CurrentTime => {
                let now = self.fixed_time.unwrap_or_else(|| Local::now().time());
                format!("The current time is {}", now.format("%I:%M %p"))
            }
        }
    }
}

impl ResponseAgent for KeywordAgent {
    fn respond(&self, text: &str) -> Result<String> {
        let text = text.trim().to_lowercase();

        let matched = KEYWORDS
            .iter()
            .find(|(keyword, _)| text == *keyword)
            .or_else(|| KEYWORDS.iter().find(|(keyword, _)| text.contains(keyword)));

        let response = match matched {
            Some((keyword, reply)) => {
                tracing::debug!(keyword, "agent matched keyword");
                self.render(*reply)
            }
            None => FALLBACK.to_string(),
        };
        Ok(response)
    }
}
