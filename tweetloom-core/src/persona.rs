//! Persona documents (character cards) consumed by calendar generation.
//!
//! Only the fields this crate reads are typed; everything else stays in the
//! raw JSON and is passed through untouched.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::calendar::TimeSegment;
use crate::error::{Error, Result};
use crate::extract::{self, KeyPath};

/// Fields a persona needs before downstream generation can use it.
pub const REQUIRED_FIELDS: [&str; 4] = [
    "data.name",
    "data.description",
    "data.personality",
    "data.system_prompt",
];

/// Country used when a persona carries no usable location.
pub const DEFAULT_COUNTRY: &str = "US";

/// Target word band for a tweet's scene hint.
pub const SCENE_HINT_WORDS: std::ops::RangeInclusive<usize> = 80..=150;

const SUMMARY_DESCRIPTION_CHARS: usize = 150;

/// A persona document. Always an object with a `data` key.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaRecord {
    document: Value,
}

impl PersonaRecord {
    /// Recover a persona from raw model or file output.
    pub fn parse(raw: &str) -> Result<Self> {
        let document = extract::extract(raw, &[KeyPath::new("data")])?;
        Ok(Self { document })
    }

    pub fn from_value(document: Value) -> Result<Self> {
        if !document.is_object() {
            return Err(Error::UnsupportedShape { found: "non-object" });
        }
        extract::validate(&document, &[KeyPath::new("data")])?;
        Ok(Self { document })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }

    fn text(&self, path: &str) -> Option<&str> {
        KeyPath::new(path).str(&self.document)
    }

    pub fn name(&self) -> &str {
        self.text("data.name").unwrap_or("Unknown")
    }

    pub fn description(&self) -> &str {
        self.text("data.description").unwrap_or_default()
    }

    pub fn personality(&self) -> &str {
        self.text("data.personality").unwrap_or_default()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.text("data.system_prompt")
    }

    /// `data.core_info`, or the older `data.extensions.core_info`.
    fn core_info(&self) -> Option<&Value> {
        KeyPath::new("data.core_info")
            .non_null(&self.document)
            .filter(|v| v.is_object())
            .or_else(|| KeyPath::new("data.extensions.core_info").non_null(&self.document))
    }

    fn location(&self) -> Option<&Value> {
        self.core_info()
            .and_then(|info| info.get("location"))
            .filter(|v| v.is_object())
    }

    /// ISO country code used for holiday lookup, uppercased.
    pub fn country_code(&self) -> String {
        self.location()
            .and_then(|loc| loc.get("country_code"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(DEFAULT_COUNTRY)
            .to_ascii_uppercase()
    }

    pub fn city(&self) -> Option<&str> {
        self.location()
            .and_then(|loc| loc.get("city"))
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
    }

    fn age(&self) -> Option<String> {
        match self.core_info()?.get("age")? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    fn twitter_handle(&self) -> Option<&str> {
        ["data.twitter_persona", "data.extensions.twitter_persona"]
            .iter()
            .find_map(|p| KeyPath::new(p).non_null(&self.document))
            .and_then(|tp| tp.pointer("/social_accounts/twitter_handle"))
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
    }

    /// Required fields absent from the document, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|p| KeyPath::new(p).resolve(&self.document).is_none())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Typed entries of `data.twitter_scenario.tweet_examples`.
    ///
    /// Entries that are not objects are skipped.
    pub fn tweet_examples(&self) -> Vec<TweetExample> {
        KeyPath::new("data.twitter_scenario.tweet_examples")
            .resolve(&self.document)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| TweetExample::deserialize(item).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Up to `max` example texts for few-shot prompting.
    ///
    /// Falls back to the `{{char}}:` lines of `data.mes_example` when the
    /// persona has no tweet examples.
    pub fn few_shot_examples(&self, max: usize) -> Vec<String> {
        let tweets: Vec<String> = self
            .tweet_examples()
            .into_iter()
            .map(|ex| ex.text)
            .filter(|t| !t.trim().is_empty())
            .take(max)
            .collect();
        if !tweets.is_empty() {
            return tweets;
        }

        let Some(mes_example) = self.text("data.mes_example") else {
            return Vec::new();
        };
        mes_example
            .split("<START>")
            .flat_map(str::lines)
            .filter_map(|line| line.split_once("{{char}}:"))
            .map(|(_, reply)| reply.trim().to_string())
            .filter(|reply| !reply.is_empty())
            .take(max)
            .collect()
    }

    /// Short human-readable summary.
    pub fn summary(&self) -> String {
        let mut header = self.name().to_string();
        if let Some(age) = self.age() {
            header.push_str(&format!(", {age}"));
        }
        if let Some(city) = self.city() {
            header.push_str(&format!(" ({city}, {})", self.country_code()));
        }

        let description = self.description();
        let mut summary = format!("{header}\n");
        if description.chars().count() > SUMMARY_DESCRIPTION_CHARS {
            let cut: String = description.chars().take(SUMMARY_DESCRIPTION_CHARS).collect();
            summary.push_str(&format!("{cut}...\n"));
        } else if !description.is_empty() {
            summary.push_str(&format!("{description}\n"));
        }
        if let Some(handle) = self.twitter_handle() {
            summary.push_str(&format!("Twitter: {handle}\n"));
        }
        summary
    }
}

/// One example tweet from a persona's Twitter scenario.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TweetExample {
    /// Content-type tag
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub time_segment: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub scene_hint: Option<String>,
    #[serde(default)]
    pub strategic_flaw: Option<String>,
}

impl TweetExample {
    /// The time segment, if it names a known slot.
    pub fn segment(&self) -> Option<TimeSegment> {
        self.time_segment.as_deref().and_then(TimeSegment::parse)
    }

    pub fn scene_hint_words(&self) -> usize {
        self.scene_hint
            .as_deref()
            .map(|s| s.split_whitespace().count())
            .unwrap_or(0)
    }

    /// Soft warning when the scene hint falls outside the target word band.
    pub fn scene_hint_warning(&self) -> Option<String> {
        let hint = self.scene_hint.as_deref().filter(|h| !h.trim().is_empty())?;
        let words = hint.split_whitespace().count();
        if SCENE_HINT_WORDS.contains(&words) {
            None
        } else {
            Some(format!(
                "scene_hint has {words} words (expected {}-{})",
                SCENE_HINT_WORDS.start(),
                SCENE_HINT_WORDS.end()
            ))
        }
    }
}
