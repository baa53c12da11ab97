//! Calendar document types.
//!
//! These mirror the on-disk JSON format: pretty-printed UTF-8 with top-level
//! keys `persona_name`, `month`, `generated_at`, `calendar`, `monthly_strategy`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Format of `generated_at`.
pub const GENERATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date key format inside `calendar`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Key used in `content_ratio` for days without a `topic_type`.
pub const UNKNOWN_TOPIC: &str = "unknown";

/// Content category of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicType {
    LifestyleMundane,
    PersonalEmotion,
    InteractionBait,
    VisualShowcase,
    CtaConversion,
}

impl TopicType {
    pub const ALL: [TopicType; 5] = [
        TopicType::LifestyleMundane,
        TopicType::PersonalEmotion,
        TopicType::InteractionBait,
        TopicType::VisualShowcase,
        TopicType::CtaConversion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicType::LifestyleMundane => "lifestyle_mundane",
            TopicType::PersonalEmotion => "personal_emotion",
            TopicType::InteractionBait => "interaction_bait",
            TopicType::VisualShowcase => "visual_showcase",
            TopicType::CtaConversion => "cta_conversion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Share of days the planner is asked to give this type, in percent.
    pub fn target_percent(&self) -> u8 {
        match self {
            TopicType::LifestyleMundane => 50,
            TopicType::PersonalEmotion => 20,
            TopicType::InteractionBait => 20,
            TopicType::VisualShowcase => 8,
            TopicType::CtaConversion => 2,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TopicType::LifestyleMundane => {
                "mundane life/daily chatter, like \"weather so hot today\", \"what to eat for lunch\""
            }
            TopicType::PersonalEmotion => "emotional sharing, like tired/lonely/happy/nostalgic",
            TopicType::InteractionBait => {
                "interaction prompts: poll/question/choice/mild controversy"
            }
            TopicType::VisualShowcase => "OOTD, selfie, talent showcase",
            TopicType::CtaConversion => "traffic conversion, max 1-2 times per week",
        }
    }
}

impl fmt::Display for TopicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Posting slot within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeSegment {
    EarlyMorning,
    Morning,
    Midday,
    Afternoon,
    EveningPrime,
    LateNight,
}

impl TimeSegment {
    pub const ALL: [TimeSegment; 6] = [
        TimeSegment::EarlyMorning,
        TimeSegment::Morning,
        TimeSegment::Midday,
        TimeSegment::Afternoon,
        TimeSegment::EveningPrime,
        TimeSegment::LateNight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSegment::EarlyMorning => "early_morning",
            TimeSegment::Morning => "morning",
            TimeSegment::Midday => "midday",
            TimeSegment::Afternoon => "afternoon",
            TimeSegment::EveningPrime => "evening_prime",
            TimeSegment::LateNight => "late_night",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Clock range, e.g. `06:00-08:30`.
    pub fn window(&self) -> &'static str {
        match self {
            TimeSegment::EarlyMorning => "06:00-08:30",
            TimeSegment::Morning => "08:30-11:30",
            TimeSegment::Midday => "11:30-14:00",
            TimeSegment::Afternoon => "14:00-18:00",
            TimeSegment::EveningPrime => "18:00-22:00",
            TimeSegment::LateNight => "22:00-02:00",
        }
    }

    pub fn suited_for(&self) -> &'static str {
        match self {
            TimeSegment::EarlyMorning => "waking up complaints, tired content",
            TimeSegment::Morning => "daily work/study, sunshine sharing",
            TimeSegment::Midday => "polls, chatter, choice questions",
            TimeSegment::Afternoon => "focused work/study, talent showcase",
            TimeSegment::EveningPrime => "OOTD, selfies, visual content",
            TimeSegment::LateNight => "insomnia, loneliness, emotional, traffic conversion",
        }
    }
}

impl fmt::Display for TimeSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One day's content plan.
///
/// Unknown fields from the model are kept in `extra` and written back as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyPlan {
    #[serde(
        default,
        deserialize_with = "optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub weekday: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub topic_type: String,
    #[serde(
        default,
        deserialize_with = "optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub tweet_format: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub recommended_time: String,
    #[serde(default, deserialize_with = "text")]
    pub mood: String,
    #[serde(default, deserialize_with = "text")]
    pub theme: String,
    #[serde(default, deserialize_with = "text")]
    pub content_direction: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "text")]
    pub suggested_scene: String,
    #[serde(default, deserialize_with = "optional_text")]
    pub special_event: Option<String>,
    #[serde(default, deserialize_with = "optional_text")]
    pub strategic_flaw: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DailyPlan {
    pub fn topic(&self) -> Option<TopicType> {
        TopicType::parse(&self.topic_type)
    }

    pub fn time_segment(&self) -> Option<TimeSegment> {
        TimeSegment::parse(&self.recommended_time)
    }
}

/// Flatten whatever the model put in a text slot into a string.
///
/// Objects with a `name` (e.g. `{"name": "Holi", "type": "festival"}`) become
/// that name; other non-strings keep their JSON text.
fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Object(map) => match map.get("name") {
            Some(Value::String(name)) => Some(name.clone()),
            _ => Some(Value::Object(map).to_string()),
        },
        other => Some(other.to_string()),
    }
}

/// Text field where `null` (or any non-string) must not reject the day.
fn text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn optional_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_text(Value::deserialize(deserializer)?).filter(|s| !s.trim().is_empty()))
}

/// Accept `["a", "b"]` or `"a, b"`.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(value_text).collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        other => value_text(other).into_iter().collect(),
    })
}

/// A calendar month, `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return Err(Error::Calendar(format!(
                "invalid month {year:04}-{month:02}"
            )));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Day `day` of this month, if it exists.
    pub fn day(&self, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, day)
    }

    pub fn first_day(&self) -> NaiveDate {
        // Month and year are validated at construction.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn days_in_month(&self) -> u32 {
        self.next()
            .first_day()
            .signed_duration_since(self.first_day())
            .num_days() as u32
    }

    pub fn last_day(&self) -> NaiveDate {
        self.day(self.days_in_month()).unwrap_or_else(|| self.first_day())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Calendar(format!("invalid month `{s}`, expected YYYY-MM"));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        MonthKey::new(year, month)
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for MonthKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Parse a `YYYY-MM-DD` key.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Derived distribution summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyStrategy {
    /// Percentage of days per `topic_type`, one decimal place
    pub content_ratio: BTreeMap<String, f64>,
    pub total_days: usize,
}

impl MonthlyStrategy {
    /// Count `topic_type` across `days`. Never trusts a model-reported ratio.
    pub fn from_days(days: &BTreeMap<String, DailyPlan>) -> Self {
        let total = days.len();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for plan in days.values() {
            let topic = match plan.topic_type.trim() {
                "" => UNKNOWN_TOPIC,
                t => t,
            };
            *counts.entry(topic.to_string()).or_default() += 1;
        }

        let content_ratio = counts
            .into_iter()
            .map(|(topic, count)| {
                let pct = count as f64 / total as f64 * 100.0;
                (topic, (pct * 10.0).round() / 10.0)
            })
            .collect();

        Self {
            content_ratio,
            total_days: total,
        }
    }
}

/// The persisted unit of calendar state for one (persona, month).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarMonth {
    pub persona_name: String,
    pub month: MonthKey,
    pub generated_at: String,
    pub calendar: BTreeMap<String, DailyPlan>,
    pub monthly_strategy: MonthlyStrategy,
}

impl CalendarMonth {
    /// Build a month document stamped with the current local time.
    pub fn new(persona_name: &str, month: MonthKey, calendar: BTreeMap<String, DailyPlan>) -> Self {
        let monthly_strategy = MonthlyStrategy::from_days(&calendar);
        Self {
            persona_name: persona_name.to_string(),
            month,
            generated_at: Local::now().format(GENERATED_AT_FORMAT).to_string(),
            calendar,
            monthly_strategy,
        }
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DailyPlan> {
        self.calendar.get(&date_key(date))
    }

    /// Dates covered, in order.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.calendar.keys().filter_map(|k| parse_date(k)).collect()
    }

    /// Add `days`, replacing entries with the same date, and recompute the strategy.
    pub fn merge(&mut self, days: BTreeMap<String, DailyPlan>) {
        self.calendar.extend(days);
        self.monthly_strategy = MonthlyStrategy::from_days(&self.calendar);
        self.generated_at = Local::now().format(GENERATED_AT_FORMAT).to_string();
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(topic: &str) -> DailyPlan {
        DailyPlan {
            topic_type: topic.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn month_key_parses_and_formats() {
        let key: MonthKey = "2025-03".parse().unwrap();
        assert_eq!(key.to_string(), "2025-03");
        assert_eq!(key.days_in_month(), 31);
        assert_eq!("2024-02".parse::<MonthKey>().unwrap().days_in_month(), 29);
        assert_eq!("2025-12".parse::<MonthKey>().unwrap().next().to_string(), "2026-01");
        for bad in ["2025-13", "2025-3", "25-03", "2025/03", ""] {
            assert!(bad.parse::<MonthKey>().is_err(), "{bad}");
        }
    }

    #[test]
    fn month_key_contains_only_its_dates() {
        let key: MonthKey = "2025-03".parse().unwrap();
        assert!(key.contains(NaiveDate::from_ymd_opt(2025, 3, 31).unwrap()));
        assert!(!key.contains(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()));
        assert!(!key.contains(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
    }

    #[test]
    fn content_ratio_is_recomputed_and_rounded() {
        let days: BTreeMap<String, DailyPlan> = [
            ("2025-03-01", plan("lifestyle_mundane")),
            ("2025-03-02", plan("lifestyle_mundane")),
            ("2025-03-03", plan("personal_emotion")),
            ("2025-03-04", plan("")),
            ("2025-03-05", plan("visual_showcase")),
            ("2025-03-06", plan("interaction_bait")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let strategy = MonthlyStrategy::from_days(&days);
        assert_eq!(strategy.total_days, 6);
        assert_eq!(strategy.content_ratio["lifestyle_mundane"], 33.3);
        assert_eq!(strategy.content_ratio["personal_emotion"], 16.7);
        assert_eq!(strategy.content_ratio[UNKNOWN_TOPIC], 16.7);
        let sum: f64 = strategy.content_ratio.values().sum();
        assert!((sum - 100.0).abs() <= 0.1 * strategy.content_ratio.len() as f64);
    }

    #[test]
    fn daily_plan_tolerates_null_and_object_fields() {
        let plan: DailyPlan = serde_json::from_value(json!({
            "topic_type": "lifestyle_mundane",
            "theme": null,
            "mood": 3,
            "weekday": null,
            "keywords": null,
            "special_event": {"name": "Holi", "type": "festival"},
            "strategic_flaw": {"kind": "clumsy"}
        }))
        .unwrap();
        assert_eq!(plan.topic_type, "lifestyle_mundane");
        assert_eq!(plan.theme, "");
        assert_eq!(plan.mood, "3");
        assert_eq!(plan.weekday, None);
        assert!(plan.keywords.is_empty());
        assert_eq!(plan.special_event.as_deref(), Some("Holi"));
        assert_eq!(plan.strategic_flaw.as_deref(), Some(r#"{"kind":"clumsy"}"#));
    }

    #[test]
    fn daily_plan_keeps_unknown_fields_and_accepts_keyword_string() {
        let plan: DailyPlan = serde_json::from_value(json!({
            "topic_type": "lifestyle_mundane",
            "keywords": "coffee, rain ,",
            "recommended_time": "morning",
            "hashtags": ["#mondays"]
        }))
        .unwrap();
        assert_eq!(plan.keywords, vec!["coffee", "rain"]);
        assert_eq!(plan.topic(), Some(TopicType::LifestyleMundane));
        assert_eq!(plan.time_segment(), Some(TimeSegment::Morning));
        assert_eq!(plan.extra["hashtags"], json!(["#mondays"]));

        let back = serde_json::to_value(&plan).unwrap();
        assert_eq!(back["hashtags"], json!(["#mondays"]));
        assert!(back["special_event"].is_null());
    }

    #[test]
    fn calendar_month_serializes_expected_top_level_keys() {
        let mut days = BTreeMap::new();
        days.insert("2025-03-01".to_string(), plan("lifestyle_mundane"));
        let month = CalendarMonth::new("Mia", "2025-03".parse().unwrap(), days);

        let value = serde_json::to_value(&month).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["persona_name", "month", "generated_at", "calendar", "monthly_strategy"]
        );
        assert_eq!(value["month"], "2025-03");
        assert!(
            chrono::NaiveDateTime::parse_from_str(&month.generated_at, GENERATED_AT_FORMAT)
                .is_ok()
        );

        let back: CalendarMonth = serde_json::from_value(value).unwrap();
        assert_eq!(back, month);
    }
}
