//! Calendar generation prompt.

use std::fmt::Write as _;

use chrono::{Datelike, NaiveDate};

use super::holidays::HolidayCalendar;
use super::types::{date_key, MonthKey, TimeSegment, TopicType};
use crate::persona::PersonaRecord;

/// System message sent with every calendar generation request.
pub const PLANNER_SYSTEM_PROMPT: &str = "You are a professional social media operations expert who plans content calendars.

Requirements:
1. Output must be valid JSON
2. All strings must use ASCII double quotes \", never typographic quotes
3. Every field must be present
4. Output one complete JSON object, never truncated
5. Do not add any text before or after the JSON";

const STRATEGIC_FLAWS: [(&str, &str); 4] = [
    ("sleep_deprived", "insomnia/tired"),
    ("clumsy", "clumsy/spilling things"),
    ("tech_inept", "tech malfunction/WiFi down"),
    ("forgetful", "forgetful"),
];

/// Inclusive range of dates a request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationWindow {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl GenerationWindow {
    /// Up to `days` days from `start` (or the 1st), clipped to the end of `month`.
    ///
    /// A `start` outside `month` is ignored.
    pub fn new(month: MonthKey, days: u32, start: Option<NaiveDate>) -> Self {
        let start_day = start
            .filter(|d| month.contains(*d))
            .map(|d| d.day())
            .unwrap_or(1);
        let remaining = month.days_in_month() - start_day + 1;
        let count = days.clamp(1, remaining);
        let first = month.day(start_day).unwrap_or_else(|| month.first_day());
        let last = month
            .day(start_day + count - 1)
            .unwrap_or_else(|| month.last_day());
        Self { first, last }
    }

    pub fn len(&self) -> u32 {
        (self.last - self.first).num_days() as u32 + 1
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.first && date <= self.last
    }
}

/// Build the instruction asking the model for a day-keyed content plan.
///
/// Pure: the only inputs are the persona, the window and the holiday table.
pub fn build_generation_prompt(
    persona: &PersonaRecord,
    month: MonthKey,
    days_to_generate: u32,
    start: Option<NaiveDate>,
    holidays: &HolidayCalendar,
) -> String {
    let window = GenerationWindow::new(month, days_to_generate, start);
    let name = persona.name();
    let country = persona.country_code();

    let special_dates: Vec<String> = holidays
        .between(&country, window.first, window.last)
        .into_iter()
        .map(|(date, holiday)| format!("{}: {holiday}", date_key(date)))
        .collect();
    let special_dates = if special_dates.is_empty() {
        "No special holidays".to_string()
    } else {
        special_dates.join("\n")
    };

    let mut distribution = String::new();
    for topic in TopicType::ALL {
        let _ = writeln!(
            distribution,
            "   - {}% {} ({})",
            topic.target_percent(),
            topic,
            topic.description()
        );
    }

    let mut slots = String::new();
    for segment in TimeSegment::ALL {
        let _ = writeln!(
            slots,
            "   - {} ({}): suitable for {}",
            segment,
            segment.window(),
            segment.suited_for()
        );
    }

    let mut flaws = String::new();
    for (flaw, meaning) in STRATEGIC_FLAWS {
        let _ = writeln!(flaws, "    - {flaw} ({meaning})");
    }

    let topics = TopicType::ALL.map(|t| t.as_str()).join("/");
    let segments = TimeSegment::ALL.map(|s| s.as_str()).join("/");
    let flaw_names = STRATEGIC_FLAWS.map(|(f, _)| f).join("/");
    let first = date_key(window.first);
    let last = date_key(window.last);

    format!(
        r#"You are a professional social media operations expert planning {name}'s tweet calendar for {month_display}.

Persona Information:
- Name: {name}
- Description: {description}
- Personality: {personality}

Operation Goals:
- Diversified content that matches persona
- Maintain authenticity and consistency
- Encourage fan engagement

Special dates in this period:
{special_dates}

Requirements:
1. Plan {days} days from {first} to {last}
2. Design weekly rhythm (Monday to Sunday content types) based on persona traits
3. Special themes for special dates (holidays, anniversaries)
4. Diversify content types, avoid 3 consecutive days of same type
5. suggested_scene should be described in natural English paragraphs, concise and clear
6. suggested_scene must be a solo scene: only this character's own activities, no other people

7. Content type distribution:
{distribution}
8. Recommended posting time slot for each day:
{slots}
9. Strategic flaw assignment (optional): assign one to 2-3 days per week:
{flaws}
10. ALL text fields (theme, content_direction, keywords, suggested_scene) MUST be in English.

Output format (strict JSON object keyed by date, no other text):
{{
  "{first}": {{
    "weekday": "{weekday}",
    "topic_type": "lifestyle_mundane",
    "tweet_format": "standard",
    "recommended_time": "morning",
    "mood": "energetic",
    "theme": "Morning routine",
    "content_direction": "Share morning routine, light and cheerful",
    "keywords": ["morning", "routine", "sunshine"],
    "suggested_scene": "morning routine, sunlight, energetic mood...",
    "special_event": null,
    "strategic_flaw": null
  }},
  "{last}": {{ ... }}
}}

Field rules:
- topic_type: one of {topics}
- tweet_format: standard/thread/poll/grwm
- recommended_time: one of {segments}
- strategic_flaw: null or one of {flaw_names}
- special_event: null or the holiday/event name

Important reminders:
- Content distribution should follow the 50%/20%/20%/8%/2% ratio
- recommended_time should match the content type (e.g. late_night suits emotional content)
- Keep style consistent with the persona's language habits and behavior

Output the JSON directly, without ```json markers or explanations.
"#,
        month_display = format!("{:02}/{}", month.month(), month.year()),
        description = persona.description(),
        personality = persona.personality(),
        days = window.len(),
        weekday = window.first.format("%A"),
    )
}
