//! Monthly content calendars: types, prompt, response parsing, storage and
//! the generate-if-absent manager.

pub mod holidays;
pub mod manager;
pub mod parse;
pub mod prompt;
pub mod store;
pub mod types;

pub use holidays::{is_country_code, BuiltinHolidays, HolidayCalendar, HolidayProvider};
pub use manager::{CalendarManager, PlanOptions, PlanOutcome, PlanStatus};
pub use parse::{parse_generation_response, ParsedCalendar};
pub use prompt::{build_generation_prompt, GenerationWindow, PLANNER_SYSTEM_PROMPT};
pub use store::{CalendarStore, StoreOptions};
pub use types::{
    date_key, parse_date, CalendarMonth, DailyPlan, MonthKey, MonthlyStrategy, TimeSegment,
    TopicType,
};
