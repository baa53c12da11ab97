//! Generate-if-absent orchestration over the store and the LLM.

use std::collections::HashSet;
use std::fmt;

use chrono::{Duration, Local, NaiveDate};

use super::holidays::HolidayCalendar;
use super::parse::parse_generation_response;
use super::prompt::{build_generation_prompt, GenerationWindow, PLANNER_SYSTEM_PROMPT};
use super::store::CalendarStore;
use super::types::{date_key, CalendarMonth, DailyPlan, MonthKey};
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionParams, LlmClient};
use crate::persona::PersonaRecord;

/// Per-request knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    pub days_to_generate: u32,
    /// Regenerate the month even if a document exists
    pub force_regenerate: bool,
    /// Used verbatim instead of the built prompt
    pub prompt_override: Option<String>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            days_to_generate: 15,
            force_regenerate: false,
            prompt_override: None,
        }
    }
}

impl PlanOptions {
    fn prompt_override(&self) -> Option<&str> {
        self.prompt_override
            .as_deref()
            .filter(|p| !p.trim().is_empty())
    }
}

/// What happened to the month document while answering a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStatus {
    /// An existing document answered the request
    Existing { month: MonthKey },
    /// A new document was generated and saved, replacing any previous one
    Generated { month: MonthKey, days: usize },
    /// Days starting at `from` were generated and merged into the document
    Extended {
        month: MonthKey,
        from: NaiveDate,
        days: usize,
    },
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStatus::Existing { month } => write!(f, "using existing calendar for {month}"),
            PlanStatus::Generated { month, days } => {
                write!(f, "generated {month} calendar ({days} days)")
            }
            PlanStatus::Extended { month, from, days } => write!(
                f,
                "extended {month} calendar from {} ({days} new days)",
                date_key(*from)
            ),
        }
    }
}

/// Answer to a day-plan request.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub date: NaiveDate,
    pub plan: DailyPlan,
    pub status: PlanStatus,
    /// Prompt sent to the model, when one was sent
    pub prompt: Option<String>,
    /// The date is in the future (`day_offset > 0`)
    pub batch_mode: bool,
}

/// Calendar generation and lookup for personas.
pub struct CalendarManager<C> {
    store: CalendarStore,
    llm: C,
    holidays: HolidayCalendar,
    params: CompletionParams,
}

impl<C: LlmClient> CalendarManager<C> {
    pub fn new(
        store: CalendarStore,
        llm: C,
        holidays: HolidayCalendar,
        params: CompletionParams,
    ) -> Self {
        Self {
            store,
            llm,
            holidays,
            params,
        }
    }

    pub fn store(&self) -> &CalendarStore {
        &self.store
    }

    /// Plan for today plus `day_offset` days.
    pub fn plan_for(
        &self,
        persona: &PersonaRecord,
        day_offset: u32,
        options: &PlanOptions,
    ) -> Result<PlanOutcome> {
        self.plan_at(persona, Local::now().date_naive(), day_offset, options)
    }

    /// [`CalendarManager::plan_for`] with an explicit "today".
    pub fn plan_at(
        &self,
        persona: &PersonaRecord,
        today: NaiveDate,
        day_offset: u32,
        options: &PlanOptions,
    ) -> Result<PlanOutcome> {
        let date = offset_date(today, day_offset)?;
        let mut outcome = self.plan_on(persona, date, options)?;
        outcome.batch_mode = day_offset > 0;
        Ok(outcome)
    }

    /// Plans for `days` consecutive days starting at today plus `start_offset`.
    ///
    /// Each month the window enters is ensured first; `force_regenerate`
    /// applies once per month, not once per day.
    pub fn plan_window(
        &self,
        persona: &PersonaRecord,
        start_offset: u32,
        days: u32,
        options: &PlanOptions,
    ) -> Result<Vec<PlanOutcome>> {
        self.plan_window_at(persona, Local::now().date_naive(), start_offset, days, options)
    }

    /// [`CalendarManager::plan_window`] with an explicit "today".
    pub fn plan_window_at(
        &self,
        persona: &PersonaRecord,
        today: NaiveDate,
        start_offset: u32,
        days: u32,
        options: &PlanOptions,
    ) -> Result<Vec<PlanOutcome>> {
        let follow_up = PlanOptions {
            force_regenerate: false,
            ..options.clone()
        };
        let mut seen = HashSet::new();
        let mut outcomes = Vec::with_capacity(days.min(366) as usize);

        for i in 0..days {
            let offset = start_offset.checked_add(i).ok_or_else(|| {
                Error::Calendar(format!("day offset {start_offset} + {i} is out of range"))
            })?;
            let date = offset_date(today, offset)?;
            let month = MonthKey::of(date);

            let mut ensured = None;
            if seen.insert(month) {
                ensured = Some(self.ensure_month(persona, month, Some(date), options)?);
            }

            let mut outcome = self.plan_on(persona, date, &follow_up)?;
            if let Some((status @ PlanStatus::Generated { .. }, prompt)) = ensured {
                if matches!(outcome.status, PlanStatus::Existing { .. }) {
                    outcome.status = status;
                    outcome.prompt = prompt;
                }
            }
            outcome.batch_mode = offset > 0;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Generate `month` unless it already exists (or `force_regenerate` is set).
    ///
    /// `needed` is the first date the caller needs; generation starts there if
    /// a window from the 1st would not reach it.
    pub fn ensure_month(
        &self,
        persona: &PersonaRecord,
        month: MonthKey,
        needed: Option<NaiveDate>,
        options: &PlanOptions,
    ) -> Result<(PlanStatus, Option<String>)> {
        let name = persona.name();
        if !options.force_regenerate && self.store.exists(name, month) {
            return Ok((PlanStatus::Existing { month }, None));
        }

        let start = needed.filter(|date| {
            !GenerationWindow::new(month, options.days_to_generate, None).contains(*date)
        });
        let (document, prompt) = self.generate(persona, month, start, options)?;
        let days = document.calendar.len();
        self.save(name, month, &document)?;
        Ok((PlanStatus::Generated { month, days }, Some(prompt)))
    }

    fn plan_on(
        &self,
        persona: &PersonaRecord,
        date: NaiveDate,
        options: &PlanOptions,
    ) -> Result<PlanOutcome> {
        let name = persona.name();
        let month = MonthKey::of(date);

        let (mut status, mut prompt) = self.ensure_month(persona, month, Some(date), options)?;
        let generated_for_date = matches!(status, PlanStatus::Generated { .. });

        let mut plan = self.store.get_day_plan(name, date)?;
        if plan.is_none() && !generated_for_date {
            tracing::info!(
                persona = name,
                date = %date_key(date),
                "Day missing from existing calendar, extending from it"
            );
            let (added, used) = self.extend(persona, month, date, options)?;
            status = PlanStatus::Extended {
                month,
                from: date,
                days: added,
            };
            prompt = Some(used);
            plan = self.store.get_day_plan(name, date)?;
        }

        let plan = plan.ok_or_else(|| {
            Error::Calendar(format!(
                "no plan for {} after generating {month} for {name}",
                date_key(date)
            ))
        })?;

        Ok(PlanOutcome {
            date,
            plan,
            status,
            prompt,
            batch_mode: false,
        })
    }

    /// Generate from `from` onwards and merge into the stored month.
    fn extend(
        &self,
        persona: &PersonaRecord,
        month: MonthKey,
        from: NaiveDate,
        options: &PlanOptions,
    ) -> Result<(usize, String)> {
        let name = persona.name();
        let (fresh, prompt) = self.generate(persona, month, Some(from), options)?;
        let added = fresh.calendar.len();

        self.store
            .update(name, month, |stored| match stored {
                Some(mut existing) => {
                    existing.merge(fresh.calendar);
                    existing
                }
                None => fresh,
            })
            .map_err(|e| {
                Error::Calendar(format!("failed to save calendar for {name} {month}: {e}"))
            })?;
        Ok((added, prompt))
    }

    /// One LLM round trip for `month`, parsed but not saved.
    fn generate(
        &self,
        persona: &PersonaRecord,
        month: MonthKey,
        start: Option<NaiveDate>,
        options: &PlanOptions,
    ) -> Result<(CalendarMonth, String)> {
        let name = persona.name();
        let prompt = match options.prompt_override() {
            Some(custom) => custom.to_string(),
            None => build_generation_prompt(
                persona,
                month,
                options.days_to_generate,
                start,
                &self.holidays,
            ),
        };

        tracing::info!(
            persona = name,
            month = %month,
            start = ?start.map(date_key),
            days = options.days_to_generate,
            "Generating calendar"
        );

        let messages = [
            ChatMessage::system(PLANNER_SYSTEM_PROMPT),
            ChatMessage::user(prompt.clone()),
        ];
        let response = self.llm.complete(&messages, &self.params)?;

        let parsed = parse_generation_response(&response, name, month)?;
        if parsed.repaired {
            tracing::warn!(
                persona = name,
                month = %month,
                days = parsed.month.calendar.len(),
                "Calendar response was truncated; saved only the complete days"
            );
        }
        Ok((parsed.month, prompt))
    }

    fn save(&self, name: &str, month: MonthKey, document: &CalendarMonth) -> Result<()> {
        if self.store.save(name, month, document) {
            Ok(())
        } else {
            Err(Error::Calendar(format!(
                "failed to save calendar for {name} {month}"
            )))
        }
    }
}

fn offset_date(today: NaiveDate, offset: u32) -> Result<NaiveDate> {
    today
        .checked_add_signed(Duration::days(i64::from(offset)))
        .ok_or_else(|| {
            Error::Calendar(format!(
                "date {} + {offset} days is out of range",
                date_key(today)
            ))
        })
}
