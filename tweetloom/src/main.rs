//! tweetloom - persona content calendar planner
//!
//! Generates, stores and inspects monthly tweet calendars for character personas.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tweetloom_core::calendar::{
    build_generation_prompt, parse_date, CalendarManager, CalendarStore, HolidayCalendar,
    MonthKey, PlanOptions,
};
use tweetloom_core::llm::{CompletionParams, HttpLlmClient, RetryingClient};
use tweetloom_core::retry::RetryPolicy;
use tweetloom_core::{extract, Config, KeyPath, PersonaRecord};

#[derive(Parser)]
#[command(name = "tweetloom")]
#[command(about = "Plan monthly tweet calendars for character personas")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract a JSON object from LLM-style text (file or stdin)
    Extract {
        /// Input file; reads stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Dotted key path that must be present (repeatable)
        #[arg(short, long = "require")]
        require: Vec<String>,
    },

    /// Get the day plan for a persona, generating the month if needed
    Plan {
        /// Persona JSON file
        #[arg(short, long)]
        persona: PathBuf,

        /// Days after today
        #[arg(short, long, default_value_t = 0)]
        offset: u32,

        /// Days to generate per request (defaults to config)
        #[arg(short, long)]
        days: Option<u32>,

        /// Plan this many consecutive days starting at the offset
        #[arg(short, long, default_value_t = 1)]
        window: u32,

        /// Regenerate the month even if a calendar exists
        #[arg(long)]
        force: bool,

        /// File whose contents replace the generated prompt
        #[arg(long)]
        prompt_override: Option<PathBuf>,
    },

    /// Print a stored month calendar
    Show {
        /// Persona name
        #[arg(short, long)]
        persona: String,

        /// Month as YYYY-MM
        #[arg(short, long)]
        month: MonthKey,
    },

    /// List stored months for a persona
    Months {
        /// Persona name
        #[arg(short, long)]
        persona: String,
    },

    /// Print the generation prompt without calling the LLM
    Prompt {
        /// Persona JSON file
        #[arg(short, long)]
        persona: PathBuf,

        /// Month as YYYY-MM
        #[arg(short, long)]
        month: MonthKey,

        /// Days to cover (defaults to config)
        #[arg(short, long)]
        days: Option<u32>,

        /// First day as YYYY-MM-DD
        #[arg(short, long, value_parser = parse_start)]
        start: Option<NaiveDate>,
    },

    /// Summarize a persona file and report missing fields
    Persona {
        /// Persona JSON file
        #[arg(short, long)]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        tweetloom_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Extract { file, require } => run_extract(file.as_deref(), &require),
        Command::Plan {
            persona,
            offset,
            days,
            window,
            force,
            prompt_override,
        } => {
            let prompt_override = match prompt_override {
                Some(path) => Some(
                    fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => None,
            };
            let options = PlanOptions {
                days_to_generate: days.unwrap_or(config.calendar.days_to_generate),
                force_regenerate: force,
                prompt_override,
            };
            run_plan(&config, &persona, offset, window, &options)
        }
        Command::Show { persona, month } => run_show(&config, &persona, month),
        Command::Months { persona } => run_months(&config, &persona),
        Command::Prompt {
            persona,
            month,
            days,
            start,
        } => {
            let record = load_persona(&persona)?;
            let holidays = HolidayCalendar::builtin(config.calendar.fallback_country.as_str());
            let days = days.unwrap_or(config.calendar.days_to_generate);
            print!(
                "{}",
                build_generation_prompt(&record, month, days, start, &holidays)
            );
            Ok(())
        }
        Command::Persona { file } => run_persona(&file),
    }
}

fn parse_start(s: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(s).ok_or_else(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn load_persona(path: &Path) -> Result<PersonaRecord> {
    PersonaRecord::load(path).with_context(|| format!("failed to load persona {}", path.display()))
}

fn run_extract(file: Option<&Path>, require: &[String]) -> Result<()> {
    let raw = match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let required = KeyPath::list(require);
    let document = extract(&raw, &required).context("no JSON object could be extracted")?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn run_plan(
    config: &Config,
    persona_path: &Path,
    offset: u32,
    window: u32,
    options: &PlanOptions,
) -> Result<()> {
    let persona = load_persona(persona_path)?;
    if !persona.is_complete() {
        tracing::warn!(
            persona = persona.name(),
            missing = ?persona.missing_fields(),
            "Persona is missing fields"
        );
    }

    let http = HttpLlmClient::new(&config.llm).context("failed to create LLM client")?;
    let llm = RetryingClient::new(http, RetryPolicy::from(&config.retry));
    let manager = CalendarManager::new(
        CalendarStore::from_config(&config.calendar),
        llm,
        HolidayCalendar::builtin(config.calendar.fallback_country.as_str()),
        CompletionParams::from(&config.llm),
    );

    tracing::info!(
        persona = persona.name(),
        offset,
        window,
        "Planning calendar"
    );

    let outcomes = if window <= 1 {
        vec![manager
            .plan_for(&persona, offset, options)
            .context("failed to plan day")?]
    } else {
        manager
            .plan_window(&persona, offset, window, options)
            .context("failed to plan window")?
    };

    for outcome in outcomes {
        println!("{} [{}]", outcome.date.format("%Y-%m-%d"), outcome.status);
        if outcome.batch_mode {
            let ahead = (outcome.date - chrono::Local::now().date_naive()).num_days();
            println!("Batch mode: planning {ahead} days ahead");
        }
        println!("{}", serde_json::to_string_pretty(&outcome.plan)?);
    }
    Ok(())
}

fn run_show(config: &Config, persona: &str, month: MonthKey) -> Result<()> {
    let store = CalendarStore::from_config(&config.calendar);
    let document = store
        .load(persona, month)
        .with_context(|| format!("failed to load calendar for {persona} {month}"))?;

    match document {
        Some(document) => {
            println!("{}", document.to_pretty_json()?);
            Ok(())
        }
        None => anyhow::bail!(
            "No calendar stored for '{}' {} (looked in {})",
            persona,
            month,
            store.dir().display()
        ),
    }
}

fn run_months(config: &Config, persona: &str) -> Result<()> {
    let store = CalendarStore::from_config(&config.calendar);
    let months = store
        .list_months(persona)
        .with_context(|| format!("failed to list calendars for {persona}"))?;

    if months.is_empty() {
        println!("No calendars stored for '{}'.", persona);
        return Ok(());
    }
    for month in months {
        println!("{month}");
    }
    Ok(())
}

fn run_persona(path: &Path) -> Result<()> {
    let persona = load_persona(path)?;
    println!("{}", persona.summary());
    println!();

    let missing = persona.missing_fields();
    if missing.is_empty() {
        println!("Complete: all required fields present");
    } else {
        println!("Missing fields: {}", missing.join(", "));
    }

    let examples = persona.tweet_examples();
    println!("Tweet examples: {}", examples.len());
    for (i, example) in examples.iter().enumerate() {
        if let Some(warning) = example.scene_hint_warning() {
            println!("  #{}: {}", i + 1, warning);
        }
    }
    Ok(())
}
