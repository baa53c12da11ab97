//! # tweetloom-core
//!
//! Core library for tweetloom - monthly tweet calendars for character personas.
//!
//! This library provides:
//! - Tolerant JSON extraction from LLM output
//! - Per-persona, per-month calendar documents guarded by advisory file locks
//! - An OpenAI-compatible chat client with retry and backoff
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use tweetloom_core::calendar::CalendarStore;
//! use tweetloom_core::Config;
//!
//! let config = Config::load().expect("failed to load config");
//! let store = CalendarStore::from_config(&config.calendar);
//!
//! let months = store.list_months("Mia").expect("failed to list calendars");
//! println!("{months:?}");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use extract::{extract, KeyPath};
pub use persona::PersonaRecord;

// Public modules
pub mod calendar;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod lock;
pub mod logging;
pub mod persona;
pub mod retry;
