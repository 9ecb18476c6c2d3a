//! `cronwheel-expr` — cron expression parsing and timezone-aware occurrence math.
//!
//! # Overview
//!
//! A cron expression is five whitespace-separated fields:
//!
//! | Field        | Range | Notes                 |
//! |--------------|-------|-----------------------|
//! | minute       | 0–59  |                       |
//! | hour         | 0–23  |                       |
//! | day-of-month | 1–31  |                       |
//! | month        | 1–12  |                       |
//! | day-of-week  | 0–6   | Sunday = 0            |
//!
//! Each field accepts `*`, `N`, `N,M,…`, `N-M`, `N/S`, `N-M/S` or `*/S`.
//! [`ParsedExpression::parse`] expands a field into an explicit set of
//! allowed integers; [`next_run::next_run`] walks forward one wall-clock
//! minute at a time (as observed in the target timezone) until all five
//! sets match, which makes the search correct across DST transitions.
//!
//! Validation is format-only: `0 0 31 2 *` parses fine even though no
//! February 31st exists; the occurrence search fails closed on such
//! expressions instead of hanging.

pub mod error;
pub mod next_run;
pub mod parser;
pub mod timezone;

pub use chrono_tz::Tz;
pub use error::{ExprError, Field, Result};
pub use next_run::next_run;
pub use parser::ParsedExpression;
pub use timezone::resolve_timezone;
