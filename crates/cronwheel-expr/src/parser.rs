//! Cron expression parser.
//!
//! Parses a 5-field cron string into five explicit sets of allowed
//! integers, validated against per-field bounds. Parsing is format-only:
//! calendar feasibility is never checked here.

use std::collections::BTreeSet;

use chrono_tz::Tz;

use crate::error::{ExprError, Field, Result};

/// A fully expanded cron expression bound to a timezone.
///
/// Immutable; produced fresh on every [`parse`](Self::parse) call. The
/// expression text may be shared between tasks but the resolved timezone
/// is call-context-dependent, so parses are never cached.
#[derive(Debug, Clone)]
pub struct ParsedExpression {
    pub minutes: BTreeSet<u8>,
    pub hours: BTreeSet<u8>,
    pub days_of_month: BTreeSet<u8>,
    pub months: BTreeSet<u8>,
    pub days_of_week: BTreeSet<u8>,
    /// Timezone the expression is evaluated in.
    pub timezone: Tz,
    /// Original expression text, kept for error reporting.
    pub source: String,
}

impl ParsedExpression {
    /// Parse `text` as `minute hour day-of-month month day-of-week`.
    pub fn parse(text: &str, timezone: Tz) -> Result<Self> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ExprError::FieldCount {
                expression: text.to_string(),
                count: fields.len(),
            });
        }

        Ok(Self {
            minutes: parse_field(fields[0], Field::Minute)?,
            hours: parse_field(fields[1], Field::Hour)?,
            days_of_month: parse_field(fields[2], Field::DayOfMonth)?,
            months: parse_field(fields[3], Field::Month)?,
            days_of_week: parse_field(fields[4], Field::DayOfWeek)?,
            timezone,
            source: text.to_string(),
        })
    }
}

/// Expand one field token into its set of allowed values.
///
/// Token forms, tried in order: `*`, comma list, `range/step`, `a-b`,
/// bare integer.
fn parse_field(token: &str, field: Field) -> Result<BTreeSet<u8>> {
    let (min, max) = field.bounds();

    if token == "*" {
        return Ok((min..=max).collect());
    }

    if token.contains(',') {
        let mut values = BTreeSet::new();
        for part in token.split(',') {
            values.extend(parse_field(part, field)?);
        }
        return Ok(values);
    }

    if let Some((range, step)) = token.split_once('/') {
        let step = parse_value(step, field)?;
        if step == 0 {
            return Err(ExprError::Expression {
                field,
                value: token.to_string(),
                reason: "step must be a positive integer".to_string(),
            });
        }
        // Expand the base range, then keep every step-th element by index.
        let base: Vec<u8> = if range == "*" {
            (min..=max).collect()
        } else if let Some((a, b)) = range.split_once('-') {
            expand_range(a, b, token, field)?
        } else {
            let start = parse_bounded(range, field)?;
            (start..=max).collect()
        };
        return Ok(base
            .into_iter()
            .step_by(step as usize)
            .collect());
    }

    if let Some((a, b)) = token.split_once('-') {
        return Ok(expand_range(a, b, token, field)?.into_iter().collect());
    }

    Ok(BTreeSet::from([parse_bounded(token, field)?]))
}

/// Parse `a-b` into the contiguous sequence `a..=b`, requiring `a <= b`
/// and both ends within the field's bounds.
fn expand_range(a: &str, b: &str, token: &str, field: Field) -> Result<Vec<u8>> {
    let start = parse_bounded(a, field)?;
    let end = parse_bounded(b, field)?;
    if start > end {
        return Err(ExprError::Expression {
            field,
            value: token.to_string(),
            reason: format!("range start {start} exceeds end {end}"),
        });
    }
    Ok((start..=end).collect())
}

/// Parse a bare integer and check it against the field's bounds.
fn parse_bounded(raw: &str, field: Field) -> Result<u8> {
    let value = parse_value(raw, field)?;
    let (min, max) = field.bounds();
    if value < min || value > max {
        return Err(ExprError::Expression {
            field,
            value: raw.to_string(),
            reason: format!("out of range {min}-{max}"),
        });
    }
    Ok(value)
}

/// Parse a bare integer without bounds checking (steps use this too).
fn parse_value(raw: &str, field: Field) -> Result<u8> {
    raw.parse::<u8>().map_err(|_| ExprError::Expression {
        field,
        value: raw.to_string(),
        reason: "not an integer".to_string(),
    })
}
