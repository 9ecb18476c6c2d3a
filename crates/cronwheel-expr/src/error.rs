use thiserror::Error;

/// The five cron fields, in expression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    /// Inclusive bounds for values in this field.
    pub fn bounds(self) -> (u8, u8) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 6),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        };
        write!(f, "{s}")
    }
}

/// Errors from expression parsing and occurrence search.
#[derive(Debug, Error)]
pub enum ExprError {
    /// A field token is malformed or carries an out-of-range value.
    #[error("invalid {field} field `{value}`: {reason}")]
    Expression {
        field: Field,
        value: String,
        reason: String,
    },

    /// The expression does not have exactly five fields.
    #[error("expected 5 cron fields, got {count} in `{expression}`")]
    FieldCount { expression: String, count: usize },

    /// The timezone identifier is not in the IANA database.
    #[error("unknown timezone: {0}")]
    Timezone(String),

    /// The occurrence search exhausted its horizon without a match
    /// (e.g. `0 0 31 2 *` — syntactically valid, never matches).
    #[error("no occurrence of `{expression}` within the next year")]
    NoUpcomingOccurrence { expression: String },
}

pub type Result<T> = std::result::Result<T, ExprError>;
