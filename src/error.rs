use chrono::NaiveDate;
use thiserror::Error;

/// Validation failures raised before any analytics computation runs.
#[derive(Debug, Error, PartialEq)]
pub enum AnalyticsError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("report period start {start} is after end {end}")]
    InvalidPeriod { start: NaiveDate, end: NaiveDate },
}

pub fn require_finite(name: &'static str, value: f64) -> Result<f64, AnalyticsError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AnalyticsError::InvalidParameter {
            name,
            reason: format!("expected a number, got {value}"),
        })
    }
}

pub fn require_grade(name: &'static str, value: f64) -> Result<f64, AnalyticsError> {
    let value = require_finite(name, value)?;
    if (0.0..=10.0).contains(&value) {
        Ok(value)
    } else {
        Err(AnalyticsError::InvalidParameter {
            name,
            reason: format!("grade threshold must be within [0, 10], got {value}"),
        })
    }
}

pub fn require_non_negative(name: &'static str, value: f64) -> Result<f64, AnalyticsError> {
    let value = require_finite(name, value)?;
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(AnalyticsError::InvalidParameter {
            name,
            reason: format!("must not be negative, got {value}"),
        })
    }
}
