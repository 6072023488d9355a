#![forbid(unsafe_code)]

//! Timezone catalog offered to users, and offset parsing.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::ComposeError;

/// A selectable timezone: display name plus `±HH:MM` offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timezone {
    pub name: String,
    pub value: String,
}

impl Timezone {
    #[must_use]
    pub fn utc() -> Self {
        Self {
            name: "Coordinated Universal Time (UTC)".to_string(),
            value: "+00:00".to_string(),
        }
    }

    pub fn offset(&self) -> Result<FixedOffset, ComposeError> {
        parse_offset(&self.value)
    }
}

const OFFSETS: [&str; 40] = [
    "-12:00", "-11:00", "-10:00", "-09:30", "-09:00", "-08:00", "-07:00", "-06:00", "-05:00",
    "-04:30", "-04:00", "-03:30", "-03:00", "-02:00", "-01:00", "+00:00", "+01:00", "+02:00",
    "+03:00", "+03:30", "+04:00", "+04:30", "+05:00", "+05:30", "+05:45", "+06:00", "+06:30",
    "+07:00", "+08:00", "+08:30", "+08:45", "+09:00", "+09:30", "+10:00", "+10:30", "+11:00",
    "+12:00", "+12:45", "+13:00", "+14:00",
];

/// Every timezone the composer offers, west to east.
#[must_use]
pub fn available_timezones() -> Vec<Timezone> {
    OFFSETS
        .iter()
        .map(|value| {
            if *value == "+00:00" {
                Timezone::utc()
            } else {
                Timezone {
                    name: format!("UTC {value}"),
                    value: (*value).to_string(),
                }
            }
        })
        .collect()
}

/// Parse a `±HH:MM` offset.
pub fn parse_offset(value: &str) -> Result<FixedOffset, ComposeError> {
    let invalid = || ComposeError::InvalidOffset(value.to_string());
    let trimmed = value.trim();

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let two_digits = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
    if !two_digits(hours) || !two_digits(minutes) {
        return Err(invalid());
    }
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
