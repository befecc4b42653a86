//! The "only files newer than X" boundary applied to every listing.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::RemoteEntry;

/// Camera file names look like `PA290946.JPG`: prefix, month (1-9, A-C),
/// day of month, then a four digit shot counter.
static CAMERA_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[P_]([1-9A-C])(\d{2})(\d{4})\.[A-Z0-9]+$")
        .expect("camera filename pattern is valid")
});

const TIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Sort key recovered from a camera file name.
///
/// Field order matters: keys compare by month, then day, then shot counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaptureKey {
    pub month: u8,
    pub day: u8,
    pub sequence: u16,
}

impl CaptureKey {
    pub fn new(month: u8, day: u8, sequence: u16) -> Self {
        Self {
            month,
            day,
            sequence,
        }
    }

    pub fn from_filename(name: &str) -> Option<Self> {
        let caps = CAMERA_FILENAME.captures(name)?;
        let month = u8::from_str_radix(caps.get(1)?.as_str(), 16).ok()?;
        let day: u8 = caps.get(2)?.as_str().parse().ok()?;
        let sequence: u16 = caps.get(3)?.as_str().parse().ok()?;

        if !(1..=31).contains(&day) {
            return None;
        }

        Some(Self::new(month, day, sequence))
    }
}

/// How the cursor value is compared against listed entries.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    /// Compare the key derived from the file name
    #[default]
    Name,
    /// Compare the capture time reported by the camera
    Time,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("'{0}' is not a camera file name (expected something like PA290946.JPG)")]
    InvalidFilename(String),
    #[error("'{0}' is not a timestamp (expected YYYY-MM-DDTHH:MM:SS)")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorBound {
    Name(CaptureKey),
    Time(NaiveDateTime),
}

/// Filter boundary set once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncCursor {
    /// Sync everything the camera lists
    #[default]
    All,
    /// Sync only entries strictly after the bound
    After(CursorBound),
}

impl SyncCursor {
    pub fn parse(value: Option<&str>, mode: CursorMode) -> Result<Self, CursorError> {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(Self::All);
        };

        let bound = match mode {
            CursorMode::Name => CaptureKey::from_filename(value)
                .map(CursorBound::Name)
                .ok_or_else(|| CursorError::InvalidFilename(value.to_string()))?,
            CursorMode::Time => TIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(CursorBound::Time)
                .ok_or_else(|| CursorError::InvalidTimestamp(value.to_string()))?,
        };

        Ok(Self::After(bound))
    }

    /// Entries the cursor cannot compare (no key, no capture time) are rejected.
    pub fn accepts(&self, entry: &RemoteEntry) -> bool {
        match self {
            Self::All => true,
            Self::After(CursorBound::Name(bound)) => {
                entry.capture_key().is_some_and(|key| key > *bound)
            }
            Self::After(CursorBound::Time(bound)) => {
                entry.captured_at.is_some_and(|at| at > *bound)
            }
        }
    }

    /// Apply the cursor and materialize the result, keeping listing order.
    pub fn filter<I>(&self, entries: I) -> Vec<RemoteEntry>
    where
        I: IntoIterator<Item = RemoteEntry>,
    {
        entries.into_iter().filter(|e| self.accepts(e)).collect()
    }
}
