//! Wall clocks and time-partitioned directory naming.
//!
//! Journal objects live under directories derived from the current UTC time,
//! e.g. `2026/08/01/host-a-000000.journal` for the default `%Y/%m/%d` format.
//! The clock is a trait so tests can drive the partitioning across day
//! boundaries deterministically.
use crate::error::{ErrorRepr, Result};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use std::fmt::{self, Debug, Formatter};
use std::sync::Mutex;

/// A source of the current UTC time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests.
///
/// Starts at the instant given to [`ManualClock::new`] and only moves when
/// told to with [`set`](ManualClock::set) or [`advance`](ManualClock::advance).
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    /// Create a `ManualClock` frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.0.lock().unwrap();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

impl Debug for ManualClock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ManualClock").field(&self.now()).finish()
    }
}

/// A time-partitioned directory scheme.
///
/// Parsed from a `strftime`-style pattern, optionally preceded by a
/// single-quoted literal segment:
///
/// ```rust
/// use s3_journal::time::DirectoryFormat;
///
/// let fmt = DirectoryFormat::parse("'events/'%Y/%m/%d").unwrap();
/// assert_eq!(fmt.listing_prefix(), "events/");
/// ```
///
/// The literal segment is emitted verbatim at the head of every formatted
/// directory and doubles as the prefix for multipart listings during
/// recovery, which must see every directory this journal has written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryFormat {
    prefix: String,
    pattern: String,
}

impl DirectoryFormat {
    /// Parse a directory format string.
    ///
    /// Fails when a leading quote is unterminated or the `strftime` pattern
    /// has specifiers `chrono` does not know.
    pub fn parse(format: &str) -> Result<Self> {
        let (prefix, pattern) = match format.strip_prefix('\'') {
            Some(rest) => match rest.split_once('\'') {
                Some((prefix, pattern)) => (prefix.to_string(), pattern.to_string()),
                None => {
                    return Err(ErrorRepr::DirectoryFormat(format!(
                        "unterminated literal quote in {format:?}"
                    ))
                    .into());
                }
            },
            None => (String::new(), format.to_string()),
        };
        if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
            return Err(
                ErrorRepr::DirectoryFormat(format!("unrecognized specifier in {pattern:?}")).into(),
            );
        }
        Ok(Self { prefix, pattern })
    }

    /// The directory for the instant `now`.
    pub fn directory(&self, now: DateTime<Utc>) -> String {
        format!("{}{}", self.prefix, now.format(&self.pattern))
    }

    /// The literal prefix shared by every directory this format produces.
    ///
    /// Empty unless the format carried a quoted leading segment.
    pub fn listing_prefix(&self) -> &str {
        &self.prefix
    }

    /// A copy of this format with `segment` prepended as a literal path
    /// segment, used to give each shard its own directory tree.
    pub(crate) fn prefixed(&self, segment: &str) -> Self {
        Self {
            prefix: format!("{segment}/{}", self.prefix),
            pattern: self.pattern.clone(),
        }
    }
}

impl Default for DirectoryFormat {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            pattern: "%Y/%m/%d".to_string(),
        }
    }
}
