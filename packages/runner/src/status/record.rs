// packages/runner/src/status/record.rs
//! The four-line status record
//!
//! ```text
//! <current index>
//! <last index>
//! <working directory>
//! <experiment duration in seconds>
//! ```

use crate::utils::errors::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Persisted cursor over the experiment catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub current: u64,
    pub last: u64,
    pub work_dir: PathBuf,
    pub duration: Duration,
}

impl StatusRecord {
    pub fn parse(text: &str, source_name: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim);
        let mut next = |what: &str| {
            lines
                .next()
                .filter(|l| !l.is_empty())
                .ok_or_else(|| RunnerError::parse(source_name, format!("missing {}", what)))
        };

        let current = next("current index")?;
        let last = next("last index")?;
        let work_dir = next("working directory")?;
        let duration = next("duration")?;

        let number = |raw: &str, what: &str| {
            raw.parse::<u64>()
                .map_err(|_| RunnerError::parse(source_name, format!("invalid {} '{}'", what, raw)))
        };

        Ok(Self {
            current: number(current, "current index")?,
            last: number(last, "last index")?,
            work_dir: PathBuf::from(work_dir),
            duration: Duration::from_secs(number(duration, "duration")?),
        })
    }

    pub fn to_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n",
            self.current,
            self.last,
            self.work_dir.display(),
            self.duration.as_secs()
        )
    }

    /// Check `1 <= current <= last`
    pub fn validate(&self) -> Result<()> {
        validate(self.current, self.last)
    }

    /// The record for the following experiment, or `None` when this was the
    /// last one
    pub fn next(&self) -> Option<Self> {
        let current = self.current.checked_add(1)?;
        (current <= self.last).then(|| Self {
            current,
            ..self.clone()
        })
    }
}

/// Range check on a cursor; a failure means operator-level corruption
pub fn validate(current: u64, last: u64) -> Result<()> {
    if current < 1 || current > last {
        return Err(RunnerError::Range { current, last });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse() {
        let record = StatusRecord::parse("1\n2\n/srv/exp\n5\n", "status").unwrap();
        assert_eq!(record.current, 1);
        assert_eq!(record.last, 2);
        assert_eq!(record.work_dir, PathBuf::from("/srv/exp"));
        assert_eq!(record.duration, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_missing_line() {
        let err = StatusRecord::parse("1\n2\n/srv/exp\n", "status").unwrap_err();
        assert!(err.to_string().contains("missing duration"));
    }

    #[test]
    fn test_validate_range() {
        assert!(validate(1, 1).is_ok());
        assert!(matches!(validate(0, 3), Err(RunnerError::Range { .. })));
        assert!(matches!(validate(4, 3), Err(RunnerError::Range { .. })));
    }

    #[test]
    fn test_next_at_end() {
        let record = StatusRecord::parse("2\n2\n/srv/exp\n5\n", "status").unwrap();
        assert!(record.next().is_none());
    }

    #[test]
    fn test_next_at_largest_index() {
        let record = StatusRecord {
            current: u64::MAX,
            last: u64::MAX,
            work_dir: PathBuf::from("/srv/exp"),
            duration: Duration::from_secs(5),
        };
        assert!(record.next().is_none());
    }

    proptest! {
        #[test]
        fn prop_next_keeps_everything_but_current(last in 1u64..10_000, offset in 0u64..10_000, secs in 0u64..86_400) {
            let current = 1 + offset % last;
            let record = StatusRecord {
                current,
                last,
                work_dir: PathBuf::from("/srv/exp"),
                duration: Duration::from_secs(secs),
            };
            prop_assert!(record.validate().is_ok());
            match record.next() {
                Some(next) => {
                    prop_assert_eq!(next.current, current + 1);
                    prop_assert_eq!(next.last, last);
                    prop_assert_eq!(&next.work_dir, &record.work_dir);
                    prop_assert_eq!(next.duration, record.duration);
                    prop_assert_eq!(StatusRecord::parse(&next.to_text(), "prop").unwrap(), next);
                }
                None => prop_assert_eq!(current, last),
            }
        }
    }
}
