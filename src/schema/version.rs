//! TB-004: Data versions and release tags.
//!
//! A data version is `(year, month, day, seq)`; at most one roll per
//! calendar day unless bumped again on the same day. Tags have the form
//! `tabula/<meta-version>/<data-version>/<env>`.

use crate::error::{Error, Result};
use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

pub const TAG_PREFIX: &str = "tabula";

static DATA_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})\.(\d{2})\.(\d{2})\.(\d+)$").expect("valid regex"));

static META_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?\d+(\.\d+){0,2}$").expect("valid regex"));

/// Check a meta (schema/code) version string such as `v0.3`.
pub fn validate_meta_version(version: &str) -> Result<()> {
    if META_VERSION_RE.is_match(version) {
        Ok(())
    } else {
        Err(Error::setup(format!("malformed version string '{}'", version)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataVersion {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub seq: u32,
}

impl DataVersion {
    pub fn new(year: i32, month: u32, day: u32, seq: u32) -> Self {
        Self {
            year,
            month,
            day,
            seq,
        }
    }

    /// First version of a given day.
    pub fn first_of(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month(), date.day(), 1)
    }

    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    /// Roll to `(today, 1)` on a new day, otherwise increment the sequence.
    pub fn bump_on(&mut self, today: NaiveDate) {
        if self.date() == Some(today) {
            self.seq += 1;
        } else {
            *self = Self::first_of(today);
        }
    }

    pub fn bump(&mut self) {
        self.bump_on(Local::now().date_naive());
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}.{:02}.{:02}.{}",
            self.year, self.month, self.day, self.seq
        )
    }
}

impl FromStr for DataVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = DATA_VERSION_RE
            .captures(s)
            .ok_or_else(|| Error::setup(format!("malformed data version '{}'", s)))?;
        let num = |i: usize| -> Result<u32> {
            caps[i]
                .parse()
                .map_err(|_| Error::setup(format!("malformed data version '{}'", s)))
        };
        let version = Self::new(num(1)? as i32, num(2)?, num(3)?, num(4)?);
        if version.date().is_none() {
            return Err(Error::setup(format!("data version '{}' is not a valid date", s)));
        }
        Ok(version)
    }
}

/// Parsed release tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTag {
    pub meta_version: String,
    pub data_version: DataVersion,
    pub env: String,
}

impl VersionTag {
    pub fn new(meta_version: &str, data_version: DataVersion, env: &str) -> Self {
        Self {
            meta_version: meta_version.to_string(),
            data_version,
            env: env.to_string(),
        }
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            TAG_PREFIX, self.meta_version, self.data_version, self.env
        )
    }
}

impl FromStr for VersionTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [prefix, meta, data, env] if *prefix == TAG_PREFIX && !env.is_empty() => {
                validate_meta_version(meta)?;
                Ok(Self {
                    meta_version: meta.to_string(),
                    data_version: data.parse()?,
                    env: env.to_string(),
                })
            }
            _ => Err(Error::setup(format!("malformed version tag '{}'", s))),
        }
    }
}

/// Newest tag released for `env`, optionally restricted to a meta version.
/// Tags that do not parse are ignored.
pub fn latest_tag<'a>(
    tags: impl IntoIterator<Item = &'a String>,
    env: &str,
    meta_version: Option<&str>,
) -> Option<VersionTag> {
    tags.into_iter()
        .filter_map(|t| t.parse::<VersionTag>().ok())
        .filter(|t| t.env == env)
        .filter(|t| meta_version.is_none_or(|m| t.meta_version == m))
        .max_by_key(|t| t.data_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_tb004_ordering() {
        assert!(DataVersion::new(2024, 1, 1, 1) < DataVersion::new(2024, 1, 1, 2));
        assert!(DataVersion::new(2024, 1, 1, 2) < DataVersion::new(2024, 1, 2, 1));
        assert!(DataVersion::new(2023, 12, 31, 9) < DataVersion::new(2024, 1, 1, 1));
    }

    #[test]
    fn test_tb004_bump_same_day_then_new_day() {
        let today = day(2024, 3, 5);
        let mut v = DataVersion::new(2024, 3, 4, 7);
        v.bump_on(today);
        assert_eq!(v, DataVersion::new(2024, 3, 5, 1));
        v.bump_on(today);
        assert_eq!(v.seq, 2);
        v.bump_on(day(2024, 3, 6));
        assert_eq!(v, DataVersion::new(2024, 3, 6, 1));
    }

    #[test]
    fn test_tb004_display_parse() {
        let v = DataVersion::new(2024, 1, 9, 12);
        assert_eq!(v.to_string(), "2024.01.09.12");
        assert_eq!("2024.01.09.12".parse::<DataVersion>().unwrap(), v);
        assert!("2024.1.9.12".parse::<DataVersion>().is_err());
        assert!("2024.02.30.1".parse::<DataVersion>().is_err());
    }

    #[test]
    fn test_tb004_tag_roundtrip() {
        let tag = VersionTag::new("v0.3", DataVersion::new(2024, 5, 1, 2), "complete");
        assert_eq!(tag.to_string(), "tabula/v0.3/2024.05.01.2/complete");
        assert_eq!(tag.to_string().parse::<VersionTag>().unwrap(), tag);
        assert!("other/v0.3/2024.05.01.2/complete".parse::<VersionTag>().is_err());
        assert!("tabula/zero/2024.05.01.2/complete".parse::<VersionTag>().is_err());
    }

    #[test]
    fn test_tb004_latest_tag_per_env() {
        let tags: Vec<String> = vec![
            "tabula/v0.1/2024.01.01.1/complete".into(),
            "tabula/v0.1/2024.01.02.1/sample".into(),
            "tabula/v0.2/2024.01.01.3/complete".into(),
            "not-a-tag".into(),
            "tabula/v0.1/2023.12.31.9/complete".into(),
        ];
        let latest = latest_tag(&tags, "complete", None).unwrap();
        assert_eq!(latest.data_version, DataVersion::new(2024, 1, 1, 3));
        let pinned = latest_tag(&tags, "complete", Some("v0.1")).unwrap();
        assert_eq!(pinned.data_version, DataVersion::new(2024, 1, 1, 1));
        assert!(latest_tag(&tags, "prod", None).is_none());
    }

    #[test]
    fn test_tb004_meta_version() {
        assert!(validate_meta_version("v0.3").is_ok());
        assert!(validate_meta_version("1.2.3").is_ok());
        assert!(validate_meta_version("latest").is_err());
    }
}
