//! Validated scalar types used in configuration records.
//!
//! Each type enforces its invariant at construction, so a config that
//! holds one of these values is valid by construction.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An integer strictly greater than zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PositiveInteger(u64);

impl PositiveInteger {
    pub fn new(value: u64) -> Result<Self, Error> {
        if value == 0 {
            return Err(Error::input("value must be a positive integer"));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for PositiveInteger {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Error> {
        Self::new(value)
    }
}

impl From<PositiveInteger> for u64 {
    fn from(value: PositiveInteger) -> Self {
        value.0
    }
}

impl FromStr for PositiveInteger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let value: u64 = s
            .trim()
            .parse()
            .map_err(|_| Error::input(format!("'{s}' is not a positive integer")))?;
        Self::new(value)
    }
}

impl fmt::Display for PositiveInteger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An integer percentage in 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Percentage(u64);

impl Percentage {
    pub fn new(value: u64) -> Result<Self, Error> {
        if value > 100 {
            return Err(Error::input(format!("percentage {value} is out of 0..=100")));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Percentage {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Error> {
        Self::new(value)
    }
}

impl From<Percentage> for u64 {
    fn from(value: Percentage) -> Self {
        value.0
    }
}

impl FromStr for Percentage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let value: u64 = s
            .trim()
            .parse()
            .map_err(|_| Error::input(format!("'{s}' is not a valid percentage")))?;
        Self::new(value)
    }
}

/// A memory quantity literal: digits, optional fraction, and a k/M/G
/// suffix in either case, e.g. `"20G"`, `"1024m"`, `"2.5g"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemoryStr(String);

impl MemoryStr {
    pub fn new(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();
        let ok = match value.char_indices().last() {
            Some((idx, suffix)) if "kKmMgG".contains(suffix) => {
                let number = &value[..idx];
                !number.is_empty() && number.parse::<f64>().is_ok()
            }
            _ => false,
        };
        if !ok {
            return Err(Error::input(format!(
                "'{value}' is not a valid memory quantity (expected e.g. 20G, 900m)"
            )));
        }
        Ok(Self(value))
    }

    /// The quantity converted to gigabytes.
    #[must_use]
    pub fn as_gb(&self) -> f64 {
        let (number, suffix) = self.0.split_at(self.0.len() - 1);
        // The constructor guarantees a parsable number and a known suffix
        let value: f64 = number.parse().unwrap_or(0.0);
        match suffix {
            "k" | "K" => value / (1024.0 * 1024.0),
            "m" | "M" => value / 1024.0,
            _ => value,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MemoryStr {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        Self::new(value)
    }
}

impl From<MemoryStr> for String {
    fn from(value: MemoryStr) -> Self {
        value.0
    }
}

impl FromStr for MemoryStr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Self::new(s.trim())
    }
}

impl fmt::Display for MemoryStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses the boolean spellings accepted in config files:
/// yes/no, true/false, 1/0, y/n, case-insensitive.
pub fn bool_from_str(s: &str) -> Result<bool, Error> {
    match s.trim().to_lowercase().as_str() {
        "yes" | "true" | "1" | "y" => Ok(true),
        "no" | "false" | "0" | "n" => Ok(false),
        other => Err(Error::input(format!("'{other}' is not a valid boolean"))),
    }
}
