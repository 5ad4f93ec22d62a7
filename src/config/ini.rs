//! Minimal INI reader for the `[cloud-provider]`/`[blast]`/`[cluster]`
//! configuration file format.
//!
//! Supports `key = value` lines grouped under `[section]` headers, `#` and
//! `;` comments, and blank lines. Nothing more is needed for the config
//! files this tool consumes.

use crate::error::Error;
use std::collections::BTreeMap;

/// Parsed INI content: section name → (key → value).
#[derive(Debug, Default)]
pub struct Ini {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Ini {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::input(format!(
                    "config file line {}: expected 'key = value', got '{line}'",
                    lineno + 1
                )));
            };
            let Some(section) = current.as_ref() else {
                return Err(Error::input(format!(
                    "config file line {}: key '{}' appears before any [section]",
                    lineno + 1,
                    key.trim()
                )));
            };
            sections
                .get_mut(section)
                .expect("section inserted when header was seen")
                .insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self { sections })
    }

    /// Value for `key` in `section`, if present.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    #[must_use]
    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }
}
