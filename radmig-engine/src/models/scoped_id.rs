//! Station-scoped source identifiers
//!
//! A source system hosting several stations may reuse raw IDs across them, so every
//! newly recorded import source ID is `{source_station}::{raw}`. IDs recorded before
//! scoping existed are bare `raw` values; those are only ever used as a lookup
//! fallback and are never produced.

use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopedSourceId {
    pub station: Option<String>,
    pub raw: String,
}

impl ScopedSourceId {
    pub fn new(station: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            station: Some(station.into()),
            raw: raw.into(),
        }
    }

    /// Identifier without a station component
    pub fn unscoped(raw: impl Into<String>) -> Self {
        Self {
            station: None,
            raw: raw.into(),
        }
    }

    /// Parse either `station::raw` or a bare `raw`
    pub fn parse(s: &str) -> Self {
        match s.split_once(SEPARATOR) {
            Some((station, raw)) if !station.is_empty() && !raw.is_empty() => {
                Self::new(station, raw)
            }
            _ => Self::unscoped(s),
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.station.is_some()
    }

    /// Bare raw form of a scoped identifier, for lookups of rows recorded before
    /// scoping existed
    pub fn legacy_fallback(&self) -> Option<&str> {
        self.station.as_ref().map(|_| self.raw.as_str())
    }

    /// Candidate values for an idempotency lookup: the scoped form, then the legacy
    /// bare form when this identifier is scoped
    pub fn lookup_candidates(&self) -> Vec<String> {
        let mut candidates = vec![self.to_string()];
        if let Some(raw) = self.legacy_fallback() {
            candidates.push(raw.to_string());
        }
        candidates
    }

    /// Station filter rule: unscoped items always pass, scoped items pass when their
    /// station is in the filter
    pub fn passes_station_filter<S: AsRef<str>>(&self, stations: &[S]) -> bool {
        match &self.station {
            None => true,
            Some(station) => stations.iter().any(|s| s.as_ref() == station),
        }
    }
}

impl fmt::Display for ScopedSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.station {
            Some(station) => write!(f, "{}{}{}", station, SEPARATOR, self.raw),
            None => f.write_str(&self.raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scoped_and_legacy() {
        let scoped = ScopedSourceId::parse("2::m7");
        assert_eq!(scoped.station.as_deref(), Some("2"));
        assert_eq!(scoped.raw, "m7");
        assert_eq!(scoped.to_string(), "2::m7");

        let legacy = ScopedSourceId::parse("m7");
        assert!(!legacy.is_scoped());
        assert_eq!(legacy.to_string(), "m7");

        // Degenerate separators are treated as opaque raw IDs
        assert!(!ScopedSourceId::parse("::m7").is_scoped());
        assert!(!ScopedSourceId::parse("2::").is_scoped());
    }

    #[test]
    fn test_lookup_candidates() {
        assert_eq!(
            ScopedSourceId::new("1", "42").lookup_candidates(),
            vec!["1::42".to_string(), "42".to_string()]
        );
        assert_eq!(
            ScopedSourceId::unscoped("42").lookup_candidates(),
            vec!["42".to_string()]
        );
    }

    #[test]
    fn test_station_filter() {
        let filter = ["2"];
        assert!(ScopedSourceId::parse("m3").passes_station_filter(&filter));
        assert!(!ScopedSourceId::parse("1::m1").passes_station_filter(&filter));
        assert!(ScopedSourceId::parse("2::m2").passes_station_filter(&filter));
    }
}
