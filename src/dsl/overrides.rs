//! Override sigils (`@`, `^`) and their alias tables.
//!
//! A command like `C5@3/8^.2` or a call like `riff@4(...)` carries a run of
//! sigil/value pairs. Each sigil maps to a track field through an alias table:
//! commands and track calls use different tables for `@`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::walker::state::TrackField;

/// Sigil → track field mapping.
pub struct AliasTable {
    pub name: &'static str,
    entries: &'static [(char, TrackField)],
}

/// Overrides on a command: `@` is the note duration.
pub const COMMAND_ALIASES: AliasTable = AliasTable {
    name: "command",
    entries: &[('@', TrackField::Duration), ('^', TrackField::Velocity)],
};

/// Overrides on a track call: `@` bounds the whole track.
pub const TRACK_ALIASES: AliasTable = AliasTable {
    name: "track",
    entries: &[('@', TrackField::TrackDuration), ('^', TrackField::Velocity)],
};

impl AliasTable {
    pub fn resolve(&self, sigil: char) -> Option<TrackField> {
        self.entries
            .iter()
            .find(|(s, _)| *s == sigil)
            .map(|(_, field)| *field)
    }
}

/// One resolved override, value kept as normalized source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub field: TrackField,
    pub value: String,
}

static SIGIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([@^])([^@^=;()\s]+)").unwrap_or_else(|e| panic!("bad sigil pattern: {e}"))
});

static FRACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d*)/(\d+)?$").unwrap_or_else(|e| panic!("bad fraction pattern: {e}"))
});

/// Parse a sigil run such as `@3/8^.2` through an alias table.
///
/// Returns `None` when the run contains text that is not a sigil pair or a
/// sigil the table does not know.
pub fn parse_overrides(sigils: &str, table: &AliasTable) -> Option<Vec<Override>> {
    let mut overrides = Vec::new();
    let mut covered = 0;
    for caps in SIGIL.captures_iter(sigils) {
        let whole = caps.get(0)?;
        if whole.start() != covered {
            return None;
        }
        covered = whole.end();
        let sigil = caps[1].chars().next()?;
        let field = table.resolve(sigil)?;
        overrides.push(Override {
            field,
            value: format_duration(&caps[2]),
        });
    }
    (covered == sigils.len()).then_some(overrides)
}

/// Render overrides as an object literal: `{duration: 3/8, velocity: .2}`.
pub fn format_overrides(overrides: &[Override]) -> String {
    let fields: Vec<String> = overrides
        .iter()
        .map(|o| format!("{}: {}", o.field.name(), o.value))
        .collect();
    format!("{{{}}}", fields.join(", "))
}

/// A leading `/` is shorthand for `1/`.
pub fn format_duration(value: &str) -> String {
    if value.starts_with('/') {
        format!("1{value}")
    } else {
        value.to_string()
    }
}

/// Parse a number or fraction string (`3/8`, `/5`, `.25`, `2`).
pub fn parse_numeric(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Some(caps) = FRACTION.captures(value) {
        let numerator = match &caps[1] {
            "" => 1.0,
            n => n.parse::<f64>().ok()?,
        };
        let denominator = caps.get(2).map_or(Some(1.0), |d| d.as_str().parse::<f64>().ok())?;
        return Some(numerator / denominator);
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn command_overrides() {
        let overrides = parse_overrides("@3/8^.2", &COMMAND_ALIASES).unwrap();
        assert_eq!(format_overrides(&overrides), "{duration: 3/8, velocity: .2}");
    }

    #[test]
    fn leading_slash_becomes_one_over() {
        let overrides = parse_overrides("@/5", &COMMAND_ALIASES).unwrap();
        assert_eq!(overrides[0].value, "1/5");
    }

    #[test]
    fn track_table_maps_at_to_track_duration() {
        let overrides = parse_overrides("@4^64", &TRACK_ALIASES).unwrap();
        assert_eq!(overrides[0].field, TrackField::TrackDuration);
        assert_eq!(overrides[1].field, TrackField::Velocity);
    }

    #[test]
    fn empty_run_is_empty() {
        assert_eq!(parse_overrides("", &COMMAND_ALIASES), Some(vec![]));
        assert_eq!(format_overrides(&[]), "{}");
    }

    #[test]
    fn stray_text_is_rejected() {
        assert_eq!(parse_overrides("x@2", &COMMAND_ALIASES), None);
        assert_eq!(parse_overrides("@", &COMMAND_ALIASES), None);
    }

    #[test]
    fn numeric_forms() {
        assert_approx_eq!(parse_numeric("3/8").unwrap(), 0.375);
        assert_approx_eq!(parse_numeric("/5").unwrap(), 0.2);
        assert_approx_eq!(parse_numeric("3/").unwrap(), 3.0);
        assert_approx_eq!(parse_numeric(".25").unwrap(), 0.25);
        assert_approx_eq!(parse_numeric("2").unwrap(), 2.0);
        assert_eq!(parse_numeric("abc"), None);
    }
}
