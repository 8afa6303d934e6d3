//! Note name parsing: "C4", "Eb3", "Aq4" (quarter tones) to a frequency.
//!
//! Pitches are counted in quarter tones. Octaves start at C, and A4 is 440 Hz.

use once_cell::sync::Lazy;
use regex::Regex;

/// Quarter-tone offset of each note name from A.
const NOTE_KEYS: &[(&str, i32)] = &[
    ("A", 0),
    ("Aq", 1),
    ("A#", 2),
    ("A#q", 3),
    ("Bb", 2),
    ("Bbq", 3),
    ("B", 4),
    ("Bq", 5),
    ("C", 6),
    ("Cq", 7),
    ("C#", 8),
    ("C#q", 9),
    ("Db", 8),
    ("Dbq", 9),
    ("D", 10),
    ("Dq", 11),
    ("D#", 12),
    ("D#q", 13),
    ("Eb", 12),
    ("Ebq", 13),
    ("E", 14),
    ("Eq", 15),
    ("E#", 16),
    ("E#q", 17),
    ("F", 16),
    ("Fq", 17),
    ("F#", 18),
    ("F#q", 19),
    ("Gb", 18),
    ("Gbq", 19),
    ("G", 20),
    ("Gq", 21),
    ("G#", 22),
    ("G#q", 23),
    ("Ab", 22),
    ("Abq", 23),
];

/// Key number of A4.
const A4_KEY: i32 = 98;
const A4_FREQUENCY: f64 = 440.0;
const STEPS_PER_OCTAVE: i32 = 24;

static NOTE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-G][#qb]{0,2})(\d+)$").unwrap_or_else(|e| panic!("bad note pattern: {e}"))
});

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNote {
    pub note: String,
    pub octave: u32,
    pub frequency: f64,
}

/// Quarter-tone key number of a note, with A4 = 98.
pub fn key_number(note: &str, octave: u32) -> Option<i32> {
    let (_, offset) = NOTE_KEYS.iter().find(|(name, _)| *name == note)?;
    let octave_base = (octave as i32 - 1) * STEPS_PER_OCTAVE + 2;
    // A through Bq sit at the top of the C-based octave.
    let wrap = if *offset < 6 { STEPS_PER_OCTAVE } else { 0 };
    Some(offset + wrap + octave_base)
}

pub fn key_to_frequency(key: i32) -> f64 {
    A4_FREQUENCY * 2f64.powf((key - A4_KEY) as f64 / STEPS_PER_OCTAVE as f64)
}

/// Parse a note command such as `C4`, `Eb3` or `C#q5`.
pub fn parse_note(name: &str) -> Option<ParsedNote> {
    let caps = NOTE_NAME.captures(name)?;
    let note = caps[1].to_string();
    let octave: u32 = caps[2].parse().ok()?;
    let key = key_number(&note, octave)?;
    Some(ParsedNote {
        note,
        octave,
        frequency: key_to_frequency(key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn a4_concert() {
        let note = parse_note("A4").unwrap();
        assert_eq!(note.note, "A");
        assert_eq!(note.octave, 4);
        assert_approx_eq!(note.frequency, 440.0);
    }

    #[test]
    fn middle_c() {
        assert_approx_eq!(parse_note("C4").unwrap().frequency, 261.6256, 1e-3);
    }

    #[test]
    fn c5_is_above_a4() {
        assert_approx_eq!(parse_note("C5").unwrap().frequency, 523.2511, 1e-3);
    }

    #[test]
    fn enharmonics_match() {
        assert_eq!(
            parse_note("C#4").unwrap().frequency,
            parse_note("Db4").unwrap().frequency
        );
        assert_eq!(
            parse_note("E#2").unwrap().frequency,
            parse_note("F2").unwrap().frequency
        );
    }

    #[test]
    fn quarter_tone_is_half_a_semitone() {
        let a = parse_note("A4").unwrap().frequency;
        let aq = parse_note("Aq4").unwrap().frequency;
        assert_approx_eq!(aq / a, 2f64.powf(1.0 / 24.0));
    }

    #[test]
    fn octave_doubles() {
        let low = parse_note("Eb3").unwrap().frequency;
        let high = parse_note("Eb4").unwrap().frequency;
        assert_approx_eq!(high / low, 2.0);
    }

    #[test]
    fn rejects_non_notes() {
        assert_eq!(parse_note("H4"), None);
        assert_eq!(parse_note("C"), None);
        assert_eq!(parse_note("Cbb4"), None);
        assert_eq!(parse_note("attack"), None);
    }
}
