//! Attack/release envelope for the built-in oscillator.

/// Linear attack to full level, hold until the note ends, then a linear
/// release. Times are in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Envelope {
    pub attack: f64,
    pub release: f64,
}

impl Envelope {
    pub fn new(attack: f64, release: f64) -> Self {
        Self {
            attack: attack.max(0.0),
            release: release.max(0.0),
        }
    }

    /// Gain in `[0, 1]` at time `t` into a note that is held for
    /// `note_duration` seconds.
    pub fn amplitude(&self, t: f64, note_duration: f64) -> f64 {
        if t < 0.0 {
            return 0.0;
        }
        let rise = if self.attack > 0.0 && t < self.attack {
            t / self.attack
        } else {
            1.0
        };
        if t < note_duration {
            return rise;
        }
        if self.release <= 0.0 {
            return 0.0;
        }
        let fall = 1.0 - (t - note_duration) / self.release;
        (rise * fall).max(0.0)
    }

    /// Length of the sound including the release tail.
    pub fn total_duration(&self, note_duration: f64) -> f64 {
        note_duration.max(0.0) + self.release
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_attack_starts_at_full_level() {
        let env = Envelope::default();
        assert_eq!(env.amplitude(0.0, 1.0), 1.0);
        assert_eq!(env.amplitude(0.99, 1.0), 1.0);
        assert_eq!(env.amplitude(1.0, 1.0), 0.0);
    }

    #[test]
    fn attack_ramps_up() {
        let env = Envelope::new(0.1, 0.0);
        assert!(env.amplitude(0.0, 1.0).abs() < 1e-10);
        assert!((env.amplitude(0.05, 1.0) - 0.5).abs() < 1e-10);
        assert!((env.amplitude(0.1, 1.0) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn release_fades_after_note() {
        let env = Envelope::new(0.0, 0.2);
        assert!((env.amplitude(1.1, 1.0) - 0.5).abs() < 1e-10);
        assert!(env.amplitude(1.2, 1.0).abs() < 1e-10);
        assert_eq!(env.amplitude(5.0, 1.0), 0.0);
        assert!((env.total_duration(1.0) - 1.2).abs() < 1e-10);
    }

    #[test]
    fn negative_settings_are_clamped() {
        let env = Envelope::new(-1.0, -1.0);
        assert_eq!(env, Envelope::default());
        assert_eq!(env.amplitude(-0.1, 1.0), 0.0);
    }

    #[test]
    fn always_within_unit_range() {
        let env = Envelope::new(0.3, 0.4);
        for i in 0..2000 {
            let a = env.amplitude(i as f64 * 0.001, 0.5);
            assert!((0.0..=1.0).contains(&a), "amplitude {a} at step {i}");
        }
    }
}
