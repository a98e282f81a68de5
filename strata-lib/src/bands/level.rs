// Copyright 2026 The Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Levels
//!
//! Sum of squares in, dB out.  0 dB is the RMS of a full scale sine.  RMS is capped at 1.0, so the
//! loudest level a band can report is about +3 dB.

use strata_untorn::Pack;

/// RMS of a full scale sine wave, 1/√2.
pub const REF_LEVEL: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Added before the logarithm so silence lands near -256 dB instead of -∞.
pub const ZERO_OFFSET: f32 = 1.5849e-13;

/// Level reported by a band that has not measured anything yet.
pub const MIN_DB: f32 = -60.0;

/// What the audio thread has measured since the last tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Tally {
    pub square_sum: f32,
    pub frames: u32,
}

impl Tally {
    /// Fold a block's worth of measurements in.
    #[inline]
    pub fn add(self, square_sum: f32, frames: u32) -> Self {
        Tally {
            square_sum: self.square_sum + square_sum,
            frames: self.frames.saturating_add(frames),
        }
    }

    /// `None` when nothing was measured.  The previous level should stand.
    pub fn level_db(&self) -> Option<f32> {
        (self.frames >= 1).then(|| level_db(self.square_sum, self.frames))
    }
}

impl Pack for Tally {
    #[inline]
    fn pack(self) -> u64 {
        (self.square_sum, self.frames).pack()
    }

    #[inline]
    fn unpack(bits: u64) -> Self {
        let (square_sum, frames) = <(f32, u32)>::unpack(bits);
        Tally { square_sum, frames }
    }
}

/// RMS of `frames` samples whose squares sum to `square_sum`, in dB relative to `REF_LEVEL`.
/// `frames` must be at least one.
pub fn level_db(square_sum: f32, frames: u32) -> f32 {
    let rms = (square_sum / frames as f32).sqrt().min(1.0);
    20.0 * (rms / REF_LEVEL + ZERO_OFFSET).log10()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_level_of_silence_is_finite() {
        let db = level_db(0.0, 480);
        assert!(db.is_finite());
        assert!((db - 20.0 * ZERO_OFFSET.log10()).abs() < 1e-3, "db = {db}");
        assert!(db < -250.0);
    }

    #[test]
    fn test_level_of_full_scale_sine() {
        // n samples of a unit sine square-sum to n / 2.
        let db = level_db(240.0, 480);
        assert!(db.abs() < 1e-4, "db = {db}");
    }

    #[test]
    fn test_level_rms_is_capped() {
        // A DC of 4.0 would be +21 dB without the cap.
        let capped = level_db(16.0 * 100.0, 100);
        let unity = level_db(100.0, 100);
        assert_eq!(capped, unity);
        assert!((unity - 20.0 * std::f32::consts::SQRT_2.log10()).abs() < 1e-4);
    }

    #[test]
    fn test_tally_empty_has_no_level() {
        assert_eq!(Tally::default().level_db(), None);
        let t = Tally::default().add(240.0, 480);
        assert_eq!(t.frames, 480);
        assert!(t.level_db().is_some());
    }

    #[test]
    fn test_tally_pack() {
        let t = Tally {
            square_sum: 12.5,
            frames: 96_000,
        };
        assert_eq!(Tally::unpack(t.pack()), t);
    }
}
