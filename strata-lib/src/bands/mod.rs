// Copyright 2026 The Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Bands
//!
//! *Split the mix into strata and weigh each one.*
//!
//! A band is one state variable filter (SVF) tapped at its band-pass output, plus a meter that
//! turns everything the filter emitted since the last control tick into a single dB value.  A
//! `BandStack` runs several bands over the same interleaved buffer in an explicit order.
//!
//! ## Two Clocks
//!
//! Parameters are set by people and read by visuals, at frame rate.  Samples arrive at audio rate
//! from a thread that must never wait.  Each band is therefore split in half:
//!
//! - `BandControl` holds everything both clocks touch: parameters, published coefficients, the
//!   level accumulator, and the last level.  All of it is atomic.  Coefficients and the
//!   accumulator are `Untorn` so they are always read and drained as a whole.
//! - `Band` owns the filter memory, which only the audio thread ever touches, and a shared
//!   reference to its `BandControl`.
//!
//! `BandStack` owns the `Band`s and goes to the audio thread.  `StackControl` is a cheap
//! cloneable handle onto the `BandControl`s for the control thread and any readers.
//!
//! ## Listening
//!
//! A band with `listen` set overwrites the buffer with its own output.  Every band later in the
//! chain then hears the filtered signal instead of the input, and so does the host if the stack is
//! not muted.  Only the last band may mute, and muting zeroes the whole buffer.

mod band;
mod level;
mod stack;

use std::ops::RangeInclusive;

pub use band::{Band, BandControl, Coefficients, SvfState};
pub use level::{MIN_DB, REF_LEVEL, Tally, ZERO_OFFSET, level_db};
pub use stack::{BandStack, StackBuilder, StackControl};

/// Cutoff frequency reached at a normalized cutoff of 1.0.
pub const MAX_CUTOFF_HZ: f32 = 15_000.0;

pub const CUTOFF_RANGE: RangeInclusive<f32> = 0.0..=1.0;
pub const Q_RANGE: RangeInclusive<f32> = 1.0..=10.0;
pub const GAIN_RANGE: RangeInclusive<f32> = 0.1..=10.0;

/// Map a normalized cutoff onto Hz.  Ten octaves below `MAX_CUTOFF_HZ` up to `MAX_CUTOFF_HZ`, so
/// equal slider travel is an equal musical interval.  Never returns zero or less.
pub fn cutoff_to_hz(cutoff: f32) -> f32 {
    (10.0 * cutoff - 10.0).exp2() * MAX_CUTOFF_HZ
}

/// Initial settings for one band.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandParams {
    /// Normalized cutoff, see `cutoff_to_hz`.
    pub cutoff: f32,
    /// Resonance.  Higher is narrower.
    pub q: f32,
    /// Scales the band output before it is measured or written back.
    pub gain: f32,
    /// Write the band output back into the buffer.
    pub listen: bool,
    /// Position in the chain.  Storage order and chain order are allowed to differ.
    pub order: usize,
}

impl BandParams {
    /// Pull every ranged parameter into range.
    pub fn clamped(self) -> Self {
        Self {
            cutoff: clamp(self.cutoff, &CUTOFF_RANGE),
            q: clamp(self.q, &Q_RANGE),
            gain: clamp(self.gain, &GAIN_RANGE),
            ..self
        }
    }

    pub fn cutoff_hz(&self) -> f32 {
        cutoff_to_hz(self.cutoff)
    }
}

impl Default for BandParams {
    fn default() -> Self {
        BandParams {
            cutoff: 0.5,
            q: 1.0,
            gain: 1.0,
            listen: false,
            order: 0,
        }
    }
}

/// Settings that apply to a whole stack.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StackConfig {
    /// Audio sample rate in Hz.  Fixed for the life of the stack.
    pub sample_rate: f32,
    /// Silence the buffer after the last band.  Handy when the stack only feeds visuals.
    pub mute: bool,
    /// Lowest level reported by level queries.  Stored levels are never clamped.
    pub level_floor: Option<f32>,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            sample_rate: 48_000.0,
            mute: true,
            level_floor: None,
        }
    }
}

// NaN falls to the bottom of the range rather than poisoning the filter.
fn clamp(value: f32, range: &RangeInclusive<f32>) -> f32 {
    if value.is_nan() {
        *range.start()
    } else {
        value.clamp(*range.start(), *range.end())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cutoff_to_hz() {
        for x in [0.0f32, 0.5, 1.0] {
            let expected = 2f64.powf(10.0 * x as f64 - 10.0) * 15_000.0;
            let hz = cutoff_to_hz(x) as f64;
            assert!(
                (hz / expected - 1.0).abs() < 1e-6,
                "cutoff {x}: {hz} Hz, expected {expected} Hz"
            );
        }
        assert!((cutoff_to_hz(1.0) - 15_000.0).abs() < 0.01);
        assert!((cutoff_to_hz(0.5) - 468.75).abs() < 0.001);
        assert!((cutoff_to_hz(0.0) - 15_000.0 / 1024.0).abs() < 0.0001);
    }

    #[test]
    fn test_cutoff_hz_is_positive() {
        for i in 0..=1000 {
            let x = i as f32 / 1000.0;
            assert!(cutoff_to_hz(x) > 0.0);
        }
    }

    #[test]
    fn test_params_clamped() {
        let p = BandParams {
            cutoff: 1.5,
            q: 0.0,
            gain: f32::NAN,
            listen: true,
            order: 4,
        }
        .clamped();
        assert_eq!(p.cutoff, 1.0);
        assert_eq!(p.q, 1.0);
        assert_eq!(p.gain, 0.1);
        assert!(p.listen);
        assert_eq!(p.order, 4);
    }
}
