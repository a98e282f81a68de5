// Copyright 2026 The Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Test Signals
//!
//! The band stack is tuned by ear in production, but engineering needs repeatable inputs.  These
//! generators feed the tests and the workbench.  Everything is computed in 64bit and truncated on
//! output, since `f32` is what the audio server hands us.

use std::f64::consts::TAU as TAU64;

use crate::StrataError;

/// Fixed frequency unit sine.  Rotates a phasor instead of calling `sin` per sample.
pub fn sine_gen(f0: f64, fs: f64) -> impl Iterator<Item = f32> {
    SineSweeper::new(f0, fs)
}

/// Sine generator whose frequency may be changed between samples without a phase jump.  Use it
/// for sweeps.
pub struct SineSweeper {
    re: f64,
    im: f64,
    cos: f64,
    sin: f64,
    fs: f64,
    f0: f64,
}

impl SineSweeper {
    pub fn new(f0: f64, fs: f64) -> Self {
        let omega = TAU64 * f0 / fs;
        Self {
            re: 1.0,
            im: 0.0,
            cos: omega.cos(),
            sin: omega.sin(),
            fs,
            f0,
        }
    }

    /// Retune.  Phase carries over.
    pub fn set_frequency(&mut self, f0: f64) {
        let omega = TAU64 * f0 / self.fs;
        self.cos = omega.cos();
        self.sin = omega.sin();
        self.f0 = f0;
    }

    pub fn frequency(&self) -> f64 {
        self.f0
    }

    /// Samples needed to cover `nwaves` full cycles at the current frequency.
    pub fn nsamples(&self, nwaves: f64) -> usize {
        (self.fs / self.f0 * nwaves).ceil() as usize
    }
}

impl Iterator for SineSweeper {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let out = self.im as f32;
        let re = self.re * self.cos - self.im * self.sin;
        let im = self.re * self.sin + self.im * self.cos;
        // Renormalize so long captures don't drift in amplitude.
        let norm = (re * re + im * im).sqrt();
        self.re = re / norm;
        self.im = im / norm;
        Some(out)
    }
}

/// Copy a mono signal into every channel of an interleaved buffer, the layout audio servers use.
pub fn interleave(mono: &[f32], channels: usize) -> Result<Vec<f32>, StrataError> {
    if channels == 0 {
        return Err(StrataError::Channels);
    }
    Ok(mono
        .iter()
        .flat_map(|&s| std::iter::repeat_n(s, channels))
        .collect())
}
