// Copyright 2026 The Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Band
//!
//! Chamberlin's state variable filter as improved by Dutilleux, tapped only at the band-pass
//! output.  See B. Frei, *Digital Sound Generation*, for the derivation.  Two constants differ
//! from the textbook: the frequency coefficient is derived with a 1.85 / 0.75 tuning pair that
//! corrects the center drift of the naive `2 sin(πf/fs)` mapping at higher cutoffs, and the input
//! is attenuated by half and averaged with the previous input.  Both shift the -3dB points and
//! the resonance, so the recurrence in `SvfState::step` must not be "simplified".

use std::f64::consts::PI as PI64;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use strata_untorn::{Pack, Untorn};

use super::level::{MIN_DB, Tally};
use super::{BandParams, CUTOFF_RANGE, GAIN_RANGE, Q_RANGE, clamp, cutoff_to_hz};

/// Filter coefficients, derived at control rate and read at audio rate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Coefficients {
    /// Tuned frequency coefficient.
    pub f: f32,
    /// Damping, 1/Q.
    pub d: f32,
}

impl Coefficients {
    /// `sample_rate` must be positive.
    pub fn new(cutoff_hz: f32, q: f32, sample_rate: f32) -> Self {
        // NOTE computed in 64bit and truncated, like the rest of our filter constants.
        let f = 2.0 / 1.85 * (PI64 * cutoff_hz as f64 / sample_rate as f64).sin();
        let d = 1.0 / q as f64;
        Coefficients {
            f: ((1.85 - 0.75 * d * f) * f) as f32,
            d: d as f32,
        }
    }
}

impl Pack for Coefficients {
    #[inline]
    fn pack(self) -> u64 {
        (self.f, self.d).pack()
    }

    #[inline]
    fn unpack(bits: u64) -> Self {
        let (f, d) = <(f32, f32)>::unpack(bits);
        Coefficients { f, d }
    }
}

/// Integrator memory.  Zero at construction and never reset afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SvfState {
    /// Attenuated previous input.
    pub z1: f32,
    /// Band-pass integrator.
    pub z2: f32,
    /// Low-pass integrator.
    pub z3: f32,
}

impl SvfState {
    /// Advance one sample and return the band-pass output.  Every new value is computed from the
    /// old triple before any of it is replaced.
    #[inline]
    pub fn step(&mut self, sample: f32, c: Coefficients) -> f32 {
        let z1 = 0.5 * sample;
        let z3 = self.z2 * c.f + self.z3;
        let z2 = (z1 + self.z1 - z3 - self.z2 * c.d) * c.f + self.z2;
        *self = SvfState { z1, z2, z3 };
        z2
    }
}

/// The half of a band that both clocks share.
#[derive(Debug)]
pub struct BandControl {
    cutoff: Untorn<f32>,
    q: Untorn<f32>,
    gain: Untorn<f32>,
    listen: AtomicBool,
    order: AtomicUsize,

    coefficients: Untorn<Coefficients>,
    tally: Untorn<Tally>,
    level: Untorn<f32>,
}

impl BandControl {
    /// Parameters are clamped.  Coefficients are derived right away so audio arriving before the
    /// first tick is already filtered correctly.
    pub fn new(params: &BandParams, sample_rate: f32) -> Self {
        let p = params.clamped();
        BandControl {
            cutoff: Untorn::new(p.cutoff),
            q: Untorn::new(p.q),
            gain: Untorn::new(p.gain),
            listen: AtomicBool::new(p.listen),
            order: AtomicUsize::new(p.order),

            coefficients: Untorn::new(Coefficients::new(p.cutoff_hz(), p.q, sample_rate)),
            tally: Untorn::default(),
            level: Untorn::new(MIN_DB),
        }
    }

    /// Snapshot of the current parameters.
    pub fn params(&self) -> BandParams {
        BandParams {
            cutoff: self.cutoff(),
            q: self.q(),
            gain: self.gain(),
            listen: self.listen(),
            order: self.order(),
        }
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff.load()
    }

    /// Takes effect on the next tick.
    pub fn set_cutoff(&self, cutoff: f32) {
        self.cutoff.store(clamp(cutoff, &CUTOFF_RANGE));
    }

    pub fn cutoff_hz(&self) -> f32 {
        cutoff_to_hz(self.cutoff())
    }

    pub fn q(&self) -> f32 {
        self.q.load()
    }

    /// Takes effect on the next tick.
    pub fn set_q(&self, q: f32) {
        self.q.store(clamp(q, &Q_RANGE));
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    /// Takes effect on the next block.
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(clamp(gain, &GAIN_RANGE));
    }

    pub fn listen(&self) -> bool {
        self.listen.load(Ordering::Relaxed)
    }

    /// Takes effect on the next block.
    pub fn set_listen(&self, listen: bool) {
        self.listen.store(listen, Ordering::Relaxed);
    }

    /// Position in the chain.  Change it through `StackControl::set_order` so the audio thread
    /// notices.
    pub fn order(&self) -> usize {
        self.order.load(Ordering::Acquire)
    }

    pub(super) fn store_order(&self, order: usize) {
        self.order.store(order, Ordering::Release);
    }

    /// Coefficients the audio thread is currently using.
    pub fn coefficients(&self) -> Coefficients {
        self.coefficients.load()
    }

    /// Last finalized level in dB.
    pub fn level_db(&self) -> f32 {
        self.level.load()
    }

    /// Frames measured since the last tick.
    pub fn pending_frames(&self) -> u32 {
        self.tally.load().frames
    }

    /// The control-rate step.  Retunes from the current parameters, then drains the accumulator
    /// and finalizes the level if anything was measured.  Returns what was drained.
    pub fn update(&self, sample_rate: f32) -> Tally {
        self.coefficients
            .store(Coefficients::new(self.cutoff_hz(), self.q(), sample_rate));

        let tally = self.tally.swap(Tally::default());
        if let Some(db) = tally.level_db() {
            self.level.store(db);
        }
        tally
    }

    #[inline]
    fn accumulate(&self, square_sum: f32, frames: u32) {
        self.tally.update(|t| t.add(square_sum, frames));
    }
}

/// The audio-rate half of a band.
#[derive(Debug)]
pub struct Band {
    control: Arc<BandControl>,
    state: SvfState,
}

impl Band {
    pub fn new(control: Arc<BandControl>) -> Self {
        Band {
            control,
            state: SvfState::default(),
        }
    }

    pub fn control(&self) -> &BandControl {
        &self.control
    }

    pub fn state(&self) -> SvfState {
        self.state
    }

    /// Filter every frame of an interleaved block, sampling only the first channel.  Measures the
    /// output, writes it to every channel of the frame when listening, and zeroes the whole block
    /// afterwards when `mute` is set.  Trailing samples that don't fill a frame are left alone.
    ///
    /// Does not allocate, lock, or log.
    pub fn process(&mut self, data: &mut [f32], channels: usize, mute: bool) {
        debug_assert!(channels > 0, "blocks need at least one channel");
        if channels == 0 {
            return;
        }

        let c = self.control.coefficients();
        let gain = self.control.gain();
        let listen = self.control.listen();

        let mut square_sum = 0.0f32;
        let mut frames = 0u32;
        for frame in data.chunks_exact_mut(channels) {
            let y = self.state.step(frame[0], c);
            square_sum += y * y * gain;
            frames += 1;
            if listen {
                frame.fill(y * gain);
            }
        }

        if frames > 0 {
            self.control.accumulate(square_sum, frames);
        }

        if mute {
            data.fill(0.0);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dsp;

    const FS: f32 = 48_000.0;

    fn band(params: BandParams) -> Band {
        Band::new(Arc::new(BandControl::new(&params, FS)))
    }

    #[test]
    fn test_coefficients() {
        let c = Coefficients::new(1000.0, 2.0, FS);
        let f = 2.0 / 1.85 * (std::f64::consts::PI * 1000.0 / 48_000.0).sin();
        let expected = (1.85 - 0.75 * 0.5 * f) * f;
        assert!((c.f as f64 - expected).abs() < 1e-7);
        assert_eq!(c.d, 0.5);
        assert_eq!(Coefficients::unpack(c.pack()), c);
    }

    #[test]
    fn test_svf_step_uses_old_state() {
        let c = Coefficients { f: 0.5, d: 0.25 };
        let mut s = SvfState {
            z1: 0.1,
            z2: 0.2,
            z3: 0.3,
        };
        let y = s.step(1.0, c);

        // Worked by hand from the recurrence.
        let z1 = 0.5;
        let z3 = 0.2 * 0.5 + 0.3;
        let z2 = (z1 + 0.1 - z3 - 0.2 * 0.25) * 0.5 + 0.2;
        assert_eq!(s, SvfState { z1, z2, z3 });
        assert_eq!(y, z2);
    }

    #[test]
    fn test_band_samples_first_channel_only() {
        let mut a = band(BandParams::default());
        let mut b = band(BandParams::default());

        let mono: Vec<f32> = dsp::sine_gen(440.0, FS as f64).take(256).collect();
        let mut stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, -7.0]).collect();
        let mut mono = mono;

        a.process(&mut mono, 1, false);
        b.process(&mut stereo, 2, false);
        assert_eq!(a.state(), b.state());
        assert_eq!(a.control().pending_frames(), 256);
        assert_eq!(b.control().pending_frames(), 256);
    }

    #[test]
    fn test_band_listen_writes_gained_output() {
        let params = BandParams {
            gain: 2.0,
            listen: true,
            ..Default::default()
        };
        let mut reference = SvfState::default();
        let mut b = band(params);
        let c = b.control().coefficients();

        let input: Vec<f32> = dsp::sine_gen(468.75, FS as f64).take(64).collect();
        let mut block = dsp::interleave(&input, 3).unwrap();
        b.process(&mut block, 3, false);

        for (frame, &x) in block.chunks_exact(3).zip(input.iter()) {
            let y = reference.step(x, c) * 2.0;
            assert_eq!(frame, &[y, y, y]);
        }
    }

    #[test]
    fn test_band_without_listen_leaves_block() {
        let mut b = band(BandParams::default());
        let mut block: Vec<f32> = dsp::sine_gen(100.0, FS as f64).take(128).collect();
        let before = block.clone();
        b.process(&mut block, 1, false);
        assert_eq!(block, before);
    }

    #[test]
    fn test_band_mute_zeroes_block() {
        let mut b = band(BandParams {
            listen: true,
            ..Default::default()
        });
        let mut block = vec![0.9f32; 2 * 100 + 1];
        b.process(&mut block, 2, true);
        assert!(block.iter().all(|&s| s == 0.0));
        // The trailing half frame is not a frame.
        assert_eq!(b.control().pending_frames(), 100);
    }

    #[test]
    fn test_band_state_continues_across_blocks() {
        let input: Vec<f32> = dsp::sine_gen(300.0, FS as f64).take(1000).collect();

        let mut whole = band(BandParams::default());
        let mut block = input.clone();
        whole.process(&mut block, 1, false);

        let mut split = band(BandParams::default());
        for chunk in input.chunks(97) {
            let mut chunk = chunk.to_vec();
            split.process(&mut chunk, 1, false);
        }

        assert_eq!(whole.state(), split.state());
    }

    #[test]
    fn test_control_update_skips_empty_tally() {
        let control = BandControl::new(&BandParams::default(), FS);
        assert_eq!(control.level_db(), MIN_DB);

        let drained = control.update(FS);
        assert_eq!(drained.frames, 0);
        assert_eq!(control.level_db(), MIN_DB);
    }

    #[test]
    fn test_control_setters_clamp() {
        let control = BandControl::new(&BandParams::default(), FS);
        control.set_cutoff(-1.0);
        control.set_q(11.0);
        control.set_gain(0.0);
        assert_eq!(control.cutoff(), 0.0);
        assert_eq!(control.q(), 10.0);
        assert_eq!(control.gain(), 0.1);

        control.update(FS);
        let expected = Coefficients::new(cutoff_to_hz(0.0), 10.0, FS);
        assert_eq!(control.coefficients(), expected);
    }
}
