// Copyright 2026 The Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Band Stack
//!
//! Storage order and chain order are different things.  Bands are indexed by storage position
//! everywhere in the public API.  The audio thread keeps its own chain sequence, sorted by each
//! band's `order`, and re-sorts it in place whenever the control side bumps the order version.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::band::{Band, BandControl};
use super::{BandParams, StackConfig};
use crate::StrataError;

#[derive(Debug)]
struct StackShared {
    sample_rate: f32,
    level_floor: Option<f32>,
    mute: AtomicBool,
    order_version: AtomicUsize,
    bands: Box<[Arc<BandControl>]>,
}

impl StackShared {
    fn tick(&self) {
        for band in self.bands.iter() {
            band.update(self.sample_rate);
        }
    }

    fn band_level(&self, index: usize) -> f32 {
        // Never empty, construction refuses.
        let index = index.min(self.bands.len() - 1);
        let db = self.bands[index].level_db();
        match self.level_floor {
            Some(floor) => db.max(floor),
            None => db,
        }
    }
}

/// An ordered chain of bands.  Owns the filter state, so it belongs to whichever thread renders
/// audio.  Use `control` to get a handle for everybody else.
#[derive(Debug)]
pub struct BandStack {
    shared: Arc<StackShared>,
    bands: Box<[Band]>,
    /// Storage indices in chain order.
    sequence: Box<[usize]>,
    seen_order_version: usize,
}

impl BandStack {
    /// Build a stack from bands in storage order.  Each band keeps the `order` it was given.
    pub fn new<I>(config: StackConfig, params: I) -> Result<Self, StrataError>
    where
        I: IntoIterator<Item = BandParams>,
    {
        let sample_rate = config.sample_rate;
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(StrataError::SampleRate(sample_rate));
        }

        let controls: Box<[Arc<BandControl>]> = params
            .into_iter()
            .map(|p| Arc::new(BandControl::new(&p, sample_rate)))
            .collect();
        if controls.is_empty() {
            return Err(StrataError::NoBands);
        }
        check_order(&controls);

        let bands: Box<[Band]> = controls.iter().cloned().map(Band::new).collect();
        let sequence: Box<[usize]> = (0..controls.len()).collect();

        log::debug!(
            "band stack: {} bands at {} Hz, mute {}",
            controls.len(),
            sample_rate,
            config.mute
        );

        let shared = Arc::new(StackShared {
            sample_rate,
            level_floor: config.level_floor,
            mute: AtomicBool::new(config.mute),
            order_version: AtomicUsize::new(0),
            bands: controls,
        });

        let mut stack = BandStack {
            shared,
            bands,
            sequence,
            seen_order_version: 0,
        };
        stack.sort_sequence();
        Ok(stack)
    }

    /// Start a stack whose bands are appended in chain order.
    pub fn builder(config: StackConfig) -> StackBuilder {
        StackBuilder {
            config,
            params: Vec::new(),
        }
    }

    /// A handle for the control thread.
    pub fn control(&self) -> StackControl {
        StackControl {
            shared: self.shared.clone(),
        }
    }

    /// Control-rate step for every band.  Same as `StackControl::tick`.
    pub fn tick(&self) {
        self.shared.tick();
    }

    /// Run an interleaved block through every band in chain order.  The block is modified in
    /// place by listening bands and by the mute.
    ///
    /// Does not allocate, lock, or log.  Re-sorting after an order change happens in place.
    pub fn process_block(&mut self, data: &mut [f32], channels: usize) {
        debug_assert!(channels > 0, "blocks need at least one channel");
        if channels == 0 || data.is_empty() {
            return;
        }

        let version = self.shared.order_version.load(Ordering::Acquire);
        if version != self.seen_order_version {
            self.sort_sequence();
            self.seen_order_version = version;
        }

        let mute = self.shared.mute.load(Ordering::Relaxed);
        let last = self.sequence.len() - 1;
        for (position, &index) in self.sequence.iter().enumerate() {
            self.bands[index].process(data, channels, mute && position == last);
        }
    }

    /// Level of the band at storage `index`.  Indices past the end read the last band.
    pub fn band_level(&self, index: usize) -> f32 {
        self.shared.band_level(index)
    }

    pub fn band(&self, index: usize) -> Option<&Band> {
        self.bands.get(index)
    }

    /// Storage indices in the order the audio thread last ran them.
    pub fn sequence(&self) -> &[usize] {
        &self.sequence
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    /// Always false.  A stack can't be built without bands.
    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    // Ties keep storage order.
    fn sort_sequence(&mut self) {
        let bands = &self.bands;
        self.sequence
            .sort_unstable_by_key(|&i| (bands[i].control().order(), i));
    }
}

/// Appends bands in chain order.  Each band's `order` is overwritten with its position.
pub struct StackBuilder {
    config: StackConfig,
    params: Vec<BandParams>,
}

impl StackBuilder {
    pub fn band(mut self, params: BandParams) -> Self {
        let order = self.params.len();
        self.params.push(BandParams { order, ..params });
        self
    }

    /// Append `count` copies of `template` with cutoffs spread evenly from `low` to `high`.
    pub fn spread(mut self, count: usize, low: f32, high: f32, template: BandParams) -> Self {
        for i in 0..count {
            let t = if count > 1 {
                i as f32 / (count - 1) as f32
            } else {
                0.0
            };
            self = self.band(BandParams {
                cutoff: low + (high - low) * t,
                ..template
            });
        }
        self
    }

    pub fn build(self) -> Result<BandStack, StrataError> {
        BandStack::new(self.config, self.params)
    }
}

/// Cloneable, thread safe handle onto a stack's shared state.  Ticks, parameters, mute, order, and
/// level queries.
#[derive(Clone, Debug)]
pub struct StackControl {
    shared: Arc<StackShared>,
}

impl StackControl {
    /// Retune every band and finalize every level.  Call once per control period, before the
    /// blocks that should hear the new parameters.
    pub fn tick(&self) {
        self.shared.tick();
    }

    pub fn band(&self, index: usize) -> Option<&BandControl> {
        self.shared.bands.get(index).map(|b| b.as_ref())
    }

    /// Bands in storage order.
    pub fn bands(&self) -> impl Iterator<Item = &BandControl> {
        self.shared.bands.iter().map(|b| b.as_ref())
    }

    /// Level of the band at storage `index`.  Indices past the end read the last band, so a
    /// fixed-size visual never has to care how many bands there are.
    pub fn band_level(&self, index: usize) -> f32 {
        self.shared.band_level(index)
    }

    /// Fill every slot with `band_level` of its index.
    pub fn levels(&self, out: &mut [f32]) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.shared.band_level(i);
        }
    }

    pub fn mute_enabled(&self) -> bool {
        self.shared.mute.load(Ordering::Relaxed)
    }

    pub fn set_mute_enabled(&self, mute: bool) {
        self.shared.mute.store(mute, Ordering::Relaxed);
    }

    /// Move the band at storage `index` to chain position `order`.  The audio thread re-sorts on
    /// its next block.  Keeping orders a permutation is up to the caller; problems are logged.
    pub fn set_order(&self, index: usize, order: usize) {
        let Some(band) = self.shared.bands.get(index) else {
            log::warn!("set_order: no band {index} in a stack of {}", self.len());
            return;
        };
        band.store_order(order);
        self.shared.order_version.fetch_add(1, Ordering::Release);
        log::debug!("band {index} moved to order {order}");
        check_order(&self.shared.bands);
    }

    pub fn sample_rate(&self) -> f32 {
        self.shared.sample_rate
    }

    pub fn level_floor(&self) -> Option<f32> {
        self.shared.level_floor
    }

    pub fn len(&self) -> usize {
        self.shared.bands.len()
    }

    /// Always false.  A stack can't be built without bands.
    pub fn is_empty(&self) -> bool {
        self.shared.bands.is_empty()
    }
}

// Orders should be a permutation of 0..n.  Processing still works when they aren't, but the chain
// is probably not what the user meant.
fn check_order(bands: &[Arc<BandControl>]) {
    let mut seen = vec![false; bands.len()];
    for (i, band) in bands.iter().enumerate() {
        let order = band.order();
        match seen.get_mut(order) {
            Some(true) => log::warn!("band {i}: order {order} is used more than once"),
            Some(slot) => *slot = true,
            None => log::warn!("band {i}: order {order} is outside 0..{}", bands.len()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn three_bands() -> BandStack {
        BandStack::builder(StackConfig {
            mute: false,
            ..Default::default()
        })
        .spread(3, 0.2, 0.8, BandParams::default())
        .build()
        .unwrap()
    }

    #[test]
    fn test_stack_rejects_bad_construction() {
        let err = BandStack::new(StackConfig::default(), Vec::new()).unwrap_err();
        assert_eq!(err, StrataError::NoBands);

        for sample_rate in [0.0, -44_100.0, f32::NAN, f32::INFINITY] {
            let config = StackConfig {
                sample_rate,
                ..Default::default()
            };
            let err = BandStack::new(config, [BandParams::default()]).unwrap_err();
            assert!(matches!(err, StrataError::SampleRate(_)));
        }
    }

    #[test]
    fn test_builder_assigns_chain_order() {
        let stack = three_bands();
        let control = stack.control();
        let orders: Vec<usize> = control.bands().map(|b| b.order()).collect();
        assert_eq!(orders, vec![0, 1, 2]);

        let cutoffs: Vec<f32> = control.bands().map(|b| b.cutoff()).collect();
        assert!((cutoffs[0] - 0.2).abs() < 1e-6);
        assert!((cutoffs[1] - 0.5).abs() < 1e-6);
        assert!((cutoffs[2] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_sequence_follows_order_not_storage() {
        let params = [2, 0, 1].map(|order| BandParams {
            order,
            ..Default::default()
        });
        let stack = BandStack::new(StackConfig::default(), params).unwrap();
        assert_eq!(stack.sequence(), &[1, 2, 0]);
    }

    #[test]
    fn test_set_order_resorts_on_next_block() {
        let mut stack = three_bands();
        let control = stack.control();
        control.set_order(0, 2);
        control.set_order(2, 0);

        // Not yet, the audio thread hasn't run.
        assert_eq!(stack.sequence(), &[0, 1, 2]);

        let mut block = [0.0f32; 16];
        stack.process_block(&mut block, 2);
        assert_eq!(stack.sequence(), &[2, 1, 0]);

        // Out of range is ignored.
        control.set_order(7, 0);
        stack.process_block(&mut block, 2);
        assert_eq!(stack.sequence(), &[2, 1, 0]);
    }

    #[test]
    fn test_only_the_last_band_in_chain_mutes() {
        // The last band in the chain is storage index 0.  It listens, so without the mute the
        // block would hold its output.
        let params = [
            BandParams {
                order: 1,
                listen: true,
                ..Default::default()
            },
            BandParams {
                order: 0,
                listen: true,
                ..Default::default()
            },
        ];
        let mut stack = BandStack::new(StackConfig::default(), params).unwrap();
        let mut block = vec![0.5f32; 64];
        stack.process_block(&mut block, 2);
        assert!(block.iter().all(|&s| s == 0.0));

        // Both bands still measured the block.
        let control = stack.control();
        assert_eq!(control.band(0).unwrap().pending_frames(), 32);
        assert_eq!(control.band(1).unwrap().pending_frames(), 32);
    }

    #[test]
    fn test_mute_toggle() {
        let mut stack = three_bands();
        let control = stack.control();
        assert!(!control.mute_enabled());

        let mut block = vec![0.25f32; 32];
        stack.process_block(&mut block, 1);
        assert!(block.iter().all(|&s| s == 0.25));

        control.set_mute_enabled(true);
        stack.process_block(&mut block, 1);
        assert!(block.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_band_level_clamps_index() {
        let mut stack = three_bands();
        let mut block: Vec<f32> = crate::dsp::sine_gen(2000.0, 48_000.0).take(4800).collect();
        stack.process_block(&mut block, 1);
        stack.tick();

        let last = stack.band_level(2);
        assert_ne!(last, stack.band_level(0));
        assert_eq!(stack.band_level(3), last);
        assert_eq!(stack.band_level(usize::MAX), last);

        let mut levels = [0.0f32; 5];
        stack.control().levels(&mut levels);
        assert_eq!(&levels[2..], &[last; 3]);
    }

    #[test]
    fn test_level_floor_applies_to_queries_only() {
        let mut stack = BandStack::new(
            StackConfig {
                level_floor: Some(-60.0),
                ..Default::default()
            },
            [BandParams::default()],
        )
        .unwrap();
        let mut block = vec![0.0f32; 256];
        stack.process_block(&mut block, 1);
        stack.tick();

        let control = stack.control();
        assert_eq!(control.band_level(0), -60.0);
        assert!(control.band(0).unwrap().level_db() < -250.0);
        assert_eq!(control.level_floor(), Some(-60.0));
    }

    #[test]
    fn test_empty_block_is_ignored() {
        let mut stack = three_bands();
        stack.process_block(&mut [], 2);
        assert!(stack.control().bands().all(|b| b.pending_frames() == 0));
    }

    #[test]
    fn test_stack_is_send() {
        fn assert_send<T: Send>() {}
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send::<BandStack>();
        assert_send_sync::<StackControl>();
    }
}
