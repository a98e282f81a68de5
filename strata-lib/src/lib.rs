// Copyright 2026 The Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core Strata audio analysis: a bank of band-pass filters that turns an audio stream into one
//! loudness value per band, in dB, for audio-reactive visuals.
//!
//! The bank is driven by two clocks that the host owns.  The control clock (usually once per
//! rendered frame) calls `tick`, which retunes every band and finalizes its level.  The audio clock
//! calls `process_block` with every interleaved buffer the audio server hands over.  The two may run
//! on different threads.  `BandStack` lives on the audio thread and `StackControl` is the handle for
//! everybody else.
//!
//! ```no_run
//! use strata_lib::bands::{BandParams, BandStack, StackConfig};
//!
//! let mut stack = BandStack::builder(StackConfig::default())
//!     .band(BandParams { cutoff: 0.3, ..Default::default() })
//!     .band(BandParams { cutoff: 0.6, ..Default::default() })
//!     .build()?;
//! let control = stack.control();
//!
//! let mut block = vec![0.0f32; 512 * 2];
//! stack.process_block(&mut block, 2);
//! control.tick();
//! let bass_db = control.band_level(0);
//! # Ok::<(), strata_lib::StrataError>(())
//! ```

pub mod bands;
pub mod dsp;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StrataError {
    #[error("a band stack needs at least one band")]
    NoBands,

    #[error("sample rate must be finite and positive, got {0} Hz")]
    SampleRate(f32),

    #[error("channel count must be at least one")]
    Channels,
}

pub mod prelude {
    pub use crate::StrataError;
    pub use crate::bands::{BandParams, BandStack, StackConfig, StackControl};
}
