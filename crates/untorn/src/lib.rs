// Copyright 2026 The Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Untorn
//!
//! Small structs that two threads must agree on, such as a pair of filter coefficients or a sum
//! and the count it was summed over, cannot be shared as separate atomics.  A reader can observe
//! the first field from one write and the second field from the next write, a torn read.  A
//! mutex fixes that, but a real-time audio thread is not allowed to wait on one.
//!
//! `Untorn<T>` packs the whole struct into a single `AtomicU64`.  Every load sees one complete
//! write.  Every read-modify-write (`swap`, `update`) applies to the whole struct at once, so a
//! consumer that drains with `swap` can never lose or double-count anything a producer added
//! with `update`.
//!
//! The price is size.  Whatever implements `Pack` must fit into 64 bits, which is plenty for two
//! `f32` or an `f32` and a counter.  Larger payloads need a sequence lock or double buffer and do
//! not belong here.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lossless conversion to and from 64 bits.  `unpack(pack(x))` must reproduce `x` bit for bit.
pub trait Pack: Copy {
    fn pack(self) -> u64;
    fn unpack(bits: u64) -> Self;
}

/// An atomic cell for a `Pack` value.
pub struct Untorn<T: Pack> {
    bits: AtomicU64,
    _value: PhantomData<T>,
}

impl<T: Pack> Untorn<T> {
    pub fn new(value: T) -> Self {
        Self {
            bits: AtomicU64::new(value.pack()),
            _value: PhantomData,
        }
    }

    /// Read the most recently published value.
    #[inline]
    pub fn load(&self) -> T {
        T::unpack(self.bits.load(Ordering::Acquire))
    }

    /// Publish a value, replacing whatever was there.
    #[inline]
    pub fn store(&self, value: T) {
        self.bits.store(value.pack(), Ordering::Release);
    }

    /// Publish a value and return the one it replaced.  Use this to drain accumulators.
    #[inline]
    pub fn swap(&self, value: T) -> T {
        T::unpack(self.bits.swap(value.pack(), Ordering::AcqRel))
    }

    /// Apply `f` to the current value in a compare-and-swap loop and return the previous value.
    /// `f` may run more than once if another thread writes in between, so keep it pure.
    #[inline]
    pub fn update<F>(&self, mut f: F) -> T
    where
        F: FnMut(T) -> T,
    {
        let result = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(f(T::unpack(bits)).pack())
            });
        // The closure never declines, but both arms carry the previous bits anyway.
        let (Ok(prev) | Err(prev)) = result;
        T::unpack(prev)
    }

    pub fn into_inner(self) -> T {
        T::unpack(self.bits.into_inner())
    }
}

impl<T: Pack + Default> Default for Untorn<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Pack + std::fmt::Debug> std::fmt::Debug for Untorn<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Untorn").field(&self.load()).finish()
    }
}

impl<T: Pack> From<T> for Untorn<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

macro_rules! impl_pack_bits {
    ($t:ty, $bits:ty) => {
        impl Pack for $t {
            #[inline]
            fn pack(self) -> u64 {
                self.to_bits() as u64
            }

            #[inline]
            fn unpack(bits: u64) -> Self {
                <$t>::from_bits(bits as $bits)
            }
        }
    };
}

impl_pack_bits!(f32, u32);
impl_pack_bits!(f64, u64);

impl Pack for u32 {
    #[inline]
    fn pack(self) -> u64 {
        self as u64
    }

    #[inline]
    fn unpack(bits: u64) -> Self {
        bits as u32
    }
}

impl Pack for u64 {
    #[inline]
    fn pack(self) -> u64 {
        self
    }

    #[inline]
    fn unpack(bits: u64) -> Self {
        bits
    }
}

impl Pack for bool {
    #[inline]
    fn pack(self) -> u64 {
        self as u64
    }

    #[inline]
    fn unpack(bits: u64) -> Self {
        bits != 0
    }
}

// Two 32bit halves.  The first field lives in the low word.
macro_rules! impl_pack_pair {
    ($a:ty, $b:ty) => {
        impl Pack for ($a, $b) {
            #[inline]
            fn pack(self) -> u64 {
                (self.0.pack() & 0xFFFF_FFFF) | (self.1.pack() << 32)
            }

            #[inline]
            fn unpack(bits: u64) -> Self {
                (<$a>::unpack(bits & 0xFFFF_FFFF), <$b>::unpack(bits >> 32))
            }
        }
    };
}

impl_pack_pair!(f32, f32);
impl_pack_pair!(f32, u32);
impl_pack_pair!(u32, u32);
