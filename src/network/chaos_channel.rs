//! A [`FrameChannel`] wrapper for fault injection.
//!
//! [`ChaosChannel`] wraps any channel and makes it lose, duplicate, and reorder frames.
//! The duel protocol promises no ordering and no exactly-once delivery, so sessions have to
//! cope with all three. Everything is driven by a seeded RNG and is reproducible.
//!
//! # Example
//!
//! ```
//! use captcha_duel::{ChaosChannel, ChaosConfig, FrameChannel, LocalChannel};
//!
//! let (client, mut server) = LocalChannel::pair();
//! let config = ChaosConfig::builder()
//!     .duplication_rate(1.0)
//!     .seed(42)
//!     .build();
//! let mut client = ChaosChannel::new(client, config);
//!
//! client.send_frame("hello".to_owned());
//! assert_eq!(server.receive_frames(), vec!["hello", "hello"]);
//! ```
//!
//! # Features
//!
//! - **Loss**: separate drop rates for sent and received frames, plus burst loss.
//! - **Duplication**: a received or sent frame is delivered twice.
//! - **Reordering**: received frames are held back and shuffled before release.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::FrameChannel;

/// Configuration for frame chaos.
///
/// Use [`ChaosConfig::builder()`] for a fluent configuration API. All rates default to
/// `0.0`, so the default config passes every frame through untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChaosConfig {
    /// Probability of dropping a frame on send.
    pub send_loss_rate: f64,
    /// Probability of dropping a frame on receive.
    pub receive_loss_rate: f64,
    /// Probability of delivering a frame twice.
    pub duplication_rate: f64,
    /// Received frames are held until this many are buffered, then released shuffled.
    /// `0` disables reordering.
    pub reorder_buffer_size: usize,
    /// Probability of starting a burst loss on send.
    pub burst_loss_probability: f64,
    /// Number of consecutive frames a burst drops.
    pub burst_loss_length: usize,
    /// Seed for reproducible chaos. Entropy when `None`.
    pub seed: Option<u64>,
}

impl ChaosConfig {
    /// Creates a new builder for fluent configuration.
    pub fn builder() -> ChaosConfigBuilder {
        ChaosConfigBuilder::new()
    }

    /// No chaos at all.
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Drops frames in both directions with `loss_rate`.
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            send_loss_rate: loss_rate.clamp(0.0, 1.0),
            receive_loss_rate: loss_rate.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    /// Duplicates and reorders, but never loses, frames.
    pub fn unreliable_order() -> Self {
        Self {
            duplication_rate: 0.25,
            reorder_buffer_size: 3,
            ..Self::default()
        }
    }
}

/// Builder for [`ChaosConfig`].
#[derive(Debug, Clone, Default)]
pub struct ChaosConfigBuilder {
    config: ChaosConfig,
}

impl ChaosConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the loss rate for both directions.
    pub fn loss_rate(mut self, rate: f64) -> Self {
        self.config.send_loss_rate = rate.clamp(0.0, 1.0);
        self.config.receive_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the loss rate for sent frames only.
    pub fn send_loss_rate(mut self, rate: f64) -> Self {
        self.config.send_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the loss rate for received frames only.
    pub fn receive_loss_rate(mut self, rate: f64) -> Self {
        self.config.receive_loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the duplication rate.
    pub fn duplication_rate(mut self, rate: f64) -> Self {
        self.config.duplication_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the reorder buffer size.
    pub fn reorder_buffer_size(mut self, size: usize) -> Self {
        self.config.reorder_buffer_size = size;
        self
    }

    /// Sets burst loss parameters.
    ///
    /// When a burst is triggered (with `probability`), `length` consecutive sent frames are
    /// dropped.
    pub fn burst_loss(mut self, probability: f64, length: usize) -> Self {
        self.config.burst_loss_probability = probability.clamp(0.0, 1.0);
        self.config.burst_loss_length = length;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ChaosConfig {
        self.config
    }
}

/// Counters of what a [`ChaosChannel`] did to the traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaosStats {
    /// Frames handed to `send_frame`.
    pub frames_sent: u64,
    /// Frames dropped on send, bursts included.
    pub frames_dropped_send: u64,
    /// Frames pulled from the inner channel.
    pub frames_received: u64,
    /// Frames dropped on receive.
    pub frames_dropped_receive: u64,
    /// Extra copies delivered.
    pub frames_duplicated: u64,
    /// Reorder batches released.
    pub reorder_batches: u64,
}

/// A channel wrapper that injects loss, duplication, and reordering.
pub struct ChaosChannel<C: FrameChannel> {
    inner: C,
    config: ChaosConfig,
    rng: SmallRng,
    reorder_buffer: Vec<String>,
    burst_loss_remaining: usize,
    stats: ChaosStats,
}

impl<C: FrameChannel> ChaosChannel<C> {
    /// Wraps `inner`.
    pub fn new(inner: C, config: ChaosConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            inner,
            config,
            rng,
            reorder_buffer: Vec::new(),
            burst_loss_remaining: 0,
            stats: ChaosStats::default(),
        }
    }

    /// Returns a reference to the inner channel.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Consumes the wrapper. Frames held for reordering are lost.
    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Replaces the configuration. Already held frames stay held.
    pub fn set_config(&mut self, config: ChaosConfig) {
        self.config = config;
    }

    /// What happened to the traffic so far.
    pub fn stats(&self) -> ChaosStats {
        self.stats
    }

    /// Frames currently held back for reordering.
    pub fn held_frames(&self) -> usize {
        self.reorder_buffer.len()
    }

    /// Releases every held frame, shuffled.
    pub fn flush(&mut self) -> Vec<String> {
        let mut released = std::mem::take(&mut self.reorder_buffer);
        released.shuffle(&mut self.rng);
        if !released.is_empty() {
            self.stats.reorder_batches += 1;
        }
        released
    }

    fn roll(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            false
        } else if rate >= 1.0 {
            true
        } else {
            self.rng.gen::<f64>() < rate
        }
    }

    fn drop_in_burst(&mut self) -> bool {
        if self.burst_loss_remaining > 0 {
            self.burst_loss_remaining -= 1;
            return true;
        }
        if self.config.burst_loss_length > 0 && self.roll(self.config.burst_loss_probability) {
            self.burst_loss_remaining = self.config.burst_loss_length.saturating_sub(1);
            trace!(length = self.config.burst_loss_length, "burst loss started");
            return true;
        }
        false
    }
}

impl<C: FrameChannel> std::fmt::Debug for ChaosChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosChannel")
            .field("config", &self.config)
            .field("held_frames", &self.reorder_buffer.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<C: FrameChannel> FrameChannel for ChaosChannel<C> {
    fn send_frame(&mut self, frame: String) {
        self.stats.frames_sent += 1;
        if self.drop_in_burst() || self.roll(self.config.send_loss_rate) {
            self.stats.frames_dropped_send += 1;
            trace!("chaos dropped outgoing frame");
            return;
        }
        if self.roll(self.config.duplication_rate) {
            self.stats.frames_duplicated += 1;
            self.inner.send_frame(frame.clone());
        }
        self.inner.send_frame(frame);
    }

    fn receive_frames(&mut self) -> Vec<String> {
        let mut ready = Vec::new();
        for frame in self.inner.receive_frames() {
            self.stats.frames_received += 1;
            if self.roll(self.config.receive_loss_rate) {
                self.stats.frames_dropped_receive += 1;
                trace!("chaos dropped incoming frame");
                continue;
            }
            if self.roll(self.config.duplication_rate) {
                self.stats.frames_duplicated += 1;
                ready.push(frame.clone());
            }
            ready.push(frame);
        }

        if self.config.reorder_buffer_size == 0 {
            return ready;
        }
        self.reorder_buffer.append(&mut ready);
        if self.reorder_buffer.len() >= self.config.reorder_buffer_size {
            self.flush()
        } else {
            Vec::new()
        }
    }
}
