use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::sessions::duel_session::DuelSession;
use crate::telemetry::ViolationObserver;
use crate::{DuelConfig, DuelResult, FrameChannel, ImageCatalog, InvalidRequestKind, PlayerId};

/// Events older than this are dropped if the session is never drained.
const DEFAULT_EVENT_QUEUE_SIZE: usize = 128;

/// Builds a [`DuelSession`].
///
/// Everything has a default: the canonical rules, the built-in image catalog, a random
/// `p_<n>` player id, and entropy-seeded randomness. A [`FrameChannel`] is only required
/// for online play.
///
/// ```
/// use captcha_duel::{DuelConfig, LocalChannel, SessionBuilder};
///
/// let (client_end, _counterpart_end) = LocalChannel::pair();
/// let session = SessionBuilder::new()
///     .with_config(DuelConfig::quick_match())
///     .with_channel(client_end)
///     .with_local_player_id("p_17")?
///     .with_seed(3)
///     .build()?;
/// assert_eq!(session.local_player_id().as_str(), "p_17");
/// # Ok::<(), captcha_duel::DuelError>(())
/// ```
#[must_use = "SessionBuilder must be consumed by calling build()"]
pub struct SessionBuilder {
    config: DuelConfig,
    catalog: Option<Arc<ImageCatalog>>,
    channel: Option<Box<dyn FrameChannel>>,
    local_player_id: Option<PlayerId>,
    seed: Option<u64>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    event_queue_size: usize,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            config,
            catalog,
            channel,
            local_player_id,
            seed,
            violation_observer,
            event_queue_size,
        } = self;

        f.debug_struct("SessionBuilder")
            .field("config", config)
            .field("catalog_images", &catalog.as_ref().map(|c| c.images().len()))
            .field("has_channel", &channel.is_some())
            .field("local_player_id", local_player_id)
            .field("seed", seed)
            .field("has_violation_observer", &violation_observer.is_some())
            .field("event_queue_size", event_queue_size)
            .finish()
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Construct a new builder with all values set to their defaults.
    pub fn new() -> Self {
        Self {
            config: DuelConfig::default(),
            catalog: None,
            channel: None,
            local_player_id: None,
            seed: None,
            violation_observer: None,
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
        }
    }

    /// Sets the match rules. Validated in [`build`](Self::build).
    pub fn with_config(mut self, config: DuelConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the catalog puzzles are generated from and graded against.
    pub fn with_catalog(mut self, catalog: impl Into<Arc<ImageCatalog>>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Attaches the channel to the remote counterpart.
    pub fn with_channel(mut self, channel: impl FrameChannel + 'static) -> Self {
        self.channel = Some(Box::new(channel));
        self
    }

    /// Attaches an already boxed channel.
    pub fn with_boxed_channel(mut self, channel: Box<dyn FrameChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Overrides the generated local player id.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if `id` is empty.
    ///
    /// [`InvalidRequest`]: crate::DuelError::InvalidRequest
    pub fn with_local_player_id(mut self, id: impl Into<PlayerId>) -> DuelResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidRequestKind::EmptyPlayerId.into());
        }
        self.local_player_id = Some(id);
        Ok(self)
    }

    /// Seeds every random choice of the session, for reproducible matches.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Routes dropped inputs and other irregularities to `observer` instead of only
    /// logging them.
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Caps the number of undrained events.
    ///
    /// # Errors
    /// - Returns [`InvalidConfig`] if `size` is zero.
    ///
    /// [`InvalidConfig`]: crate::DuelError::InvalidConfig
    pub fn with_event_queue_size(mut self, size: usize) -> DuelResult<Self> {
        if size == 0 {
            return Err(crate::DuelError::invalid_config(
                "event_queue_size",
                "must be at least 1",
            ));
        }
        self.event_queue_size = size;
        Ok(self)
    }

    /// Consumes the builder to construct a [`DuelSession`] in the `LOGIN` state.
    ///
    /// # Errors
    /// - Returns [`InvalidConfig`] if the [`DuelConfig`] does not validate.
    ///
    /// [`InvalidConfig`]: crate::DuelError::InvalidConfig
    pub fn build(self) -> DuelResult<DuelSession> {
        self.config.validate()?;
        let mut rng = match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let local_player_id = self
            .local_player_id
            .unwrap_or_else(|| PlayerId::random(&mut rng));
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(ImageCatalog::builtin()));

        Ok(DuelSession::new(
            self.config,
            catalog,
            rng,
            self.channel,
            local_player_id,
            self.violation_observer,
            self.event_queue_size,
        ))
    }
}
