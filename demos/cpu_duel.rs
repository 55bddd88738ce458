//! Headless match against the CPU opponent.
//!
//! The local side is played by a scripted bot that clicks one image per think step and
//! verifies once its selection is complete. Time is simulated, so a whole match runs in
//! a few milliseconds. Every event of the session is logged.
//!
//! ```text
//! cargo run --example cpu_duel -- --seed 7 --accuracy 0.8
//! ```

use captcha_duel::{
    CpuDifficulty, DuelConfig, DuelEvent, DuelSession, Intent, SessionBuilder, SessionState, Side,
};
use clap::Parser;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use web_time::{Duration, Instant};

/// Simulated time per loop iteration.
const STEP: Duration = Duration::from_millis(50);

/// Gives up on matches that never finish, e.g. with `--accuracy 0`.
const MAX_MATCH_TIME: Duration = Duration::from_secs(600);

#[derive(Parser)]
struct Opt {
    /// Seed for both the session and the bot
    #[arg(short, long, default_value_t = 1)]
    seed: u64,
    /// Chance that a bot click hits a correct image
    #[arg(short, long, default_value_t = 0.9)]
    accuracy: f64,
    /// Time the bot needs per click, in milliseconds
    #[arg(short, long, default_value_t = 400)]
    think_ms: u64,
    /// Chance that the CPU picks one more correct image per tick
    #[arg(long, default_value_t = 0.7)]
    cpu_select: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::DEBUG)
            .finish(),
    )?;

    let opt = Opt::parse();
    let config = DuelConfig {
        cpu: CpuDifficulty {
            select_probability: opt.cpu_select,
            ..CpuDifficulty::default()
        },
        ..DuelConfig::default()
    };
    let mut session = SessionBuilder::new()
        .with_config(config)
        .with_seed(opt.seed)
        .build()?;
    let mut bot = SmallRng::seed_from_u64(opt.seed.wrapping_add(1));

    let start = Instant::now();
    let mut now = start;
    let think = Duration::from_millis(opt.think_ms.max(1));
    let mut next_click = now + think;

    session.apply_intent(Intent::StartLocalMatch, now)?;
    while session.current_state() == SessionState::Playing && now - start < MAX_MATCH_TIME {
        now += STEP;
        session.tick(now);

        if now >= next_click && session.current_state() == SessionState::Playing {
            next_click = now + think;
            if let Some(intent) = bot_intent(&session, &mut bot, opt.accuracy) {
                session.apply_intent(intent, now)?;
            }
        }

        for event in session.events() {
            log_event(&event, now - start);
        }
    }

    let snapshot = session.snapshot(now);
    info!(
        "final score {} : {} after {:.1}s, winner {}",
        snapshot.local.score,
        snapshot.opponent.score,
        (now - start).as_secs_f64(),
        session
            .winner_id()
            .map_or_else(|| "nobody".to_owned(), ToString::to_string),
    );
    Ok(())
}

/// Picks the bot's next move: verify a complete selection, otherwise click one image.
fn bot_intent(session: &DuelSession, rng: &mut SmallRng, accuracy: f64) -> Option<Intent> {
    let puzzle = session.puzzle(Side::Local)?;
    let remaining = puzzle.remaining();
    if remaining.is_empty() {
        return Some(Intent::Verify);
    }
    let index = if rng.gen_bool(accuracy.clamp(0.0, 1.0)) {
        remaining[rng.gen_range(0..remaining.len())]
    } else {
        rng.gen_range(0..puzzle.len())
    };
    Some(Intent::Select { index })
}

fn log_event(event: &DuelEvent, at: Duration) {
    let at = at.as_secs_f64();
    match event {
        DuelEvent::Verified { side, verdict } => {
            info!("[{at:6.2}s] {side} verified: {verdict:?}");
        },
        DuelEvent::Obstructed { side, effect } => {
            info!("[{at:6.2}s] {side} obstructed by {effect:?}");
        },
        DuelEvent::ObstructionCleared { side, .. } => info!("[{at:6.2}s] {side} is free again"),
        DuelEvent::MatchFinished { winner, local_won } => {
            info!("[{at:6.2}s] match finished, winner {winner} (local won: {local_won})");
        },
        other => info!("[{at:6.2}s] {other:?}"),
    }
    if let Some(cue) = event.sound_cue() {
        info!("[{at:6.2}s] play {cue:?}");
    }
}
