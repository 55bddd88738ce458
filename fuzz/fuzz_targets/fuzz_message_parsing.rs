//! Fuzz target for inbound frame handling.
//!
//! Arbitrary bytes are fed to the JSON codec, to a joined [`DuelSession`] and to a
//! [`Referee`] with a full room.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary input
//! - Decoded messages always re-encode
//! - Session invariants hold after any frame

#![no_main]

use libfuzzer_sys::fuzz_target;

use captcha_duel::network::codec;
use captcha_duel::network::local_channel::LocalChannel;
use captcha_duel::telemetry::InvariantChecker;
use captcha_duel::{ConnectionId, DuelConfig, Referee, SessionBuilder};
use web_time::Instant;

fuzz_target!(|data: &[u8]| {
    let frame = String::from_utf8_lossy(data);

    if let Ok(message) = codec::decode(&frame) {
        assert!(codec::encode(&message).is_ok());
    }

    let (client, _server) = LocalChannel::pair();
    if let Ok(mut session) = SessionBuilder::new()
        .with_channel(client)
        .with_seed(0)
        .build()
    {
        let now = Instant::now();
        if session.join_room("fuzz").is_ok() {
            session.handle_frame(&frame, now);
            assert!(session.check_invariants().is_ok());
        }
    }

    if let Ok(mut referee) = Referee::new(DuelConfig::default(), Some(0)) {
        for (conn, player) in [(1, "p_1"), (2, "p_2")] {
            let join = format!(
                r#"{{"type":"JOIN_ROOM","payload":{{"room_id":"fuzz","player_id":"{player}"}}}}"#
            );
            let _ = referee.handle_frame(ConnectionId::new(conn), &join);
        }
        for out in referee.handle_frame(ConnectionId::new(1), &frame) {
            assert!(out.frame().is_ok());
        }
    }
});
