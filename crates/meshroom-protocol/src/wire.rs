//! Binary frame layout.
//!
//! Everything is little-endian with no padding. Strings carry a 1-byte
//! length prefix unless noted; chat text and raw payloads carry a 2-byte
//! prefix because they may exceed 255 bytes.
//!
//! ```text
//! tag:u8
//! msgIdLen:u8  msgId
//! senderLen:u8 sender
//! nameLen:u8   name
//! roomLen:u8   room
//! timestamp:u64
//! bodyLen:u16  body
//! ```
//!
//! Body layouts per tag are listed on [`encode_body`]. The reader checks
//! every field against the bytes left and fails with
//! [`ProtocolError::Truncated`] instead of reading past the end.

use crate::{
    GameMessage, MessageBody, MessageKind, PeerId, Phase, PlayerRecord,
    ProtocolError, RoomSnapshot,
};

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only frame builder.
#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// String with a 1-byte length prefix.
    fn str8(&mut self, field: &'static str, s: &str) -> Result<(), ProtocolError> {
        self.bytes8(field, s.as_bytes())
    }

    fn bytes8(&mut self, field: &'static str, b: &[u8]) -> Result<(), ProtocolError> {
        let len = u8::try_from(b.len()).map_err(|_| ProtocolError::FieldTooLong {
            field,
            len: b.len(),
            max: u8::MAX as usize,
        })?;
        self.u8(len);
        self.buf.extend_from_slice(b);
        Ok(())
    }

    /// Blob with a 2-byte length prefix.
    fn bytes16(&mut self, field: &'static str, b: &[u8]) -> Result<(), ProtocolError> {
        let len = u16::try_from(b.len()).map_err(|_| ProtocolError::FieldTooLong {
            field,
            len: b.len(),
            max: u16::MAX as usize,
        })?;
        self.u16(len);
        self.buf.extend_from_slice(b);
        Ok(())
    }

    /// A number that the snapshot layout stores in one byte.
    fn number8(&mut self, field: &'static str, n: u16) -> Result<(), ProtocolError> {
        let b = u8::try_from(n).map_err(|_| ProtocolError::ValueOutOfRange {
            field,
            value: i64::from(n),
        })?;
        self.u8(b);
        Ok(())
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over a frame.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() < n {
            return Err(ProtocolError::Truncated {
                field,
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        Ok(self.take(field, 1)?[0])
    }

    fn bool(&mut self, field: &'static str) -> Result<bool, ProtocolError> {
        Ok(self.u8(field)? != 0)
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, ProtocolError> {
        let b = self.take(field, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, ProtocolError> {
        let b = self.take(field, 4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, ProtocolError> {
        let b = self.take(field, 8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn bytes8(&mut self, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        let len = self.u8(field)? as usize;
        self.take(field, len)
    }

    fn bytes16(&mut self, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        let len = self.u16(field)? as usize;
        self.take(field, len)
    }

    fn str8(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let b = self.bytes8(field)?;
        utf8(field, b)
    }

    fn str16(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let b = self.bytes16(field)?;
        utf8(field, b)
    }

    fn peer8(&mut self, field: &'static str) -> Result<PeerId, ProtocolError> {
        self.str8(field).map(PeerId::new)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn finish(self) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes(self.buf.len()))
        }
    }
}

fn utf8(field: &'static str, b: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(b)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8(field))
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Encodes a full frame (envelope + body).
pub fn encode_message(msg: &GameMessage) -> Result<Vec<u8>, ProtocolError> {
    let body = encode_body(&msg.body)?;

    let mut w = Writer::default();
    w.u8(msg.kind().tag());
    w.str8("message_id", &msg.message_id)?;
    w.str8("sender_id", msg.sender_id.as_str())?;
    w.str8("sender_name", &msg.sender_name)?;
    w.str8("room_id", &msg.room_id)?;
    w.u64(msg.timestamp);
    w.bytes16("body", &body)?;
    Ok(w.into_inner())
}

/// Decodes a full frame. Trailing bytes are an error.
pub fn decode_message(data: &[u8]) -> Result<GameMessage, ProtocolError> {
    let mut r = Reader::new(data);
    let tag = r.u8("tag")?;
    let message_id = r.str8("message_id")?;
    let sender_id = r.peer8("sender_id")?;
    let sender_name = r.str8("sender_name")?;
    let room_id = r.str8("room_id")?;
    let timestamp = r.u64("timestamp")?;
    let body = r.bytes16("body")?;
    r.finish()?;

    Ok(GameMessage {
        message_id,
        sender_id,
        sender_name,
        room_id,
        timestamp,
        body: decode_body(tag, body)?,
    })
}

/// Encodes only the body of a message.
///
/// | kind           | layout                                                 |
/// |----------------|--------------------------------------------------------|
/// | PlayerJoined   | `idLen,id, nameLen,name`                               |
/// | PlayerLeft     | `idLen,id`                                             |
/// | RoomSnapshot   | see [`RoomSnapshot`] below                             |
/// | NumberDrawn    | `number:i32`                                           |
/// | Heartbeat      | `idLen,id, nameLen,name`                               |
/// | TurnChange     | `idLen,nextId, turnIndex:u8`                           |
/// | GameStart      | `countdown:u8`                                         |
/// | CountdownTick  | `remaining:u8`                                         |
/// | PlayerProgress | `idLen,id, completedLines:u8, hasWon:u8`               |
/// | GameWon        | `idLen,winnerId, nameLen,winnerName`                   |
/// | GameReset      | empty                                                  |
/// | Chat           | `textLen:u16, text`                                    |
/// | Emote          | `emoteLen:u8, emote`                                   |
/// | Raw            | `dataLen:u16, data`                                    |
///
/// Snapshot: `roomIdLen,roomId, hostIdLen,hostId, playerCount:u8,
/// players[idLen,id,nameLen,name,completedLines:u8,hasWon:u8,connected:u8],
/// phase:u8, drawnCount:u8, drawn[u8]*, hasCurrent:u8, current:u8?,
/// countdown:u8`. Drawn numbers above 255 cannot be expressed there and
/// are rejected rather than truncated.
pub fn encode_body(body: &MessageBody) -> Result<Vec<u8>, ProtocolError> {
    let mut w = Writer::default();
    match body {
        MessageBody::PlayerJoined { id, name } | MessageBody::Heartbeat { id, name } => {
            w.str8("id", id.as_str())?;
            w.str8("name", name)?;
        }
        MessageBody::PlayerLeft { id } => {
            w.str8("id", id.as_str())?;
        }
        MessageBody::RoomSnapshot(snapshot) => encode_snapshot(&mut w, snapshot)?,
        MessageBody::NumberDrawn { number } => {
            w.i32(i32::from(*number));
        }
        MessageBody::TurnChange { next, turn_index } => {
            w.str8("next_id", next.as_str())?;
            w.u8(*turn_index);
        }
        MessageBody::GameStart { countdown } => w.u8(*countdown),
        MessageBody::CountdownTick { remaining } => w.u8(*remaining),
        MessageBody::PlayerProgress {
            id,
            completed_lines,
            has_won,
        } => {
            w.str8("id", id.as_str())?;
            w.u8(*completed_lines);
            w.bool(*has_won);
        }
        MessageBody::GameWon { winner, name } => {
            w.str8("winner_id", winner.as_str())?;
            w.str8("winner_name", name)?;
        }
        MessageBody::GameReset => {}
        MessageBody::Chat { text } => w.bytes16("chat_text", text.as_bytes())?,
        MessageBody::Emote { emote } => w.str8("emote", emote)?,
        MessageBody::Raw { data } => w.bytes16("raw_data", data)?,
        MessageBody::Unknown { body, .. } => w.buf.extend_from_slice(body),
    }
    Ok(w.into_inner())
}

fn encode_snapshot(w: &mut Writer, s: &RoomSnapshot) -> Result<(), ProtocolError> {
    w.str8("room_id", &s.room_id)?;
    w.str8("host_id", s.host_id.as_ref().map(PeerId::as_str).unwrap_or(""))?;

    let count = u8::try_from(s.players.len()).map_err(|_| ProtocolError::ValueOutOfRange {
        field: "player_count",
        value: s.players.len() as i64,
    })?;
    w.u8(count);
    for p in &s.players {
        w.str8("player_id", p.id.as_str())?;
        w.str8("player_name", &p.name)?;
        w.u8(p.completed_lines);
        w.bool(p.has_won);
        w.bool(p.connected);
    }

    w.u8(s.phase.as_u8());

    let drawn = u8::try_from(s.drawn.len()).map_err(|_| ProtocolError::ValueOutOfRange {
        field: "drawn_count",
        value: s.drawn.len() as i64,
    })?;
    w.u8(drawn);
    for n in &s.drawn {
        w.number8("drawn_number", *n)?;
    }

    match s.current {
        Some(n) => {
            w.u8(1);
            w.number8("current_number", n)?;
        }
        None => w.u8(0),
    }
    w.u8(s.countdown);
    Ok(())
}

/// Decodes a body for the given tag. Unknown tags never fail.
pub fn decode_body(tag: u8, data: &[u8]) -> Result<MessageBody, ProtocolError> {
    let mut r = Reader::new(data);
    let body = match MessageKind::from_tag(tag) {
        MessageKind::PlayerJoined => MessageBody::PlayerJoined {
            id: r.peer8("id")?,
            name: r.str8("name")?,
        },
        MessageKind::PlayerLeft => MessageBody::PlayerLeft { id: r.peer8("id")? },
        MessageKind::RoomSnapshot => MessageBody::RoomSnapshot(decode_snapshot(&mut r)?),
        MessageKind::NumberDrawn => {
            let raw = r.i32("number")?;
            let number = u16::try_from(raw).map_err(|_| ProtocolError::ValueOutOfRange {
                field: "number",
                value: i64::from(raw),
            })?;
            MessageBody::NumberDrawn { number }
        }
        MessageKind::Heartbeat => MessageBody::Heartbeat {
            id: r.peer8("id")?,
            name: r.str8("name")?,
        },
        MessageKind::TurnChange => MessageBody::TurnChange {
            next: r.peer8("next_id")?,
            turn_index: r.u8("turn_index")?,
        },
        MessageKind::GameStart => MessageBody::GameStart {
            countdown: r.u8("countdown")?,
        },
        MessageKind::CountdownTick => MessageBody::CountdownTick {
            remaining: r.u8("remaining")?,
        },
        MessageKind::PlayerProgress => MessageBody::PlayerProgress {
            id: r.peer8("id")?,
            completed_lines: r.u8("completed_lines")?,
            has_won: r.bool("has_won")?,
        },
        MessageKind::GameWon => MessageBody::GameWon {
            winner: r.peer8("winner_id")?,
            name: r.str8("winner_name")?,
        },
        MessageKind::GameReset => MessageBody::GameReset,
        MessageKind::Chat => MessageBody::Chat {
            text: r.str16("chat_text")?,
        },
        MessageKind::Emote => MessageBody::Emote {
            emote: r.str8("emote")?,
        },
        MessageKind::Raw => MessageBody::Raw {
            data: r.bytes16("raw_data")?.to_vec(),
        },
        MessageKind::Unknown(tag) => MessageBody::Unknown {
            tag,
            body: r.rest().to_vec(),
        },
    };
    r.finish()?;
    Ok(body)
}

fn decode_snapshot(r: &mut Reader<'_>) -> Result<RoomSnapshot, ProtocolError> {
    let room_id = r.str8("room_id")?;
    let host = r.peer8("host_id")?;
    let host_id = (!host.is_empty()).then_some(host);

    let count = r.u8("player_count")? as usize;
    let mut players = Vec::with_capacity(count);
    for _ in 0..count {
        players.push(PlayerRecord {
            id: r.peer8("player_id")?,
            name: r.str8("player_name")?,
            completed_lines: r.u8("completed_lines")?,
            has_won: r.bool("has_won")?,
            connected: r.bool("connected")?,
        });
    }

    let phase_byte = r.u8("phase")?;
    let phase = Phase::from_u8(phase_byte)
        .ok_or_else(|| ProtocolError::InvalidMessage(format!("unknown phase {phase_byte}")))?;

    let drawn_count = r.u8("drawn_count")? as usize;
    let drawn = r
        .take("drawn_numbers", drawn_count)?
        .iter()
        .map(|b| u16::from(*b))
        .collect();

    let current = if r.bool("has_current")? {
        Some(u16::from(r.u8("current_number")?))
    } else {
        None
    };
    let countdown = r.u8("countdown")?;

    Ok(RoomSnapshot {
        room_id,
        host_id,
        players,
        phase,
        drawn,
        current,
        countdown,
    })
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(body: MessageBody) -> GameMessage {
        GameMessage {
            message_id: "m-1".into(),
            sender_id: PeerId::new("alice"),
            sender_name: "Alice".into(),
            room_id: "room-7".into(),
            timestamp: 1_700_000_000_123,
            body,
        }
    }

    fn snapshot() -> RoomSnapshot {
        RoomSnapshot {
            room_id: "room-7".into(),
            host_id: Some(PeerId::new("alice")),
            players: vec![
                PlayerRecord::new(PeerId::new("alice"), "Alice"),
                PlayerRecord {
                    id: PeerId::new("bob"),
                    name: "Bob".into(),
                    completed_lines: 3,
                    has_won: false,
                    connected: false,
                },
            ],
            phase: Phase::Playing,
            drawn: vec![4, 99, 17],
            current: Some(17),
            countdown: 0,
        }
    }

    #[test]
    fn test_every_kind_round_trips() {
        let bodies = vec![
            MessageBody::PlayerJoined { id: "bob".into(), name: "Bob".into() },
            MessageBody::PlayerLeft { id: "bob".into() },
            MessageBody::RoomSnapshot(snapshot()),
            MessageBody::RoomSnapshot(RoomSnapshot::default()),
            MessageBody::NumberDrawn { number: 300 },
            MessageBody::Heartbeat { id: "bob".into(), name: "Bob".into() },
            MessageBody::TurnChange { next: "carol".into(), turn_index: 2 },
            MessageBody::GameStart { countdown: 5 },
            MessageBody::CountdownTick { remaining: 3 },
            MessageBody::PlayerProgress { id: "bob".into(), completed_lines: 4, has_won: true },
            MessageBody::GameWon { winner: "bob".into(), name: "Bob".into() },
            MessageBody::GameReset,
            MessageBody::Chat { text: "x".repeat(1000) },
            MessageBody::Emote { emote: "wave".into() },
            MessageBody::Raw { data: vec![0xAB; 400] },
            MessageBody::Unknown { tag: 0x7F, body: vec![1, 2, 3] },
        ];
        for body in bodies {
            let msg = envelope(body);
            let bytes = encode_message(&msg).unwrap();
            let decoded = decode_message(&bytes).unwrap();
            assert_eq!(decoded, msg);
            assert_eq!(encode_message(&decoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_player_joined_body_is_bit_exact() {
        let body = MessageBody::PlayerJoined { id: "ab".into(), name: "Z".into() };
        assert_eq!(encode_body(&body).unwrap(), vec![2, b'a', b'b', 1, b'Z']);
    }

    #[test]
    fn test_number_drawn_is_i32_little_endian() {
        let body = MessageBody::NumberDrawn { number: 0x0102 };
        assert_eq!(encode_body(&body).unwrap(), vec![0x02, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_turn_change_body_is_bit_exact() {
        let body = MessageBody::TurnChange { next: "c".into(), turn_index: 9 };
        assert_eq!(encode_body(&body).unwrap(), vec![1, b'c', 9]);
    }

    #[test]
    fn test_snapshot_body_is_bit_exact() {
        let s = RoomSnapshot {
            room_id: "r".into(),
            host_id: Some("h".into()),
            players: vec![PlayerRecord {
                id: "p".into(),
                name: "P".into(),
                completed_lines: 2,
                has_won: true,
                connected: true,
            }],
            phase: Phase::Countdown,
            drawn: vec![5, 6],
            current: Some(6),
            countdown: 3,
        };
        let bytes = encode_body(&MessageBody::RoomSnapshot(s)).unwrap();
        assert_eq!(
            bytes,
            vec![
                1, b'r', // room
                1, b'h', // host
                1, // player count
                1, b'p', 1, b'P', 2, 1, 1, // player
                1, // phase
                2, 5, 6, // drawn
                1, 6, // current
                3, // countdown
            ]
        );
    }

    #[test]
    fn test_snapshot_without_host_or_current() {
        let s = RoomSnapshot {
            host_id: None,
            current: None,
            ..snapshot()
        };
        let bytes = encode_body(&MessageBody::RoomSnapshot(s.clone())).unwrap();
        let decoded = decode_body(MessageKind::RoomSnapshot.tag(), &bytes).unwrap();
        assert_eq!(decoded, MessageBody::RoomSnapshot(s));
    }

    #[test]
    fn test_snapshot_rejects_numbers_above_one_byte() {
        let s = RoomSnapshot {
            drawn: vec![1, 256],
            ..snapshot()
        };
        let err = encode_body(&MessageBody::RoomSnapshot(s)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ValueOutOfRange { field: "drawn_number", value: 256 }
        ));

        let s = RoomSnapshot {
            current: Some(1000),
            ..snapshot()
        };
        assert!(encode_body(&MessageBody::RoomSnapshot(s)).is_err());
    }

    #[test]
    fn test_snapshot_accepts_255_exactly() {
        let s = RoomSnapshot {
            drawn: vec![255],
            current: Some(255),
            ..snapshot()
        };
        let bytes = encode_body(&MessageBody::RoomSnapshot(s.clone())).unwrap();
        assert_eq!(decode_body(0x03, &bytes).unwrap(), MessageBody::RoomSnapshot(s));
    }

    #[test]
    fn test_long_string_in_one_byte_field_is_rejected() {
        let body = MessageBody::PlayerJoined { id: "a".into(), name: "n".repeat(256) };
        assert!(matches!(
            encode_body(&body),
            Err(ProtocolError::FieldTooLong { field: "name", len: 256, max: 255 })
        ));
    }

    #[test]
    fn test_negative_number_is_rejected() {
        let bytes = (-1i32).to_le_bytes();
        assert!(matches!(
            decode_body(0x04, &bytes),
            Err(ProtocolError::ValueOutOfRange { field: "number", value: -1 })
        ));
    }

    #[test]
    fn test_every_truncation_is_reported_not_panicking() {
        let msg = envelope(MessageBody::RoomSnapshot(snapshot()));
        let bytes = encode_message(&msg).unwrap();
        for cut in 0..bytes.len() {
            let err = decode_message(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, ProtocolError::Truncated { .. }),
                "cut at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_truncated_body_inside_valid_frame() {
        // Body length says 3 but a PlayerJoined needs more.
        let err = decode_body(0x01, &[5, b'a', b'b']).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated { field: "id", needed: 5, remaining: 2 }
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let msg = envelope(MessageBody::GameReset);
        let mut bytes = encode_message(&msg).unwrap();
        bytes.push(0);
        assert!(matches!(decode_message(&bytes), Err(ProtocolError::TrailingBytes(1))));
        assert!(matches!(decode_body(0x0B, &[9]), Err(ProtocolError::TrailingBytes(1))));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let err = decode_body(0x0D, &[2, 0xFF, 0xFE]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8("emote")));
    }

    #[test]
    fn test_unknown_phase_rejected() {
        let mut bytes = encode_body(&MessageBody::RoomSnapshot(RoomSnapshot::default())).unwrap();
        // room(1) host(1) count(1) → phase byte at index 3.
        bytes[3] = 42;
        assert!(matches!(decode_body(0x03, &bytes), Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn test_unknown_tag_preserved() {
        let body = decode_body(0xEE, &[1, 2]).unwrap();
        assert_eq!(body, MessageBody::Unknown { tag: 0xEE, body: vec![1, 2] });
        assert_eq!(body.kind().tag(), 0xEE);
    }

    #[test]
    fn test_empty_buffer_is_truncated() {
        assert!(matches!(
            decode_message(&[]),
            Err(ProtocolError::Truncated { field: "tag", needed: 1, remaining: 0 })
        ));
    }

    // =====================================================================
    // Properties
    // =====================================================================

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn peer() -> impl Strategy<Value = PeerId> {
            "(peer:)?[a-z0-9-]{1,12}(@[a-z]{1,4})?".prop_map(PeerId::new)
        }

        /// Short enough for any one-byte length prefix.
        fn text8() -> impl Strategy<Value = String> {
            "\\PC{0,16}"
        }

        fn player() -> impl Strategy<Value = PlayerRecord> {
            (peer(), text8(), any::<u8>(), any::<bool>(), any::<bool>()).prop_map(
                |(id, name, completed_lines, has_won, connected)| PlayerRecord {
                    id,
                    name,
                    completed_lines,
                    has_won,
                    connected,
                },
            )
        }

        fn phase() -> impl Strategy<Value = Phase> {
            (0u8..4).prop_map(|b| Phase::from_u8(b).unwrap_or_default())
        }

        fn snapshot() -> impl Strategy<Value = RoomSnapshot> {
            (
                text8(),
                prop::option::of(peer()),
                prop::collection::vec(player(), 0..6),
                phase(),
                prop::collection::vec(0u16..=255, 0..40),
                prop::option::of(0u16..=255),
                any::<u8>(),
            )
                .prop_map(|(room_id, host_id, players, phase, drawn, current, countdown)| {
                    RoomSnapshot {
                        room_id,
                        host_id,
                        players,
                        phase,
                        drawn,
                        current,
                        countdown,
                    }
                })
        }

        fn body() -> impl Strategy<Value = MessageBody> {
            prop_oneof![
                (peer(), text8()).prop_map(|(id, name)| MessageBody::PlayerJoined { id, name }),
                peer().prop_map(|id| MessageBody::PlayerLeft { id }),
                snapshot().prop_map(MessageBody::RoomSnapshot),
                any::<u16>().prop_map(|number| MessageBody::NumberDrawn { number }),
                (peer(), text8()).prop_map(|(id, name)| MessageBody::Heartbeat { id, name }),
                (peer(), any::<u8>())
                    .prop_map(|(next, turn_index)| MessageBody::TurnChange { next, turn_index }),
                any::<u8>().prop_map(|countdown| MessageBody::GameStart { countdown }),
                any::<u8>().prop_map(|remaining| MessageBody::CountdownTick { remaining }),
                (peer(), any::<u8>(), any::<bool>()).prop_map(|(id, completed_lines, has_won)| {
                    MessageBody::PlayerProgress {
                        id,
                        completed_lines,
                        has_won,
                    }
                }),
                (peer(), text8()).prop_map(|(winner, name)| MessageBody::GameWon { winner, name }),
                Just(MessageBody::GameReset),
                "\\PC{0,400}".prop_map(|text| MessageBody::Chat { text }),
                text8().prop_map(|emote| MessageBody::Emote { emote }),
                prop::collection::vec(any::<u8>(), 0..600).prop_map(|data| MessageBody::Raw { data }),
                (0x0Fu8..=0xFF, prop::collection::vec(any::<u8>(), 0..64))
                    .prop_map(|(tag, body)| MessageBody::Unknown { tag, body }),
            ]
        }

        fn message() -> impl Strategy<Value = GameMessage> {
            ("[0-9a-f]{0,16}", peer(), text8(), text8(), any::<u64>(), body()).prop_map(
                |(message_id, sender_id, sender_name, room_id, timestamp, body)| GameMessage {
                    message_id,
                    sender_id,
                    sender_name,
                    room_id,
                    timestamp,
                    body,
                },
            )
        }

        proptest! {
            /// Anything that fits the wire limits decodes to itself.
            #[test]
            fn frames_round_trip(msg in message()) {
                let bytes = encode_message(&msg).unwrap();
                let decoded = decode_message(&bytes).unwrap();
                prop_assert_eq!(&decoded, &msg);
                prop_assert_eq!(encode_message(&decoded).unwrap(), bytes);
            }

            /// Arbitrary bytes never panic the decoder.
            #[test]
            fn garbage_is_an_error_not_a_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
                let _ = decode_message(&data);
            }
        }
    }
}
