//! Relay wire format.
//!
//! A frame is a 4-byte big-endian payload length followed by the bincode
//! encoding of one [`RelayEnvelope`]. Name fields have fixed maximum
//! widths; [`RelayEnvelope::new`] cuts them before encoding.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::messages::RelayEnvelope;
use crate::error::ExpeditionError;

/// Maximum bytes of a character name on the wire.
pub const CHARACTER_NAME_LEN: usize = 64;

/// Maximum bytes of an expedition name on the wire.
pub const EXPEDITION_NAME_LEN: usize = 128;

/// Maximum bytes of an event name on the wire.
pub const EVENT_NAME_LEN: usize = 256;

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const LEN_PREFIX: usize = 4;

/// Most [`CharacterEntry`](super::CharacterEntry) values sent in one online-status message.
///
/// An encoded entry takes 17 bytes, so a full batch stays well under
/// [`MAX_FRAME_LEN`].
pub const MAX_ENTRIES_PER_FRAME: usize = 2048;

/// Cuts `name` to at most `max_len` bytes on a character boundary.
pub fn truncate_name(name: &mut String, max_len: usize) {
    if name.len() <= max_len {
        return;
    }
    let mut end = max_len;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name.truncate(end);
}

/// Encodes an envelope without framing.
///
/// # Errors
///
/// Returns [`ExpeditionError::Codec`] if serialization fails.
pub fn encode(envelope: &RelayEnvelope) -> Result<Vec<u8>, ExpeditionError> {
    bincode::serialize(envelope).map_err(|e| ExpeditionError::Codec(e.to_string()))
}

/// Decodes an unframed payload.
///
/// # Errors
///
/// Returns [`ExpeditionError::Codec`] if the bytes are not a valid envelope.
pub fn decode(payload: &[u8]) -> Result<RelayEnvelope, ExpeditionError> {
    bincode::deserialize(payload).map_err(|e| ExpeditionError::Codec(e.to_string()))
}

/// Encodes an envelope into a length-prefixed frame.
///
/// # Errors
///
/// Returns [`ExpeditionError::Codec`] if serialization fails or the
/// payload exceeds [`MAX_FRAME_LEN`].
pub fn encode_frame(envelope: &RelayEnvelope) -> Result<Vec<u8>, ExpeditionError> {
    let payload = encode(envelope)?;
    let len = checked_len(payload.len())?;
    let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Writes one frame.
///
/// # Errors
///
/// Returns [`ExpeditionError::Codec`] for an unencodable envelope and
/// [`ExpeditionError::Relay`] if the write fails.
pub async fn write_frame<W>(writer: &mut W, envelope: &RelayEnvelope) -> Result<(), ExpeditionError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(envelope)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| ExpeditionError::Relay(format!("failed to write frame: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ExpeditionError::Relay(format!("failed to flush: {e}")))
}

/// Reads one frame. Returns `Ok(None)` when the stream ends cleanly
/// before a new frame starts.
///
/// # Errors
///
/// Returns [`ExpeditionError::Relay`] if the read fails mid-frame and
/// [`ExpeditionError::Codec`] for oversized or undecodable frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<RelayEnvelope>, ExpeditionError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_PREFIX];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ExpeditionError::Relay(format!("failed to read length: {e}"))),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ExpeditionError::Codec(format!(
            "frame of {len} bytes exceeds {MAX_FRAME_LEN}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| ExpeditionError::Relay(format!("failed to read frame: {e}")))?;
    decode(&payload).map(Some)
}

fn checked_len(len: usize) -> Result<u32, ExpeditionError> {
    if len > MAX_FRAME_LEN {
        return Err(ExpeditionError::Codec(format!(
            "frame of {len} bytes exceeds {MAX_FRAME_LEN}"
        )));
    }
    u32::try_from(len).map_err(|e| ExpeditionError::Codec(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{CharacterId, ExpeditionId, Notice, ProcessIdentity};
    use crate::relay::messages::{CharacterEntry, RelayMessage};

    fn sample() -> RelayEnvelope {
        RelayEnvelope::from_zone(
            ProcessIdentity::new(293, 1050),
            RelayMessage::CharacterNotice {
                character_name: "Firiona".to_string(),
                notice: Notice::InviteAccepted {
                    name: "Tunare".to_string(),
                },
            },
        )
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut name = "ab\u{e9}".to_string();
        truncate_name(&mut name, 3);
        assert_eq!(name, "ab");

        let mut short = "abc".to_string();
        truncate_name(&mut short, 64);
        assert_eq!(short, "abc");
    }

    #[test]
    fn large_online_lookup_is_split_into_frames() {
        let entries: Vec<CharacterEntry> = (1..=5000)
            .map(|n| CharacterEntry::query(ExpeditionId::new(n / 6 + 1), CharacterId::new(n)))
            .collect();
        let whole = RelayEnvelope::from_zone(
            ProcessIdentity::new(293, 0),
            RelayMessage::OnlineMembersQuery {
                entries: entries.clone(),
            },
        );
        assert!(matches!(encode_frame(&whole), Err(ExpeditionError::Codec(_))));

        let queries = RelayMessage::online_members_queries(&entries);
        assert_eq!(queries.len(), 3);
        let mut sent = 0;
        for query in queries {
            let RelayMessage::OnlineMembersQuery { entries: batch } = &query else {
                panic!("unexpected variant");
            };
            sent += batch.len();
            let envelope = RelayEnvelope::from_zone(ProcessIdentity::new(293, 0), query);
            assert!(encode_frame(&envelope).is_ok());
        }
        assert_eq!(sent, entries.len());
    }

    #[test]
    fn frame_prefix_is_big_endian_payload_len() {
        let Ok(frame) = encode_frame(&sample()) else {
            panic!("encode failed");
        };
        let Some((prefix, payload)) = frame.split_first_chunk::<4>() else {
            panic!("frame too short");
        };
        assert_eq!(u32::from_be_bytes(*prefix) as usize, payload.len());
    }

    #[tokio::test]
    async fn frames_survive_a_byte_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = sample();
        let deleted = RelayEnvelope::from_coordinator(RelayMessage::Deleted {
            expedition_id: ExpeditionId::new(4),
        });
        let Ok(()) = write_frame(&mut client, &sent).await else {
            panic!("write failed");
        };
        let Ok(()) = write_frame(&mut client, &deleted).await else {
            panic!("write failed");
        };
        drop(client);

        let Ok(Some(first)) = read_frame(&mut server).await else {
            panic!("expected first frame");
        };
        let Ok(Some(second)) = read_frame(&mut server).await else {
            panic!("expected second frame");
        };
        assert_eq!(first, sent);
        assert_eq!(second, deleted);
        assert!(matches!(read_frame(&mut server).await, Ok(None)));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = u32::try_from(MAX_FRAME_LEN + 1).unwrap_or(u32::MAX);
        let Ok(()) = client.write_all(&len.to_be_bytes()).await else {
            panic!("write failed");
        };
        let result = read_frame(&mut server).await;
        assert!(matches!(result, Err(ExpeditionError::Codec(_))));
    }

    #[test]
    fn garbage_payload_is_a_codec_error() {
        assert!(matches!(decode(&[0xff; 3]), Err(ExpeditionError::Codec(_))));
    }
}
