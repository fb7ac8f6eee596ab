//! Streamed-reply frames and their assembly into one bot message.
//!
//! A chat reply is either a single JSON object `{reply, audioRef?}` or an
//! ordered sequence of newline-delimited frames `{reply?, audioRef?, done}`.
//! [`FrameDecoder`] turns a byte stream into frames, tolerating frames
//! split across chunk boundaries; [`assemble_reply`] applies the assembly
//! rule: fragments concatenate in arrival order, the audio reference is
//! the one on the `done` frame, and an `error` frame aborts assembly.

use serde::Deserialize;

use super::BotReply;
use crate::error::{Result, SessionError};

/// One incremental unit of a streamed reply.
///
/// A batched reply parses as a single frame with `done` absent (false).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyFrame {
    /// Text fragment, if any.
    #[serde(default)]
    pub reply: Option<String>,
    /// Audio clip reference, if any.
    #[serde(default)]
    pub audio_ref: Option<String>,
    /// True on the terminal fragment.
    #[serde(default)]
    pub done: bool,
    /// Server-side failure reported in-band.
    #[serde(default)]
    pub error: Option<String>,
}

/// Assemble an ordered frame sequence into one reply.
///
/// Frames after the `done` frame are ignored. When no `done` frame arrives
/// (the batched shape), the last audio reference seen is kept.
///
/// # Errors
///
/// Returns [`SessionError::Stream`] when a frame carries an `error` field.
pub fn assemble_reply(frames: impl IntoIterator<Item = ReplyFrame>) -> Result<BotReply> {
    let mut text = String::new();
    let mut audio_ref = None;

    for frame in frames {
        if let Some(error) = frame.error {
            return Err(SessionError::Stream(error));
        }
        if let Some(fragment) = frame.reply {
            text.push_str(&fragment);
        }
        if frame.done {
            // Only the terminal fragment's reference counts.
            audio_ref = frame.audio_ref;
            break;
        }
        if frame.audio_ref.is_some() {
            audio_ref = frame.audio_ref;
        }
    }

    Ok(BotReply { text, audio_ref })
}

/// Incremental decoder for newline-delimited reply frames.
///
/// Buffers raw bytes and splits on `\n`, so a frame split across network
/// chunks is reassembled before parsing. Decoding to text happens per
/// completed line; a chunk boundary inside a multi-byte character cannot
/// corrupt it. Lines may carry an optional `data:` prefix; blank lines and
/// unparseable lines are skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning any frames completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ReplyFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if let Some(frame) = parse_frame_line(&line[..end]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush the trailing line once the stream has ended.
    ///
    /// A batched reply is often a single object with no trailing newline;
    /// this is where it surfaces.
    pub fn finish(&mut self) -> Option<ReplyFrame> {
        let line = std::mem::take(&mut self.buffer);
        parse_frame_line(&line)
    }
}

/// Parse one line into a frame, `None` for blanks and junk.
fn parse_frame_line(line: &[u8]) -> Option<ReplyFrame> {
    let line = std::str::from_utf8(line).ok()?;
    let mut payload = line.trim_end_matches('\r').trim();
    if let Some(rest) = payload.strip_prefix("data:") {
        payload = rest.trim();
    }
    if payload.is_empty() {
        return None;
    }
    serde_json::from_str(payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(reply: Option<&str>, audio_ref: Option<&str>, done: bool) -> ReplyFrame {
        ReplyFrame {
            reply: reply.map(String::from),
            audio_ref: audio_ref.map(String::from),
            done,
            error: None,
        }
    }

    #[test]
    fn assembles_fragments_in_order() {
        let reply = assemble_reply([
            frame(Some("Hel"), None, false),
            frame(Some("lo"), None, false),
            frame(Some(""), Some("a.mp3"), true),
        ]);
        assert!(reply.is_ok());
        match reply {
            Ok(reply) => {
                assert_eq!(reply.text, "Hello");
                assert_eq!(reply.audio_ref.as_deref(), Some("a.mp3"));
            }
            Err(_) => unreachable!("assembly succeeded"),
        }
    }

    #[test]
    fn audio_ref_comes_only_from_done_frame() {
        let reply = assemble_reply([
            frame(Some("hi"), Some("early.mp3"), false),
            frame(None, None, true),
        ]);
        match reply {
            Ok(reply) => assert!(reply.audio_ref.is_none()),
            Err(_) => unreachable!("assembly succeeded"),
        }
    }

    #[test]
    fn batched_single_frame_keeps_its_audio_ref() {
        let reply = assemble_reply([frame(Some("hi"), Some("a.mp3"), false)]);
        match reply {
            Ok(reply) => {
                assert_eq!(reply.text, "hi");
                assert_eq!(reply.audio_ref.as_deref(), Some("a.mp3"));
            }
            Err(_) => unreachable!("assembly succeeded"),
        }
    }

    #[test]
    fn frames_after_done_are_ignored() {
        let reply = assemble_reply([
            frame(Some("hi"), None, true),
            frame(Some(" extra"), Some("late.mp3"), false),
        ]);
        match reply {
            Ok(reply) => {
                assert_eq!(reply.text, "hi");
                assert!(reply.audio_ref.is_none());
            }
            Err(_) => unreachable!("assembly succeeded"),
        }
    }

    #[test]
    fn error_frame_short_circuits() {
        let mut bad = frame(Some("partial"), None, false);
        bad.error = Some("model overloaded".into());
        let reply = assemble_reply([frame(Some("hi"), None, false), bad]);
        assert!(reply.is_err());
        match reply {
            Err(e) => {
                assert_eq!(e.code(), "STREAM_FAILED");
                assert_eq!(e.message(), "model overloaded");
            }
            Ok(_) => unreachable!("error frame aborts assembly"),
        }
    }

    #[test]
    fn empty_stream_assembles_to_empty_reply() {
        let reply = assemble_reply([]);
        match reply {
            Ok(reply) => {
                assert!(reply.text.is_empty());
                assert!(reply.audio_ref.is_none());
            }
            Err(_) => unreachable!("assembly succeeded"),
        }
    }

    #[test]
    fn decoder_parses_complete_lines() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"{\"reply\":\"a\",\"done\":false}\n{\"done\":true}\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].reply.as_deref(), Some("a"));
        assert!(frames[1].done);
    }

    #[test]
    fn decoder_reassembles_split_frames() {
        let mut decoder = FrameDecoder::new();
        let first = decoder.push(b"{\"reply\":\"Hel");
        assert!(first.is_empty());
        let second = decoder.push(b"lo\",\"done\":false}\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].reply.as_deref(), Some("Hello"));
    }

    #[test]
    fn decoder_survives_chunk_split_inside_multibyte_char() {
        // The two bytes of the 'é' arrive in different chunks.
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"{\"reply\":\"h\xc3").is_empty());
        let frames = decoder.push(b"\xa9llo\",\"done\":true}\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].reply.as_deref(), Some("héllo"));
    }

    #[test]
    fn decoder_finish_flushes_trailing_object() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"{\"reply\":\"hi\",\"audioRef\":\"a.mp3\"}").is_empty());
        let frame = decoder.finish();
        assert!(frame.is_some());
        match frame {
            Some(frame) => {
                assert_eq!(frame.reply.as_deref(), Some("hi"));
                assert_eq!(frame.audio_ref.as_deref(), Some("a.mp3"));
                assert!(!frame.done);
            }
            None => unreachable!("trailing frame parsed"),
        }
    }

    #[test]
    fn decoder_strips_data_prefix_and_crlf() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {\"reply\":\"x\",\"done\":true}\r\n");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].done);
    }

    #[test]
    fn decoder_skips_blank_and_junk_lines() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"\n\nnot json\n{\"done\":true}\n");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn frame_error_field_deserializes() {
        let frame: std::result::Result<ReplyFrame, _> =
            serde_json::from_str(r#"{"error":"boom"}"#);
        assert!(frame.is_ok());
        match frame {
            Ok(frame) => assert_eq!(frame.error.as_deref(), Some("boom")),
            Err(_) => unreachable!("frame parsed"),
        }
    }
}
