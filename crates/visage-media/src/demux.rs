//! Splits a TTS byte stream carrying interleaved JSON metadata lines into
//! audio bytes and viseme metadata.
//!
//! The stream is scanned line by line. A line is metadata only if it is a
//! complete JSON object with a `visemes` field; every other byte, including
//! lines that merely look like JSON, stays in the audio accumulator in its
//! original order.

use tracing::debug;

use visage_core::RawVisemes;

/// Longest line still considered a metadata candidate.
const MAX_METADATA_LINE: usize = 1 << 20;

#[derive(Debug, Default)]
pub struct VisemeDemuxer {
    audio: Vec<u8>,
    /// Bytes of the current line, held back while it may still be metadata.
    line: Vec<u8>,
    /// The current line has already been routed to audio.
    line_is_audio: bool,
    metadata: Option<RawVisemes>,
}

impl VisemeDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        let mut rest = chunk;
        while !rest.is_empty() {
            let (segment, ends_line) = match rest.iter().position(|&b| b == b'\n') {
                Some(i) => (&rest[..=i], true),
                None => (rest, false),
            };
            rest = &rest[segment.len()..];

            if self.line_is_audio {
                self.audio.extend_from_slice(segment);
            } else {
                self.line.extend_from_slice(segment);
                if !self.line_may_be_metadata() {
                    self.audio.append(&mut self.line);
                    self.line_is_audio = true;
                }
            }

            if ends_line {
                if !self.line_is_audio {
                    self.close_line();
                }
                self.line_is_audio = false;
            }
        }
    }

    /// Bytes routed to audio so far.
    pub fn audio_len(&self) -> usize {
        self.audio.len()
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Flush the trailing partial line and return `(audio, metadata)`.
    pub fn finish(mut self) -> (Vec<u8>, Option<RawVisemes>) {
        if !self.line_is_audio && !self.line.is_empty() {
            self.close_line();
        }
        (self.audio, self.metadata)
    }

    fn line_may_be_metadata(&self) -> bool {
        if self.line.len() > MAX_METADATA_LINE {
            return false;
        }
        match self.line.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(&b) => b == b'{',
            None => true,
        }
    }

    fn close_line(&mut self) {
        let line = std::mem::take(&mut self.line);
        match parse_metadata(&line) {
            Some(visemes) => {
                debug!(line_bytes = line.len(), "Extracted viseme metadata from TTS stream");
                match &mut self.metadata {
                    Some(existing) => existing.merge(visemes),
                    None => self.metadata = Some(visemes),
                }
            }
            None => self.audio.extend_from_slice(&line),
        }
    }
}

fn parse_metadata(line: &[u8]) -> Option<RawVisemes> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if !(text.starts_with('{') && text.ends_with('}')) {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    RawVisemes::matches(&value).then_some(RawVisemes(value))
}

/// Demultiplex a complete buffer in one call.
pub fn demux(bytes: &[u8]) -> (Vec<u8>, Option<RawVisemes>) {
    let mut demuxer = VisemeDemuxer::new();
    demuxer.push(bytes);
    demuxer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const META: &[u8] = br#"{"visemes":[{"viseme":"PP","start":0.0,"end":0.1}]}"#;

    #[test]
    fn test_plain_audio_passes_through_unchanged() {
        let audio: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let (out, meta) = demux(&audio);
        assert_eq!(out, audio);
        assert!(meta.is_none());
    }

    #[test]
    fn test_metadata_line_is_removed_from_audio() {
        let mut stream = b"\xff\xfb\x90audio-head\n".to_vec();
        stream.extend_from_slice(META);
        stream.push(b'\n');
        stream.extend_from_slice(b"\x00\x01tail");

        let (audio, meta) = demux(&stream);
        assert_eq!(audio, b"\xff\xfb\x90audio-head\n\x00\x01tail".to_vec());
        assert_eq!(meta.unwrap().cues().len(), 1);
    }

    #[test]
    fn test_metadata_split_across_chunks() {
        let mut stream = b"ID3".to_vec();
        stream.push(b'\n');
        stream.extend_from_slice(META);
        stream.extend_from_slice(b"\nmore-audio");

        let mut demuxer = VisemeDemuxer::new();
        for chunk in stream.chunks(5) {
            demuxer.push(chunk);
        }
        let (audio, meta) = demuxer.finish();
        assert_eq!(audio, b"ID3\nmore-audio".to_vec());
        assert!(meta.is_some());
    }

    #[test]
    fn test_failed_parse_requeues_bytes_as_audio() {
        let stream = b"{not json at all}\n{\"other\":1}\n{\"visemes\":\n".to_vec();
        let (audio, meta) = demux(&stream);
        assert_eq!(audio, stream);
        assert!(meta.is_none());
    }

    #[test]
    fn test_trailing_metadata_without_newline() {
        let mut stream = b"audio\n".to_vec();
        stream.extend_from_slice(META);
        let (audio, meta) = demux(&stream);
        assert_eq!(audio, b"audio\n".to_vec());
        assert!(meta.is_some());
    }

    #[test]
    fn test_metadata_only_stream_has_no_audio() {
        let (audio, meta) = demux(META);
        assert!(audio.is_empty());
        assert!(meta.is_some());
    }

    #[test]
    fn test_repeated_metadata_lines_merge() {
        let mut stream = META.to_vec();
        stream.push(b'\n');
        stream.extend_from_slice(br#"{"visemes":[{"viseme":"FF","start":0.2}]}"#);
        stream.push(b'\n');
        let (_, meta) = demux(&stream);
        assert_eq!(meta.unwrap().cues().len(), 2);
    }

    #[test]
    fn test_invalid_utf8_line_stays_audio() {
        let stream = b"{\xff\xfe}\n".to_vec();
        let (audio, meta) = demux(&stream);
        assert_eq!(audio, stream);
        assert!(meta.is_none());
    }

    #[test]
    fn test_total_bytes_conserved_with_indented_metadata() {
        let mut stream = b"abc\n   ".to_vec();
        stream.extend_from_slice(META);
        stream.extend_from_slice(b"\r\nxyz");
        let (audio, meta) = demux(&stream);
        assert_eq!(audio, b"abc\nxyz".to_vec());
        assert!(meta.is_some());
    }
}
