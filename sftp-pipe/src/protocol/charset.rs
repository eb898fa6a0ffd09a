//! UTF-8 text codec with chunk-boundary state.
//!
//! Strings on the wire are plain UTF-8, but packet payloads and file
//! contents arrive in arbitrary byte ranges. The decoder keeps up to three
//! pending bytes of an incomplete sequence between calls so that a code
//! point split across two chunks decodes exactly as if the chunks had been
//! concatenated. Malformed input never fails: each run of bytes that cannot
//! form a complete code point becomes a single U+FFFD.

/// Unicode replacement character emitted for undecodable byte runs.
pub const REPLACEMENT: char = '\u{FFFD}';

/// Encode text into a freshly allocated byte vector.
pub fn encode(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Decode a complete byte buffer, replacing malformed runs.
pub fn decode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut decoder = Utf8Decoder::new();
    decoder.write(bytes, &mut out);
    decoder.finish(&mut out);
    out
}

/// Outcome of [`encode_bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoded {
    /// All of the text fit; `bytes` were written.
    Complete { bytes: usize },
    /// Only a prefix fit. `chars` source characters were consumed and
    /// `bytes` bytes were written.
    Partial { chars: usize, bytes: usize },
    /// Not even the first character fit.
    NoFit,
}

/// Encode as many whole characters of `text` as fit into `out`.
///
/// Characters are never split; the caller learns exactly how far it got so a
/// length-prefixed string can be written in one exact-fit pass.
pub fn encode_bounded(text: &str, out: &mut [u8]) -> Encoded {
    if text.len() <= out.len() {
        out[..text.len()].copy_from_slice(text.as_bytes());
        return Encoded::Complete { bytes: text.len() };
    }

    let mut written = 0;
    let mut chars = 0;
    for ch in text.chars() {
        let len = ch.len_utf8();
        if written + len > out.len() {
            break;
        }
        ch.encode_utf8(&mut out[written..written + len]);
        written += len;
        chars += 1;
    }

    if chars == 0 {
        Encoded::NoFit
    } else {
        Encoded::Partial {
            chars,
            bytes: written,
        }
    }
}

/// Incremental encoder that fills caller buffers completely.
///
/// Unlike [`encode_bounded`], code points may be split between two calls:
/// every call to [`Utf8Encoder::read`] writes `min(out.len(), remaining)`
/// bytes.
#[derive(Debug, Clone)]
pub struct Utf8Encoder {
    bytes: Vec<u8>,
    pos: usize,
}

impl Utf8Encoder {
    pub fn new(text: &str) -> Self {
        Self {
            bytes: encode(text),
            pos: 0,
        }
    }

    /// Copy the next encoded bytes into `out`, returning how many were written.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.bytes.len() - self.pos);
        out[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Bytes still waiting to be read.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_finished(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

/// Incremental decoder carrying an incomplete sequence between calls.
#[derive(Debug, Default, Clone)]
pub struct Utf8Decoder {
    pending: [u8; 4],
    pending_len: usize,
    needed: usize,
    /// Last thing emitted was a replacement for the current bad run.
    in_bad_run: bool,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lead bytes held over from the previous chunk (0..=3).
    pub fn pending_len(&self) -> usize {
        self.pending_len
    }

    /// Decode `bytes`, appending complete characters to `out`.
    pub fn write(&mut self, bytes: &[u8], out: &mut String) {
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];

            if self.needed == 0 {
                // Fast path for runs of ASCII.
                if b < 0x80 {
                    let start = i;
                    while i < bytes.len() && bytes[i] < 0x80 {
                        i += 1;
                    }
                    out.extend(bytes[start..i].iter().map(|&c| c as char));
                    self.in_bad_run = false;
                    continue;
                }
                match sequence_len(b) {
                    Some(len) => {
                        self.pending[0] = b;
                        self.pending_len = 1;
                        self.needed = len;
                    }
                    None => self.replace(out),
                }
                i += 1;
                continue;
            }

            if is_valid_continuation(self.pending[0], self.pending_len, b) {
                self.pending[self.pending_len] = b;
                self.pending_len += 1;
                i += 1;
                if self.pending_len == self.needed {
                    match std::str::from_utf8(&self.pending[..self.pending_len]) {
                        Ok(s) => {
                            out.push_str(s);
                            self.in_bad_run = false;
                        }
                        Err(_) => self.replace(out),
                    }
                    self.reset();
                }
            } else {
                // Truncated sequence: replace it and reprocess `b` from scratch.
                self.replace(out);
                self.reset();
            }
        }
    }

    /// Flush any incomplete trailing sequence as a replacement character.
    pub fn finish(&mut self, out: &mut String) {
        if self.needed != 0 {
            self.replace(out);
        }
        self.reset();
        self.in_bad_run = false;
    }

    fn replace(&mut self, out: &mut String) {
        if !self.in_bad_run {
            out.push(REPLACEMENT);
            self.in_bad_run = true;
        }
    }

    fn reset(&mut self) {
        self.pending_len = 0;
        self.needed = 0;
    }
}

/// Total sequence length announced by a lead byte, if it is a valid lead.
fn sequence_len(lead: u8) -> Option<usize> {
    match lead {
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

/// Whether `b` may follow `lead` at position `pos` of a sequence.
///
/// The second byte carries the extra range constraints that exclude
/// overlong forms, surrogates and code points above U+10FFFF.
fn is_valid_continuation(lead: u8, pos: usize, b: u8) -> bool {
    if pos == 1 {
        let range = match lead {
            0xE0 => 0xA0..=0xBF,
            0xED => 0x80..=0x9F,
            0xF0 => 0x90..=0xBF,
            0xF4 => 0x80..=0x8F,
            _ => 0x80..=0xBF,
        };
        range.contains(&b)
    } else {
        (0x80..=0xBF).contains(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "ab \u{00e9}\u{20ac} \u{1F600} \u{4e2d}\u{6587}";

    #[test]
    fn test_round_trip_multibyte() {
        for s in ["", "plain", SAMPLE, "\u{10FFFF}\u{1D11E}"] {
            assert_eq!(decode(&encode(s)), s);
        }
    }

    #[test]
    fn test_split_decode_matches_whole() {
        let bytes = encode(SAMPLE);
        for k in 0..=bytes.len() {
            let mut decoder = Utf8Decoder::new();
            let mut out = String::new();
            decoder.write(&bytes[..k], &mut out);
            assert!(decoder.pending_len() <= 3);
            decoder.write(&bytes[k..], &mut out);
            decoder.finish(&mut out);
            assert_eq!(out, SAMPLE, "split at {}", k);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = encode(SAMPLE);
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for b in &bytes {
            decoder.write(std::slice::from_ref(b), &mut out);
        }
        decoder.finish(&mut out);
        assert_eq!(out, SAMPLE);
    }

    #[test]
    fn test_truncated_sequence_at_end() {
        // Euro sign is E2 82 AC; drop the last byte.
        assert_eq!(decode(&[b'a', 0xE2, 0x82]), "a\u{FFFD}");
    }

    #[test]
    fn test_bad_run_yields_one_replacement() {
        assert_eq!(decode(&[b'x', 0xFF, 0xFE, 0x80, b'y']), "x\u{FFFD}y");
        assert_eq!(decode(&[0xE2, 0x82, b'z']), "\u{FFFD}z");
    }

    #[test]
    fn test_surrogates_and_overlong_rejected() {
        // Encoded surrogate U+D800 and overlong '/'.
        assert_eq!(decode(&[0xED, 0xA0, 0x80]), "\u{FFFD}");
        assert_eq!(decode(&[0xC0, 0xAF]), "\u{FFFD}");
    }

    #[test]
    fn test_encode_bounded() {
        let mut buf = [0u8; 4];
        assert_eq!(encode_bounded("ab", &mut buf), Encoded::Complete { bytes: 2 });
        // "a" + euro (3 bytes) + "b": only "a" and the euro fit.
        assert_eq!(
            encode_bounded("a\u{20ac}b", &mut buf),
            Encoded::Partial { chars: 2, bytes: 4 }
        );
        assert_eq!(&buf, &[b'a', 0xE2, 0x82, 0xAC]);

        let mut small = [0u8; 2];
        assert_eq!(encode_bounded("\u{20ac}", &mut small), Encoded::NoFit);
    }

    #[test]
    fn test_chunked_encoder_splits_code_points() {
        let text = "abc\u{20ac}\u{1F600}\u{4e2d}\u{6587}exyz";
        assert_eq!(text.len(), 20);

        let mut encoder = Utf8Encoder::new(text);
        let mut collected = Vec::new();
        for size in [3, 6, 7, 4] {
            let mut buf = vec![0u8; size];
            let n = encoder.read(&mut buf);
            assert_eq!(n, size);
            collected.extend_from_slice(&buf[..n]);
        }
        assert!(encoder.is_finished());
        assert_eq!(collected, text.as_bytes());

        // The chunks split characters mid-sequence yet decode back intact.
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for chunk in [&collected[..3], &collected[3..9], &collected[9..16], &collected[16..]] {
            decoder.write(chunk, &mut out);
        }
        decoder.finish(&mut out);
        assert_eq!(out, text);
    }
}
