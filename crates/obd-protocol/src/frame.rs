//! Response Frame Decoding
//!
//! The adapter terminates every response with a `>` prompt. A single `read`
//! may hold part of a response, exactly one, or several; this module turns
//! those chunks into whole frames and splits each into whitespace tokens.

/// Prompt character marking the end of a response
pub const PROMPT: u8 = b'>';

/// Line prefixes the adapter emits while negotiating the bus
const NOISE_PREFIXES: [&str; 2] = ["SEARCHING", "BUS INIT"];

/// One complete, prompt-delimited response unit split into tokens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    tokens: Vec<String>,
}

impl RawFrame {
    /// Tokenize the text of one frame, dropping bus negotiation noise.
    ///
    /// Returns `None` when nothing but noise and whitespace remains.
    pub fn parse(text: &str) -> Option<Self> {
        let tokens: Vec<String> = text
            .split(['\r', '\n'])
            .map(str::trim)
            .filter(|line| !is_noise(line))
            .flat_map(str::split_whitespace)
            .map(str::to_string)
            .collect();

        if tokens.is_empty() {
            None
        } else {
            Some(Self { tokens })
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Case-insensitive token lookup
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t.eq_ignore_ascii_case(token))
    }

    /// Tokens re-joined with single spaces
    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }
}

impl std::fmt::Display for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text())
    }
}

fn is_noise(line: &str) -> bool {
    let upper = line.to_ascii_uppercase();
    NOISE_PREFIXES.iter().any(|prefix| upper.starts_with(prefix))
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\0', "")
}

/// Split one buffer into complete frames.
///
/// Text after the last prompt is a partial frame and is not returned.
pub fn split_frames(buf: &[u8]) -> Vec<RawFrame> {
    let complete = match buf.iter().rposition(|&b| b == PROMPT) {
        Some(pos) => &buf[..pos],
        None => return Vec::new(),
    };

    complete
        .split(|&b| b == PROMPT)
        .filter_map(|segment| RawFrame::parse(&decode_text(segment)))
        .collect()
}

/// Output of feeding one chunk to a [`FrameDecoder`]
#[derive(Debug, Default)]
pub struct Decoded {
    /// Frames completed by this chunk, oldest first
    pub frames: Vec<RawFrame>,
    /// Number of prompts seen in this chunk
    pub prompts: usize,
}

/// Stateful decoder that carries partial frames across reads
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Decoded {
        let prompts = chunk.iter().filter(|&&b| b == PROMPT).count();
        self.pending.extend_from_slice(chunk);

        if prompts == 0 {
            return Decoded::default();
        }

        let frames = split_frames(&self.pending);
        if let Some(pos) = self.pending.iter().rposition(|&b| b == PROMPT) {
            self.pending.drain(..=pos);
        }

        Decoded { frames, prompts }
    }

    /// Bytes held back waiting for a prompt
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
