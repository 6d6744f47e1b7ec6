use std::str::FromStr;

const TERMINALS: [char; 3] = ['.', '!', '?'];

/// What to do with text left in the buffer when generation ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResidualPolicy {
    /// Drop unterminated trailing text.
    #[default]
    Discard,
    /// Emit it as a final sentence when non-blank.
    Flush,
}

impl FromStr for ResidualPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "flush" => Ok(Self::Flush),
            other => Err(format!("unknown residual policy: {other}")),
        }
    }
}

/// Accumulates fragments and releases the buffer whenever it ends with
/// sentence-terminal punctuation.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
    policy: ResidualPolicy,
}

impl SentenceSegmenter {
    pub fn new(policy: ResidualPolicy) -> Self {
        Self {
            buffer: String::new(),
            policy,
        }
    }

    pub fn feed(&mut self, fragment: &str) -> Option<String> {
        self.buffer.push_str(fragment);
        if self.buffer.ends_with(TERMINALS) {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Unterminated text currently held.
    pub fn residual(&self) -> &str {
        &self.buffer
    }

    /// End of generation. Returns the residual only under `Flush`.
    pub fn finish(&mut self) -> Option<String> {
        let residual = std::mem::take(&mut self.buffer);
        match self.policy {
            ResidualPolicy::Flush if !residual.trim().is_empty() => Some(residual),
            _ => None,
        }
    }
}
