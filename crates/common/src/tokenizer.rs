//! Deterministic text tokenizer
//!
//! Words are lower-cased, split on whitespace and hashed into the id range
//! `[FIRST_WORD_ID, vocab_size)`. Hashing keeps ids identical across the
//! coordinator and every worker without sharing a vocabulary file.

pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;
pub const START_ID: u32 = 2;
pub const END_ID: u32 = 3;
const FIRST_WORD_ID: u32 = 4;

/// Hashing whitespace tokenizer
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab_size: usize,
}

impl Tokenizer {
    pub fn new(vocab_size: usize) -> Self {
        Self { vocab_size }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Id of a single word
    pub fn token_id(&self, word: &str) -> u32 {
        let buckets = self.vocab_size.saturating_sub(FIRST_WORD_ID as usize) as u64;
        if buckets == 0 {
            return UNK_ID;
        }
        FIRST_WORD_ID + (fnv1a(word.to_lowercase().as_bytes()) % buckets) as u32
    }

    /// Encode `text` as `START, words.., END`, truncated to `max_length` ids.
    ///
    /// No padding is added; callers iterate over the returned ids directly.
    pub fn encode(&self, text: &str, max_length: usize) -> Vec<u32> {
        let room = max_length.saturating_sub(2);
        let mut ids = Vec::with_capacity(max_length.min(room + 2));
        ids.push(START_ID);
        ids.extend(text.split_whitespace().take(room).map(|w| self.token_id(w)));
        ids.push(END_ID);
        ids.truncate(max_length);
        ids
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
