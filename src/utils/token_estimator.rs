//! Character-ratio token estimation for embedding batch sizing.
//!
//! Embedding providers meter by tokens but the importer only sees raw text,
//! so batches are sized from a conservative estimate: characters divided by
//! a chars-per-token ratio, plus a 10% safety buffer. Structured content
//! (JSON, code) tokenizes denser than prose and gets a further 30% uplift.

pub const DEFAULT_ESTIMATION_RATIO: usize = 3;

const SAFETY_BUFFER: f64 = 1.1;
const STRUCTURED_UPLIFT: f64 = 1.3;

/// Estimate the token count of `text` using a chars-per-token `ratio`.
pub fn estimate_tokens(text: &str, ratio: usize) -> usize {
    if text.is_empty() {
        return 0;
    }
    let ratio = ratio.max(1) as f64;
    let mut estimate = (text.len() as f64 / ratio).ceil() * SAFETY_BUFFER;
    if looks_structured(text) {
        estimate *= STRUCTURED_UPLIFT;
    }
    estimate.ceil() as usize
}

/// Structural-character density above 5% marks text as JSON/code-like.
fn looks_structured(text: &str) -> bool {
    let structural = text
        .bytes()
        .filter(|b| matches!(b, b'{' | b'}' | b'[' | b']' | b'"' | b':'))
        .count();
    structural * 20 > text.len()
}
