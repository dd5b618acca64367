use crate::engine::BoxReader;

/// A bidirectional byte stream filter (for example compression or encryption).
///
/// `decode(encode(x))` must yield `x`. Objects are stored in encoded form and
/// replicated as-is.
pub trait ByteTransform: Send + Sync {
    /// Wrap data on its way into the engine.
    fn encode(&self, input: BoxReader) -> BoxReader;

    /// Wrap data on its way out of the engine.
    fn decode(&self, input: BoxReader) -> BoxReader;
}
