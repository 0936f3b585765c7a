use bytes::Bytes;

/// A batch of buffers produced or consumed by one read/write call. Kept
/// generic over the embedder's own framing so this crate never commits to
/// a concrete proxy packet type.
pub type Frame = Vec<Bytes>;

/// Total byte length across every buffer in a frame.
pub fn frame_len(frame: &Frame) -> usize {
    frame.iter().map(Bytes::len).sum()
}
