/// An object that can live in the cache and be spilled to a backing
/// store.
///
/// `nbytes` is the size the cache charges against its byte budget; it
/// should match the serialized size closely enough for the budget to
/// mean something, without requiring a full serialization to compute.
pub trait Cachable: Send + Sync + Sized + 'static {
    /// Approximate serialized size in bytes.
    fn nbytes(&self) -> usize;

    /// Serializes the object for the backing store.
    fn tobytes(&self) -> crate::Result<Vec<u8>>;

    /// Rebuilds the object from a backing store buffer.
    fn frombytes(buffer: &[u8]) -> crate::Result<Self>;
}
