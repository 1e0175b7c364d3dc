pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Chunks generated by an engine never hold more data bytes than this,
/// unless the engine was built with an explicit size.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 32 * MB;

/// Default byte budget for an in-memory cache layer.
pub const DEFAULT_MEMORY_CACHE_SIZE: usize = 256 * MB;

/// Version string written into every chunk header.
pub const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");
