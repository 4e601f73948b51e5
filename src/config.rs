/// Unit of disk I/O and of buffer-pool residency.
pub const PAGE_SIZE: usize = 4096;

/// Number of frames in the buffer pool.
pub const BUFFER_POOL_SIZE: usize = 1024;

/// In-memory log buffer capacity; the log manager flushes when a record
/// would no longer fit.
pub const LOG_BUFFER_SIZE: usize = 512 * 1024;

/// Maximum size of a single client command on the wire.
pub const BUFFER_LENGTH: usize = 8192;

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 8765;

/// Number of left-side tuples buffered per block by the nested-loop join.
pub const JOIN_BLOCK_SIZE: usize = 30_000;

/// Name of the catalog dump inside a database directory.
pub const META_FILE_NAME: &str = "db.meta";

/// Name of the append-only log file inside a database directory.
pub const LOG_FILE_NAME: &str = "log.file";
