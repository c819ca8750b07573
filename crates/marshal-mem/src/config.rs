//! Arena configuration.

/// Smallest chunk a batching arena allocates (8 KiB).
pub const MIN_CHUNK_SIZE: usize = 8 * 1024;

/// Default ceiling for chunk growth (1 MiB).
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Environment variable overriding the initial chunk size.
pub const CHUNK_SIZE_VAR: &str = "MARSHAL_ARENA_CHUNK_SIZE";

/// Environment variable overriding the maximum chunk size.
pub const MAX_CHUNK_SIZE_VAR: &str = "MARSHAL_ARENA_MAX_CHUNK_SIZE";

/// Chunk sizing for arenas that batch allocations.
///
/// Chunks start at `chunk_size` and double on each growth, up to
/// `max_chunk_size`. A single request larger than the current chunk size
/// always gets a chunk of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Size of the first chunk in bytes.
    pub chunk_size: usize,
    /// Upper bound on the size chunks grow to.
    pub max_chunk_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            chunk_size: MIN_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

impl ArenaConfig {
    /// Builds a config, clamping and rounding sizes to valid values.
    #[must_use]
    pub fn new(chunk_size: usize, max_chunk_size: usize) -> Self {
        Self {
            chunk_size,
            max_chunk_size,
        }
        .normalized()
    }

    /// Reads overrides from [`CHUNK_SIZE_VAR`] and [`MAX_CHUNK_SIZE_VAR`].
    ///
    /// Missing or unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |var: &str, fallback: usize| {
            std::env::var(var)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(fallback)
        };
        Self::new(
            read(CHUNK_SIZE_VAR, defaults.chunk_size),
            read(MAX_CHUNK_SIZE_VAR, defaults.max_chunk_size),
        )
    }

    /// Size of the chunk to allocate after one of `last` bytes, for a
    /// request of `request` bytes.
    #[must_use]
    pub fn next_chunk_size(&self, last: usize, request: usize) -> usize {
        last.saturating_mul(2)
            .min(self.max_chunk_size)
            .max(request)
    }

    fn normalized(self) -> Self {
        let chunk_size = self
            .chunk_size
            .max(MIN_CHUNK_SIZE)
            .checked_next_power_of_two()
            .unwrap_or(DEFAULT_MAX_CHUNK_SIZE);
        let max_chunk_size = self
            .max_chunk_size
            .max(chunk_size)
            .checked_next_power_of_two()
            .unwrap_or(chunk_size);
        Self {
            chunk_size,
            max_chunk_size,
        }
    }
}
