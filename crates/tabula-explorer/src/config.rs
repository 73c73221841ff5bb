use std::time::Duration;

/// Tuning knobs for one table session.
#[derive(Clone, Debug)]
pub struct ExplorerConfig {
    /// Rows per cached cell block/tile (default: 128).
    pub rows_per_block: usize,
    /// Columns per cached cell block/tile (default: 32).
    pub cols_per_block: usize,
    /// Max number of cell blocks to keep cached (default: 256).
    pub max_cached_blocks: usize,
    /// Rows kept (and fetches kept alive) beyond the visible viewport
    /// (default: one block of 128).
    pub retain_margin_rows: usize,
    /// Columns kept beyond the visible viewport (default: one block of 32).
    pub retain_margin_columns: usize,
    /// A fetch that has not resolved within this interval fails with a
    /// timeout cause; retry only happens on viewport re-entry (default: 30s).
    pub fetch_timeout: Duration,
    /// Rapid viewport changes inside this window collapse into one fetch
    /// computation (default: 10ms).
    pub coalesce_delay: Duration,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            rows_per_block: 128,
            cols_per_block: 32,
            max_cached_blocks: 256,
            retain_margin_rows: 128,
            retain_margin_columns: 32,
            fetch_timeout: Duration::from_secs(30),
            coalesce_delay: Duration::from_millis(10),
        }
    }
}

impl ExplorerConfig {
    /// Clamp degenerate values rather than erroring, mirroring how the rest
    /// of the stack treats configuration.
    pub(crate) fn sanitized(mut self) -> Self {
        self.rows_per_block = self.rows_per_block.max(1);
        self.cols_per_block = self.cols_per_block.max(1);
        self.max_cached_blocks = self.max_cached_blocks.max(1);
        self
    }
}
