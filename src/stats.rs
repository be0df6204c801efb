//! Engine-wide operation counters, surfaced for observability rather than
//! for any correctness decision the engine itself makes.

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub num_reads: u64,
    pub num_writes: u64,
    pub num_idx_reads: u64,
    pub num_idx_writes: u64,
    pub buffer_hits: u64,
    pub max_error: u32,
}

impl Stats {
    pub fn reset(&mut self) {
        *self = Stats {
            max_error: self.max_error,
            ..Default::default()
        };
    }

    pub fn record_data_read(&mut self) {
        self.num_reads += 1;
    }

    pub fn record_data_write(&mut self) {
        self.num_writes += 1;
    }

    pub fn record_idx_read(&mut self) {
        self.num_idx_reads += 1;
    }

    pub fn record_idx_write(&mut self) {
        self.num_idx_writes += 1;
    }

    pub fn record_buffer_hit(&mut self) {
        self.buffer_hits += 1;
    }

    pub fn observe_error(&mut self, error: u32) {
        self.max_error = self.max_error.max(error);
    }
}
