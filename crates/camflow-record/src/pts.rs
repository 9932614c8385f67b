/// Clamps presentation timestamps so the emitted sequence never goes backwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtsCorrector {
    prev_us: u64,
}

impl PtsCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, raw_us: u64) -> u64 {
        let pts = raw_us.max(self.prev_us);
        self.prev_us = pts;
        pts
    }

    pub fn last(&self) -> u64 {
        self.prev_us
    }
}
