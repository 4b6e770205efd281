#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutConfig {
    /// Events buffered per attached client before new ones are dropped.
    pub client_buffer: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self { client_buffer: 64 }
    }
}
