//! Grid sizing

/// Largest grid side the sizer will produce
pub const MAX_GRID_SIZE: u32 = 1 << 16;

/// Computes the smallest power-of-two grid for a payload
#[derive(Debug, Clone, Copy)]
pub struct GridSizer {
    /// Payload bytes per cell (3 dense, 4 code)
    pub bytes_per_pixel: usize,
    /// Extra bytes reserved on top of the payload
    pub slack_bytes: usize,
}

impl GridSizer {
    pub fn new(bytes_per_pixel: usize, slack_bytes: usize) -> Self {
        Self {
            bytes_per_pixel: bytes_per_pixel.max(1),
            slack_bytes,
        }
    }

    /// Smallest power-of-two side whose cells hold `payload_len + slack`
    pub fn grid_size(&self, payload_len: u64) -> u32 {
        let needed = payload_len.saturating_add(self.slack_bytes as u64);
        let pixels = needed.div_ceil(self.bytes_per_pixel as u64).max(1);
        let side = ceil_sqrt(pixels);
        let side = side.checked_next_power_of_two().unwrap_or(u64::MAX);
        side.min(MAX_GRID_SIZE as u64) as u32
    }

    /// Payload bytes a grid of `grid_size` can hold
    pub fn capacity(&self, grid_size: u32) -> u64 {
        (grid_size as u64) * (grid_size as u64) * self.bytes_per_pixel as u64
    }
}

/// Smallest power-of-two grid side for `payload_len` bytes
pub fn calculate_grid_size(payload_len: u64, bytes_per_pixel: usize) -> u32 {
    GridSizer::new(bytes_per_pixel, 0).grid_size(payload_len)
}

fn ceil_sqrt(n: u64) -> u64 {
    let mut s = (n as f64).sqrt() as u64;
    while s.saturating_mul(s) < n {
        s += 1;
    }
    while s > 0 && (s - 1).saturating_mul(s - 1) >= n {
        s -= 1;
    }
    s
}
