//! Hilbert space-filling curve
//!
//! Bijection between a linear index `d` in `[0, N²)` and grid coordinates
//! `(x, y)` in `[0, N)²` for a square grid of side `N = 2^order`.
//!
//! ```text
//! order 1:        order 2:
//!  1 ─ 2           5 ─ 6   9 ─10
//!  │   │           │   │   │   │
//!  0   3           4   7 ─ 8  11
//!                  │           │
//!                  3 ─ 2  13 ─12
//!                      │   │
//!                  0 ─ 1  14 ─15
//! ```
//!
//! Consecutive indices are always adjacent cells, so a linear byte stream
//! laid along the curve stays spatially clustered.

pub mod cache;

pub use cache::{CurveCache, CurveCacheStats};

use crate::error::{Error, Result};

/// Largest supported curve order (65536 x 65536 grid)
pub const MAX_ORDER: u32 = 16;

/// Hilbert curve of a fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HilbertCurve {
    order: u32,
    side: u32,
}

impl HilbertCurve {
    /// Create a curve for a grid of side `2^order`
    pub fn new(order: u32) -> Result<Self> {
        if order > MAX_ORDER {
            return Err(Error::InvalidArgument(format!(
                "Curve order {} exceeds maximum {}",
                order, MAX_ORDER
            )));
        }
        Ok(Self {
            order,
            side: 1u32 << order,
        })
    }

    /// Create the curve matching a grid side length
    pub fn for_grid(grid_size: u32) -> Result<Self> {
        Self::new(order_of(grid_size)?)
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    /// Grid side length (N)
    pub fn side(&self) -> u32 {
        self.side
    }

    /// Number of cells on the curve (N²)
    pub fn len(&self) -> u64 {
        (self.side as u64) * (self.side as u64)
    }

    /// Always false: a curve covers at least one cell
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Map a curve index to its `(x, y)` cell
    pub fn d2xy(&self, d: u64) -> (u32, u32) {
        let n = self.side as u64;
        let mut t = d;
        let (mut x, mut y) = (0u64, 0u64);
        let mut s = 1u64;
        while s < n {
            let rx = 1 & (t / 2);
            let ry = 1 & (t ^ rx);
            rotate(s, &mut x, &mut y, rx, ry);
            x += s * rx;
            y += s * ry;
            t /= 4;
            s *= 2;
        }
        (x as u32, y as u32)
    }

    /// Map an `(x, y)` cell to its curve index
    pub fn xy2d(&self, x: u32, y: u32) -> u64 {
        let n = self.side as u64;
        let (mut x, mut y) = (x as u64, y as u64);
        let mut d = 0u64;
        let mut s = n / 2;
        while s > 0 {
            let rx = u64::from(x & s > 0);
            let ry = u64::from(y & s > 0);
            d += s * s * ((3 * rx) ^ ry);
            rotate(n, &mut x, &mut y, rx, ry);
            s /= 2;
        }
        d
    }

    /// Iterate cells in curve order
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.len()).map(move |d| self.d2xy(d))
    }

    /// Materialise the full index -> coordinate table
    pub fn table(&self) -> Vec<(u32, u32)> {
        let mut table = Vec::with_capacity(self.len() as usize);
        table.extend(self.iter());
        table
    }
}

/// Reflect/transpose the sub-square when the traversal enters it
fn rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = n - 1 - *x;
            *y = n - 1 - *y;
        }
        std::mem::swap(x, y);
    }
}

/// Curve order for a power-of-two grid side
pub fn order_of(grid_size: u32) -> Result<u32> {
    if grid_size == 0 || !grid_size.is_power_of_two() {
        return Err(Error::Format(format!(
            "Grid size must be a power of two, got {}",
            grid_size
        )));
    }
    Ok(grid_size.trailing_zeros())
}
