//! Radial zone classification
//!
//! Distance from the grid centre, normalised by half the grid side, is
//! bucketed into five bands. Hot data lands near the centre, cold data at
//! the edges and corners.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::trace;

/// Radial band of the grid, hottest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    Hot,
    Warm,
    Temperate,
    Cool,
    Cold,
}

impl Zone {
    pub const ALL: [Zone; 5] = [Zone::Hot, Zone::Warm, Zone::Temperate, Zone::Cool, Zone::Cold];

    /// Outer edge of each band as a fraction of half the grid side
    const OUTER: [f64; 5] = [0.0625, 0.1875, 0.4375, 0.6875, f64::INFINITY];

    pub fn index(self) -> usize {
        self as usize
    }

    /// `(inner, outer)` normalised distance bounds; COLD is unbounded
    pub fn boundaries(self) -> (f64, f64) {
        let i = self.index();
        let inner = if i == 0 { 0.0 } else { Self::OUTER[i - 1] };
        (inner, Self::OUTER[i])
    }

    /// Band containing a normalised distance
    pub fn from_normalized_distance(distance: f64) -> Zone {
        Zone::ALL
            .into_iter()
            .find(|zone| distance <= Self::OUTER[zone.index()])
            .unwrap_or(Zone::Cold)
    }

    /// Zones to try when this one is full: cooler ones, then hotter ones
    pub fn spill_order(self) -> impl Iterator<Item = Zone> {
        let i = self.index();
        Zone::ALL[i..]
            .iter()
            .chain(Zone::ALL[..i].iter().rev())
            .copied()
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Zone::Hot => "HOT",
            Zone::Warm => "WARM",
            Zone::Temperate => "TEMPERATE",
            Zone::Cool => "COOL",
            Zone::Cold => "COLD",
        };
        f.write_str(name)
    }
}

/// How often a file is expected to be read, most critical first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessFrequency {
    Critical,
    High,
    Medium,
    Low,
    Rare,
}

enum Pattern {
    /// Substring anywhere in the lowercased path
    Contains(&'static str),
    /// Basename starts with
    Prefix(&'static str),
    /// Basename equals
    Base(&'static str),
    /// Basename ends with
    Suffix(&'static str),
}

impl Pattern {
    fn matches(&self, path: &str, base: &str) -> bool {
        match self {
            Pattern::Contains(p) => path.contains(p),
            Pattern::Prefix(p) => base.starts_with(p),
            Pattern::Base(p) => base == *p,
            Pattern::Suffix(p) => base.ends_with(p),
        }
    }
}

use Pattern::{Base, Contains, Prefix, Suffix};

/// Naming rules, first match wins
const RULES: &[(&[Pattern], Zone, AccessFrequency)] = &[
    // Kernels and bootloaders
    (
        &[
            Contains("vmlinuz"),
            Contains("vmlinux"),
            Contains("bzimage"),
            Prefix("kernel"),
            Contains("bootloader"),
            Contains("grub"),
            Contains("syslinux"),
            Base("core.elf"),
            Base("system.bin"),
        ],
        Zone::Hot,
        AccessFrequency::Critical,
    ),
    // Shared libraries
    (
        &[
            Suffix(".so"),
            Contains(".so."),
            Suffix(".dll"),
            Suffix(".dylib"),
            Contains("/lib/"),
            Contains("/lib64/"),
        ],
        Zone::Hot,
        AccessFrequency::High,
    ),
    // Init and early boot
    (
        &[Prefix("init"), Prefix("startup"), Contains("/sbin/")],
        Zone::Warm,
        AccessFrequency::High,
    ),
    // Interpreters and shells
    (
        &[
            Base("sh"),
            Base("bash"),
            Base("zsh"),
            Base("dash"),
            Base("ksh"),
            Base("fish"),
            Base("busybox"),
            Prefix("python"),
            Base("perl"),
            Base("ruby"),
            Base("node"),
            Base("lua"),
            Contains("/bin/"),
        ],
        Zone::Warm,
        AccessFrequency::Medium,
    ),
    // Configuration
    (
        &[
            Suffix(".conf"),
            Suffix(".cfg"),
            Suffix(".ini"),
            Suffix(".yaml"),
            Suffix(".yml"),
            Suffix(".toml"),
            Suffix(".json"),
            Contains("/etc/"),
        ],
        Zone::Temperate,
        AccessFrequency::Low,
    ),
    // Archives, backups, logs
    (
        &[
            Suffix(".tar"),
            Suffix(".gz"),
            Suffix(".tgz"),
            Suffix(".xz"),
            Suffix(".bz2"),
            Suffix(".zst"),
            Suffix(".zip"),
            Suffix(".7z"),
            Suffix(".bak"),
            Suffix(".old"),
            Suffix(".log"),
            Contains("backup"),
            Contains("/archive/"),
        ],
        Zone::Cold,
        AccessFrequency::Rare,
    ),
    // Models and opaque blobs
    (
        &[
            Suffix(".bin"),
            Suffix(".gguf"),
            Suffix(".safetensors"),
            Suffix(".onnx"),
            Suffix(".pt"),
            Suffix(".ckpt"),
            Suffix(".model"),
            Suffix(".img"),
            Suffix(".iso"),
            Contains("/models/"),
        ],
        Zone::Cool,
        AccessFrequency::Low,
    ),
];

/// Cells of the grid ordered by distance from the centre
struct ZoneCells {
    order: Vec<(u32, u32)>,
    /// Zone `i` owns `order[bounds[i]..bounds[i + 1]]`
    bounds: [usize; 6],
}

/// Radial classifier for one grid size
pub struct ZoneClassifier {
    grid_size: u32,
    cells: OnceLock<ZoneCells>,
}

impl ZoneClassifier {
    pub fn new(grid_size: u32) -> Self {
        Self {
            grid_size: grid_size.max(1),
            cells: OnceLock::new(),
        }
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Twice-scaled squared distance of a cell centre from the grid centre
    fn scaled_distance_sq(&self, x: u32, y: u32) -> u64 {
        let n = self.grid_size as i64;
        let dx = 2 * x as i64 + 1 - n;
        let dy = 2 * y as i64 + 1 - n;
        (dx * dx + dy * dy) as u64
    }

    /// Distance of a cell centre from the grid centre over half the side
    pub fn normalized_distance(&self, x: u32, y: u32) -> f64 {
        (self.scaled_distance_sq(x, y) as f64).sqrt() / self.grid_size as f64
    }

    pub fn get_zone(&self, x: u32, y: u32) -> Zone {
        Zone::from_normalized_distance(self.normalized_distance(x, y))
    }

    /// `(inner, outer)` bounds of a zone as fractions of half the side
    pub fn get_zone_boundaries(&self, zone: Zone) -> (f64, f64) {
        zone.boundaries()
    }

    /// Zone bounds in pixels from the centre; COLD reaches the corners
    pub fn get_zone_radii(&self, zone: Zone) -> (f64, f64) {
        let half = self.grid_size as f64 / 2.0;
        let (inner, outer) = zone.boundaries();
        let corner = half * std::f64::consts::SQRT_2;
        (inner * half, (outer * half).min(corner))
    }

    fn cells(&self) -> &ZoneCells {
        self.cells.get_or_init(|| {
            let n = self.grid_size;
            let mut order: Vec<(u32, u32)> = (0..n)
                .flat_map(|y| (0..n).map(move |x| (x, y)))
                .collect();
            order.sort_unstable_by_key(|&(x, y)| (self.scaled_distance_sq(x, y), y, x));

            let mut bounds = [order.len(); 6];
            bounds[0] = 0;
            for zone in &Zone::ALL[1..] {
                bounds[zone.index()] =
                    order.partition_point(|&(x, y)| self.get_zone(x, y) < *zone);
            }
            ZoneCells { order, bounds }
        })
    }

    /// Cells of a zone, nearest the centre first
    pub fn zone_cells(&self, zone: Zone) -> &[(u32, u32)] {
        let cells = self.cells();
        let i = zone.index();
        &cells.order[cells.bounds[i]..cells.bounds[i + 1]]
    }

    /// Number of cells in a zone
    pub fn zone_capacity(&self, zone: Zone) -> usize {
        self.zone_cells(zone).len()
    }

    /// Up to `count` cells of `zone`, nearest the centre first
    pub fn allocate_in_zone(&self, zone: Zone, count: usize) -> Vec<(u32, u32)> {
        let cells = self.zone_cells(zone);
        cells[..count.min(cells.len())].to_vec()
    }

    /// Zone and access frequency from naming heuristics
    pub fn classify_file(name: &str, size: u64) -> (Zone, AccessFrequency) {
        let path = name.to_lowercase();
        let base = path.rsplit('/').next().unwrap_or(&path);

        let (zone, frequency) = RULES
            .iter()
            .find(|(patterns, _, _)| patterns.iter().any(|p| p.matches(&path, base)))
            .map(|&(_, zone, frequency)| (zone, frequency))
            .unwrap_or((Zone::Temperate, AccessFrequency::Medium));

        trace!(name, size, %zone, ?frequency, "Classified file");
        (zone, frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_file_rules() {
        assert_eq!(
            ZoneClassifier::classify_file("vmlinuz", 8_000_000),
            (Zone::Hot, AccessFrequency::Critical)
        );
        assert_eq!(
            ZoneClassifier::classify_file("backup.tar.gz", 100_000_000),
            (Zone::Cold, AccessFrequency::Rare)
        );
        assert_eq!(
            ZoneClassifier::classify_file("/usr/lib/libc.so.6", 2_000_000),
            (Zone::Hot, AccessFrequency::High)
        );
        assert_eq!(
            ZoneClassifier::classify_file("/bin/bash", 1_000_000),
            (Zone::Warm, AccessFrequency::Medium)
        );
        assert_eq!(
            ZoneClassifier::classify_file("models/llama.gguf", 4_000_000_000),
            (Zone::Cool, AccessFrequency::Low)
        );
        assert_eq!(
            ZoneClassifier::classify_file("notes.txt", 100),
            (Zone::Temperate, AccessFrequency::Medium)
        );
    }

    #[test]
    fn test_classify_ignores_short_substrings() {
        // "sh" only matches a whole basename
        assert_eq!(
            ZoneClassifier::classify_file("splash.txt", 10),
            (Zone::Temperate, AccessFrequency::Medium)
        );
    }

    #[test]
    fn test_center_is_hot_corner_is_cold() {
        let zones = ZoneClassifier::new(64);
        assert_eq!(zones.get_zone(32, 32), Zone::Hot);
        assert_eq!(zones.get_zone(31, 31), Zone::Hot);
        assert_eq!(zones.get_zone(0, 0), Zone::Cold);
        assert_eq!(zones.get_zone(63, 63), Zone::Cold);
    }

    #[test]
    fn test_single_cell_grid() {
        let zones = ZoneClassifier::new(1);
        assert_eq!(zones.get_zone(0, 0), Zone::Hot);
        assert_eq!(zones.zone_capacity(Zone::Hot), 1);
    }

    #[test]
    fn test_zones_monotone_along_ray() {
        let zones = ZoneClassifier::new(128);
        for &(dx, dy) in &[(1i64, 0i64), (0, 1), (1, 1), (-1, 0), (-1, -1), (2, 1)] {
            let (mut x, mut y) = (64i64, 64i64);
            let mut hottest_allowed = Zone::Hot;
            while (0..128).contains(&x) && (0..128).contains(&y) {
                let zone = zones.get_zone(x as u32, y as u32);
                assert!(zone >= hottest_allowed, "ray ({}, {}) regressed", dx, dy);
                hottest_allowed = zone;
                x += dx;
                y += dy;
            }
        }
    }

    #[test]
    fn test_zone_cells_partition_grid() {
        let zones = ZoneClassifier::new(32);
        let total: usize = Zone::ALL.iter().map(|&z| zones.zone_capacity(z)).sum();
        assert_eq!(total, 32 * 32);
        for zone in Zone::ALL {
            for &(x, y) in zones.zone_cells(zone) {
                assert_eq!(zones.get_zone(x, y), zone);
            }
        }
    }

    #[test]
    fn test_boundaries_are_contiguous() {
        let mut previous_outer = 0.0;
        for zone in Zone::ALL {
            let (inner, outer) = zone.boundaries();
            assert_eq!(inner, previous_outer);
            assert!(outer > inner);
            previous_outer = outer;
        }
        assert!(Zone::Cold.boundaries().1.is_infinite());
    }

    #[test]
    fn test_allocate_in_zone() {
        let zones = ZoneClassifier::new(64);
        let cells = zones.allocate_in_zone(Zone::Warm, 10);
        assert_eq!(cells.len(), 10);
        assert!(cells.iter().all(|&(x, y)| zones.get_zone(x, y) == Zone::Warm));

        let all_hot = zones.allocate_in_zone(Zone::Hot, usize::MAX);
        assert_eq!(all_hot.len(), zones.zone_capacity(Zone::Hot));
    }

    #[test]
    fn test_spill_order() {
        let order: Vec<Zone> = Zone::Temperate.spill_order().collect();
        assert_eq!(
            order,
            vec![Zone::Temperate, Zone::Cool, Zone::Cold, Zone::Warm, Zone::Hot]
        );
    }
}
