//! Zone-aware layout behaviour through the public API

use pixelrts::container::{Decoder, Encoder, FileSet};
use pixelrts::layout::{AccessFrequency, BlockRef, LayoutOptimizer, Zone, ZoneClassifier};
use pixelrts::{CodecConfig, EncodingMode, PixelGrid};
use std::collections::{HashMap, HashSet};

fn file_bytes(file_id: u32, size: u64) -> Vec<u8> {
    (0..size).map(|i| (i * 31 + file_id as u64 * 7) as u8).collect()
}

/// Write every file's bytes into a fresh code-mode grid through its fragments
fn paint(layout: &LayoutOptimizer, contents: &HashMap<u32, Vec<u8>>) -> PixelGrid {
    let mut grid = PixelGrid::new(layout.grid_size(), EncodingMode::Code).expect("grid");
    for file in layout.files() {
        let data = &contents[&file.file_id];
        for fragment in &file.fragments {
            let start = fragment.offset as usize;
            let bytes = &data[start..start + fragment.size as usize];
            let cells = layout.fragment_cells(fragment).expect("cells");
            assert_eq!(cells.len(), bytes.len().div_ceil(4));
            for (chunk, &(x, y)) in bytes.chunks(4).zip(cells) {
                grid.put(x, y, chunk);
            }
        }
    }
    grid
}

fn recover(layout: &LayoutOptimizer, grid: &PixelGrid, file_id: u32) -> Vec<u8> {
    let file = layout.file(file_id).expect("file");
    let mut out = vec![0u8; file.size as usize];
    for fragment in &file.fragments {
        let start = fragment.offset as usize;
        let end = start + fragment.size as usize;
        let cells = layout.fragment_cells(fragment).expect("cells");
        for (chunk, &(x, y)) in out[start..end].chunks_mut(4).zip(cells) {
            let n = chunk.len();
            chunk.copy_from_slice(&grid.pixel(x, y)[..n]);
        }
    }
    out
}

#[test]
fn test_classify_known_names() {
    assert_eq!(
        ZoneClassifier::classify_file("vmlinuz", 8_000_000),
        (Zone::Hot, AccessFrequency::Critical)
    );
    assert_eq!(
        ZoneClassifier::classify_file("backup.tar.gz", 100_000_000),
        (Zone::Cold, AccessFrequency::Rare)
    );
}

#[test]
fn test_two_files_get_disjoint_blocks() {
    let mut layout = LayoutOptimizer::new(1024, 4);
    let a = layout.add_file("a.bin", 8192, None, None).expect("add a.bin");
    let b = layout.add_file("b.bin", 8192, None, None).expect("add b.bin");

    let a_blocks: HashSet<BlockRef> = a.fragments.iter().map(|f| f.block).collect();
    let b_blocks: HashSet<BlockRef> = b.fragments.iter().map(|f| f.block).collect();
    assert!(!a_blocks.is_empty());
    assert!(!b_blocks.is_empty());
    assert!(a_blocks.is_disjoint(&b_blocks));

    // Cells never overlap either
    let mapping = layout.get_pixel_mapping().expect("mapping");
    let a_cells = mapping.values().filter(|r| r.file_id == a.file_id).count();
    let b_cells = mapping.values().filter(|r| r.file_id == b.file_id).count();
    assert_eq!(a_cells, 2048);
    assert_eq!(b_cells, 2048);
}

#[test]
fn test_hot_files_land_nearer_the_centre() {
    let mut layout = LayoutOptimizer::new(512, 4);
    let kernel = layout.add_file("boot/vmlinuz", 200_000, None, None).expect("kernel");
    let archive = layout
        .add_file("var/backup.tar.gz", 200_000, None, None)
        .expect("archive");

    let zones = layout.zones();
    let mean_distance = |file_id: u32| {
        let entry = layout.file(file_id).expect("entry");
        let mut total = 0.0;
        let mut count = 0usize;
        for fragment in &entry.fragments {
            for &(x, y) in layout.fragment_cells(fragment).expect("cells") {
                total += zones.normalized_distance(x, y);
                count += 1;
            }
        }
        total / count as f64
    };
    assert!(mean_distance(kernel.file_id) < mean_distance(archive.file_id));
}

#[test]
fn test_defragment_keeps_files_recoverable() {
    let mut layout = LayoutOptimizer::new(512, 4);
    let mut ids = Vec::new();
    for i in 0..12 {
        let entry = layout
            .add_file(&format!("lib/mod{}.dat", i), 3000 + i * 500, None, None)
            .expect("add");
        ids.push(entry.file_id);
    }
    for id in ids.iter().step_by(3) {
        layout.remove_file(*id).expect("remove");
    }
    let fragmented = layout.allocator().get_fragmentation_score();
    assert!(fragmented > 0.0);

    let sizes_before: Vec<(u32, u64)> = layout.files().iter().map(|f| (f.file_id, f.size)).collect();
    let stats = layout.defragment().expect("defragment");
    assert_eq!(stats.files_processed, 8);
    assert!(stats.after <= stats.before);

    let mut sizes_after: Vec<(u32, u64)> = layout.files().iter().map(|f| (f.file_id, f.size)).collect();
    sizes_after.sort();
    let mut sizes_before = sizes_before;
    sizes_before.sort();
    assert_eq!(sizes_before, sizes_after);

    // Every byte still has exactly one cell
    let mapping = layout.get_pixel_mapping().expect("mapping");
    let expected: u64 = layout.files().iter().map(|f| f.size.div_ceil(4)).sum();
    assert_eq!(mapping.len() as u64, expected);

    let once = layout.get_layout_metadata();
    layout.defragment().expect("second defragment");
    assert_eq!(layout.get_layout_metadata().files, once.files);
}

#[test]
fn test_file_set_round_trip() {
    let hostname = b"pixelrts\n".to_vec();
    let config_text = b"[boot]\ntimeout = 5\ndefault = linux\n".repeat(40);
    let blob: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

    let files = FileSet::new()
        .file("etc/hostname", hostname.clone())
        .file("boot/loader.conf", config_text.clone())
        .file_with("srv/blob.dat", blob.clone(), Some(Zone::Cool), Some(AccessFrequency::Low))
        .inline("cmdline", b"console=ttyS0");

    for mode in [EncodingMode::Dense, EncodingMode::Code] {
        let config = CodecConfig::for_mode(mode);
        let container = Encoder::new(config.clone())
            .encode_files(&files, None)
            .expect("encode files");

        let layout = container.metadata.layout.as_ref().expect("layout export");
        assert_eq!(layout.files.len(), 3);
        let blob_entry = layout
            .files
            .iter()
            .find(|f| f.name == "srv/blob.dat")
            .expect("blob entry");
        assert_eq!(blob_entry.zone, Zone::Cool);
        assert_eq!(container.metadata.inline["cmdline"], "Y29uc29sZT10dHlTMA==");

        let mut decoder = Decoder::new(config);
        let decoded = decoder.decode_files(&container.png, None).expect("decode files");
        let names: Vec<&str> = decoded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["etc/hostname", "boot/loader.conf", "srv/blob.dat"]);
        assert_eq!(decoded[0].1, hostname);
        assert_eq!(decoded[1].1, config_text);
        assert_eq!(decoded[2].1, blob);

        let payload = decoder.decode(&container.png, None).expect("decode");
        assert_eq!(payload.len(), hostname.len() + config_text.len() + blob.len());
        assert!(payload.starts_with(&hostname));
    }
}

#[test]
fn test_defragment_preserves_file_bytes() {
    let mut layout = LayoutOptimizer::new(256, 4);
    let mut contents = HashMap::new();
    let zones = [Zone::Warm, Zone::Temperate, Zone::Cool, Zone::Cold];
    for i in 0..10u64 {
        let size = 1500 + i * 1700;
        let entry = layout
            .add_file(
                &format!("data/part{}.bin", i),
                size,
                Some(zones[i as usize % zones.len()]),
                Some(AccessFrequency::Medium),
            )
            .expect("add");
        contents.insert(entry.file_id, file_bytes(entry.file_id, size));
    }
    for id in [1, 4, 7] {
        layout.remove_file(id).expect("remove");
        contents.remove(&id);
    }
    assert!(layout.allocator().get_fragmentation_score() > 0.0);

    let grid = paint(&layout, &contents);
    for (&id, data) in &contents {
        assert_eq!(&recover(&layout, &grid, id), data, "file {} before repack", id);
    }

    let stats = layout.defragment().expect("defragment");
    assert_eq!(stats.files_processed, contents.len());
    assert_eq!(stats.after, 0.0);

    let grid = paint(&layout, &contents);
    for (&id, data) in &contents {
        assert_eq!(&recover(&layout, &grid, id), data, "file {} after repack", id);
    }
}

#[test]
fn test_defragment_that_does_not_fit_leaves_bytes_in_place() {
    let mut layout = LayoutOptimizer::new(64, 4);
    let mut contents = HashMap::new();
    for (name, zone, frequency) in [
        ("index.db", Zone::Temperate, AccessFrequency::High),
        ("journal.db", Zone::Warm, AccessFrequency::Rare),
    ] {
        let entry = layout
            .add_file(name, 3000, Some(zone), Some(frequency))
            .expect("add");
        contents.insert(entry.file_id, file_bytes(entry.file_id, 3000));
    }
    let grid = paint(&layout, &contents);
    let mapping = layout.get_pixel_mapping().expect("mapping");

    let stats = layout.defragment().expect("defragment");
    assert_eq!(stats.files_processed, 0);
    assert_eq!(stats.after, stats.before);
    assert_eq!(layout.get_pixel_mapping().expect("mapping"), mapping);
    for (&id, data) in &contents {
        assert_eq!(&recover(&layout, &grid, id), data, "file {}", id);
    }
}
