//! Opening, planning and extracting from synthetic slides.

use proptest::prelude::*;

use wsi_ingest::io::MemoryRangeReader;
use wsi_ingest::raster::ImageEncoder;
use wsi_ingest::slide::{
    plan_grid, select_region, Envelope, LevelInfo, PlannerSettings, RegionPlan, SlideReader,
};
use wsi_ingest::SlideFormat;

use super::test_utils::{decode_rgb, pyramid, svs_slide, LevelSpec, SlideBuilder};

const MIB: u64 = 1024 * 1024;

fn reader(memory_ceiling: u64) -> SlideReader {
    SlideReader::new(PlannerSettings {
        memory_ceiling,
        min_tile_edge: 64,
    })
}

fn memory(bytes: Vec<u8>) -> MemoryRangeReader {
    MemoryRangeReader::new(bytes, "memory.svs")
}

#[tokio::test]
async fn test_open_reports_levels() {
    let slide = pyramid(1024, 768, 256, 3, &[10, 20, 30]);
    let handle = reader(64 * MIB).open_reader(memory(slide)).await.unwrap();

    assert_eq!(handle.level_count(), 3);
    assert_eq!(handle.dimensions(), Some((1024, 768)));
    assert_eq!(handle.level_dimensions(2), Some((256, 192)));
    assert_eq!(handle.format(), SlideFormat::GenericTiff);
    let downsamples: Vec<f64> = handle.levels().iter().map(|l| l.downsample).collect();
    assert_eq!(downsamples, vec![1.0, 2.0, 4.0]);
}

#[tokio::test]
async fn test_open_svs_metadata() {
    let handle = reader(64 * MIB)
        .open_reader(memory(svs_slide(1024, 768, [180, 60, 140])))
        .await
        .unwrap();
    assert_eq!(handle.format(), SlideFormat::AperioSvs);
    assert_eq!(handle.metadata().mpp, Some(0.499));
    assert_eq!(handle.metadata().magnification, Some(20.0));
}

#[tokio::test]
async fn test_big_endian_and_bigtiff_open() {
    for builder in [
        SlideBuilder::new().big_endian(),
        SlideBuilder::new().bigtiff(),
        SlideBuilder::new().bigtiff().big_endian(),
    ] {
        let slide = builder
            .level(LevelSpec::raw(512, 512, 128, &[1, 2, 3]))
            .level(LevelSpec::raw(256, 256, 128, &[1, 2, 3]))
            .build();
        let handle = reader(64 * MIB).open_reader(memory(slide)).await.unwrap();
        assert_eq!(handle.level_count(), 2);
    }
}

#[tokio::test]
async fn test_corrupt_and_flat_files_are_unreadable() {
    let reader = reader(64 * MIB);
    assert!(reader
        .open_reader(memory(b"definitely not a tiff".to_vec()))
        .await
        .is_err());

    let mut truncated = pyramid(512, 512, 128, 2, &[1, 2, 3]);
    truncated.truncate(40);
    assert!(reader.open_reader(memory(truncated)).await.is_err());

    let lzw = SlideBuilder::new()
        .level(LevelSpec::raw(256, 256, 128, &[1, 2, 3]).with_compression(5))
        .build();
    let err = reader.open_reader(memory(lzw)).await.err().unwrap();
    assert!(err.to_string().contains("LZW"));
}

#[tokio::test]
async fn test_whole_level_fits_envelope() {
    let slide = pyramid(2048, 1536, 256, 3, &[200, 100, 50]);
    let reader = reader(64 * MIB);
    let handle = reader.open_reader(memory(slide)).await.unwrap();

    let plan = reader
        .select_region(&handle, Envelope::new(600, 600))
        .unwrap();
    // level 2 (512x384) is below the envelope on both axes
    assert_eq!(plan.level(), 1);
    assert!(matches!(plan, RegionPlan::Whole(_)));

    let buffer = reader.extract(&handle, &plan.requests()[0]).await.unwrap();
    assert_eq!((buffer.width, buffer.height), (600, 450));
    assert_eq!(&buffer.data[..3], &[200, 100, 50]);
}

#[tokio::test]
async fn test_small_ceiling_tiles_the_level() {
    let slide = pyramid(1024, 1024, 128, 1, &[90, 90, 90]);
    // room for roughly a 256x256 RGB tile plus headroom, not the whole level
    let reader = reader(300 * 1024);
    let handle = reader.open_reader(memory(slide)).await.unwrap();

    let plan = reader
        .select_region(&handle, Envelope::new(4096, 4096))
        .unwrap();
    let RegionPlan::Tiled { grid, .. } = &plan else {
        panic!("expected a tiled plan, got {plan:?}");
    };
    assert!(grid.len() > 1);

    let mut covered = 0u64;
    for request in plan.requests() {
        let buffer = reader.extract(&handle, &request).await.unwrap();
        assert_eq!((buffer.width, buffer.height), (request.crop.width, request.crop.height));
        assert!(buffer.data.len() as u64 <= 300 * 1024);
        covered += request.crop.width as u64 * request.crop.height as u64;
    }
    assert_eq!(covered, 1024 * 1024);
}

#[tokio::test]
async fn test_jpeg_tiles_round_trip_through_encoder() {
    let color = [30, 160, 90];
    let reader = reader(64 * MIB);
    let handle = reader
        .open_reader(memory(svs_slide(512, 512, color)))
        .await
        .unwrap();
    let plan = reader.select_region(&handle, Envelope::new(256, 256)).unwrap();
    let buffer = reader.extract(&handle, &plan.requests()[0]).await.unwrap();
    let asset = ImageEncoder::new(90).encode(buffer).unwrap();

    let decoded = decode_rgb(&asset.bytes);
    assert_eq!(decoded.dimensions(), (256, 256));
    let pixel = decoded.get_pixel(128, 128).0;
    for channel in 0..3 {
        assert!((pixel[channel] as i32 - color[channel] as i32).abs() <= 10);
    }
}

#[tokio::test]
async fn test_missing_tile_is_background() {
    let slide = SlideBuilder::new()
        .level(LevelSpec::raw(256, 128, 128, &[0, 0, 0]).without_tile(1))
        .build();
    let reader = reader(64 * MIB);
    let handle = reader.open_reader(memory(slide)).await.unwrap();
    let plan = reader.select_region(&handle, Envelope::new(256, 128)).unwrap();
    let buffer = reader.extract(&handle, &plan.requests()[0]).await.unwrap();

    let row = 256 * 3;
    assert_eq!(&buffer.data[..3], &[0, 0, 0]);
    assert_eq!(&buffer.data[row - 3..row], &[255, 255, 255]);
}

fn level(width: u32, height: u32, tile: u32) -> LevelInfo {
    LevelInfo {
        width,
        height,
        tile_width: tile,
        tile_height: tile,
        tiles_x: width.div_ceil(tile),
        tiles_y: height.div_ceil(tile),
        downsample: 1.0,
        samples_per_pixel: 3,
    }
}

proptest! {
    #[test]
    fn prop_tile_grid_is_deterministic_and_covering(
        width in 1u32..20_000,
        height in 1u32..20_000,
        tile_exp in 6u32..10,
        min_edge in 1u32..600,
        ceiling_mib in 1u64..64,
    ) {
        let tile = 1u32 << tile_exp;
        let info = level(width, height, tile);
        let settings = PlannerSettings { memory_ceiling: ceiling_mib * MIB, min_tile_edge: min_edge };

        let Ok(grid) = plan_grid(0, &info, &settings) else {
            return Ok(());
        };
        prop_assert_eq!(plan_grid(0, &info, &settings).unwrap(), grid.clone());

        for spans in [&grid.columns, &grid.rows] {
            prop_assert!(!spans.is_empty());
            let mut next = 0;
            for span in spans.iter() {
                prop_assert_eq!(span.start, next);
                prop_assert!(span.len > 0);
                next = span.start + span.len;
            }
        }
        prop_assert_eq!(grid.columns.iter().map(|s| s.len).sum::<u32>(), width);
        prop_assert_eq!(grid.rows.iter().map(|s| s.len).sum::<u32>(), height);

        // every span but the last starts on a native tile boundary; no span
        // is below the minimum unless the axis itself is
        for (spans, len) in [(&grid.columns, width), (&grid.rows, height)] {
            for span in spans.iter() {
                prop_assert_eq!(span.start % tile, 0);
                prop_assert!(span.len >= min_edge.min(len));
            }
        }
    }

    #[test]
    fn prop_selection_is_deterministic(
        width in 256u32..200_000,
        height in 256u32..200_000,
        env_w in 1u32..8192,
        env_h in 1u32..8192,
    ) {
        let levels: Vec<LevelInfo> = (0..4)
            .map(|i| {
                let mut info = level((width >> i).max(1), (height >> i).max(1), 256);
                info.downsample = (1u32 << i) as f64;
                info
            })
            .collect();
        let settings = PlannerSettings { memory_ceiling: 256 * MIB, min_tile_edge: 256 };
        let envelope = Envelope::new(env_w, env_h);
        prop_assert_eq!(
            select_region(&levels, envelope, &settings),
            select_region(&levels, envelope, &settings)
        );
    }
}
