//! Typed loading: plane stitching, byte order and RGB repacking.

use std::sync::Arc;

use pyramid_fetch::backend::{ByteOrder, MemoryDriver, SampleFormat, SampleKind};
use pyramid_fetch::error::LoadError;
use pyramid_fetch::pool::{PoolConfig, ResourcePool};
use pyramid_fetch::tile::{
    AnyTileLoader, BlockRequest, PixelBuffer, TileLoader, F32, I32, U16, U8,
};
use pyramid_fetch::{Region2, Selection};

use super::test_utils::{single_level, RecordingDriver};

async fn pool<D: pyramid_fetch::BackendDriver>(driver: D) -> Arc<ResourcePool<D>> {
    Arc::new(
        ResourcePool::new(Arc::new(driver), PoolConfig::new(2))
            .await
            .unwrap(),
    )
}

fn request(origin: [u64; 3], shape: [u32; 3], channel: u32) -> BlockRequest {
    BlockRequest {
        timepoint: 0,
        level: 0,
        channel,
        origin,
        shape,
    }
}

#[tokio::test]
async fn test_depth_three_reads_planes_in_ascending_order() {
    let metadata = single_level(SampleFormat::UINT8, ByteOrder::Little, [4, 3, 3], 1);
    let data: Vec<u8> = (0..36).collect();
    let driver = RecordingDriver::new(MemoryDriver::new(metadata, data).unwrap());
    let pool = pool(driver).await;
    let loader: TileLoader<_, U8> = TileLoader::new(pool.clone(), 0, false).unwrap();

    let block = loader
        .load(&request([1, 1, 0], [2, 2, 3], 0))
        .await
        .unwrap();

    let region = Region2 {
        x: 1,
        y: 1,
        width: 2,
        height: 2,
    };
    assert_eq!(
        pool.factory().reads(),
        vec![(0, region), (1, region), (2, region)]
    );
    assert_eq!(pool.factory().selections(), vec![Selection::new(0, 0, 0)]);
    assert_eq!(
        block,
        vec![5, 6, 9, 10, 17, 18, 21, 22, 29, 30, 33, 34]
    );
}

#[tokio::test]
async fn test_single_plane_fast_path() {
    let metadata = single_level(SampleFormat::UINT8, ByteOrder::Little, [4, 3, 3], 1);
    let data: Vec<u8> = (0..36).collect();
    let pool = pool(RecordingDriver::new(MemoryDriver::new(metadata, data).unwrap())).await;
    let loader: TileLoader<_, U8> = TileLoader::new(pool.clone(), 0, false).unwrap();

    let block = loader
        .load(&request([0, 0, 2], [4, 3, 1], 0))
        .await
        .unwrap();
    assert_eq!(pool.factory().reads().len(), 1);
    assert_eq!(block, (24..36).collect::<Vec<u8>>());
}

#[tokio::test]
async fn test_u16_little_and_big_endian() {
    let values: [u16; 4] = [1, 0x0102, 0xBEEF, u16::MAX];

    for byte_order in [ByteOrder::Little, ByteOrder::Big] {
        let data: Vec<u8> = values
            .iter()
            .flat_map(|v| match byte_order {
                ByteOrder::Little => v.to_le_bytes(),
                ByteOrder::Big => v.to_be_bytes(),
            })
            .collect();
        let metadata = single_level(SampleFormat::UINT16, byte_order, [2, 2, 1], 1);
        let pool = pool(MemoryDriver::new(metadata, data).unwrap()).await;
        let loader: TileLoader<_, U16> = TileLoader::new(pool, 0, false).unwrap();

        let block = loader.load(&request([0, 0, 0], [2, 2, 1], 0)).await.unwrap();
        assert_eq!(block, values.to_vec(), "{:?}", byte_order);
    }
}

#[tokio::test]
async fn test_i32_and_f32_big_endian() {
    let ints: [i32; 2] = [-7, 0x0102_0304];
    let data: Vec<u8> = ints.iter().flat_map(|v| v.to_be_bytes()).collect();
    let metadata = single_level(SampleFormat::INT32, ByteOrder::Big, [2, 1, 1], 1);
    let pool_i = pool(MemoryDriver::new(metadata, data).unwrap()).await;
    let loader: TileLoader<_, I32> = TileLoader::new(pool_i, 0, false).unwrap();
    assert_eq!(
        loader.load(&request([0, 0, 0], [2, 1, 1], 0)).await.unwrap(),
        ints.to_vec()
    );

    let floats: [f32; 2] = [1.5, -0.25];
    let data: Vec<u8> = floats.iter().flat_map(|v| v.to_be_bytes()).collect();
    let metadata = single_level(SampleFormat::FLOAT32, ByteOrder::Big, [2, 1, 1], 1);
    let pool_f = pool(MemoryDriver::new(metadata, data).unwrap()).await;
    let loader: TileLoader<_, F32> = TileLoader::new(pool_f, 0, false).unwrap();
    assert_eq!(
        loader.load(&request([0, 0, 0], [2, 1, 1], 0)).await.unwrap(),
        floats.to_vec()
    );
}

#[tokio::test]
async fn test_rgb_repacked_to_argb() {
    let metadata = single_level(SampleFormat::RGB8, ByteOrder::Little, [2, 2, 1], 1);
    let data = [10u8, 20, 30].repeat(4);
    let pool = pool(MemoryDriver::new(metadata, data).unwrap()).await;
    let loader = AnyTileLoader::new(pool, 0, false).unwrap();

    let block = loader.load(&request([0, 0, 0], [2, 2, 1], 0)).await.unwrap();
    assert_eq!(block, PixelBuffer::Argb(vec![0xFF0A141E; 4]));
}

#[tokio::test]
async fn test_unsupported_format_fails_at_construction() {
    // Signed 16-bit is a valid layout without a typed loader
    let format = SampleFormat::new(SampleKind::Signed, 16, 1);
    let metadata = single_level(format, ByteOrder::Little, [1, 1, 1], 1);
    let pool = pool(MemoryDriver::new(metadata, vec![0u8; 2]).unwrap()).await;
    assert!(matches!(
        AnyTileLoader::new(pool, 0, false),
        Err(LoadError::UnsupportedPixelType(_))
    ));
}

#[tokio::test]
async fn test_read_failure_interrupts_and_recycles() {
    let metadata = single_level(SampleFormat::UINT8, ByteOrder::Little, [2, 2, 2], 1);
    let driver = RecordingDriver::new(MemoryDriver::new(metadata, vec![0u8; 8]).unwrap())
        .failing_on(1);
    let pool = pool(driver).await;
    let loader: TileLoader<_, U8> = TileLoader::new(pool.clone(), 0, false).unwrap();

    let err = loader
        .load(&request([0, 0, 0], [2, 2, 2], 0))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Interrupted(_)));
    assert!(err.is_transient());
    assert_eq!(pool.stats().checked_out, 0);

    // Other planes still load through the same pool
    let block = loader.load(&request([0, 0, 0], [2, 2, 1], 0)).await.unwrap();
    assert_eq!(block.len(), 4);
}

#[tokio::test]
async fn test_swap_zc_changes_plane_index() {
    let metadata = single_level(SampleFormat::UINT8, ByteOrder::Little, [1, 1, 2], 2);
    // Four planes of one pixel each: plane p holds p
    let data = vec![0u8, 1, 2, 3];

    for (swap_zc, expected_plane) in [(false, 1u8), (true, 2u8)] {
        let pool = pool(MemoryDriver::new(metadata.clone(), data.clone()).unwrap()).await;
        let loader: TileLoader<_, U8> = TileLoader::new(pool, 0, swap_zc).unwrap();
        let block = loader.load(&request([0, 0, 1], [1, 1, 1], 0)).await.unwrap();
        assert_eq!(block, vec![expected_plane], "swap_zc = {}", swap_zc);
    }
}

#[tokio::test]
async fn test_concurrent_loads_share_pool() {
    let metadata = single_level(SampleFormat::UINT16, ByteOrder::Little, [64, 64, 4], 1);
    let data: Vec<u8> = (0..64 * 64 * 4 * 2).map(|i| (i % 256) as u8).collect();
    let pool = pool(MemoryDriver::new(metadata, data).unwrap()).await;
    let loader = Arc::new(AnyTileLoader::new(pool.clone(), 0, false).unwrap());

    let tasks: Vec<_> = (0..32u64)
        .map(|i| {
            let loader = loader.clone();
            tokio::spawn(async move {
                let origin = [(i % 4) * 16, (i / 4 % 4) * 16, i % 4];
                loader.load(&request(origin, [16, 16, 1], 0)).await
            })
        })
        .collect();

    for task in tasks {
        let block = task.await.unwrap().unwrap();
        assert_eq!(block.len(), 256);
    }
    assert!(pool.stats().created <= 2);
    assert_eq!(pool.stats().checked_out, 0);
}
