//! Local and object-store datasets read end to end, checked against the
//! same bytes served from memory.

use std::sync::Arc;

use pyramid_fetch::backend::{
    LocalFileDriver, Manifest, MemoryDriver, RawLayout, SampleFormat, SyntheticImage,
};
use pyramid_fetch::error::{BackendError, FormatError, SourceError};
use pyramid_fetch::io::MemoryObjectStore;
use pyramid_fetch::pool::{PoolConfig, ResourceFactory, ResourcePool};
use pyramid_fetch::source::{
    LocalOpener, OpenOptions, SourceKey, SourceRegistry, StoreOpener,
};
use pyramid_fetch::tile::{AnyTileLoader, BlockRequest};
use pyramid_fetch::{BackendDriver, ImageMetadata};

use super::test_utils::temp_dir;

fn image() -> ImageMetadata {
    SyntheticImage {
        name: "cross".to_string(),
        format: SampleFormat::UINT16,
        dimensions: [101, 61, 3],
        block_shape: [32, 32, 2],
        levels: 3,
        size_c: 2,
        size_t: 2,
        ..Default::default()
    }
    .metadata()
}

fn data_for(metadata: &ImageMetadata) -> Vec<u8> {
    let len = RawLayout::new(metadata).unwrap().total_bytes() as usize;
    (0..len).map(|i| ((i * 7 + i / 13) % 256) as u8).collect()
}

fn requests() -> Vec<BlockRequest> {
    let mut requests = Vec::new();
    for level in 0..3 {
        for (timepoint, channel) in [(0, 0), (1, 1), (0, 1)] {
            for (origin, shape) in [
                ([0, 0, 0], [32, 32, 2]),
                ([96, 32, 2], [32, 32, 2]),
                ([5, 7, 1], [9, 4, 1]),
            ] {
                requests.push(BlockRequest {
                    timepoint,
                    level,
                    channel,
                    origin,
                    shape,
                });
            }
        }
    }
    requests
}

async fn reference_loader(metadata: ImageMetadata, data: Vec<u8>) -> AnyTileLoader<MemoryDriver> {
    let driver = MemoryDriver::new(metadata, data).unwrap();
    let pool = ResourcePool::new(Arc::new(driver), PoolConfig::new(1))
        .await
        .unwrap();
    AnyTileLoader::new(Arc::new(pool), 0, false).unwrap()
}

#[tokio::test]
async fn test_local_dataset_matches_memory() {
    let metadata = image();
    let data = data_for(&metadata);
    let dir = temp_dir("local-equivalence");
    LocalFileDriver::write_dataset(&dir, &Manifest::new(metadata.clone()), &data)
        .await
        .unwrap();

    let registry = SourceRegistry::new(LocalOpener);
    let key = SourceKey::new(
        dir.to_string_lossy(),
        OpenOptions {
            pool_size: 3,
            ..Default::default()
        },
    );
    let session = registry.get(&key).await.unwrap();
    let loader = Arc::new(session.loader(0).unwrap());
    let reference = reference_loader(metadata, data).await;

    let tasks: Vec<_> = requests()
        .into_iter()
        .map(|request| {
            let loader = loader.clone();
            tokio::spawn(async move { (request, loader.load(&request).await) })
        })
        .collect();

    for task in tasks {
        let (request, loaded) = task.await.unwrap();
        let expected = reference.load(&request).await.unwrap();
        assert_eq!(loaded.unwrap(), expected, "{:?}", request);
    }

    let stats = session.pool_stats();
    assert!(stats.created <= 3);
    assert_eq!(stats.checked_out, 0);

    registry.clear().await;
    assert!(session.is_closed());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_local_geometry_uses_extents() {
    let metadata = image();
    let data = data_for(&metadata);
    let dir = temp_dir("local-geometry");
    LocalFileDriver::write_dataset(&dir, &Manifest::new(metadata), &data)
        .await
        .unwrap();

    let driver = LocalFileDriver::open(&dir).await.unwrap();
    let session = pyramid_fetch::ImageSession::open(
        driver,
        SourceKey::new("local", OpenOptions::default()),
    )
    .await
    .unwrap();

    let factors = session.geometry(0).unwrap().downsampling_factors();
    assert_eq!(factors[0], [1.0, 1.0, 1.0]);
    assert!((factors[2][0] - 101.0 / 26.0).abs() < 1e-9);
    assert!((factors[2][1] - 61.0 / 16.0).abs() < 1e-9);
    let _ = std::fs::remove_dir_all(&dir);
}

fn store_with(metadata: &ImageMetadata, data: Vec<u8>) -> MemoryObjectStore {
    let store = MemoryObjectStore::new();
    store.insert(
        "images/cross/manifest.json",
        Manifest::new(metadata.clone()).to_json().unwrap(),
    );
    store.insert("images/cross/data.raw", data);
    store
}

#[tokio::test]
async fn test_object_store_dataset_matches_memory() {
    let metadata = image();
    let data = data_for(&metadata);
    let store = store_with(&metadata, data.clone());

    let registry = SourceRegistry::new(StoreOpener::new(store));
    let key = SourceKey::new("images/cross/manifest.json", OpenOptions::default());
    let session = registry.get(&key).await.unwrap();
    assert!(!session.driver().supports_clone());

    let loader = session.loader(0).unwrap();
    let reference = reference_loader(metadata, data).await;
    for request in requests() {
        assert_eq!(
            loader.load(&request).await.unwrap(),
            reference.load(&request).await.unwrap(),
            "{:?}",
            request
        );
    }

    // Remote stores fall back to power-of-two downsampling
    let factors = session.geometry(0).unwrap().downsampling_factors();
    assert_eq!(factors[1], [2.0, 2.0, 1.0]);
    assert_eq!(factors[2], [4.0, 4.0, 1.0]);
}

#[tokio::test]
async fn test_object_store_rejects_bad_datasets() {
    let metadata = image();
    let mut data = data_for(&metadata);
    data.truncate(data.len() - 1);
    let registry = SourceRegistry::new(StoreOpener::new(store_with(&metadata, data)));

    let result = registry
        .get(&SourceKey::new("images/cross/manifest.json", OpenOptions::default()))
        .await;
    assert!(matches!(
        result,
        Err(SourceError::Backend(BackendError::Format(
            FormatError::DataSizeMismatch { .. }
        )))
    ));

    let missing = registry
        .get(&SourceKey::new("images/none/manifest.json", OpenOptions::default()))
        .await;
    assert!(missing.is_err());
    assert_eq!(registry.open_count().await, 0);
}
