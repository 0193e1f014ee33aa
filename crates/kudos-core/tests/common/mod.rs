//! Shared fixture for integration tests.

#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::Arc;

use kudos_core::{
    CategoryRegistry, CategoryTag, FeedbackItem, FeedbackManager, InMemoryAccountDirectory,
    ItemProfile, ItemProfileCache, StandardCategory, StoreConfig, SubmissionBody, SubmissionStore,
};

pub const PHOTOS: CategoryTag = CategoryTag(1);
pub const GALLERIES: CategoryTag = CategoryTag(2);

pub struct TestStore {
    pub config: StoreConfig,
    pub cache: Arc<ItemProfileCache>,
    pub store: Arc<SubmissionStore>,
    pub photos: Arc<StandardCategory>,
    pub galleries: Arc<StandardCategory>,
    pub registry: Arc<CategoryRegistry>,
    pub directory: Arc<InMemoryAccountDirectory>,
    pub manager: FeedbackManager,
}

/// Build a full store wired the way the composition root does it: two
/// standard categories over one submission store.
pub fn test_store(config: StoreConfig) -> TestStore {
    let cache = Arc::new(ItemProfileCache::new());
    let store = Arc::new(SubmissionStore::new(config.max_submissions_per_account));
    let photos = Arc::new(StandardCategory::new(PHOTOS, store.clone()));
    let galleries = Arc::new(StandardCategory::new(GALLERIES, store.clone()));
    let registry = Arc::new(CategoryRegistry::new(vec![
        photos.clone(),
        galleries.clone(),
    ]));
    let directory = Arc::new(InMemoryAccountDirectory::new());
    let manager = FeedbackManager::new(
        &config,
        cache.clone(),
        store.clone(),
        registry.clone(),
        directory.clone(),
    );
    TestStore {
        config,
        cache,
        store,
        photos,
        galleries,
        registry,
        directory,
        manager,
    }
}

pub fn small_quorum_config() -> StoreConfig {
    StoreConfig {
        sample_size: 5,
        dominance_threshold: 3,
        housekeeping_interval_secs: 3600,
        ..StoreConfig::default()
    }
}

pub fn addr(last_octet: u8) -> IpAddr {
    IpAddr::from([10, 0, 0, last_octet])
}

pub fn profile(category: CategoryTag, key: &str, name: &str) -> ItemProfile {
    ItemProfile::new(
        FeedbackItem::new(category, key),
        name,
        format!("https://img.example/{key}.jpg"),
        vec!["landscape".into()],
    )
}

pub fn rating(stars: u8, comment: &str) -> SubmissionBody {
    SubmissionBody::Rating {
        stars,
        comment: comment.into(),
    }
}
