//! Shared test utilities for vault integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;

use ::common::config::{RetryPolicy, VaultConfig};
use ::common::database::Database;
use ::common::object_store::{BlobStore, BlobStoreError, BlobStream, ObjectStorage};
use ::common::types::OwnerId;
use ::common::vault::Vault;

pub const OWNER: OwnerId = OwnerId(1);
pub const OTHER: OwnerId = OwnerId(2);

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

/// In-memory blob store that records live keys and can be told to fail.
#[derive(Debug)]
pub struct TestBlobs {
    inner: ObjectStorage,
    live: Mutex<HashSet<String>>,
    puts: AtomicUsize,
    fail_puts: AtomicBool,
    fail_removes: AtomicBool,
    stall_puts: AtomicBool,
}

impl TestBlobs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: ObjectStorage::memory(),
            live: Mutex::new(HashSet::new()),
            puts: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            fail_removes: AtomicBool::new(false),
            stall_puts: AtomicBool::new(false),
        })
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_live(&self, key: &str) -> bool {
        self.live.lock().contains(key)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    /// Puts store their bytes and then never return.
    pub fn stall_puts(&self, stall: bool) {
        self.stall_puts.store(stall, Ordering::SeqCst);
    }

    fn injected(operation: &'static str) -> BlobStoreError {
        BlobStoreError::Io(std::io::Error::other(format!("injected {operation} failure")))
    }
}

#[async_trait::async_trait]
impl BlobStore for TestBlobs {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), BlobStoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Self::injected("put"));
        }
        self.inner.put(key, data, content_type).await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.live.lock().insert(key.to_string());
        if self.stall_puts.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> Result<BlobStream, BlobStoreError> {
        self.inner.get_stream(key).await
    }

    async fn remove(&self, key: &str) -> Result<(), BlobStoreError> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(Self::injected("remove"));
        }
        self.inner.remove(key).await?;
        self.live.lock().remove(key);
        Ok(())
    }

    async fn presigned_get(&self, key: &str, ttl: Duration) -> Result<Url, BlobStoreError> {
        self.inner.presigned_get(key, ttl).await
    }
}

/// Defaults, but with quick retries so storage-failure tests stay fast.
pub fn test_config() -> VaultConfig {
    VaultConfig {
        purge_retry: RetryPolicy {
            attempts: 2,
            base_delay_ms: 1,
        },
        ..VaultConfig::default()
    }
}

/// Set up an ephemeral vault with one open account (10 GiB quota).
pub async fn setup_test_env() -> (Vault, Arc<TestBlobs>) {
    setup_with_config(test_config()).await
}

pub async fn setup_with_config(config: VaultConfig) -> (Vault, Arc<TestBlobs>) {
    let db = Database::in_memory().await.unwrap();
    let blobs = TestBlobs::new();
    let vault = Vault::new(db, blobs.clone(), config);
    vault.quota().open_account(OWNER, None).await.unwrap();
    (vault, blobs)
}

/// Like [`setup_test_env`] but the owner's quota is `quota` bytes.
pub async fn setup_with_quota(quota: u64) -> (Vault, Arc<TestBlobs>) {
    let config = VaultConfig {
        min_quota: 0,
        ..test_config()
    };
    let db = Database::in_memory().await.unwrap();
    let blobs = TestBlobs::new();
    let vault = Vault::new(db, blobs.clone(), config);
    vault.quota().open_account(OWNER, Some(quota)).await.unwrap();
    (vault, blobs)
}

/// Poll `check` until it holds, for effects that land on spawned tasks.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub fn bytes_of(len: usize, seed: u8) -> Bytes {
    Bytes::from((0..len).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect::<Vec<u8>>())
}
