use async_trait::async_trait;

/// Reports and reclaims free device storage.
#[async_trait]
pub trait StorageMonitor: Send + Sync {
    /// Free bytes on the volume used for proving.
    async fn available_bytes(&self) -> std::io::Result<u64>;

    /// Deletes cached files. Best effort.
    async fn purge_cache(&self) -> std::io::Result<()>;
}
