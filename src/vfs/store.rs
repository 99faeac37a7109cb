//! Virtual file store implementation

use std::sync::Arc;

use url::Url;

use super::substrate::{KvSubstrate, SqliteSubstrate};
use crate::config::StoreConfig;
use crate::{Error, Result};

/// Protocol tag every stored key must carry
pub const PROTOCOL: &str = "file";

const BLOB_MAGIC: &[u8; 4] = b"FPQ1";

/// A named, sized byte payload stored and retrieved as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    name: String,
    bytes: Vec<u8>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Check the blob is storable: a non-empty file name without path separators
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidPayload("can only store named files".to_string()));
        }
        if self.name.contains(['/', '\\']) {
            return Err(Error::InvalidPayload(format!(
                "file name must not contain path separators: {}",
                self.name
            )));
        }
        Ok(())
    }

    /// Encode as `magic | name_len:u32 | name | size:u64 | bytes`
    fn encode(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let mut out = Vec::with_capacity(BLOB_MAGIC.len() + 4 + name.len() + 8 + self.bytes.len());
        out.extend_from_slice(BLOB_MAGIC);
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&(self.bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.bytes);
        out
    }

    fn decode(raw: &[u8]) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidPayload(format!("stored object is not a file: {}", reason));

        let rest = raw.strip_prefix(BLOB_MAGIC.as_slice()).ok_or_else(|| invalid("bad magic"))?;
        let (len, rest) = split_array::<4>(rest).ok_or_else(|| invalid("truncated name length"))?;
        let name_len = u32::from_le_bytes(len) as usize;
        if rest.len() < name_len {
            return Err(invalid("truncated name"));
        }
        let (name, rest) = rest.split_at(name_len);
        let name = std::str::from_utf8(name).map_err(|_| invalid("name is not utf-8"))?;
        let (size, bytes) = split_array::<8>(rest).ok_or_else(|| invalid("truncated size"))?;
        if u64::from_le_bytes(size) != bytes.len() as u64 {
            return Err(invalid("size does not match payload"));
        }

        Ok(Self::new(name, bytes))
    }
}

fn split_array<const N: usize>(bytes: &[u8]) -> Option<([u8; N], &[u8])> {
    if bytes.len() < N {
        return None;
    }
    let (head, tail) = bytes.split_at(N);
    head.try_into().ok().map(|head| (head, tail))
}

/// Durable file storage addressed by `file://<store_name>/<path>` keys
pub struct VirtualFileStore {
    substrate: Arc<dyn KvSubstrate>,
}

impl VirtualFileStore {
    /// Wrap an existing substrate
    pub fn new(substrate: Arc<dyn KvSubstrate>) -> Self {
        Self { substrate }
    }

    /// Open the SQLite substrate named by the configuration
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let substrate = SqliteSubstrate::open(&config.path, config.store_name.clone())?;
        tracing::debug!(
            "Opened file store {} ({}) at {}",
            config.name,
            config.store_name,
            config.path.display()
        );
        Ok(Self::new(Arc::new(substrate)))
    }

    pub fn store_name(&self) -> &str {
        self.substrate.store_name()
    }

    /// Build the key of `path` inside this store
    pub fn file_path_to_url(&self, path: &str) -> Result<Url> {
        let url = Url::parse(&format!(
            "{}://{}/{}",
            PROTOCOL,
            self.store_name(),
            path.trim_start_matches('/')
        ))?;
        Ok(url)
    }

    /// Reject keys outside this store's protocol and authority
    pub fn assert_supported(&self, url: &Url) -> Result<()> {
        if url.scheme() != PROTOCOL {
            return Err(Error::UnsupportedAddress(format!("protocol not supported: {}", url)));
        }
        if url.host_str() != Some(self.store_name()) {
            return Err(Error::UnsupportedAddress(format!("host not supported: {}", url)));
        }
        Ok(())
    }

    pub async fn read(&self, url: &Url) -> Result<Option<FileBlob>> {
        self.assert_supported(url)?;
        match self.substrate.get_item(url.as_str()).await? {
            Some(raw) => FileBlob::decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Create or overwrite the object at `url`
    pub async fn write(&self, url: &Url, file: &FileBlob) -> Result<()> {
        file.validate()?;
        self.assert_supported(url)?;
        tracing::debug!("Writing {} ({} bytes)", url, file.size());
        self.substrate.set_item(url.as_str(), file.encode()).await
    }

    pub async fn exists(&self, url: &Url) -> Result<bool> {
        self.assert_supported(url)?;
        let keys = self.substrate.keys().await?;
        Ok(keys.iter().any(|key| key == url.as_str()))
    }

    pub async fn remove(&self, url: &Url) -> Result<()> {
        self.assert_supported(url)?;
        self.substrate.remove_item(url.as_str()).await
    }

    /// All stored keys
    pub async fn list(&self) -> Result<Vec<Url>> {
        let keys = self.substrate.keys().await?;
        let urls = keys
            .iter()
            .filter_map(|key| match Url::parse(key) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!("Skipping unparseable key {}: {}", key, e);
                    None
                }
            })
            .collect();
        Ok(urls)
    }

    /// Number of stored objects
    pub async fn size(&self) -> Result<usize> {
        self.substrate.length().await
    }

    pub async fn clear(&self) -> Result<()> {
        tracing::info!("Clearing file store {}", self.store_name());
        self.substrate.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemorySubstrate;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Substrate that counts every call that reaches it
    struct CountingSubstrate {
        inner: MemorySubstrate,
        calls: AtomicUsize,
    }

    impl CountingSubstrate {
        fn new(store_name: &str) -> Self {
            Self {
                inner: MemorySubstrate::new(store_name),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl KvSubstrate for CountingSubstrate {
        fn store_name(&self) -> &str {
            self.inner.store_name()
        }
        async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.hit();
            self.inner.get_item(key).await
        }
        async fn set_item(&self, key: &str, value: Vec<u8>) -> Result<()> {
            self.hit();
            self.inner.set_item(key, value).await
        }
        async fn remove_item(&self, key: &str) -> Result<()> {
            self.hit();
            self.inner.remove_item(key).await
        }
        async fn keys(&self) -> Result<Vec<String>> {
            self.hit();
            self.inner.keys().await
        }
        async fn length(&self) -> Result<usize> {
            self.hit();
            self.inner.length().await
        }
        async fn clear(&self) -> Result<()> {
            self.hit();
            self.inner.clear().await
        }
    }

    fn memory_store() -> VirtualFileStore {
        VirtualFileStore::new(Arc::new(MemorySubstrate::new("feedparq.fs")))
    }

    #[tokio::test]
    async fn test_write_read_exists() {
        let store = memory_store();
        let url = store.file_path_to_url("settings.parquet").unwrap();
        assert_eq!(url.as_str(), "file://feedparq.fs/settings.parquet");

        assert!(!store.exists(&url).await.unwrap());
        assert!(store.read(&url).await.unwrap().is_none());

        let blob = FileBlob::new("settings.parquet", vec![1, 2, 3]);
        store.write(&url, &blob).await.unwrap();

        assert!(store.exists(&url).await.unwrap());
        let read = store.read(&url).await.unwrap().unwrap();
        assert_eq!(read, blob);
        assert_eq!(read.size(), 3);
    }

    #[tokio::test]
    async fn test_overwrite_in_place() {
        let store = memory_store();
        let url = store.file_path_to_url("a.bin").unwrap();

        store.write(&url, &FileBlob::new("a.bin", vec![1])).await.unwrap();
        store.write(&url, &FileBlob::new("a.bin", vec![2, 2])).await.unwrap();

        assert_eq!(store.size().await.unwrap(), 1);
        assert_eq!(store.read(&url).await.unwrap().unwrap().bytes(), &[2, 2]);
    }

    #[tokio::test]
    async fn test_foreign_keys_never_reach_substrate() {
        let substrate = Arc::new(CountingSubstrate::new("feedparq.fs"));
        let store = VirtualFileStore::new(substrate.clone());
        let blob = FileBlob::new("x", vec![0]);

        let foreign = [
            "http://feedparq.fs/settings.parquet",
            "file://other.fs/settings.parquet",
            "file:///settings.parquet",
        ];
        for key in foreign {
            let url = Url::parse(key).unwrap();
            assert!(matches!(store.read(&url).await, Err(Error::UnsupportedAddress(_))));
            assert!(matches!(store.write(&url, &blob).await, Err(Error::UnsupportedAddress(_))));
            assert!(matches!(store.exists(&url).await, Err(Error::UnsupportedAddress(_))));
        }

        assert_eq!(substrate.calls(), 0);
    }

    #[tokio::test]
    async fn test_unnamed_blob_rejected() {
        let substrate = Arc::new(CountingSubstrate::new("feedparq.fs"));
        let store = VirtualFileStore::new(substrate.clone());
        let url = store.file_path_to_url("settings.parquet").unwrap();

        let result = store.write(&url, &FileBlob::new("", vec![1])).await;
        assert!(matches!(result, Err(Error::InvalidPayload(_))));
        assert_eq!(substrate.calls(), 0);
    }

    #[tokio::test]
    async fn test_foreign_value_is_invalid_payload() {
        let substrate = Arc::new(MemorySubstrate::new("feedparq.fs"));
        let store = VirtualFileStore::new(substrate.clone());
        let url = store.file_path_to_url("raw").unwrap();

        substrate.set_item(url.as_str(), b"not a file".to_vec()).await.unwrap();
        assert!(matches!(store.read(&url).await, Err(Error::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_list_and_clear() {
        let store = memory_store();
        for name in ["a.parquet", "b.parquet"] {
            let url = store.file_path_to_url(name).unwrap();
            store.write(&url, &FileBlob::new(name, vec![7])).await.unwrap();
        }

        let listed: Vec<String> = store.list().await.unwrap().iter().map(|u| u.path().to_string()).collect();
        assert_eq!(listed, vec!["/a.parquet", "/b.parquet"]);

        store.clear().await.unwrap();
        assert_eq!(store.size().await.unwrap(), 0);
    }
}
