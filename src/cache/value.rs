use bytes::Bytes;

use crate::decode::DecodedImage;
use crate::error::CacheError;

/// A value that can live in a [`BoundedCache`](super::BoundedCache).
///
/// Clones must be cheap (reference counted): `get` hands out clones while
/// the cache keeps its own copy.
pub trait CacheValue: Clone + Send + Sync + 'static {
    /// Bytes charged against the cache's byte budget.
    fn size_bytes(&self) -> usize;

    /// Empty values are rejected by `put`.
    fn is_empty(&self) -> bool;

    /// Serialize for the disk tier.
    fn to_disk(&self) -> Result<Vec<u8>, CacheError>;

    /// Rebuild a value from its persisted form.
    fn from_disk(data: &[u8]) -> Result<Self, CacheError>;
}

impl CacheValue for DecodedImage {
    fn size_bytes(&self) -> usize {
        DecodedImage::size_bytes(self)
    }

    fn is_empty(&self) -> bool {
        DecodedImage::is_empty(self)
    }

    fn to_disk(&self) -> Result<Vec<u8>, CacheError> {
        self.encode_png().map_err(|e| CacheError::Encode {
            message: e.to_string(),
        })
    }

    fn from_disk(data: &[u8]) -> Result<Self, CacheError> {
        DecodedImage::from_encoded(data).map_err(|e| CacheError::Corrupt {
            message: e.to_string(),
        })
    }
}

impl CacheValue for Bytes {
    fn size_bytes(&self) -> usize {
        self.len()
    }

    fn is_empty(&self) -> bool {
        Bytes::is_empty(self)
    }

    fn to_disk(&self) -> Result<Vec<u8>, CacheError> {
        Ok(self.to_vec())
    }

    fn from_disk(data: &[u8]) -> Result<Self, CacheError> {
        Ok(Bytes::copy_from_slice(data))
    }
}
