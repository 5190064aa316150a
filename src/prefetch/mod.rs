//! Thumbnail serving and neighborhood prefetch.
//!
//! # Components
//!
//! - [`Prefetcher`]: get-or-decode for thumbnails and full images, progressive
//!   loading, and cache warming around a position in a file list
//! - [`FileList`]: the ordered list of images being browsed
//! - [`DirectoryListing`]: a [`FileList`] over the images in one folder

mod coordinator;
mod listing;

pub use coordinator::{
    parse_image_id, quick_edge, ImageReady, PrefetchBatch, PrefetchReport, Prefetcher,
    QUICK_EDGE_MAX, QUICK_EDGE_MIN,
};
pub use listing::{is_image_file, DirectoryListing, FileList, IMAGE_EXTENSIONS};
