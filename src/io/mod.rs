//! I/O layer.
//!
//! Rotational disks pay a seek for every switch between files, so reads are
//! serialized through a single worker thread that consumes each file front
//! to back in large chunks, with an optional read-ahead cache filled in the
//! order the viewer is expected to need the files.

mod sequential_reader;

pub use sequential_reader::{
    SequentialReader, DEFAULT_CHUNK_SIZE, DEFAULT_PREFETCH_BUDGET, DEFAULT_SHUTDOWN_TIMEOUT,
};
