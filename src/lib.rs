#![deny(unsafe_code)]

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bucketizer;
pub mod cache;
pub mod chunk;
pub mod chunk_format;
pub mod codec;
pub mod compacter;
pub mod config;
pub mod data_store;
pub mod document_store;
pub mod error;
pub mod executor;
pub mod file_chunk;
pub mod generation;
pub mod header;
pub mod lid;
pub mod lid_index;
pub mod log_data_store;
pub mod randread;
pub mod store_by_bucket;
pub mod synclog;
pub mod writeable_file_chunk;

pub use crate::data_store::{IDataStore, MemoryUsage};
pub use crate::document_store::{DocumentStore, IDocumentStore};
pub use crate::error::{Result, StoreError};
pub use crate::lid::{Lid, LidInfo};
pub use crate::log_data_store::LogDataStore;

pub mod prelude {
    pub use crate::config::{
        CompressionConfig, CompressionType, DocumentStoreConfig, FileChunkConfig,
        LogDataStoreConfig, RandReadKind, TuneConfig, UpdateStrategy,
    };
    pub use crate::data_store::{IDataStore, MemoryUsage};
    pub use crate::document_store::{DocumentStore, IDocumentStore};
    pub use crate::error::{Result, StoreError};
    pub use crate::lid::Lid;
    pub use crate::log_data_store::LogDataStore;
}
