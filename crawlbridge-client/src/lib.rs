//! RPC client, upload pipeline, and data model for the crawlbridge
//! platform protocol.
//!
//! Everything the crawler says to the platform goes through
//! [`ApiClient`]: JSON command objects POSTed to the `/crawler/external/*`
//! paths, optionally wrapped in the password-keyed envelope from
//! `crawlbridge-crypto` with a per-call session key selected by a random
//! offset. Large binaries travel through [`upload::UploadPipeline`] as
//! base64 chunks sharing one job id.

pub mod api_client;
pub mod config;
mod error;
pub mod types;
pub mod upload;

pub use api_client::ApiClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use types::{
    Asset, AssetAcl, MetadataMapping, MetadataValues, RenameFolder, Source, SourceAcl,
    SourceProperties, UploadDocument, CRAWLER_TYPE_FILE,
};
pub use upload::{UploadJob, UploadPipeline, MAX_UPLOAD_BLOCK_SIZE};
