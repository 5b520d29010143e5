//! Chunked document upload.
//!
//! A staged file is split into fixed-size parts sharing one random job
//! id, each part travelling as a base64 payload on its own upload call.
//! Files that are absent, empty, or over the mimetype's size ceiling are
//! reported with a single metadata-only call instead. The staged temp
//! file is deleted once the sequence ends, success or failure.

use crate::api_client::ApiClient;
use crate::error::ClientResult;
use crate::types::{Asset, UploadDocument};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;
use uuid::Uuid;

/// Upload block size: 10 MiB.
pub const MAX_UPLOAD_BLOCK_SIZE: usize = 10 * 1024 * 1024;

/// Marker prefixed to every base64 payload.
const BASE64_PREFIX: &str = ";base64,";

/// One upload call sequence: a random job identifier shared by all parts.
#[derive(Clone, Debug)]
pub struct UploadJob {
    pub job_id: String,
    pub total_size: i64,
    pub block_size: usize,
    pub total_parts: u32,
}

impl UploadJob {
    fn new(total_size: i64) -> Self {
        let total_parts = ((total_size as f64) / (MAX_UPLOAD_BLOCK_SIZE as f64)).ceil() as u32;
        Self {
            job_id: Uuid::new_v4().to_string(),
            total_size,
            block_size: MAX_UPLOAD_BLOCK_SIZE,
            total_parts: total_parts.max(1),
        }
    }
}

/// Drives multi-part upload calls through the [`ApiClient`].
pub struct UploadPipeline<'a> {
    api: &'a ApiClient,
}

impl<'a> UploadPipeline<'a> {
    pub fn new(api: &'a ApiClient) -> Self {
        Self { api }
    }

    /// Uploads an asset: content parts when a usable staged file exists,
    /// one metadata-only call otherwise. The staged file is removed
    /// afterwards on every path.
    pub async fn upload_asset(
        &self,
        asset: &Asset,
        document: &UploadDocument,
        max_size_in_bytes: i64,
        run_id: i64,
    ) -> ClientResult<()> {
        let result = self
            .upload_inner(asset, document, max_size_in_bytes, run_id)
            .await;
        if !asset.filename.is_empty() && Path::new(&asset.filename).is_file() {
            let _ = tokio::fs::remove_file(&asset.filename).await;
        }
        result
    }

    async fn upload_inner(
        &self,
        asset: &Asset,
        document: &UploadDocument,
        max_size_in_bytes: i64,
        run_id: i64,
    ) -> ClientResult<()> {
        let total_size = if asset.filename.is_empty() {
            0
        } else {
            tokio::fs::metadata(&asset.filename)
                .await
                .map(|m| m.len() as i64)
                .unwrap_or(0)
        };

        if total_size > 0 && total_size < max_size_in_bytes {
            let job = UploadJob::new(total_size);
            debug!(
                "upload(url={},size={},blocks={},jobId={})",
                document.url, total_size, job.total_parts, job.job_id
            );
            let mut file = tokio::fs::File::open(&asset.filename).await?;
            let mut buffer = vec![0u8; job.block_size];
            for part_id in 0..job.total_parts {
                let read = read_block(&mut file, &mut buffer).await?;
                let data = if read > 0 {
                    format!("{BASE64_PREFIX}{}", STANDARD.encode(&buffer[..read]))
                } else {
                    String::new()
                };
                self.api
                    .upload_part(
                        document,
                        part_id,
                        job.total_parts,
                        &job.job_id,
                        job.total_size,
                        &data,
                        run_id,
                    )
                    .await?;
            }
        } else {
            // Metadata-only: nothing staged, empty, or over the ceiling.
            let job = UploadJob::new(0);
            debug!("upload(url={},size={total_size},data=null)", document.url);
            self.api
                .upload_part(document, 0, 1, &job.job_id, total_size, "", run_id)
                .await?;
        }
        Ok(())
    }
}

/// Fills `buffer` as far as the file allows; returns the byte count.
async fn read_block(file: &mut tokio::fs::File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
