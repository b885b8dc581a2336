//! Upload intake: the glue directly under the HTTP layer.
//!
//! Assigns a request id, spools the upload stream into a scoped temp dir
//! while enforcing the byte limit, and hands the spooled file to the
//! engine. Every path returns a well-formed [`ApiResponse`].

use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::engine::QcEngine;
use crate::error::Result;
use crate::wire::{ApiResponse, StatusCode};

/// Spool read size.
const CHUNK_BYTES: usize = 1024 * 1024;

const FALLBACK_NAME: &str = "upload.bin";

/// 32 lowercase hex characters (UUID v4, no hyphens).
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Reduce a client-supplied name to a safe basename.
pub fn safe_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy().trim().to_string())
        .unwrap_or_default();
    if base.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    ["..", "/", "\\", "\0"]
        .iter()
        .fold(base, |acc, bad| acc.replace(bad, "_"))
}

enum Spooled {
    Complete(u64),
    TooLarge,
}

/// Accept one upload and return its response envelope.
///
/// `filename` is the client-declared name; `None` or empty means no file
/// part was sent.
pub async fn handle_upload<R>(engine: &QcEngine, filename: Option<&str>, reader: R) -> ApiResponse
where
    R: AsyncRead + Unpin,
{
    let request_id = new_request_id();
    let span = info_span!("intake", request_id = %request_id);
    async {
        let stats = engine.stats();
        stats.enqueue(&request_id);

        let reject = |code: StatusCode| {
            stats.ticket(request_id.as_str()).fail();
            ApiResponse::failure(request_id.as_str(), code)
        };

        let Some(name) = filename.filter(|n| !n.is_empty()) else {
            warn!("upload has no file");
            return reject(StatusCode::MissingAudio);
        };

        let scratch = match tempfile::Builder::new().prefix("aqc_req_").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "could not create upload dir");
                return reject(StatusCode::MissingAudio);
            }
        };
        let src_path = scratch.path().join(safe_filename(name));
        let max_bytes = engine.config().max_file_size_bytes();

        match spool(reader, &src_path, max_bytes).await {
            Ok(Spooled::TooLarge) => {
                warn!(max_bytes, "upload exceeded size limit while streaming");
                reject(StatusCode::FileTooLarge)
            }
            Ok(Spooled::Complete(0)) => {
                warn!("upload is empty");
                reject(StatusCode::MissingAudio)
            }
            Ok(Spooled::Complete(size)) => {
                info!(size_bytes = size, file = %src_path.display(), "upload spooled");
                engine.process(&request_id, &src_path, size).await
            }
            Err(e) => {
                warn!(error = %e, "upload stream failed");
                reject(StatusCode::MissingAudio)
            }
        }
    }
    .instrument(span)
    .await
}

async fn spool<R>(mut reader: R, dest: &Path, max_bytes: u64) -> Result<Spooled>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(dest).await?;
    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > max_bytes {
            return Ok(Spooled::TooLarge);
        }
        file.write_all(&buf[..n]).await?;
    }
    file.flush().await?;
    debug!(total, "spool complete");
    Ok(Spooled::Complete(total))
}
