//! Method handlers
//!
//! One state transition per protocol method. Handlers only write statuses that
//! carry protocol meaning; every failure is returned as a [`TusError`].

use super::dispatch::{AfterHook, Dispatcher};
use crate::metrics;
use crate::protocol::{
    required_header, required_u64, ResponseBody, TusError, TusResponse,
    CONTENT_TRANSFER_ENCODING, OFFSET, OFFSET_OCTET_STREAM,
};
use crate::router::TusMethod;
use crate::upload::{ChunkedTransfer, TransferOutcome, UploadId};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::StatusCode;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, Span};

impl Dispatcher {
    /// Capability negotiation; extensions add their headers in the before-hook
    pub(super) fn options(&self, response: &mut TusResponse) -> Result<AfterHook, TusError> {
        response.set_status(StatusCode::NO_CONTENT);
        Ok(AfterHook::Run(None))
    }

    #[tracing::instrument(
        name = "tus.post",
        skip(self, headers, response),
        fields(upload.id = %id, upload.final_length = field::Empty),
        err
    )]
    pub(super) async fn post(
        &self,
        id: &UploadId,
        headers: &HeaderMap,
        response: &mut TusResponse,
    ) -> Result<AfterHook, TusError> {
        let final_length = required_u64(headers, "Final-Length")?;
        Span::current().record("upload.final_length", final_length);

        if let Some(max_size) = self.settings.max_size {
            if final_length > max_size {
                return Err(TusError::Overflow(format!(
                    "Final-Length {} exceeds the maximum size {}",
                    final_length, max_size
                )));
            }
        }

        self.uploads.create(id, final_length).await?;
        metrics::record_upload_created();

        let location = format!(
            "{}{}",
            self.base_url(headers),
            self.parser.resource_path(id)
        );
        response.set_status(StatusCode::CREATED);
        response.set_header_str(header::LOCATION, &location)?;

        info!(location = %location, "Upload created");
        Ok(AfterHook::Run(None))
    }

    #[tracing::instrument(name = "tus.head", skip(self, response), fields(upload.id = %id), err)]
    pub(super) async fn head(
        &self,
        id: &UploadId,
        response: &mut TusResponse,
    ) -> Result<AfterHook, TusError> {
        if !self.uploads.exists(id).await? {
            return Err(TusError::NotFound(format!("upload {} doesn't exist", id)));
        }

        let offset = self
            .uploads
            .offset(id)
            .await?
            .ok_or_else(|| TusError::NotFound(format!("upload {} has no offset", id)))?;

        response.set_status(StatusCode::OK);
        response.set_header(OFFSET, HeaderValue::from(offset));
        Ok(AfterHook::Run(None))
    }

    #[tracing::instrument(
        name = "tus.patch",
        skip(self, headers, body, cancel, response),
        fields(
            upload.id = %id,
            upload.offset = field::Empty,
            upload.content_length = field::Empty
        ),
        err
    )]
    pub(super) async fn patch<B>(
        &self,
        id: &UploadId,
        headers: &HeaderMap,
        body: B,
        cancel: CancellationToken,
        response: &mut TusResponse,
    ) -> Result<AfterHook, TusError>
    where
        B: AsyncRead + Unpin,
    {
        if !self.uploads.exists(id).await? {
            return Err(TusError::NotFound(format!("upload {} doesn't exist", id)));
        }

        let offset = required_u64(headers, "Offset")?;
        let content_length = required_u64(headers, "Content-Length")?;
        let content_type = required_header(headers, "Content-Type")?;
        if content_type != OFFSET_OCTET_STREAM {
            return Err(TusError::HeaderValidation(format!(
                "Content-Type must be \"{}\"",
                OFFSET_OCTET_STREAM
            )));
        }

        let span = Span::current();
        span.record("upload.offset", offset);
        span.record("upload.content_length", content_length);

        // Held until the response is built, so the offset check below and the
        // writes that follow cannot interleave with another PATCH on this id
        let _lease = if self.settings.exclusive_patch {
            let lease = self.leases.try_acquire(id.as_str()).ok_or_else(|| {
                TusError::Conflict(format!("another PATCH is in progress for {}", id))
            })?;
            Some(lease)
        } else {
            None
        };

        let stored_offset = self.uploads.offset(id).await?;
        if stored_offset != Some(offset) {
            return Err(TusError::HeaderValidation(format!(
                "Offset header {} isn't the same as the stored offset {}",
                offset,
                stored_offset.map_or_else(|| "(none)".to_string(), |o| o.to_string())
            )));
        }

        let final_length = self.uploads.final_length(id).await?.ok_or_else(|| {
            TusError::Misconfiguration(format!("upload {} has no Final-Length", id))
        })?;
        if final_length < offset {
            return Err(TusError::Misconfiguration(format!(
                "stored offset {} is past Final-Length {}",
                offset, final_length
            )));
        }

        if offset == final_length {
            debug!("Upload already complete, body ignored");
            response.set_status(StatusCode::OK);
            response.set_header(OFFSET, HeaderValue::from(offset));
            return Ok(AfterHook::Skip);
        }

        // Validates extension headers before any byte is written
        let mut observers = self.extensions.observers(TusMethod::Patch, headers)?;

        let report = ChunkedTransfer::new(&self.uploads, id, offset, final_length, content_length)
            .chunk_timeout(self.settings.chunk_timeout)
            .cancellation(cancel)
            .sync_data(self.settings.sync_writes)
            .observe(&mut observers)
            .run(body)
            .await?;

        metrics::record_bytes_written(report.bytes_written, report.offset == final_length);
        response.set_header(OFFSET, HeaderValue::from(report.offset));

        match report.outcome {
            TransferOutcome::Completed => {
                response.set_status(StatusCode::OK);
                Ok(AfterHook::Run(Some(observers.finish())))
            }
            TransferOutcome::Aborted(reason) => {
                info!(
                    reason = reason.as_str(),
                    bytes_written = report.bytes_written,
                    offset = report.offset,
                    "Transfer aborted, upload can be resumed"
                );
                metrics::record_transfer_aborted(reason.as_str());
                response.set_status(StatusCode::CONTINUE);
                Ok(AfterHook::Skip)
            }
        }
    }

    #[tracing::instrument(name = "tus.get", skip(self, response), fields(upload.id = %id), err)]
    pub(super) async fn get(
        &self,
        id: &UploadId,
        response: &mut TusResponse,
    ) -> Result<AfterHook, TusError> {
        let (file, length) = self.uploads.storage().open_reader(id.as_str()).await?;

        response.set_status(StatusCode::OK);
        response.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/force-download"),
        );
        response.set_header_str(
            header::CONTENT_DISPOSITION,
            &format!("attachment; filename=\"{}\"", id),
        )?;
        response.set_header(CONTENT_TRANSFER_ENCODING, HeaderValue::from_static("binary"));
        response.set_header(header::PRAGMA, HeaderValue::from_static("public"));
        response.set_header(
            header::CACHE_CONTROL,
            HeaderValue::from_static("must-revalidate, post-check=0, pre-check=0"),
        );
        response.set_header(header::EXPIRES, HeaderValue::from_static("0"));
        response.set_header(header::CONTENT_LENGTH, HeaderValue::from(length));
        response.set_body(ResponseBody::File { file, length });

        Ok(AfterHook::Run(None))
    }

    // Scheme and host for `Location`: the configured public URL, else the request Host
    fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(ref public_url) = self.settings.public_url {
            return public_url.trim_end_matches('/').to_string();
        }
        headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|host| format!("http://{}", host))
            .unwrap_or_default()
    }
}
