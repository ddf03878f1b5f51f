//! Streamed body operations.

use std::io::Read;
use std::sync::Arc;

use sparse_map_core::PropertyMap;

use super::core::StorageClient;
use crate::content::{BodyStream, StreamedContentHelper};
use crate::diagnostics::counter;
use crate::error::{StorageClientError, StorageResult};

impl StorageClient {
    /// Store a body for a content item and return the properties locating
    /// it, for the caller to merge into the item.
    #[allow(clippy::too_many_arguments)]
    pub fn stream_body_in(
        &mut self,
        keyspace: &str,
        column_family: &str,
        content_id: &str,
        content_block_id: &str,
        stream_id: Option<&str>,
        content: &PropertyMap,
        body: &mut dyn Read,
    ) -> StorageResult<PropertyMap> {
        self.check_active()?;
        self.content_helper()?.write_body(
            keyspace,
            column_family,
            content_id,
            content_block_id,
            stream_id,
            content,
            body,
        )
    }

    /// Open the body recorded in `content`.
    ///
    /// The stream is closed when dropped or when the client is passivated.
    pub fn stream_body_out(
        &mut self,
        keyspace: &str,
        column_family: &str,
        content_block_id: &str,
        stream_id: Option<&str>,
        content: &PropertyMap,
    ) -> StorageResult<Option<BodyStream>> {
        self.check_active()?;
        let reader = self.content_helper()?.read_body(
            keyspace,
            column_family,
            content_block_id,
            stream_id,
            content,
        )?;
        Ok(reader.map(|reader| {
            BodyStream::new(
                reader,
                self.executor.counters().acquire(counter::STREAM),
                &self.disposables,
            )
        }))
    }

    /// Whether `content` records a body under `stream_id`.
    pub fn has_body(&self, content: &PropertyMap, stream_id: Option<&str>) -> bool {
        self.content
            .as_ref()
            .map(|helper| helper.has_stream(content, stream_id))
            .unwrap_or(false)
    }

    fn content_helper(&self) -> StorageResult<Arc<dyn StreamedContentHelper>> {
        self.content
            .clone()
            .ok_or_else(|| StorageClientError::config("No streamed content helper configured"))
    }
}
