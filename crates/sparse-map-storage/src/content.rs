//! Streamed body content.
//!
//! Large binary bodies never live in a property map. A
//! [`StreamedContentHelper`] writes them somewhere else and returns the
//! properties that locate them; the caller merges those into the content's
//! property map. Several bodies can hang off one content item, each under its
//! own stream id.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use sparse_map_core::{PropertyMap, Value};
use tracing::{debug, info};

use crate::diagnostics::CounterGuard;
use crate::disposables::{Disposable, DisposableRegistry, Registration};
use crate::error::{StorageClientError, StorageResult};

/// Relative location of the stored body.
pub const BODY_LOCATION_FIELD: &str = "_bodyLocation";
/// Length of the stored body in bytes.
pub const LENGTH_FIELD: &str = "_length";
/// When the body was last written.
pub const BODY_LAST_MODIFIED_FIELD: &str = "_bodyLastModified";

/// Property name for `field` under an optional alternate stream.
pub fn stream_field(field: &str, stream_id: Option<&str>) -> String {
    match stream_id {
        Some(id) => format!("{}/{}", field, id),
        None => field.to_string(),
    }
}

/// Reads and writes bodies outside the property map.
pub trait StreamedContentHelper: Send + Sync {
    /// Store `body` and return the properties that locate it.
    #[allow(clippy::too_many_arguments)]
    fn write_body(
        &self,
        keyspace: &str,
        column_family: &str,
        content_id: &str,
        content_block_id: &str,
        stream_id: Option<&str>,
        content: &PropertyMap,
        body: &mut dyn Read,
    ) -> StorageResult<PropertyMap>;

    /// Open the body recorded in `content`, or `None` if it has none.
    fn read_body(
        &self,
        keyspace: &str,
        column_family: &str,
        content_block_id: &str,
        stream_id: Option<&str>,
        content: &PropertyMap,
    ) -> StorageResult<Option<Box<dyn Read + Send>>>;

    fn has_stream(&self, content: &PropertyMap, stream_id: Option<&str>) -> bool;
}

/// Stores bodies as files under a root directory.
///
/// Layout: `{root}/{keyspace}/{family}/{hh}/{hash}-{stream}-{nanos}` where
/// `hash` is the md5 of the content block id. Each write goes to a new file,
/// so readers of the previous body are unaffected.
#[derive(Debug, Clone)]
pub struct FileStreamContentHelper {
    root: PathBuf,
}

impl FileStreamContentHelper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_path(
        keyspace: &str,
        column_family: &str,
        content_block_id: &str,
        stream_id: Option<&str>,
    ) -> PathBuf {
        let hash = hex::encode(md5::compute(content_block_id.as_bytes()).0);
        let file = format!(
            "{}-{}-{}",
            hash,
            stream_id.unwrap_or("body"),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        PathBuf::from(keyspace)
            .join(column_family)
            .join(&hash[..2])
            .join(file)
    }
}

impl StreamedContentHelper for FileStreamContentHelper {
    fn write_body(
        &self,
        keyspace: &str,
        column_family: &str,
        content_id: &str,
        content_block_id: &str,
        stream_id: Option<&str>,
        _content: &PropertyMap,
        body: &mut dyn Read,
    ) -> StorageResult<PropertyMap> {
        let relative = Self::relative_path(keyspace, column_family, content_block_id, stream_id);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        let length = io::copy(body, &mut file)?;
        file.sync_all()?;
        info!("Wrote {} bytes of body for {} to {}", length, content_id, path.display());

        let location = relative.to_string_lossy().replace('\\', "/");
        let mut properties = PropertyMap::new();
        properties.insert(stream_field(BODY_LOCATION_FIELD, stream_id), Value::from(location));
        properties.insert(stream_field(LENGTH_FIELD, stream_id), Value::from(length as i64));
        properties.insert(
            stream_field(BODY_LAST_MODIFIED_FIELD, stream_id),
            Value::from(Utc::now()),
        );
        Ok(properties)
    }

    fn read_body(
        &self,
        _keyspace: &str,
        _column_family: &str,
        content_block_id: &str,
        stream_id: Option<&str>,
        content: &PropertyMap,
    ) -> StorageResult<Option<Box<dyn Read + Send>>> {
        let field = stream_field(BODY_LOCATION_FIELD, stream_id);
        let Some(location) = content.get(&field).and_then(Value::as_str) else {
            debug!("No body recorded for {}", content_block_id);
            return Ok(None);
        };
        let path = self.root.join(location);
        if !path.starts_with(&self.root) || location.split('/').any(|part| part == "..") {
            return Err(StorageClientError::config(format!(
                "Body location {} escapes the content root",
                location
            )));
        }
        match File::open(&path) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Body file {} missing", path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn has_stream(&self, content: &PropertyMap, stream_id: Option<&str>) -> bool {
        content.contains_key(&stream_field(BODY_LOCATION_FIELD, stream_id))
    }
}

struct StreamSlot {
    reader: Mutex<Option<(Box<dyn Read + Send>, CounterGuard)>>,
}

impl Disposable for StreamSlot {
    fn close(&self) {
        if self.reader.lock().take().is_some() {
            debug!("Body stream closed");
        }
    }
}

/// A body opened for reading, closed when dropped or when its client is
/// passivated.
pub struct BodyStream {
    slot: Arc<StreamSlot>,
    registration: Option<Registration>,
}

impl BodyStream {
    pub(crate) fn new(
        reader: Box<dyn Read + Send>,
        guard: CounterGuard,
        registry: &DisposableRegistry,
    ) -> Self {
        let slot = Arc::new(StreamSlot {
            reader: Mutex::new(Some((reader, guard))),
        });
        let registration = registry.register(Arc::clone(&slot) as Arc<dyn Disposable>);
        Self {
            slot,
            registration: Some(registration),
        }
    }

    pub fn is_open(&self) -> bool {
        self.slot.reader.lock().is_some()
    }

    pub fn close(&mut self) {
        self.slot.close();
        if let Some(registration) = self.registration.take() {
            registration.release();
        }
    }
}

impl Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.slot.reader.lock().as_mut() {
            Some((reader, _)) => reader.read(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "body stream closed")),
        }
    }
}

impl Drop for BodyStream {
    fn drop(&mut self) {
        self.close();
    }
}
