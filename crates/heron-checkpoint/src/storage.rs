use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use error_stack::{IntoReport, ResultExt};
use object_store::ObjectStore;
use tokio::io::AsyncWriteExt;

use crate::Error;

/// If a file is smaller than this, use upload rather than multipart upload.
const SINGLE_PART_UPLOAD_LIMIT_BYTES: usize = 5_000_000;

/// Abstraction over where checkpoint files are written to and read from.
///
/// Everything the rewriter persists goes through this trait. Paths are
/// absolute file system paths; how they map onto the underlying store is up
/// to the implementation.
pub trait CheckpointStorage: Send + Sync + std::fmt::Debug {
    /// Create a new file at `path` for writing.
    ///
    /// Fails if a file already exists at `path`.
    fn create(&self, path: &Path) -> error_stack::Result<Box<dyn StateOutput>, Error>;

    /// Read the entire contents of the file at `path`.
    fn read(&self, path: &Path) -> error_stack::Result<Vec<u8>, Error>;
}

/// A file being written to checkpoint storage.
///
/// Nothing is visible at the path until [StateOutput::finish] succeeds.
pub trait StateOutput: Write + Send {
    fn path(&self) -> &Path;

    /// Number of bytes written so far.
    fn position(&self) -> u64;

    /// Upload the file and verify it is stored, returning its size.
    fn finish(self: Box<Self>) -> error_stack::Result<u64, Error>;
}

/// Checkpoint storage backed by an [ObjectStore].
///
/// The store is driven from synchronous code (the worker threads of the
/// rewrite) through a dedicated tokio runtime.
#[derive(Debug)]
pub struct ObjectStoreStorage {
    object_store: Arc<dyn ObjectStore>,
    runtime: tokio::runtime::Runtime,
}

impl ObjectStoreStorage {
    pub fn try_new(object_store: Arc<dyn ObjectStore>) -> error_stack::Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("heron-storage")
            .enable_all()
            .build()
            .into_report()
            .change_context(Error::CreateRuntime)?;
        Ok(Self {
            object_store,
            runtime,
        })
    }

    /// Storage on the local file system.
    pub fn local() -> error_stack::Result<Self, Error> {
        Self::try_new(Arc::new(object_store::local::LocalFileSystem::new()))
    }

    /// Storage held in memory, discarded when dropped.
    pub fn in_memory() -> error_stack::Result<Self, Error> {
        Self::try_new(Arc::new(object_store::memory::InMemory::new()))
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.object_store
    }
}

fn object_path(path: &Path) -> error_stack::Result<object_store::path::Path, Error> {
    object_store::path::Path::from_absolute_path(path)
        .into_report()
        .change_context_lazy(|| Error::InvalidPath(path.to_owned()))
}

impl CheckpointStorage for ObjectStoreStorage {
    fn create(&self, path: &Path) -> error_stack::Result<Box<dyn StateOutput>, Error> {
        let location = object_path(path)?;
        match self.runtime.block_on(self.object_store.head(&location)) {
            Ok(_) => {
                return Err(error_stack::report!(Error::CreateFile(path.to_owned()))
                    .attach_printable("file already exists"))
            }
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => {
                return Err(e)
                    .into_report()
                    .change_context_lazy(|| Error::CreateFile(path.to_owned()))
            }
        }

        Ok(Box::new(ObjectStoreOutput {
            object_store: self.object_store.clone(),
            runtime: self.runtime.handle().clone(),
            path: path.to_owned(),
            location,
            buffer: Vec::new(),
        }))
    }

    fn read(&self, path: &Path) -> error_stack::Result<Vec<u8>, Error> {
        let location = object_path(path)?;
        let read_error = || Error::ReadFile(path.to_owned());
        let bytes = self
            .runtime
            .block_on(async {
                self.object_store.get(&location).await?.bytes().await
            })
            .into_report()
            .change_context_lazy(read_error)?;
        Ok(bytes.to_vec())
    }
}

struct ObjectStoreOutput {
    object_store: Arc<dyn ObjectStore>,
    runtime: tokio::runtime::Handle,
    path: PathBuf,
    location: object_store::path::Path,
    buffer: Vec<u8>,
}

impl Write for ObjectStoreOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StateOutput for ObjectStoreOutput {
    fn path(&self) -> &Path {
        &self.path
    }

    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn finish(self: Box<Self>) -> error_stack::Result<u64, Error> {
        let Self {
            object_store,
            runtime,
            path,
            location,
            buffer,
        } = *self;
        let write_error = || Error::WriteFile(path.clone());
        let length = buffer.len();

        runtime
            .block_on(async {
                if length <= SINGLE_PART_UPLOAD_LIMIT_BYTES {
                    object_store
                        .put(&location, bytes::Bytes::from(buffer))
                        .await
                        .map_err(std::io::Error::from)
                } else {
                    let (_id, mut destination) = object_store
                        .put_multipart(&location)
                        .await
                        .map_err(std::io::Error::from)?;
                    destination.write_all(&buffer).await?;
                    destination.shutdown().await
                }
            })
            .into_report()
            .change_context_lazy(write_error)?;

        let stored = runtime
            .block_on(object_store.head(&location))
            .into_report()
            .change_context_lazy(write_error)?;
        if stored.size != length {
            return Err(error_stack::report!(write_error())
                .attach_printable(format!("stored {} bytes but wrote {length}", stored.size)));
        }

        tracing::trace!("Persisted {length} bytes to {}", path.display());
        Ok(length as u64)
    }
}
