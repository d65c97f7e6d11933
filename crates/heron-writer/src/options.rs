use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use error_stack::{IntoReport, ResultExt};

use crate::Error;

/// Options controlling a rewrite.
///
/// Unset options fall back to values derived from the original checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriterOptions {
    /// Id of the checkpoint being written. Used in the output directory and
    /// recorded in operator state snapshots.
    ///
    /// Defaults to the id of the savepoint being rewritten, or 0.
    pub checkpoint_id: Option<u64>,
    /// Timestamp recorded in operator state snapshots. Defaults to now.
    pub timestamp_ms: Option<i64>,
    /// Parallelism of the rewritten operator. Defaults to the original.
    pub parallelism: Option<usize>,
    /// Number of worker threads. Defaults to the number of cores.
    pub worker_threads: Option<usize>,
    /// Whether key-group payloads are compressed. Defaults to the setting of
    /// the original keyed state.
    pub compression: Option<bool>,
}

impl WriterOptions {
    pub fn from_yaml_str(yaml: &str) -> error_stack::Result<Self, Error> {
        serde_yaml::from_str(yaml)
            .into_report()
            .change_context(Error::ReadOptions)
    }

    /// Read options from a `.yaml` or `.json` file.
    pub fn try_from_path(path: &Path) -> error_stack::Result<Self, Error> {
        let file = File::open(path)
            .into_report()
            .change_context(Error::ReadOptions)
            .attach_printable_lazy(|| path.display().to_string())?;
        let reader = BufReader::new(file);

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_reader(reader)
                .into_report()
                .change_context(Error::ReadOptions),
            Some("json") => serde_json::from_reader(reader)
                .into_report()
                .change_context(Error::ReadOptions),
            Some(extension) => Err(error_stack::report!(Error::InvalidOptionsExtension(
                extension.to_owned()
            ))),
            None => Err(error_stack::report!(Error::InvalidOptionsExtension(
                String::new()
            ))),
        }
    }

    pub fn with_checkpoint_id(self, checkpoint_id: u64) -> Self {
        Self {
            checkpoint_id: Some(checkpoint_id),
            ..self
        }
    }

    pub fn with_timestamp_ms(self, timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            ..self
        }
    }

    pub fn with_parallelism(self, parallelism: usize) -> Self {
        Self {
            parallelism: Some(parallelism),
            ..self
        }
    }

    pub fn with_worker_threads(self, worker_threads: usize) -> Self {
        Self {
            worker_threads: Some(worker_threads),
            ..self
        }
    }

    pub fn with_compression(self, compression: bool) -> Self {
        Self {
            compression: Some(compression),
            ..self
        }
    }
}
