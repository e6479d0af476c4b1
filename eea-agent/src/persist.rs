//! Bundle persistence.
//!
//! The installed bundle is written to non-volatile storage so the device
//! resumes without the cloud. Flash access has stricter context
//! requirements than guest execution, so writing happens on its own
//! small-stack task: the [`Persistor`] polls the persist slot and writes
//! whatever blob is current; the supervisor never touches the store.

use crate::hello::{NULL_VERSION, hello_message};
use eea_core::{
    AgentConfig, Bundle, EeaError, OutboundMessage, PersistRequest, QueueSender, Result,
    SlotReceiver, SlotSender,
};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Namespace directory inside the storage root.
pub const STORE_NAMESPACE: &str = "EEA";

/// Key under which the raw bundle bytes live.
pub const STORE_KEY: &str = "eea_bundle";

/// The non-volatile blob store: one binary blob under a fixed
/// namespace/key. Absence of the key is the valid "no bundle installed"
/// state.
pub struct BundleStore {
    root: PathBuf,
}

impl BundleStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self) -> PathBuf {
        self.root.join(STORE_NAMESPACE).join(STORE_KEY)
    }

    /// Read the persisted blob, or `None` when the device is bare.
    pub fn read(&self) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path();
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(EeaError::Storage {
                path,
                cause: err.to_string(),
            }),
        }
    }

    /// Write the blob. The bytes land in a temporary file first and are
    /// renamed into place, so a torn write never replaces a good blob.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path();
        let storage_err = |err: io::Error| EeaError::Storage {
            path: self.blob_path(),
            cause: err.to_string(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(storage_err)?;
        }
        let staging = path.with_extension("tmp");
        fs::write(&staging, bytes).map_err(storage_err)?;
        fs::rename(&staging, &path).map_err(storage_err)?;
        Ok(())
    }
}

/// The persistor task: waits on the persist slot and writes the current
/// bundle blob. Failures are logged; the in-memory bundle is unaffected.
pub struct Persistor {
    store: BundleStore,
    requests: SlotReceiver<PersistRequest>,
    interval: Duration,
}

impl Persistor {
    /// Create a persistor polling at the given interval.
    pub fn new(store: BundleStore, requests: SlotReceiver<PersistRequest>, interval: Duration) -> Self {
        Self {
            store,
            requests,
            interval,
        }
    }

    /// Launch the persistor on its own small-stack thread.
    pub fn spawn(self, stack_bytes: usize) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("eea-persistor".to_string())
            .stack_size(stack_bytes)
            .spawn(move || self.run())
    }

    /// Poll loop. Runs until the process exits.
    pub fn run(mut self) {
        loop {
            self.poll_once();
            thread::sleep(self.interval);
        }
    }

    /// Service at most one pending persist request.
    pub fn poll_once(&mut self) {
        if let Some(request) = self.requests.take() {
            match self.store.write(&request.bytes) {
                Ok(()) => tracing::info!(
                    bundle_id = %request.bundle_id,
                    size = request.bytes.len(),
                    "bundle persisted"
                ),
                Err(err) => tracing::error!(error = %err, "bundle persist failed"),
            }
        }
    }
}

/// Bootstrap read, run on the main task before the workers start: a
/// persisted blob is queued for installation on the supervisor's first
/// tick; a bare device announces itself with the `nullVersion` Hello.
pub fn bootstrap(
    store: &BundleStore,
    bundles: &SlotSender<Bundle>,
    outbound: &QueueSender<OutboundMessage>,
    config: &AgentConfig,
) {
    match store.read() {
        Ok(Some(bytes)) => {
            tracing::info!(size = bytes.len(), "persisted bundle found, queueing install");
            bundles.replace(Bundle::new(bytes));
        }
        Ok(None) => {
            tracing::info!("no persisted bundle, device is bare");
            outbound.try_send(hello_message(config, NULL_VERSION));
        }
        Err(err) => {
            tracing::error!(error = %err, "persisted bundle unreadable, continuing bare");
            outbound.try_send(hello_message(config, NULL_VERSION));
        }
    }
}
