//! The sharing protocol's sender name table.
//!
//! [`SenderDirectory`] is the narrow capability the bridges consume; a
//! binding to the real protocol implements it out of tree. [`MemoryDirectory`]
//! is an in-process table with the protocol's limits, used by tests and by
//! hosts that bridge within one process.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::format::SharedHandle;

/// Longest sender name in bytes: the protocol keeps names in a 256-byte
/// buffer with a terminator.
pub const MAX_NAME_LEN: usize = 255;

/// Most senders the protocol's table holds at once.
pub const MAX_SENDERS: usize = 255;

/// What the protocol records for a published sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderInfo {
    pub width: u32,
    pub height: u32,
    pub handle: SharedHandle,
    /// DXGI format code, kept raw so unknown formats still compare.
    pub format: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("sender name {0:?} is already registered")]
    AlreadyExists(String),

    #[error("sender {0:?} is not registered")]
    Missing(String),

    #[error("sender table is full ({0} senders)")]
    Full(usize),

    #[error("invalid sender name {0:?}")]
    InvalidName(String),

    #[error("sharing protocol unavailable: {0}")]
    Unavailable(String),
}

pub trait SenderDirectory: Send + Sync {
    fn register(&self, name: &str, info: SenderInfo) -> Result<(), DirectoryError>;

    fn update(&self, name: &str, info: SenderInfo) -> Result<(), DirectoryError>;

    /// Returns whether the name was registered.
    fn unregister(&self, name: &str) -> bool;

    /// Registered names, oldest first.
    fn sender_names(&self) -> Vec<String>;

    fn sender_info(&self, name: &str) -> Option<SenderInfo>;

    /// Mark `name` as the active sender. Fails if it is not registered.
    fn set_active(&self, name: &str) -> bool;

    fn active(&self) -> Option<String>;
}

/// Check a sender name against the protocol's limits.
pub fn validate_name(name: &str) -> Result<(), DirectoryError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('\0') {
        return Err(DirectoryError::InvalidName(name.to_owned()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Table {
    senders: Vec<(String, SenderInfo)>,
    active: Option<String>,
}

impl Table {
    fn position(&self, name: &str) -> Option<usize> {
        self.senders.iter().position(|(n, _)| n == name)
    }
}

/// In-process sender table.
pub struct MemoryDirectory {
    capacity: usize,
    table: Mutex<Table>,
    queries: AtomicUsize,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::with_capacity(MAX_SENDERS)
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            table: Mutex::new(Table::default()),
            queries: AtomicUsize::new(0),
        }
    }

    /// Number of enumeration and info queries served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.table.lock().senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count_query(&self) {
        self.queries.fetch_add(1, Ordering::AcqRel);
    }
}

impl SenderDirectory for MemoryDirectory {
    fn register(&self, name: &str, info: SenderInfo) -> Result<(), DirectoryError> {
        validate_name(name)?;
        let mut table = self.table.lock();
        if table.position(name).is_some() {
            return Err(DirectoryError::AlreadyExists(name.to_owned()));
        }
        if table.senders.len() >= self.capacity {
            return Err(DirectoryError::Full(self.capacity));
        }
        table.senders.push((name.to_owned(), info));
        debug!(name, width = info.width, height = info.height, "sender registered");
        Ok(())
    }

    fn update(&self, name: &str, info: SenderInfo) -> Result<(), DirectoryError> {
        let mut table = self.table.lock();
        let index = table
            .position(name)
            .ok_or_else(|| DirectoryError::Missing(name.to_owned()))?;
        table.senders[index].1 = info;
        Ok(())
    }

    fn unregister(&self, name: &str) -> bool {
        let mut table = self.table.lock();
        let Some(index) = table.position(name) else {
            return false;
        };
        table.senders.remove(index);
        if table.active.as_deref() == Some(name) {
            table.active = None;
        }
        debug!(name, "sender unregistered");
        true
    }

    fn sender_names(&self) -> Vec<String> {
        self.count_query();
        self.table
            .lock()
            .senders
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn sender_info(&self, name: &str) -> Option<SenderInfo> {
        self.count_query();
        let table = self.table.lock();
        table.position(name).map(|index| table.senders[index].1)
    }

    fn set_active(&self, name: &str) -> bool {
        let mut table = self.table.lock();
        if table.position(name).is_none() {
            return false;
        }
        table.active = Some(name.to_owned());
        true
    }

    fn active(&self) -> Option<String> {
        self.table.lock().active.clone()
    }
}
