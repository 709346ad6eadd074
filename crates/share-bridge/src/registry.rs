//! Named shared textures in the sharing protocol's table.

use std::sync::Arc;

use share_interop::{
    validate_name, PixelFormat, SenderDirectory, SenderInfo, SharedHandle, MAX_NAME_LEN,
    MAX_SENDERS,
};
use tracing::debug;

use crate::error::RegistryError;

/// A published shared texture.
///
/// Identity is `(name, handle)`. The handle only stays valid while the
/// publishing process keeps its texture alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedTextureHandle {
    pub name: String,
    pub handle: SharedHandle,
    /// DXGI format code.
    pub format: u32,
    pub width: u32,
    pub height: u32,
}

impl SharedTextureHandle {
    pub fn info(&self) -> SenderInfo {
        SenderInfo {
            width: self.width,
            height: self.height,
            handle: self.handle,
            format: self.format,
        }
    }
}

/// Snapshot of the published names, taken when
/// [`SharedRegistry::enumerate_senders`] was called.
#[derive(Debug)]
pub struct SenderNames {
    names: std::vec::IntoIter<String>,
}

impl Iterator for SenderNames {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.names.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.names.size_hint()
    }
}

impl ExactSizeIterator for SenderNames {}

/// Thin wrapper over a [`SenderDirectory`].
#[derive(Clone)]
pub struct SharedRegistry {
    directory: Arc<dyn SenderDirectory>,
}

impl SharedRegistry {
    pub fn new(directory: Arc<dyn SenderDirectory>) -> Self {
        Self { directory }
    }

    pub fn create_sender(
        &self,
        name: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
        handle: SharedHandle,
    ) -> Result<SharedTextureHandle, RegistryError> {
        let record = SharedTextureHandle {
            name: name.to_owned(),
            handle,
            format: format.dxgi(),
            width,
            height,
        };
        self.directory.register(name, record.info())?;
        debug!(name, width, height, %handle, "sender created");
        Ok(record)
    }

    /// Re-publish geometry under an existing name. The format is kept.
    pub fn update_sender(
        &self,
        name: &str,
        width: u32,
        height: u32,
        handle: SharedHandle,
    ) -> Result<(), RegistryError> {
        let current = self
            .directory
            .sender_info(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))?;
        self.directory.update(
            name,
            SenderInfo {
                width,
                height,
                handle,
                format: current.format,
            },
        )?;
        Ok(())
    }

    /// Unpublish `name`. Releasing an unknown name does nothing.
    pub fn release_sender(&self, name: &str) {
        if self.directory.unregister(name) {
            debug!(name, "sender released");
        }
    }

    pub fn enumerate_senders(&self) -> SenderNames {
        SenderNames {
            names: self.directory.sender_names().into_iter(),
        }
    }

    pub fn get_sender_info(&self, name: &str) -> Result<SenderInfo, RegistryError> {
        self.directory
            .sender_info(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))
    }

    pub fn set_active_sender(&self, name: &str) -> bool {
        self.directory.set_active(name)
    }

    pub fn active_sender(&self) -> Option<String> {
        self.directory.active()
    }

    pub fn get_first_sender_name(&self) -> Option<String> {
        self.enumerate_senders().next()
    }

    /// `base` if it is free, else the first free `base_1`, `base_2`, ...
    pub fn unique_name(&self, base: &str) -> Result<String, RegistryError> {
        validate_name(base)?;
        let taken = self.directory.sender_names();
        if !taken.iter().any(|n| n == base) {
            return Ok(base.to_owned());
        }
        for suffix in 1..=MAX_SENDERS {
            let tail = format!("_{suffix}");
            let mut stem = base;
            while stem.len() + tail.len() > MAX_NAME_LEN {
                let mut end = stem.len() - 1;
                while !stem.is_char_boundary(end) {
                    end -= 1;
                }
                stem = &stem[..end];
            }
            let candidate = format!("{stem}{tail}");
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(RegistryError::DuplicateName(base.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use share_interop::MemoryDirectory;

    fn registry() -> (Arc<MemoryDirectory>, SharedRegistry) {
        let dir = Arc::new(MemoryDirectory::new());
        let registry = SharedRegistry::new(dir.clone());
        (dir, registry)
    }

    #[test]
    fn create_then_info() {
        let (_, registry) = registry();
        let record = registry
            .create_sender("A", 800, 600, PixelFormat::Bgra8Unorm, SharedHandle(7))
            .unwrap();
        assert_eq!(record.format, 87);
        let info = registry.get_sender_info("A").unwrap();
        assert_eq!((info.width, info.height, info.handle), (800, 600, SharedHandle(7)));
    }

    #[test]
    fn duplicate_name_is_reported() {
        let (_, registry) = registry();
        registry
            .create_sender("A", 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(1))
            .unwrap();
        assert!(matches!(
            registry.create_sender("A", 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(2)),
            Err(RegistryError::DuplicateName(name)) if name == "A"
        ));
    }

    #[test]
    fn invalid_and_full_are_protocol_errors() {
        let dir = Arc::new(MemoryDirectory::with_capacity(1));
        let registry = SharedRegistry::new(dir);
        assert!(matches!(
            registry.create_sender("", 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(1)),
            Err(RegistryError::Protocol(_))
        ));
        registry
            .create_sender("A", 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(1))
            .unwrap();
        assert!(matches!(
            registry.create_sender("B", 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(2)),
            Err(RegistryError::Protocol(_))
        ));
    }

    #[test]
    fn update_keeps_format_and_requires_name() {
        let (_, registry) = registry();
        registry
            .create_sender("A", 1, 1, PixelFormat::Rgba8Unorm, SharedHandle(1))
            .unwrap();
        registry.update_sender("A", 640, 480, SharedHandle(2)).unwrap();
        let info = registry.get_sender_info("A").unwrap();
        assert_eq!((info.width, info.height, info.format), (640, 480, 28));
        assert!(matches!(
            registry.update_sender("B", 1, 1, SharedHandle(3)),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn release_is_idempotent() {
        let (dir, registry) = registry();
        registry
            .create_sender("A", 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(1))
            .unwrap();
        registry.release_sender("A");
        registry.release_sender("A");
        assert!(dir.is_empty());
        assert!(registry.get_sender_info("A").is_err());
    }

    #[test]
    fn enumeration_is_a_snapshot() {
        let (_, registry) = registry();
        registry
            .create_sender("A", 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(1))
            .unwrap();
        let names = registry.enumerate_senders();
        registry
            .create_sender("B", 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(2))
            .unwrap();
        assert_eq!(names.collect::<Vec<_>>(), vec!["A".to_owned()]);
        assert_eq!(registry.enumerate_senders().len(), 2);
        assert_eq!(registry.get_first_sender_name().as_deref(), Some("A"));
    }

    #[test]
    fn unique_name_appends_suffix() {
        let (_, registry) = registry();
        assert_eq!(registry.unique_name("A").unwrap(), "A");
        registry
            .create_sender("A", 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(1))
            .unwrap();
        registry
            .create_sender("A_1", 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(2))
            .unwrap();
        assert_eq!(registry.unique_name("A").unwrap(), "A_2");
    }

    #[test]
    fn unique_name_stays_within_limit() {
        let (_, registry) = registry();
        let long = "n".repeat(MAX_NAME_LEN);
        registry
            .create_sender(&long, 1, 1, PixelFormat::Bgra8Unorm, SharedHandle(1))
            .unwrap();
        let alt = registry.unique_name(&long).unwrap();
        assert_eq!(alt.len(), MAX_NAME_LEN);
        assert!(alt.ends_with("_1"));
    }
}
