//! Color control attribute.
//!
//! Every active keyboard exposes a write-only `rgb_color` attribute accepting
//! `R,G,B` payloads. Where the attribute lives is up to the [`ControlHost`],
//! the CLI hosts all of them in an in-process [`AttributeTable`].

use std::collections::BTreeMap;
use std::sync::Weak;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::errno;
use crate::session::DeviceSession;

/// Control attribute could not be exposed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("attribute {name} already exists for {path}")]
    Exists { name: &'static str, path: String },
}

/// Place where control attributes are exposed.
pub trait ControlHost: Send + Sync {
    /// Expose the attribute of the device at `path`.
    fn register(&self, path: &str, attribute: ColorAttribute) -> Result<(), RegistrationError>;

    /// Remove the attribute of the device at `path`, if it exists.
    fn deregister(&self, path: &str);
}

/// Write-only color attribute of one device.
///
/// The attribute does not keep its device alive, stores after detach fail
/// with `-ENODEV`.
#[derive(Clone)]
pub struct ColorAttribute {
    session: Weak<DeviceSession>,
}

impl ColorAttribute {
    pub const NAME: &'static str = "rgb_color";

    pub fn new(session: Weak<DeviceSession>) -> Self {
        Self { session }
    }

    /// Apply an `R,G,B` payload.
    ///
    /// Returns the number of bytes consumed, or a negative errno.
    pub fn store(&self, payload: &[u8]) -> isize {
        let session = match self.session.upgrade() {
            Some(session) => session,
            None => return -errno::ENODEV as isize,
        };

        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(err) => {
                debug!(device = session.name(), "rejecting non UTF-8 payload: {err}");
                return -errno::EINVAL as isize;
            },
        };

        match session.set_color(text) {
            Ok(_) => payload.len() as isize,
            Err(err) => err.errno() as isize,
        }
    }
}

/// In-process control host keyed by device path.
#[derive(Default)]
pub struct AttributeTable {
    attributes: Mutex<BTreeMap<String, ColorAttribute>>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths with a registered attribute.
    pub fn paths(&self) -> Vec<String> {
        self.attributes.lock().keys().cloned().collect()
    }

    /// Store a payload through a single attribute.
    pub fn store(&self, path: &str, payload: &[u8]) -> Option<isize> {
        // Clone the attribute so the table is not locked during the write.
        let attribute = self.attributes.lock().get(path).cloned()?;
        Some(attribute.store(payload))
    }

    /// Store a payload through every registered attribute.
    pub fn store_all(&self, payload: &[u8]) -> Vec<(String, isize)> {
        let attributes: Vec<_> = self
            .attributes
            .lock()
            .iter()
            .map(|(path, attribute)| (path.clone(), attribute.clone()))
            .collect();

        attributes.into_iter().map(|(path, attribute)| (path, attribute.store(payload))).collect()
    }
}

impl ControlHost for AttributeTable {
    fn register(&self, path: &str, attribute: ColorAttribute) -> Result<(), RegistrationError> {
        let mut attributes = self.attributes.lock();
        if attributes.contains_key(path) {
            return Err(RegistrationError::Exists {
                name: ColorAttribute::NAME,
                path: path.to_owned(),
            });
        }

        attributes.insert(path.to_owned(), attribute);
        Ok(())
    }

    fn deregister(&self, path: &str) {
        self.attributes.lock().remove(path);
    }
}
