//! Landing zone storage
//!
//! Delivered files live under `<prefix>/<source>/<table path>/<uuid>.<ext>`,
//! where a schema-qualified table name (`sales.orders`) becomes nested
//! directories (`sales/orders`).

mod landing;

pub use landing::Landing;

use crate::format::Format;
use object_store::path::Path as ObjectPath;
use std::fmt;

/// A freshly generated, never reused destination for one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    path: ObjectPath,
}

impl DeliveryTarget {
    /// Generate a unique target under `prefix`
    pub fn generate(prefix: &ObjectPath, source: &str, table: &str, format: Format) -> Self {
        let file_name = format!("{}.{}", uuid::Uuid::new_v4(), format.extension());
        let parts = prefix
            .parts()
            .chain(std::iter::once(source.into()))
            .chain(table.split('.').map(Into::into))
            .chain(std::iter::once(file_name.into()));
        Self {
            path: ObjectPath::from_iter(parts),
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }
}

impl fmt::Display for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}
