//! Maps fundraiser and team pages into CRM contacts and activities, and
//! computes the derived values written back to the pages.

pub mod config;
pub mod errors;
pub mod extensions;
pub mod field_id;
pub mod mapping;
pub mod mappings;
pub mod patch;
pub mod record;
pub mod streaks;
pub mod sync;
pub mod transforms;

pub use config::{EntityMappings, SyncConfig, Target, ValidationError};
pub use errors::{ExtensionError, MappingError, Result, SyncError, TransformError};
pub use field_id::{FieldId, FieldIdError, FieldKind, FieldScope};
pub use mappings::FieldMappings;
pub use patch::{PagePatch, Patch};
pub use record::{Activity, Contact, Mappable};
pub use sync::{ChangedPages, SyncMapper};
