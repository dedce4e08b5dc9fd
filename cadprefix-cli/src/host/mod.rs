//! Seam between the rename engine and the outside world: the authoring host
//! that owns document content, and the filesystem that owns the files.

pub mod bridge;
pub mod fs;
pub mod json_store;
pub mod properties;

pub use bridge::{BridgeConnector, BridgeHost};
pub use fs::{FileSystem, LocalFs};
pub use json_store::{JsonStoreConnector, JsonStoreHost};
pub use properties::{read_part_number, PART_NUMBER_KEY, PROPERTY_SETS};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::config::{HostConfig, HostKind};
use crate::core::error::{CampaignError, HostResult};
use crate::core::{DerivedLink, Occurrence, OccurrenceId, Transform};

/// Opaque handle of a document opened in the authoring host
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DocumentHandle(pub u64);

impl std::fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operations the engine consumes from the authoring host.
///
/// Calls are synchronous and the host is not reentrant: one call at a time.
pub trait AuthoringHost {
    fn open(&mut self, path: &Path, writable: bool) -> HostResult<DocumentHandle>;

    fn close(&mut self, handle: DocumentHandle, save: bool) -> HostResult<()>;

    fn save(&mut self, handle: DocumentHandle) -> HostResult<()>;

    /// Occurrences of an assembly, or model references of a drawing's views
    fn occurrences(&mut self, handle: DocumentHandle) -> HostResult<Vec<Occurrence>>;

    /// Retarget an occurrence in place
    fn replace_reference(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
        new_path: &Path,
    ) -> HostResult<()>;

    fn add_occurrence(
        &mut self,
        handle: DocumentHandle,
        path: &Path,
        transform: &Transform,
    ) -> HostResult<OccurrenceId>;

    fn set_occurrence_state(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
        name: &str,
        visible: bool,
        suppressed: bool,
    ) -> HostResult<()>;

    fn delete_occurrence(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
    ) -> HostResult<()>;

    /// Documents the parent currently holds references to
    fn referenced_documents(&mut self, handle: DocumentHandle) -> HostResult<Vec<PathBuf>>;

    /// Drop a referenced document from the parent's in-memory reference set
    fn close_referenced_document(
        &mut self,
        handle: DocumentHandle,
        referenced: &Path,
    ) -> HostResult<()>;

    fn read_property(
        &mut self,
        handle: DocumentHandle,
        property_set: &str,
        key: &str,
    ) -> HostResult<Option<String>>;

    fn write_property(
        &mut self,
        handle: DocumentHandle,
        property_set: &str,
        key: &str,
        value: &str,
    ) -> HostResult<()>;

    /// Re-resolve references and recompute the document
    fn update(&mut self, handle: DocumentHandle) -> HostResult<()>;

    fn rebuild(&mut self, handle: DocumentHandle) -> HostResult<()>;

    fn derived_links(&mut self, handle: DocumentHandle) -> HostResult<Vec<DerivedLink>>;

    fn remove_derived_link(&mut self, handle: DocumentHandle, link_id: &str) -> HostResult<()>;

    fn add_derived_link(
        &mut self,
        handle: DocumentHandle,
        source: &Path,
        scale: f64,
        transform: &Transform,
    ) -> HostResult<String>;

    /// Ask the host to reclaim idle native state after documents are closed
    fn release_idle(&mut self) {}

    fn shutdown(&mut self) -> HostResult<()>;
}

/// Starts an authoring host. Called lazily, at most once per session.
pub trait HostConnector {
    fn connect(&self) -> HostResult<Box<dyn AuthoringHost>>;

    /// Short description used in logs
    fn describe(&self) -> String;
}

/// Connector for the configured host kind
pub fn connector_for(config: &HostConfig) -> Result<Box<dyn HostConnector + Send>, CampaignError> {
    match config.kind {
        HostKind::JsonStore => Ok(Box::new(JsonStoreConnector)),
        HostKind::Bridge => {
            let command = config
                .bridge_command
                .clone()
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| {
                    CampaignError::Config("host.bridge_command is required for bridge hosts".to_string())
                })?;
            Ok(Box::new(BridgeConnector {
                command,
                args: config.bridge_args.clone(),
            }))
        }
    }
}
