//! Authoring host over documents stored as JSON files.
//!
//! Each document file holds its internal name, property sets, occurrences
//! (or drawing view references) and derived links. Because content lives in
//! the file, a renamed file carries its document with it, and references
//! broken by a rename can be re-resolved by internal name the same way a CAD
//! host resolves them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{AuthoringHost, DocumentHandle, HostConnector};
use crate::core::error::{HostError, HostResult};
use crate::core::{DerivedLink, DocumentKind, Occurrence, OccurrenceId, Transform};

/// On-disk document content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    #[serde(default = "new_internal_name")]
    pub internal_name: String,

    /// property set -> key -> value
    #[serde(default)]
    pub properties: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default)]
    pub occurrences: Vec<StoredOccurrence>,

    #[serde(default)]
    pub derived_links: Vec<StoredDerivedLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOccurrence {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub internal_name: Option<String>,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub suppressed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDerivedLink {
    pub id: String,
    pub source: PathBuf,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub transform: Transform,
}

fn new_internal_name() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_true() -> bool {
    true
}

fn default_scale() -> f64 {
    1.0
}

impl StoredDocument {
    pub fn new(part_number: Option<&str>) -> Self {
        let mut properties = BTreeMap::new();
        if let Some(part_number) = part_number {
            let mut design = BTreeMap::new();
            design.insert(
                super::PART_NUMBER_KEY.to_string(),
                part_number.to_string(),
            );
            properties.insert(super::PROPERTY_SETS[0].to_string(), design);
        }
        Self {
            internal_name: new_internal_name(),
            properties,
            occurrences: Vec::new(),
            derived_links: Vec::new(),
        }
    }

    /// Add an occurrence (or view reference) of `path`
    pub fn with_occurrence(mut self, path: &Path, transform: Transform) -> Self {
        let id = next_id(self.occurrences.iter().map(|o| o.id.as_str()));
        let name = instance_name(path, &self.occurrences);
        self.occurrences.push(StoredOccurrence {
            id,
            name,
            path: path.to_path_buf(),
            internal_name: internal_name_of(path),
            transform,
            visible: true,
            suppressed: false,
        });
        self
    }

    pub fn with_derived_link(mut self, source: &Path, scale: f64) -> Self {
        let id = next_id(self.derived_links.iter().map(|l| l.id.as_str()));
        self.derived_links.push(StoredDerivedLink {
            id,
            source: source.to_path_buf(),
            scale,
            transform: Transform::identity(),
        });
        self
    }

    pub fn load(path: &Path) -> HostResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| HostError::from_io(path, &e))?;
        let mut doc: StoredDocument = serde_json::from_str(&json).map_err(|e| {
            HostError::Protocol(format!("{} is not a stored document: {}", path.display(), e))
        })?;

        // Relative references resolve against the document's own directory
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for occurrence in &mut doc.occurrences {
            if occurrence.path.is_relative() {
                occurrence.path = base.join(&occurrence.path);
            }
        }
        for link in &mut doc.derived_links {
            if link.source.is_relative() {
                link.source = base.join(&link.source);
            }
        }
        Ok(doc)
    }

    pub fn save(&self, path: &Path) -> HostResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HostError::Protocol(e.to_string()))?;
        fs::write(path, json).map_err(|e| HostError::from_io(path, &e))
    }
}

/// Internal name recorded in a stored document, if it can be read
fn internal_name_of(path: &Path) -> Option<String> {
    StoredDocument::load(path).ok().map(|doc| doc.internal_name)
}

fn next_id<'a>(existing: impl Iterator<Item = &'a str>) -> String {
    let max = existing.filter_map(|id| id.parse::<u64>().ok()).max().unwrap_or(0);
    (max + 1).to_string()
}

fn instance_name(path: &Path, existing: &[StoredOccurrence]) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let count = existing
        .iter()
        .filter(|o| o.name.rsplit_once(':').map(|(s, _)| s) == Some(stem.as_str()))
        .count();
    format!("{}:{}", stem, count + 1)
}

struct OpenDocument {
    path: PathBuf,
    kind: DocumentKind,
    doc: StoredDocument,
    writable: bool,
    dirty: bool,
    open_count: u32,
    released: BTreeSet<PathBuf>,
}

/// In-process host over JSON document files
#[derive(Default)]
pub struct JsonStoreHost {
    next_handle: u64,
    documents: HashMap<DocumentHandle, OpenDocument>,
    shut_down: bool,
}

impl JsonStoreHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct documents currently open
    pub fn open_documents(&self) -> usize {
        self.documents.len()
    }

    fn document(&mut self, handle: DocumentHandle) -> HostResult<&mut OpenDocument> {
        if self.shut_down {
            return Err(HostError::SessionUnavailable("host has been shut down".to_string()));
        }
        self.documents
            .get_mut(&handle)
            .ok_or(HostError::InvalidHandle(handle.0))
    }

    fn writable_document(&mut self, handle: DocumentHandle) -> HostResult<&mut OpenDocument> {
        let document = self.document(handle)?;
        if !document.writable {
            return Err(HostError::NotSupported(format!(
                "{} is open read-only",
                document.path.display()
            )));
        }
        Ok(document)
    }
}

fn find_occurrence<'a>(
    document: &'a mut OpenDocument,
    occurrence: &OccurrenceId,
) -> HostResult<&'a mut StoredOccurrence> {
    let path = document.path.clone();
    document
        .doc
        .occurrences
        .iter_mut()
        .find(|o| o.id == occurrence.0)
        .ok_or_else(|| {
            HostError::NotFound(PathBuf::from(format!("{}#{}", path.display(), occurrence)))
        })
}

/// Look for a document with the given internal name next to a missing reference
fn resolve_by_internal_name(missing: &Path, internal_name: &str) -> Option<PathBuf> {
    let dir = missing.parent()?;
    let kind = DocumentKind::from_path(missing);
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let candidate = entry.path();
        if candidate == missing || DocumentKind::from_path(&candidate) != kind {
            continue;
        }
        if internal_name_of(&candidate).as_deref() == Some(internal_name) {
            return Some(candidate);
        }
    }
    None
}

impl AuthoringHost for JsonStoreHost {
    fn open(&mut self, path: &Path, writable: bool) -> HostResult<DocumentHandle> {
        if self.shut_down {
            return Err(HostError::SessionUnavailable("host has been shut down".to_string()));
        }

        if let Some((handle, document)) =
            self.documents.iter_mut().find(|(_, d)| d.path == path)
        {
            document.open_count += 1;
            document.writable |= writable;
            return Ok(*handle);
        }

        if !path.exists() {
            return Err(HostError::NotFound(path.to_path_buf()));
        }
        let doc = StoredDocument::load(path)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        debug!("Opened {} as {}", path.display(), handle);
        self.documents.insert(
            handle,
            OpenDocument {
                path: path.to_path_buf(),
                kind: DocumentKind::from_path(path),
                doc,
                writable,
                dirty: false,
                open_count: 1,
                released: BTreeSet::new(),
            },
        );
        Ok(handle)
    }

    fn close(&mut self, handle: DocumentHandle, save: bool) -> HostResult<()> {
        if save {
            self.save(handle)?;
        }
        let document = self.document(handle)?;
        document.open_count = document.open_count.saturating_sub(1);
        if document.open_count == 0 {
            self.documents.remove(&handle);
        }
        Ok(())
    }

    fn save(&mut self, handle: DocumentHandle) -> HostResult<()> {
        let document = self.writable_document(handle)?;
        document.doc.save(&document.path)?;
        document.dirty = false;
        Ok(())
    }

    fn occurrences(&mut self, handle: DocumentHandle) -> HostResult<Vec<Occurrence>> {
        let document = self.document(handle)?;
        Ok(document
            .doc
            .occurrences
            .iter()
            .map(|o| Occurrence {
                id: OccurrenceId(o.id.clone()),
                name: o.name.clone(),
                referenced_path: o.path.clone(),
                transform: o.transform,
                visible: o.visible,
                suppressed: o.suppressed,
            })
            .collect())
    }

    fn replace_reference(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
        new_path: &Path,
    ) -> HostResult<()> {
        if !new_path.exists() {
            return Err(HostError::NotFound(new_path.to_path_buf()));
        }
        let internal_name = internal_name_of(new_path);
        let document = self.writable_document(handle)?;
        let stored = find_occurrence(document, occurrence)?;
        stored.path = new_path.to_path_buf();
        stored.internal_name = internal_name;
        document.dirty = true;
        Ok(())
    }

    fn add_occurrence(
        &mut self,
        handle: DocumentHandle,
        path: &Path,
        transform: &Transform,
    ) -> HostResult<OccurrenceId> {
        if !path.exists() {
            return Err(HostError::NotFound(path.to_path_buf()));
        }
        let internal_name = internal_name_of(path);
        let document = self.writable_document(handle)?;
        if document.kind != DocumentKind::Assembly {
            return Err(HostError::NotSupported(format!(
                "cannot place occurrences in {}",
                document.path.display()
            )));
        }
        let id = next_id(document.doc.occurrences.iter().map(|o| o.id.as_str()));
        let name = instance_name(path, &document.doc.occurrences);
        document.doc.occurrences.push(StoredOccurrence {
            id: id.clone(),
            name,
            path: path.to_path_buf(),
            internal_name,
            transform: *transform,
            visible: true,
            suppressed: false,
        });
        document.dirty = true;
        Ok(OccurrenceId(id))
    }

    fn set_occurrence_state(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
        name: &str,
        visible: bool,
        suppressed: bool,
    ) -> HostResult<()> {
        let document = self.writable_document(handle)?;
        let stored = find_occurrence(document, occurrence)?;
        stored.name = name.to_string();
        stored.visible = visible;
        stored.suppressed = suppressed;
        document.dirty = true;
        Ok(())
    }

    fn delete_occurrence(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
    ) -> HostResult<()> {
        let document = self.writable_document(handle)?;
        let before = document.doc.occurrences.len();
        document.doc.occurrences.retain(|o| o.id != occurrence.0);
        if document.doc.occurrences.len() == before {
            return Err(HostError::NotFound(PathBuf::from(format!(
                "{}#{}",
                document.path.display(),
                occurrence
            ))));
        }
        document.dirty = true;
        Ok(())
    }

    fn referenced_documents(&mut self, handle: DocumentHandle) -> HostResult<Vec<PathBuf>> {
        let document = self.document(handle)?;
        let referenced: BTreeSet<PathBuf> = document
            .doc
            .occurrences
            .iter()
            .map(|o| o.path.clone())
            .chain(document.doc.derived_links.iter().map(|l| l.source.clone()))
            .filter(|p| !document.released.contains(p))
            .collect();
        Ok(referenced.into_iter().collect())
    }

    fn close_referenced_document(
        &mut self,
        handle: DocumentHandle,
        referenced: &Path,
    ) -> HostResult<()> {
        let known = self.referenced_documents(handle)?;
        if !known.iter().any(|p| p == referenced) {
            return Err(HostError::NotFound(referenced.to_path_buf()));
        }
        let document = self.document(handle)?;
        document.released.insert(referenced.to_path_buf());
        Ok(())
    }

    fn read_property(
        &mut self,
        handle: DocumentHandle,
        property_set: &str,
        key: &str,
    ) -> HostResult<Option<String>> {
        let document = self.document(handle)?;
        Ok(document
            .doc
            .properties
            .get(property_set)
            .and_then(|set| set.get(key))
            .cloned())
    }

    fn write_property(
        &mut self,
        handle: DocumentHandle,
        property_set: &str,
        key: &str,
        value: &str,
    ) -> HostResult<()> {
        let document = self.writable_document(handle)?;
        document
            .doc
            .properties
            .entry(property_set.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        document.dirty = true;
        Ok(())
    }

    fn update(&mut self, handle: DocumentHandle) -> HostResult<()> {
        let document = self.document(handle)?;
        let mut changed = false;
        for occurrence in &mut document.doc.occurrences {
            if occurrence.path.exists() {
                continue;
            }
            let Some(internal_name) = occurrence.internal_name.as_deref() else {
                continue;
            };
            if let Some(resolved) = resolve_by_internal_name(&occurrence.path, internal_name) {
                debug!(
                    "Re-resolved {} -> {}",
                    occurrence.path.display(),
                    resolved.display()
                );
                occurrence.path = resolved;
                changed = true;
            }
        }
        document.released.clear();
        if changed {
            document.dirty = true;
        }
        Ok(())
    }

    fn rebuild(&mut self, handle: DocumentHandle) -> HostResult<()> {
        self.update(handle)
    }

    fn derived_links(&mut self, handle: DocumentHandle) -> HostResult<Vec<DerivedLink>> {
        let document = self.document(handle)?;
        Ok(document
            .doc
            .derived_links
            .iter()
            .map(|l| DerivedLink {
                id: l.id.clone(),
                source_path: l.source.clone(),
                scale: l.scale,
                transform: l.transform,
            })
            .collect())
    }

    fn remove_derived_link(&mut self, handle: DocumentHandle, link_id: &str) -> HostResult<()> {
        let document = self.writable_document(handle)?;
        let before = document.doc.derived_links.len();
        document.doc.derived_links.retain(|l| l.id != link_id);
        if document.doc.derived_links.len() == before {
            return Err(HostError::NotFound(PathBuf::from(format!(
                "{}#derived-{}",
                document.path.display(),
                link_id
            ))));
        }
        document.dirty = true;
        Ok(())
    }

    fn add_derived_link(
        &mut self,
        handle: DocumentHandle,
        source: &Path,
        scale: f64,
        transform: &Transform,
    ) -> HostResult<String> {
        if !source.exists() {
            return Err(HostError::NotFound(source.to_path_buf()));
        }
        let document = self.writable_document(handle)?;
        if document.kind != DocumentKind::Part {
            return Err(HostError::NotSupported(format!(
                "derived links are only supported in parts, not {}",
                document.path.display()
            )));
        }
        let id = next_id(document.doc.derived_links.iter().map(|l| l.id.as_str()));
        document.doc.derived_links.push(StoredDerivedLink {
            id: id.clone(),
            source: source.to_path_buf(),
            scale,
            transform: *transform,
        });
        document.dirty = true;
        Ok(id)
    }

    fn shutdown(&mut self) -> HostResult<()> {
        debug!("Shutting down JSON store host ({} documents open)", self.documents.len());
        self.documents.clear();
        self.shut_down = true;
        Ok(())
    }
}

/// Connects to a fresh in-process [`JsonStoreHost`]
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStoreConnector;

impl HostConnector for JsonStoreConnector {
    fn connect(&self) -> HostResult<Box<dyn AuthoringHost>> {
        Ok(Box::new(JsonStoreHost::new()))
    }

    fn describe(&self) -> String {
        "JSON document store".to_string()
    }
}
