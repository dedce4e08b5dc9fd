//! Fixture builders and fault injection shared by the engine tests

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::core::error::{HostError, HostResult};
use crate::core::{DerivedLink, Occurrence, OccurrenceId, Transform};
use crate::host::json_store::StoredDocument;
use crate::host::{AuthoringHost, DocumentHandle, FileSystem, HostConnector, JsonStoreHost, LocalFs};

/// A temporary project directory of JSON-stored documents
pub struct Fixture {
    temp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    pub fn write(&self, name: &str, doc: &StoredDocument) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        doc.save(&path).unwrap();
        path
    }

    /// Assembly placing each child once, offset along x
    pub fn assembly<P: AsRef<Path>>(
        &self,
        name: &str,
        part_number: Option<&str>,
        children: &[P],
    ) -> PathBuf {
        let mut doc = StoredDocument::new(part_number);
        for (i, child) in children.iter().enumerate() {
            doc = doc.with_occurrence(child.as_ref(), Transform::translation(i as f64 * 10.0, 0.0, 0.0));
        }
        self.write(name, &doc)
    }

    /// Drawing with one view per model
    pub fn drawing<P: AsRef<Path>>(
        &self,
        name: &str,
        part_number: Option<&str>,
        models: &[P],
    ) -> PathBuf {
        let mut doc = StoredDocument::new(part_number);
        for model in models {
            doc = doc.with_occurrence(model.as_ref(), Transform::identity());
        }
        self.write(name, &doc)
    }

    pub fn load(&self, name: &str) -> StoredDocument {
        StoredDocument::load(&self.path(name)).unwrap()
    }

    /// Path relative to the fixture root, with forward slashes
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(self.temp.path())
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Sorted file names directly under the root
    pub fn files(&self) -> Vec<String> {
        let mut files: Vec<String> = std::fs::read_dir(self.temp.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        files.sort();
        files
    }
}

/// `BASE_100.iam` (ABC_100) placing `BASE_200.ipt` (ABC_200) and the library
/// part `ISO_Bolt.ipt`
pub fn scenario_a() -> Fixture {
    let fixture = Fixture::new();
    let part = fixture.write("BASE_200.ipt", &StoredDocument::new(Some("ABC_200")));
    let bolt = fixture.write("ISO_Bolt.ipt", &StoredDocument::new(Some("ABC_900")));
    fixture.assembly("BASE_100.iam", Some("ABC_100"), &[&part, &bolt]);
    fixture
}

/// Local filesystem that reports chosen files as held by another process
pub struct LockingFs {
    locked: HashSet<PathBuf>,
    probes: RefCell<HashMap<PathBuf, u32>>,
}

impl LockingFs {
    pub fn new<I: IntoIterator<Item = PathBuf>>(locked: I) -> Self {
        Self {
            locked: locked.into_iter().collect(),
            probes: RefCell::new(HashMap::new()),
        }
    }

    /// How often `path` was checked for a lock
    pub fn probes(&self, path: &Path) -> u32 {
        self.probes.borrow().get(path).copied().unwrap_or(0)
    }
}

impl FileSystem for LockingFs {
    fn exists(&self, path: &Path) -> bool {
        LocalFs.exists(path)
    }

    fn is_locked(&self, path: &Path) -> bool {
        *self.probes.borrow_mut().entry(path.to_path_buf()).or_insert(0) += 1;
        self.locked.contains(path)
    }

    fn move_file(&self, from: &Path, to: &Path) -> HostResult<()> {
        if self.locked.contains(from) {
            return Err(HostError::Locked(from.to_path_buf()));
        }
        LocalFs.move_file(from, to)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> HostResult<()> {
        if self.locked.contains(from) {
            return Err(HostError::Locked(from.to_path_buf()));
        }
        LocalFs.copy_file(from, to)
    }
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Unsupported,
    /// Transient failure for the next n calls
    Transient(u32),
    /// Transient failure on every call
    Always,
}

/// Which host operations fail, and how
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    faults: HashMap<&'static str, Fault>,
    refuse_connect: bool,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unsupported(mut self, operation: &'static str) -> Self {
        self.faults.insert(operation, Fault::Unsupported);
        self
    }

    pub fn transient(mut self, operation: &'static str, times: u32) -> Self {
        self.faults.insert(operation, Fault::Transient(times));
        self
    }

    pub fn fail_always(mut self, operation: &'static str) -> Self {
        self.faults.insert(operation, Fault::Always);
        self
    }

    /// The host cannot be started at all
    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }
}

/// Connects to a JSON store host wrapped in a [`FaultPlan`]
pub struct FaultyConnector {
    plan: FaultPlan,
}

impl FaultyConnector {
    pub fn new(plan: FaultPlan) -> Self {
        Self { plan }
    }
}

impl HostConnector for FaultyConnector {
    fn connect(&self) -> HostResult<Box<dyn AuthoringHost>> {
        if self.plan.refuse_connect {
            return Err(HostError::SessionUnavailable(
                "authoring application is not registered".to_string(),
            ));
        }
        Ok(Box::new(FaultyHost {
            inner: JsonStoreHost::new(),
            faults: self.plan.faults.clone(),
        }))
    }

    fn describe(&self) -> String {
        "fault-injecting JSON store".to_string()
    }
}

struct FaultyHost {
    inner: JsonStoreHost,
    faults: HashMap<&'static str, Fault>,
}

impl FaultyHost {
    fn check(&mut self, operation: &'static str) -> HostResult<()> {
        match self.faults.get_mut(operation) {
            Some(Fault::Unsupported) => Err(HostError::NotSupported(operation.to_string())),
            Some(Fault::Transient(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(HostError::Transient(format!("{} busy", operation)))
            }
            Some(Fault::Always) => Err(HostError::Transient(format!("{} failed", operation))),
            _ => Ok(()),
        }
    }
}

impl AuthoringHost for FaultyHost {
    fn open(&mut self, path: &Path, writable: bool) -> HostResult<DocumentHandle> {
        self.check("open")?;
        self.inner.open(path, writable)
    }

    fn close(&mut self, handle: DocumentHandle, save: bool) -> HostResult<()> {
        self.check("close")?;
        self.inner.close(handle, save)
    }

    fn save(&mut self, handle: DocumentHandle) -> HostResult<()> {
        self.check("save")?;
        self.inner.save(handle)
    }

    fn occurrences(&mut self, handle: DocumentHandle) -> HostResult<Vec<Occurrence>> {
        self.check("occurrences")?;
        self.inner.occurrences(handle)
    }

    fn replace_reference(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
        new_path: &Path,
    ) -> HostResult<()> {
        self.check("replace_reference")?;
        self.inner.replace_reference(handle, occurrence, new_path)
    }

    fn add_occurrence(
        &mut self,
        handle: DocumentHandle,
        path: &Path,
        transform: &Transform,
    ) -> HostResult<OccurrenceId> {
        self.check("add_occurrence")?;
        self.inner.add_occurrence(handle, path, transform)
    }

    fn set_occurrence_state(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
        name: &str,
        visible: bool,
        suppressed: bool,
    ) -> HostResult<()> {
        self.check("set_occurrence_state")?;
        self.inner
            .set_occurrence_state(handle, occurrence, name, visible, suppressed)
    }

    fn delete_occurrence(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
    ) -> HostResult<()> {
        self.check("delete_occurrence")?;
        self.inner.delete_occurrence(handle, occurrence)
    }

    fn referenced_documents(&mut self, handle: DocumentHandle) -> HostResult<Vec<PathBuf>> {
        self.check("referenced_documents")?;
        self.inner.referenced_documents(handle)
    }

    fn close_referenced_document(
        &mut self,
        handle: DocumentHandle,
        referenced: &Path,
    ) -> HostResult<()> {
        self.check("close_referenced_document")?;
        self.inner.close_referenced_document(handle, referenced)
    }

    fn read_property(
        &mut self,
        handle: DocumentHandle,
        property_set: &str,
        key: &str,
    ) -> HostResult<Option<String>> {
        self.check("read_property")?;
        self.inner.read_property(handle, property_set, key)
    }

    fn write_property(
        &mut self,
        handle: DocumentHandle,
        property_set: &str,
        key: &str,
        value: &str,
    ) -> HostResult<()> {
        self.check("write_property")?;
        self.inner.write_property(handle, property_set, key, value)
    }

    fn update(&mut self, handle: DocumentHandle) -> HostResult<()> {
        self.check("update")?;
        self.inner.update(handle)
    }

    fn rebuild(&mut self, handle: DocumentHandle) -> HostResult<()> {
        self.check("rebuild")?;
        self.inner.rebuild(handle)
    }

    fn derived_links(&mut self, handle: DocumentHandle) -> HostResult<Vec<DerivedLink>> {
        self.check("derived_links")?;
        self.inner.derived_links(handle)
    }

    fn remove_derived_link(&mut self, handle: DocumentHandle, link_id: &str) -> HostResult<()> {
        self.check("remove_derived_link")?;
        self.inner.remove_derived_link(handle, link_id)
    }

    fn add_derived_link(
        &mut self,
        handle: DocumentHandle,
        source: &Path,
        scale: f64,
        transform: &Transform,
    ) -> HostResult<String> {
        self.check("add_derived_link")?;
        self.inner.add_derived_link(handle, source, scale, transform)
    }

    fn shutdown(&mut self) -> HostResult<()> {
        self.inner.shutdown()
    }
}
