use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::classifier::DocumentClassifier;
use super::naming::{self, MismatchReason, NamingDecision, PrefixRule};
use super::session::{DocumentGuard, Session};
use super::{path_key, RenameEntry, RenameMap, SkipReason, SkipStats};
use crate::core::error::{CampaignError, HostError, HostResult};
use crate::core::retry::RetryPolicy;
use crate::core::{DerivedLink, DocumentKind, DocumentRecord, Occurrence};
use crate::host::{read_part_number, FileSystem};

/// Everything learned while walking the reference graph
#[derive(Debug, Clone, Default)]
pub struct MapBuild {
    pub map: RenameMap,
    /// Every document reached, in visit order
    pub documents: Vec<DocumentRecord>,
    pub skipped: SkipStats,
    pub warnings: Vec<String>,
}

impl MapBuild {
    pub fn document(&self, path: &Path) -> Option<&DocumentRecord> {
        let key = path_key(path);
        self.documents.iter().find(|d| path_key(&d.path) == key)
    }

    /// Assemblies and drawings holding a reference to `path`
    pub fn referencing<'a>(&'a self, path: &Path) -> impl Iterator<Item = &'a DocumentRecord> + 'a {
        let key = path_key(path);
        self.documents
            .iter()
            .filter(move |d| d.references.iter().any(|r| path_key(r) == key))
    }

    /// Parts with a derived link whose source is `path`
    pub fn deriving_from<'a>(&'a self, path: &Path) -> impl Iterator<Item = &'a DocumentRecord> + 'a {
        let key = path_key(path);
        self.documents
            .iter()
            .filter(move |d| d.derived_links.iter().any(|l| path_key(&l.source_path) == key))
    }

    pub fn skip_count(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    pub fn content_center_files(&self) -> usize {
        self.skip_count(SkipReason::ContentCenter)
    }
}

/// Walks root assemblies and drawings and plans the global rename.
///
/// Nothing is mutated: documents are only opened and read. Every opened
/// document stays open until [`RenameMapBuilder::finish`] hands the guards
/// back, so the host sees one consistent graph for the whole walk.
pub struct RenameMapBuilder<'s> {
    session: &'s Session,
    fs: &'s dyn FileSystem,
    classifier: DocumentClassifier,
    rule: PrefixRule,
    retry: RetryPolicy,
    visited: HashSet<String>,
    open: Vec<DocumentGuard<'s>>,
    build: MapBuild,
}

impl<'s> RenameMapBuilder<'s> {
    pub fn new(
        session: &'s Session,
        fs: &'s dyn FileSystem,
        classifier: DocumentClassifier,
        rule: PrefixRule,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            session,
            fs,
            classifier,
            rule,
            retry,
            visited: HashSet::new(),
            open: Vec::new(),
            build: MapBuild::default(),
        }
    }

    /// Walk a root assembly and everything it references, directly or transitively
    pub fn add_root(&mut self, root: &Path) -> Result<(), CampaignError> {
        info!("Mapping root assembly {}", root.display());
        self.visit(root, true)
    }

    /// Evaluate a drawing and the models its views reference
    pub fn add_drawing(&mut self, drawing: &Path) -> Result<(), CampaignError> {
        debug!("Mapping drawing {}", drawing.display());
        self.visit(drawing, true)
    }

    /// Record the derived links of a part that no root or drawing reached.
    ///
    /// Such a part is never renamed. It is only read so that its links to
    /// renamed sources can be repaired.
    pub fn add_unplaced_part(&mut self, part: &Path) -> Result<(), CampaignError> {
        let key = path_key(part);
        if self.visited.contains(&key) {
            return Ok(());
        }
        let classification = self.classifier.classify(part);
        if classification.kind != DocumentKind::Part || classification.excluded {
            return Ok(());
        }
        self.visited.insert(key);

        let guard = match self.open_document(part, false) {
            Ok(guard) => guard,
            Err(HostError::SessionUnavailable(message)) => {
                return Err(CampaignError::SessionInit(HostError::SessionUnavailable(message)))
            }
            Err(e) => {
                self.warn(format!("Could not open {}: {}", part.display(), e));
                return Ok(());
            }
        };
        let derived_links = self
            .read_or_warn(&guard, "derived links", |host, handle| host.derived_links(handle))
            .unwrap_or_default();
        if derived_links.is_empty() {
            return Ok(());
        }

        debug!(
            "Recorded {} derived link(s) of unplaced part {}",
            derived_links.len(),
            part.display()
        );
        self.open.push(guard);
        self.build.documents.push(DocumentRecord {
            path: part.to_path_buf(),
            kind: DocumentKind::Part,
            part_number: None,
            excluded: false,
            references: Vec::new(),
            derived_links,
        });
        Ok(())
    }

    /// Number of documents currently held open by the walk
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn finish(self) -> (MapBuild, Vec<DocumentGuard<'s>>) {
        info!(
            "Planned {} rename(s) across {} document(s)",
            self.build.map.len(),
            self.build.documents.len()
        );
        (self.build, self.open)
    }

    fn visit(&mut self, path: &Path, writable: bool) -> Result<(), CampaignError> {
        if !self.visited.insert(path_key(path)) {
            return Ok(());
        }

        let classification = self.classifier.classify(path);
        let kind = classification.kind;
        if !kind.is_model_or_drawing() {
            debug!("Skipping {} ({:?})", path.display(), kind);
            self.skip(SkipReason::UnsupportedKind);
            return Ok(());
        }
        if classification.excluded {
            debug!("Skipping library document {}", path.display());
            self.skip(SkipReason::ContentCenter);
            self.build.documents.push(DocumentRecord {
                path: path.to_path_buf(),
                kind,
                part_number: None,
                excluded: true,
                references: Vec::new(),
                derived_links: Vec::new(),
            });
            return Ok(());
        }
        if !self.fs.exists(path) {
            self.warn(format!("Referenced document not found: {}", path.display()));
            self.skip(SkipReason::Unreadable);
            return Ok(());
        }

        let guard = match self.open_document(path, writable) {
            Ok(guard) => guard,
            Err(HostError::SessionUnavailable(message)) => {
                return Err(CampaignError::SessionInit(HostError::SessionUnavailable(message)))
            }
            Err(e) => {
                self.warn(format!("Could not open {}: {}", path.display(), e));
                self.skip(SkipReason::Unreadable);
                return Ok(());
            }
        };

        let part_number = self.read_or_warn(&guard, "part number", |host, handle| {
            read_part_number(host, handle)
        });
        let part_number = part_number.flatten();

        let derived_links: Vec<DerivedLink> = if kind == DocumentKind::Part {
            self.read_or_warn(&guard, "derived links", |host, handle| host.derived_links(handle))
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let occurrences: Vec<Occurrence> = if kind == DocumentKind::Part {
            Vec::new()
        } else {
            self.read_or_warn(&guard, "references", |host, handle| host.occurrences(handle))
                .unwrap_or_default()
        };

        let mut references: Vec<PathBuf> = Vec::new();
        for occurrence in &occurrences {
            let key = path_key(&occurrence.referenced_path);
            if !references.iter().any(|r| path_key(r) == key) {
                references.push(occurrence.referenced_path.clone());
            }
        }

        self.open.push(guard);
        self.build.documents.push(DocumentRecord {
            path: path.to_path_buf(),
            kind,
            part_number: part_number.clone(),
            excluded: false,
            references: references.clone(),
            derived_links: derived_links.clone(),
        });

        self.plan(path, kind, part_number.as_deref());

        for reference in &references {
            self.visit(reference, false)?;
        }
        for link in &derived_links {
            self.visit(&link.source_path, false)?;
        }
        Ok(())
    }

    fn open_document(&self, path: &Path, writable: bool) -> HostResult<DocumentGuard<'s>> {
        let session = self.session;
        self.retry.run(
            &format!("open {}", path.display()),
            |_| session.open(path, writable),
            HostError::is_transient,
        )
    }

    fn read_or_warn<T, F>(&mut self, guard: &DocumentGuard<'s>, what: &str, read: F) -> Option<T>
    where
        F: Fn(&mut dyn crate::host::AuthoringHost, crate::host::DocumentHandle) -> HostResult<T>,
    {
        let result = self.retry.run(
            &format!("read {} of {}", what, guard.path().display()),
            |_| guard.with_host(&read),
            HostError::is_transient,
        );
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.warn(format!(
                    "Could not read {} of {}: {}",
                    what,
                    guard.path().display(),
                    e
                ));
                None
            }
        }
    }

    fn plan(&mut self, path: &Path, kind: DocumentKind, part_number: Option<&str>) {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let new_base = match naming::evaluate(part_number, &stem, kind, &self.rule) {
            NamingDecision::Rename { new_base } => new_base,
            NamingDecision::AlreadyCorrect => {
                self.skip(SkipReason::AlreadyCorrect);
                return;
            }
            NamingDecision::NotAMatch(MismatchReason::MissingPartNumber) => {
                self.skip(SkipReason::MissingPartNumber);
                return;
            }
            NamingDecision::NotAMatch(MismatchReason::PrefixMismatch) => {
                self.skip(SkipReason::PrefixMismatch);
                return;
            }
        };

        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let candidate = dir.join(file_name(&new_base, None, &extension));

        if path_key(&candidate) == path_key(path) {
            self.skip(SkipReason::AlreadyCorrect);
            return;
        }
        if self.fs.exists(&candidate) {
            self.warn(format!(
                "Target already exists, not renaming {} to {}",
                path.display(),
                candidate.display()
            ));
            self.skip(SkipReason::TargetExists);
            return;
        }

        let new_path = self.unique_target(dir, &new_base, &extension, candidate);
        let description = format!("{} -> {}", path.display(), new_path.display());
        let entry = RenameEntry {
            old_path: path.to_path_buf(),
            new_path,
            kind,
        };
        if self.build.map.insert(entry) {
            debug!("Planned {}", description);
        } else {
            debug_assert!(false, "rename map refused {}", description);
            self.warn(format!("Conflicting rename not planned: {}", description));
        }
    }

    /// First of `base`, `base_01`, `base_02`, ... that no other entry claims and
    /// that does not exist on disk
    fn unique_target(&self, dir: &Path, base: &str, extension: &str, first: PathBuf) -> PathBuf {
        if !self.build.map.claims(&first) {
            return first;
        }
        let mut counter = 1;
        loop {
            let candidate = dir.join(file_name(base, Some(counter), extension));
            if !self.build.map.claims(&candidate) && !self.fs.exists(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    fn skip(&mut self, reason: SkipReason) {
        *self.build.skipped.entry(reason).or_insert(0) += 1;
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.build.warnings.push(message);
    }
}

fn file_name(base: &str, counter: Option<u32>, extension: &str) -> String {
    let base = match counter {
        Some(n) => format!("{}_{:02}", base, n),
        None => base.to_string(),
    };
    if extension.is_empty() {
        base
    } else {
        format!("{}.{}", base, extension)
    }
}
