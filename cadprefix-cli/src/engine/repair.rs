use serde::Serialize;
use std::path::Path;
use tracing::debug;

use super::session::DocumentGuard;
use super::{path_key, RenameEntry};
use crate::core::error::{HostError, HostResult, RepairError};
use crate::core::retry::RetryPolicy;
use crate::core::{DocumentKind, Occurrence};
use crate::host::FileSystem;

/// Ways of re-pointing a reference, tried in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    /// Retarget the occurrence in place
    DirectReplace,
    /// Place a new occurrence with the same state, then delete the old one
    Recreate,
    /// Drop the old document from the parent and let the host re-resolve it
    DocumentClosure,
}

impl RepairStrategy {
    pub const ORDER: [RepairStrategy; 3] = [
        RepairStrategy::DirectReplace,
        RepairStrategy::Recreate,
        RepairStrategy::DocumentClosure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStrategy::DirectReplace => "direct replace",
            RepairStrategy::Recreate => "delete and recreate",
            RepairStrategy::DocumentClosure => "document closure",
        }
    }
}

/// Find the applied rename an occurrence refers to.
///
/// Match order:
/// 1. the referenced path equals an old path (normalized, case-insensitive)
/// 2. the referenced file name equals exactly one old file name, ignoring case
/// 3. the occurrence name without its instance counter equals exactly one old file stem
///
/// Steps 2 and 3 only run for a `dangling` reference: one that does not
/// resolve on disk and that mapping never recorded. A reference to a document
/// left in place must never follow a same-named file elsewhere.
pub fn match_entry<'m>(
    occurrence: &Occurrence,
    applied: &'m [RenameEntry],
    dangling: bool,
) -> Option<&'m RenameEntry> {
    let key = path_key(&occurrence.referenced_path);
    if let Some(entry) = applied.iter().find(|e| path_key(&e.old_path) == key) {
        return Some(entry);
    }
    if !dangling {
        return None;
    }

    if let Some(name) = lowercase_file_name(&occurrence.referenced_path) {
        let same_name =
            unique(applied, |e| lowercase_file_name(&e.old_path).as_deref() == Some(name.as_str()));
        if same_name.is_some() {
            return same_name;
        }
    }

    let stem = occurrence.name_stem().to_lowercase();
    if stem.is_empty() {
        return None;
    }
    unique(applied, |e| lowercase_stem(&e.old_path).as_deref() == Some(stem.as_str()))
}

fn unique<'m, F>(entries: &'m [RenameEntry], predicate: F) -> Option<&'m RenameEntry>
where
    F: Fn(&RenameEntry) -> bool,
{
    let mut matches = entries.iter().filter(|e| predicate(e));
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(first)
}

fn lowercase_file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_lowercase())
}

fn lowercase_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|n| n.to_string_lossy().to_lowercase())
}

/// Re-points occurrences and view references at renamed documents
pub struct ReferenceRepairer<'a> {
    fs: &'a dyn FileSystem,
    retry: &'a RetryPolicy,
    lock_retry: &'a RetryPolicy,
}

impl<'a> ReferenceRepairer<'a> {
    pub fn new(fs: &'a dyn FileSystem, retry: &'a RetryPolicy, lock_retry: &'a RetryPolicy) -> Self {
        Self {
            fs,
            retry,
            lock_retry,
        }
    }

    /// Re-point `occurrence` of the open `parent` at `new_path`.
    ///
    /// Returns the strategy that worked. Every strategy runs under the retry
    /// policy; a strategy the host does not support is abandoned at once.
    pub fn repair(
        &self,
        parent: &DocumentGuard<'_>,
        parent_kind: DocumentKind,
        occurrence: &Occurrence,
        new_path: &Path,
    ) -> Result<RepairStrategy, RepairError> {
        if !self.fs.exists(new_path) {
            return Err(RepairError::TargetMissing(new_path.to_path_buf()));
        }
        let unlocked = self
            .lock_retry
            .wait_until(&format!("lock on {}", new_path.display()), || {
                !self.fs.is_locked(new_path)
            });
        if !unlocked {
            return Err(RepairError::LockConflict(new_path.to_path_buf()));
        }

        let mut failures = Vec::new();
        for strategy in RepairStrategy::ORDER {
            if strategy == RepairStrategy::Recreate && parent_kind != DocumentKind::Assembly {
                continue;
            }
            let label = format!("{} of {}", strategy.as_str(), occurrence.name);
            let result = self.retry.run(
                &label,
                |_| self.attempt(strategy, parent, occurrence, new_path),
                HostError::is_transient,
            );
            match result {
                Ok(()) => {
                    debug!(
                        "Repaired {} in {} via {}",
                        occurrence.name,
                        parent.path().display(),
                        strategy.as_str()
                    );
                    return Ok(strategy);
                }
                Err(e) => {
                    debug!("{} failed: {}", label, e);
                    failures.push(format!("{}: {}", strategy.as_str(), e));
                }
            }
        }

        Err(RepairError::Unresolved(format!(
            "{} in {} ({})",
            occurrence.name,
            parent.path().display(),
            failures.join("; ")
        )))
    }

    fn attempt(
        &self,
        strategy: RepairStrategy,
        parent: &DocumentGuard<'_>,
        occurrence: &Occurrence,
        new_path: &Path,
    ) -> HostResult<()> {
        match strategy {
            RepairStrategy::DirectReplace => parent.with_host(|host, handle| {
                host.replace_reference(handle, &occurrence.id, new_path)
            }),
            RepairStrategy::Recreate => parent.with_host(|host, handle| {
                let placed = host.add_occurrence(handle, new_path, &occurrence.transform)?;
                let finished = host
                    .set_occurrence_state(
                        handle,
                        &placed,
                        &occurrence.name,
                        occurrence.visible,
                        occurrence.suppressed,
                    )
                    .and_then(|_| host.delete_occurrence(handle, &occurrence.id));
                if let Err(e) = finished {
                    if let Err(cleanup) = host.delete_occurrence(handle, &placed) {
                        debug!("Could not remove partially placed occurrence: {}", cleanup);
                    }
                    return Err(e);
                }
                Ok(())
            }),
            RepairStrategy::DocumentClosure => parent.with_host(|host, handle| {
                let old_key = path_key(&occurrence.referenced_path);
                let referenced = host.referenced_documents(handle)?;
                let old = referenced
                    .iter()
                    .find(|p| path_key(p) == old_key)
                    .ok_or_else(|| HostError::NotFound(occurrence.referenced_path.clone()))?;
                host.close_referenced_document(handle, old)?;
                host.update(handle)?;

                let resolved = host
                    .occurrences(handle)?
                    .into_iter()
                    .find(|o| o.id == occurrence.id)
                    .map(|o| o.referenced_path);
                match resolved {
                    Some(path) if path_key(&path) == path_key(new_path) => Ok(()),
                    _ => Err(HostError::NotFound(new_path.to_path_buf())),
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OccurrenceId, Transform};
    use crate::engine::session::Session;
    use crate::engine::testing::{FaultPlan, FaultyConnector, Fixture, LockingFs};
    use crate::host::json_store::StoredDocument;
    use crate::host::LocalFs;
    use std::path::PathBuf;

    fn occurrence(name: &str, path: &str) -> Occurrence {
        Occurrence {
            id: OccurrenceId("1".to_string()),
            name: name.to_string(),
            referenced_path: PathBuf::from(path),
            transform: Transform::identity(),
            visible: true,
            suppressed: false,
        }
    }

    fn entry(old: &str, new: &str) -> RenameEntry {
        RenameEntry {
            old_path: PathBuf::from(old),
            new_path: PathBuf::from(new),
            kind: DocumentKind::Part,
        }
    }

    #[test]
    fn test_match_exact_path_first() {
        let applied = vec![
            entry("/a/BASE_200.ipt", "/a/XYZ_200.ipt"),
            entry("/b/BASE_200.ipt", "/b/XYZ_200.ipt"),
        ];
        let found = match_entry(&occurrence("BASE_200:1", "/B/base_200.IPT"), &applied, false).unwrap();
        assert_eq!(found.new_path, PathBuf::from("/b/XYZ_200.ipt"));
    }

    #[test]
    fn test_match_by_unique_file_name() {
        let applied = vec![entry("/a/BASE_200.ipt", "/a/XYZ_200.ipt")];
        let found = match_entry(&occurrence("Other:1", "/moved/base_200.ipt"), &applied, true).unwrap();
        assert_eq!(found.old_path, PathBuf::from("/a/BASE_200.ipt"));
    }

    #[test]
    fn test_ambiguous_file_name_falls_through_to_occurrence_name() {
        let applied = vec![
            entry("/a/BASE_200.ipt", "/a/XYZ_200.ipt"),
            entry("/b/BASE_200.ipt", "/b/XYZ_200.ipt"),
        ];
        assert!(match_entry(&occurrence("BASE_200:1", "/c/BASE_200.ipt"), &applied, true).is_none());

        let applied = vec![entry("/a/BASE_200.ipt", "/a/XYZ_200.ipt")];
        let found = match_entry(&occurrence("BASE_200:2", "/gone/renamed.ipt"), &applied, true).unwrap();
        assert_eq!(found.old_path, PathBuf::from("/a/BASE_200.ipt"));
    }

    #[test]
    fn test_no_match() {
        let applied = vec![entry("/a/BASE_200.ipt", "/a/XYZ_200.ipt")];
        assert!(match_entry(&occurrence("Bolt:1", "/a/ISO_Bolt.ipt"), &applied, true).is_none());
    }

    #[test]
    fn test_resolving_reference_only_matches_exact_path() {
        let applied = vec![entry("/sub1/Bracket.ipt", "/sub1/XYZ_Bracket.ipt")];
        let same_name = occurrence("Bracket:2", "/sub2/Bracket.ipt");
        assert!(match_entry(&same_name, &applied, false).is_none());
        assert!(match_entry(&same_name, &applied, true).is_some());

        let exact = occurrence("Bracket:1", "/sub1/bracket.ipt");
        assert!(match_entry(&exact, &applied, false).is_some());
    }

    /// Assembly referencing BASE_200.ipt whose file has already moved to XYZ_200.ipt
    fn moved_fixture() -> (Fixture, PathBuf, PathBuf, PathBuf) {
        let fixture = Fixture::new();
        let old = fixture.write("BASE_200.ipt", &StoredDocument::new(Some("ABC_200")));
        let asm = fixture.assembly("BASE_100.iam", Some("ABC_100"), &[&old]);
        let new = fixture.path("XYZ_200.ipt");
        std::fs::rename(&old, &new).unwrap();
        (fixture, asm, old, new)
    }

    #[test]
    fn test_direct_replace() {
        let (_fixture, asm, _old, new) = moved_fixture();
        let session = Session::new(crate::host::JsonStoreConnector);
        let retry = RetryPolicy::immediate(3);
        let repairer = ReferenceRepairer::new(&LocalFs, &retry, &retry);

        let guard = session.open(&asm, true).unwrap();
        let occurrence = guard.with_host(|h, d| h.occurrences(d)).unwrap().remove(0);
        let strategy = repairer
            .repair(&guard, DocumentKind::Assembly, &occurrence, &new)
            .unwrap();
        assert_eq!(strategy, RepairStrategy::DirectReplace);
        guard.close(true).unwrap();

        let saved = StoredDocument::load(&asm).unwrap();
        assert_eq!(saved.occurrences[0].path, new);
    }

    #[test]
    fn test_recreate_preserves_state() {
        let (_fixture, asm, _old, new) = moved_fixture();
        let mut doc = StoredDocument::load(&asm).unwrap();
        doc.occurrences[0].transform = Transform::translation(10.0, 0.0, 5.0);
        doc.occurrences[0].visible = false;
        doc.occurrences[0].suppressed = true;
        doc.save(&asm).unwrap();

        let faults = FaultPlan::new().unsupported("replace_reference");
        let session = Session::new(FaultyConnector::new(faults));
        let retry = RetryPolicy::immediate(3);
        let repairer = ReferenceRepairer::new(&LocalFs, &retry, &retry);

        let guard = session.open(&asm, true).unwrap();
        let occurrence = guard.with_host(|h, d| h.occurrences(d)).unwrap().remove(0);
        let strategy = repairer
            .repair(&guard, DocumentKind::Assembly, &occurrence, &new)
            .unwrap();
        assert_eq!(strategy, RepairStrategy::Recreate);

        let after = guard.with_host(|h, d| h.occurrences(d)).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].referenced_path, new);
        assert_eq!(after[0].name, "BASE_200:1");
        assert_eq!(after[0].transform, Transform::translation(10.0, 0.0, 5.0));
        assert!(!after[0].visible);
        assert!(after[0].suppressed);
    }

    #[test]
    fn test_recreate_rolls_back_partial_placement() {
        let (_fixture, asm, _old, new) = moved_fixture();
        let faults = FaultPlan::new()
            .unsupported("replace_reference")
            .fail_always("set_occurrence_state");
        let session = Session::new(FaultyConnector::new(faults));
        let retry = RetryPolicy::immediate(2);
        let repairer = ReferenceRepairer::new(&LocalFs, &retry, &retry);

        let guard = session.open(&asm, true).unwrap();
        let occurrence = guard.with_host(|h, d| h.occurrences(d)).unwrap().remove(0);
        let strategy = repairer
            .repair(&guard, DocumentKind::Assembly, &occurrence, &new)
            .unwrap();

        // Recreate gave up; the host re-resolved the moved file by internal name
        assert_eq!(strategy, RepairStrategy::DocumentClosure);
        let after = guard.with_host(|h, d| h.occurrences(d)).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].referenced_path, new);
    }

    #[test]
    fn test_transient_faults_are_retried() {
        let (_fixture, asm, _old, new) = moved_fixture();
        let faults = FaultPlan::new().transient("replace_reference", 2);
        let session = Session::new(FaultyConnector::new(faults));
        let retry = RetryPolicy::immediate(3);
        let repairer = ReferenceRepairer::new(&LocalFs, &retry, &retry);

        let guard = session.open(&asm, true).unwrap();
        let occurrence = guard.with_host(|h, d| h.occurrences(d)).unwrap().remove(0);
        assert_eq!(
            repairer.repair(&guard, DocumentKind::Assembly, &occurrence, &new),
            Ok(RepairStrategy::DirectReplace)
        );
    }

    #[test]
    fn test_drawings_skip_recreate() {
        let fixture = Fixture::new();
        let old = fixture.write("BASE_200.ipt", &StoredDocument::new(Some("ABC_200")));
        let drawing = fixture.drawing("BASE_200.idw", Some("ABC_200"), &[&old]);
        let new = fixture.path("XYZ_200.ipt");
        std::fs::rename(&old, &new).unwrap();

        let faults = FaultPlan::new().unsupported("replace_reference");
        let session = Session::new(FaultyConnector::new(faults));
        let retry = RetryPolicy::immediate(1);
        let repairer = ReferenceRepairer::new(&LocalFs, &retry, &retry);

        let guard = session.open(&drawing, true).unwrap();
        let occurrence = guard.with_host(|h, d| h.occurrences(d)).unwrap().remove(0);
        assert_eq!(
            repairer.repair(&guard, DocumentKind::Drawing, &occurrence, &new),
            Ok(RepairStrategy::DocumentClosure)
        );
    }

    #[test]
    fn test_missing_and_locked_targets() {
        let (fixture, asm, _old, new) = moved_fixture();
        let session = Session::new(crate::host::JsonStoreConnector);
        let retry = RetryPolicy::immediate(3);
        let guard = session.open(&asm, true).unwrap();
        let occurrence = guard.with_host(|h, d| h.occurrences(d)).unwrap().remove(0);

        let repairer = ReferenceRepairer::new(&LocalFs, &retry, &retry);
        let missing = fixture.path("XYZ_999.ipt");
        assert_eq!(
            repairer.repair(&guard, DocumentKind::Assembly, &occurrence, &missing),
            Err(RepairError::TargetMissing(missing))
        );

        let locking = LockingFs::new([new.clone()]);
        let repairer = ReferenceRepairer::new(&locking, &retry, &retry);
        assert_eq!(
            repairer.repair(&guard, DocumentKind::Assembly, &occurrence, &new),
            Err(RepairError::LockConflict(new))
        );
    }
}
