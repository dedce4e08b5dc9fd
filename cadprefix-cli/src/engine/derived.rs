use std::path::Path;
use tracing::{debug, info};

use super::rename_map::MapBuild;
use super::session::{DocumentGuard, Session};
use super::{current_location, path_key, CampaignResult, RenameEntry};
use crate::core::error::{HostError, HostResult};
use crate::core::retry::RetryPolicy;
use crate::core::{DerivedLink, DocumentKind};

/// Recreate every derived link whose source part was renamed.
///
/// Hosts cannot retarget a derived link in place, so each one is removed and
/// added again against the new source with the same scale and transform.
/// Returns the number of links recreated; failures become warnings.
pub fn repair_derived_links(
    session: &Session,
    build: &MapBuild,
    applied: &[RenameEntry],
    retry: &RetryPolicy,
    result: &mut CampaignResult,
) -> usize {
    let mut repaired = 0;

    for record in build.documents.iter().filter(|d| d.kind == DocumentKind::Part) {
        let part = current_location(&record.path, applied);
        for link in &record.derived_links {
            let key = path_key(&link.source_path);
            let Some(entry) = applied.iter().find(|e| path_key(&e.old_path) == key) else {
                continue;
            };
            match recreate_with_retry(session, &part, link, &entry.new_path, retry) {
                Ok(()) => {
                    debug!(
                        "Recreated derived link in {} -> {}",
                        part.display(),
                        entry.new_path.display()
                    );
                    repaired += 1;
                }
                Err(e) => result.warn(format!(
                    "Failed to repair derived link in {} to {}: {}",
                    part.display(),
                    entry.new_path.display(),
                    e
                )),
            }
        }
    }

    if repaired > 0 {
        info!("Recreated {} derived link(s)", repaired);
    }
    repaired
}

/// One link, retried with a save and reopen of the part between attempts
fn recreate_with_retry(
    session: &Session,
    part: &Path,
    original: &DerivedLink,
    new_source: &Path,
    retry: &RetryPolicy,
) -> HostResult<()> {
    let mut guard: Option<DocumentGuard<'_>> = None;

    retry.run(
        &format!("derived link repair in {}", part.display()),
        |attempt| {
            if attempt > 1 {
                if let Some(previous) = guard.take() {
                    if let Err(e) = previous.close(true) {
                        debug!("Save before reopening {} failed: {}", part.display(), e);
                    }
                }
            }
            let current = match guard.take() {
                Some(current) => current,
                None => session.open(part, true)?,
            };
            let outcome = recreate(&current, original, new_source);
            guard = Some(current);
            outcome
        },
        HostError::is_transient,
    )
}

fn recreate(part: &DocumentGuard<'_>, original: &DerivedLink, new_source: &Path) -> HostResult<()> {
    let old_key = path_key(&original.source_path);
    let new_key = path_key(new_source);

    part.with_host(|host, handle| {
        let links = host.derived_links(handle)?;
        if let Some(existing) = links.iter().find(|l| path_key(&l.source_path) == old_key) {
            host.remove_derived_link(handle, &existing.id)?;
        } else if links.iter().any(|l| path_key(&l.source_path) == new_key) {
            // Recreated by an earlier attempt that failed afterwards
            return host.save(handle);
        }
        host.add_derived_link(handle, new_source, original.scale, &original.transform)?;
        host.save(handle)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transform;
    use crate::engine::testing::{FaultPlan, FaultyConnector, Fixture};
    use crate::host::json_store::StoredDocument;
    use std::path::PathBuf;

    /// Part `BASE_301.ipt` derived from `BASE_300.ipt` at scale 2, source already moved
    fn derived_fixture() -> (Fixture, MapBuild, Vec<RenameEntry>) {
        let fixture = Fixture::new();
        let source = fixture.write("BASE_300.ipt", &StoredDocument::new(Some("ABC_300")));
        let mut derived = StoredDocument::new(Some("ABC_301")).with_derived_link(&source, 2.0);
        derived.derived_links[0].transform = Transform::translation(0.0, 5.0, 0.0);
        let part = fixture.write("BASE_301.ipt", &derived);

        let new_source = fixture.path("XYZ_300.ipt");
        std::fs::rename(&source, &new_source).unwrap();

        let build = MapBuild {
            documents: vec![crate::core::DocumentRecord {
                path: part,
                kind: DocumentKind::Part,
                part_number: Some("ABC_301".to_string()),
                excluded: false,
                references: Vec::new(),
                derived_links: vec![DerivedLink {
                    id: "1".to_string(),
                    source_path: source.clone(),
                    scale: 2.0,
                    transform: Transform::translation(0.0, 5.0, 0.0),
                }],
            }],
            ..MapBuild::default()
        };
        let applied = vec![RenameEntry {
            old_path: source,
            new_path: new_source,
            kind: DocumentKind::Part,
        }];
        (fixture, build, applied)
    }

    fn run(
        fixture: &Fixture,
        plan: FaultPlan,
        build: &MapBuild,
        applied: &[RenameEntry],
    ) -> CampaignResult {
        let session = Session::new(FaultyConnector::new(plan));
        let mut result = CampaignResult::new(fixture.root());
        let repaired =
            repair_derived_links(&session, build, applied, &RetryPolicy::immediate(3), &mut result);
        result.derived_links_repaired = repaired;
        result
    }

    #[test]
    fn test_link_recreated_with_parameters() {
        let (fixture, build, applied) = derived_fixture();
        let result = run(&fixture, FaultPlan::new(), &build, &applied);
        assert_eq!(result.derived_links_repaired, 1);
        assert!(result.warnings.is_empty());

        let saved = fixture.load("BASE_301.ipt");
        assert_eq!(saved.derived_links.len(), 1);
        assert_eq!(saved.derived_links[0].source, fixture.path("XYZ_300.ipt"));
        assert_eq!(saved.derived_links[0].scale, 2.0);
        assert_eq!(saved.derived_links[0].transform, Transform::translation(0.0, 5.0, 0.0));
    }

    #[test]
    fn test_transient_add_is_retried_after_reopen() {
        let (fixture, build, applied) = derived_fixture();
        let result = run(
            &fixture,
            FaultPlan::new().transient("add_derived_link", 2),
            &build,
            &applied,
        );
        assert_eq!(result.derived_links_repaired, 1);

        let saved = fixture.load("BASE_301.ipt");
        let sources: Vec<PathBuf> = saved.derived_links.iter().map(|l| l.source.clone()).collect();
        assert_eq!(sources, vec![fixture.path("XYZ_300.ipt")]);
        assert_eq!(saved.derived_links[0].scale, 2.0);
    }

    #[test]
    fn test_persistent_fault_becomes_warning() {
        let (fixture, build, applied) = derived_fixture();
        let result = run(
            &fixture,
            FaultPlan::new().fail_always("remove_derived_link"),
            &build,
            &applied,
        );
        assert_eq!(result.derived_links_repaired, 0);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("derived link"));
    }
}
