//! The six-phase rename campaign.
//!
//! 1. Discover & map: walk every root and drawing, plan the renames, keep
//!    everything open.
//! 2. Close all: release every document and let file locks clear.
//! 3. Move files: parts, then assemblies, then drawings.
//! 4. Repair derived links against renamed source parts.
//! 5. Repair assembly occurrences and drawing views.
//! 6. Validate that every reference resolves.
//!
//! Nothing touches the filesystem before phase 2 has confirmed that no
//! document is open. The session is shut down on every exit path.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::derived::repair_derived_links;
use super::discovery::{discover, Discovered};
use super::naming::{self, PrefixRule};
use super::rename_map::{MapBuild, RenameMapBuilder};
use super::repair::{match_entry, ReferenceRepairer};
use super::session::{DocumentGuard, Session};
use super::{
    current_location, path_key, CampaignResult, DryRunReport, EntryOutcome, EntryStatus,
    RenameEntry, SkipReason,
};
use crate::core::config::{EngineConfig, TransferMode};
use crate::core::error::{CampaignError, HostError, HostResult};
use crate::core::retry;
use crate::core::{DocumentKind, DocumentRecord};
use crate::host::{read_part_number, FileSystem, LocalFs, PART_NUMBER_KEY, PROPERTY_SETS};

/// Rename every document under `root` whose part number starts with
/// `old_prefix` so that its file name carries `new_prefix`, and repair every
/// reference to it.
///
/// Only a session that cannot start, an unreadable root, or an invalid prefix
/// are errors; everything else degrades the result with warnings.
pub fn rename_by_prefix(
    session: &Session,
    fs: &dyn FileSystem,
    config: &EngineConfig,
    root: &Path,
    old_prefix: &str,
    new_prefix: &str,
) -> Result<CampaignResult, CampaignError> {
    let outcome = PrefixRule::new(Some(old_prefix), new_prefix)
        .and_then(|rule| run_campaign(session, fs, config, root, rule));
    session.shutdown();
    outcome
}

/// Plan a campaign without changing anything.
///
/// Without `old_prefix`, any part number that starts with a project code
/// qualifies.
pub fn analyze_rename_dry_run(
    session: &Session,
    config: &EngineConfig,
    root: &Path,
    old_prefix: Option<&str>,
    new_prefix: &str,
) -> Result<DryRunReport, CampaignError> {
    let outcome = PrefixRule::new(old_prefix, new_prefix).and_then(|rule| {
        let discovered = discover(root, &config.discovery)?;
        let build = map_and_close(session, &LocalFs, config, rule, &discovered)?;
        Ok(DryRunReport {
            root: root.to_path_buf(),
            assemblies_found: discovered.assemblies.len(),
            drawings_found: discovered.drawings.len(),
            files_to_rename: build.map.len(),
            content_center_files: build.content_center_files(),
            planned: build.map.iter().cloned().collect(),
            files_skipped: build.skipped,
            warnings: build.warnings,
        })
    });
    session.shutdown();
    outcome
}

fn run_campaign(
    session: &Session,
    fs: &dyn FileSystem,
    config: &EngineConfig,
    root: &Path,
    rule: PrefixRule,
) -> Result<CampaignResult, CampaignError> {
    let mut result = CampaignResult::new(root);
    let new_prefix = rule.to.clone();

    let discovered = discover(root, &config.discovery)?;
    let build = map_and_close(session, fs, config, rule, &discovered)?;

    result.warnings.extend(build.warnings.iter().cloned());
    result.files_skipped = build.skipped.clone();
    result.skipped_count = build.skip_count(SkipReason::TargetExists);

    if build.map.is_empty() {
        info!("Nothing to rename under {}", root.display());
        return Ok(result);
    }

    info!("Phase 3/6: moving {} file(s)", build.map.len());
    let applied = move_files(fs, config, &build, &mut result);

    if !applied.is_empty() {
        info!("Phase 4/6: repairing derived links");
        let derived = repair_derived_links(session, &build, &applied, &config.retry, &mut result);
        result.derived_links_repaired = derived;

        info!("Phase 5/6: repairing assembly and drawing references");
        let repaired = repair_references(session, fs, config, &build, &applied, &mut result);
        if config.update_part_numbers {
            update_part_numbers(session, config, &applied, &new_prefix, &mut result);
        }

        info!("Phase 6/6: validating");
        validate(session, fs, config, &build, &applied, &repaired, &mut result);
    }

    result.success = result.renamed_count > 0;
    info!(
        "Campaign finished: {} renamed, {} failed, {} skipped, {} warning(s)",
        result.renamed_count,
        result.failed_count,
        result.skipped_count,
        result.warnings.len()
    );
    Ok(result)
}

/// Phases 1 and 2
fn map_and_close(
    session: &Session,
    fs: &dyn FileSystem,
    config: &EngineConfig,
    rule: PrefixRule,
    discovered: &Discovered,
) -> Result<MapBuild, CampaignError> {
    info!(
        "Phase 1/6: mapping {} assemblies and {} drawings",
        discovered.assemblies.len(),
        discovered.drawings.len()
    );
    session.ensure_started().map_err(CampaignError::SessionInit)?;

    let classifier = super::DocumentClassifier::new(&config.classifier.library_markers);
    let mut builder = RenameMapBuilder::new(session, fs, classifier, rule, config.retry.clone());
    for assembly in &discovered.assemblies {
        builder.add_root(assembly)?;
    }
    for drawing in &discovered.drawings {
        builder.add_drawing(drawing)?;
    }
    for part in &discovered.parts {
        builder.add_unplaced_part(part)?;
    }
    let (build, open) = builder.finish();

    info!("Phase 2/6: closing {} document(s)", open.len());
    drop(open);
    session.close_all();
    session.release_idle();
    let still_open = session.open_count();
    if still_open > 0 {
        return Err(CampaignError::HandlesStillOpen(still_open));
    }
    retry::settle(config.settle_duration());

    Ok(build)
}

/// Phase 3. Returns the entries whose file now exists at the new path.
fn move_files(
    fs: &dyn FileSystem,
    config: &EngineConfig,
    build: &MapBuild,
    result: &mut CampaignResult,
) -> Vec<RenameEntry> {
    let mut applied = Vec::new();

    for entry in build.map.in_move_order() {
        let status = move_one(fs, config, entry, result);
        match &status {
            EntryStatus::Renamed | EntryStatus::Copied => {
                result.renamed_count += 1;
                if status == EntryStatus::Copied {
                    result.files_to_delete.push(entry.old_path.clone());
                }
                applied.push(entry.clone());
            }
            EntryStatus::SkippedTargetExists | EntryStatus::SkippedSourceMissing => {
                result.skipped_count += 1;
            }
            EntryStatus::Failed(_) => result.failed_count += 1,
        }
        result.entries.push(EntryOutcome {
            old_path: entry.old_path.clone(),
            new_path: entry.new_path.clone(),
            kind: entry.kind,
            status,
        });
    }
    applied
}

fn move_one(
    fs: &dyn FileSystem,
    config: &EngineConfig,
    entry: &RenameEntry,
    result: &mut CampaignResult,
) -> EntryStatus {
    let (old, new) = (&entry.old_path, &entry.new_path);

    if fs.exists(new) {
        result.warn(format!(
            "Target already exists, skipping {} -> {}",
            old.display(),
            new.display()
        ));
        return EntryStatus::SkippedTargetExists;
    }
    if !fs.exists(old) {
        result.warn(format!("Source file missing, skipping {}", old.display()));
        return EntryStatus::SkippedSourceMissing;
    }

    let unlocked = config
        .lock_retry
        .wait_until(&format!("lock on {}", old.display()), || !fs.is_locked(old));
    if !unlocked {
        let reason = format!("{} is locked by another process", old.display());
        result.warn(format!("Failed to rename: {}", reason));
        return EntryStatus::Failed(reason);
    }

    let copy = config.transfer == TransferMode::Copy;
    let transferred = config.lock_retry.run(
        &format!("move {}", old.display()),
        |_| {
            if copy {
                fs.copy_file(old, new)
            } else {
                fs.move_file(old, new)
            }
        },
        HostError::is_transient,
    );

    match transferred {
        Ok(()) => {
            debug!("Renamed {} -> {}", old.display(), new.display());
            if copy {
                EntryStatus::Copied
            } else {
                EntryStatus::Renamed
            }
        }
        Err(e) => {
            let reason = e.to_string();
            result.warn(format!(
                "Failed to rename {} -> {}: {}",
                old.display(),
                new.display(),
                reason
            ));
            EntryStatus::Failed(reason)
        }
    }
}

/// Assemblies and drawings holding at least one reference to an applied rename
fn affected_parents<'b>(build: &'b MapBuild, applied: &[RenameEntry]) -> Vec<&'b DocumentRecord> {
    build
        .documents
        .iter()
        .filter(|d| !d.excluded && matches!(d.kind, DocumentKind::Assembly | DocumentKind::Drawing))
        .filter(|d| {
            d.references.iter().any(|r| {
                let key = path_key(r);
                applied.iter().any(|e| path_key(&e.old_path) == key)
            })
        })
        .collect()
}

/// A reference that no longer resolves and that mapping never recorded
fn is_dangling(fs: &dyn FileSystem, build: &MapBuild, path: &Path) -> bool {
    !fs.exists(path) && build.document(path).is_none()
}

fn open_with_retry<'s>(
    session: &'s Session,
    config: &EngineConfig,
    path: &Path,
    writable: bool,
) -> HostResult<DocumentGuard<'s>> {
    config.retry.run(
        &format!("open {}", path.display()),
        |_| session.open(path, writable),
        HostError::is_transient,
    )
}

/// Phase 5. Returns the current paths of the parents that were reopened.
fn repair_references(
    session: &Session,
    fs: &dyn FileSystem,
    config: &EngineConfig,
    build: &MapBuild,
    applied: &[RenameEntry],
    result: &mut CampaignResult,
) -> Vec<PathBuf> {
    let repairer = ReferenceRepairer::new(fs, &config.retry, &config.lock_retry);
    let mut reopened = Vec::new();

    for record in affected_parents(build, applied) {
        let parent = current_location(&record.path, applied);
        let guard = match open_with_retry(session, config, &parent, true) {
            Ok(guard) => guard,
            Err(e) => {
                result.warn(format!("Could not reopen {}: {}", parent.display(), e));
                continue;
            }
        };
        reopened.push(parent.clone());

        let occurrences = match guard.with_host(|host, handle| host.occurrences(handle)) {
            Ok(occurrences) => occurrences,
            Err(e) => {
                result.warn(format!(
                    "Could not read references of {}: {}",
                    parent.display(),
                    e
                ));
                continue;
            }
        };

        let mut changed = 0;
        for occurrence in &occurrences {
            let dangling = is_dangling(fs, build, &occurrence.referenced_path);
            let Some(entry) = match_entry(occurrence, applied, dangling) else {
                continue;
            };
            if path_key(&occurrence.referenced_path) == path_key(&entry.new_path) {
                continue;
            }
            match repairer.repair(&guard, record.kind, occurrence, &entry.new_path) {
                Ok(strategy) => {
                    debug!(
                        "{}: {} -> {} ({})",
                        parent.display(),
                        occurrence.name,
                        entry.new_path.display(),
                        strategy.as_str()
                    );
                    changed += 1;
                }
                Err(e) => result.warn(format!(
                    "Failed to repair {} in {}: {}",
                    occurrence.name,
                    parent.display(),
                    e
                )),
            }
        }

        if changed == 0 {
            continue;
        }
        if let Err(e) = guard.with_host(|host, handle| host.update(handle)) {
            debug!("Update of {} failed: {}", parent.display(), e);
        }
        match guard.close(true) {
            Ok(()) => result.references_repaired += changed,
            Err(e) => result.warn(format!(
                "Repaired {} reference(s) in {} but saving failed: {}",
                changed,
                parent.display(),
                e
            )),
        }
    }
    reopened
}

/// Rewrite the part number of each renamed document to carry the new prefix
fn update_part_numbers(
    session: &Session,
    config: &EngineConfig,
    applied: &[RenameEntry],
    new_prefix: &str,
    result: &mut CampaignResult,
) {
    for entry in applied {
        let outcome = open_with_retry(session, config, &entry.new_path, true).and_then(|guard| {
            let updated = guard.with_host(|host, handle| {
                let Some(current) = read_part_number(host, handle)? else {
                    return Ok(false);
                };
                let rewritten = naming::rewrite_part_number(&current, new_prefix);
                if rewritten == current {
                    return Ok(false);
                }
                host.write_property(handle, PROPERTY_SETS[0], PART_NUMBER_KEY, &rewritten)?;
                Ok(true)
            })?;
            if updated {
                guard.close(true)?;
            }
            Ok(updated)
        });
        match outcome {
            Ok(true) => result.part_numbers_updated += 1,
            Ok(false) => {}
            Err(e) => result.warn(format!(
                "Could not update part number of {}: {}",
                entry.new_path.display(),
                e
            )),
        }
    }
}

/// Phase 6
fn validate(
    session: &Session,
    fs: &dyn FileSystem,
    config: &EngineConfig,
    build: &MapBuild,
    applied: &[RenameEntry],
    reopened: &[PathBuf],
    result: &mut CampaignResult,
) {
    for entry in applied {
        if !fs.exists(&entry.new_path) {
            result.warn(format!(
                "Renamed file is missing: {}",
                entry.new_path.display()
            ));
        }
    }

    // Repaired parents plus every renamed assembly and drawing
    let mut targets: Vec<PathBuf> = reopened.to_vec();
    for entry in applied {
        if matches!(entry.kind, DocumentKind::Assembly | DocumentKind::Drawing)
            && !targets.iter().any(|t| path_key(t) == path_key(&entry.new_path))
        {
            targets.push(entry.new_path.clone());
        }
    }

    for target in &targets {
        let guard = match open_with_retry(session, config, target, false) {
            Ok(guard) => guard,
            Err(e) => {
                result.warn(format!("Could not validate {}: {}", target.display(), e));
                continue;
            }
        };
        let occurrences = match guard.with_host(|host, handle| host.occurrences(handle)) {
            Ok(occurrences) => occurrences,
            Err(e) => {
                result.warn(format!("Could not validate {}: {}", target.display(), e));
                continue;
            }
        };

        for occurrence in &occurrences {
            if build
                .document(&occurrence.referenced_path)
                .map(|d| d.excluded)
                .unwrap_or(false)
            {
                continue;
            }
            if !fs.exists(&occurrence.referenced_path) {
                result.warn(format!(
                    "Unresolved reference in {}: {} -> {}",
                    target.display(),
                    occurrence.name,
                    occurrence.referenced_path.display()
                ));
                continue;
            }
            // Resolves on disk, so only an exact match counts
            if let Some(entry) = match_entry(occurrence, applied, false) {
                if path_key(&occurrence.referenced_path) != path_key(&entry.new_path) {
                    result.warn(format!(
                        "Reference in {} still points at {} instead of {}",
                        target.display(),
                        occurrence.referenced_path.display(),
                        entry.new_path.display()
                    ));
                }
            }
        }
    }
}
