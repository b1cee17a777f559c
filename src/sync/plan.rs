use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use super::inventory::{Inventory, LocalFile};
use crate::icloud::shared_album::RemoteAsset;

/// Retention settings for one album.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlbumPolicy {
    /// Files older than this many days are pruned. 0 disables.
    pub keep_days: u32,
    /// At most this many files are kept. 0 disables.
    pub max_files: u32,
    /// Delete local files whose asset left the album.
    pub mirror_missing: bool,
}

/// Everything one album run will do. The three action lists never share an
/// id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Remote order, each with `download` set.
    pub to_fetch: Vec<RemoteAsset>,
    /// Oldest first.
    pub to_delete_pruned: Vec<LocalFile>,
    pub to_delete_mirrored: Vec<LocalFile>,
    /// Fetch candidates the retention rules would delete straight away.
    pub skipped: Vec<String>,
    /// Remote assets with no usable full-size rendition.
    pub unavailable: usize,
}

impl SyncPlan {
    pub fn has_mutations(&self) -> bool {
        !self.to_fetch.is_empty()
            || !self.to_delete_pruned.is_empty()
            || !self.to_delete_mirrored.is_empty()
    }
}

enum Candidate<'a> {
    Local(&'a LocalFile),
    Fetch(&'a RemoteAsset),
}

impl Candidate<'_> {
    fn id(&self) -> &str {
        match self {
            Candidate::Local(f) => &f.id,
            Candidate::Fetch(a) => &a.id,
        }
    }

    fn age_time(&self) -> DateTime<Utc> {
        match self {
            Candidate::Local(f) => f.modified,
            Candidate::Fetch(a) => a.created,
        }
    }
}

fn oldest_first(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.age_time()
        .cmp(&b.age_time())
        .then_with(|| a.id().cmp(b.id()))
}

/// Diff `remote` against `local` and apply `policy` as of `now`.
///
/// Retention is evaluated on the post-fetch view: what the directory would
/// hold once every missing asset was downloaded. The age rule runs first;
/// anything it leaves that is gone from the album is mirrored (when
/// enabled), and the count rule then trims what would remain. Mirroring
/// only ever looks at files already on disk.
///
/// A file that is both over the count limit and gone from the album is
/// recorded as mirrored, never as pruned, and holds no `max_files` slot.
pub fn plan(
    remote: &[RemoteAsset],
    local: &Inventory,
    policy: &AlbumPolicy,
    now: DateTime<Utc>,
) -> SyncPlan {
    let remote_ids: HashSet<&str> = remote.iter().map(|a| a.id.as_str()).collect();

    let mut seen = HashSet::new();
    let mut fetch_candidates: Vec<&RemoteAsset> = Vec::new();
    let mut unavailable = 0;
    for asset in remote {
        if !seen.insert(asset.id.as_str()) || local.contains_key(&asset.id) {
            continue;
        }
        if asset.download.is_some() {
            fetch_candidates.push(asset);
        } else {
            unavailable += 1;
        }
    }

    let mut candidates: Vec<Candidate<'_>> = local
        .values()
        .map(Candidate::Local)
        .chain(fetch_candidates.iter().map(|a| Candidate::Fetch(a)))
        .collect();
    candidates.sort_by(oldest_first);

    let mut pruned: Vec<Candidate<'_>> = Vec::new();

    if policy.keep_days > 0 {
        let cutoff = now - Duration::days(i64::from(policy.keep_days));
        let (old, kept): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|c| c.age_time() < cutoff);
        pruned.extend(old);
        candidates = kept;
    }

    // Files about to be mirrored away do not hold a slot under max_files.
    let mut mirrored: Vec<LocalFile> = Vec::new();
    if policy.mirror_missing {
        let (gone, kept): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|c| {
            matches!(c, Candidate::Local(f) if !remote_ids.contains(f.id.as_str()))
        });
        for candidate in gone {
            if let Candidate::Local(f) = candidate {
                mirrored.push(f.clone());
            }
        }
        candidates = kept;
    }

    let max_files = policy.max_files as usize;
    if max_files > 0 && candidates.len() > max_files {
        let excess = candidates.len() - max_files;
        pruned.extend(candidates.drain(..excess));
    }

    mirrored.sort_by(|a, b| a.id.cmp(&b.id));
    let mut plan = SyncPlan {
        to_delete_mirrored: mirrored,
        unavailable,
        ..SyncPlan::default()
    };
    let mut skipped_ids: HashSet<&str> = HashSet::new();
    pruned.sort_by(oldest_first);
    for candidate in pruned {
        match candidate {
            Candidate::Local(f) => plan.to_delete_pruned.push(f.clone()),
            Candidate::Fetch(a) => {
                skipped_ids.insert(a.id.as_str());
                plan.skipped.push(a.id.clone());
            }
        }
    }

    plan.to_fetch = fetch_candidates
        .into_iter()
        .filter(|a| !skipped_ids.contains(a.id.as_str()))
        .cloned()
        .collect();

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icloud::shared_album::DownloadRef;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        now() - Duration::days(days)
    }

    fn remote(id: &str, created: DateTime<Utc>) -> RemoteAsset {
        RemoteAsset {
            id: id.into(),
            created,
            checksum: Some(format!("ck-{id}")),
            download: Some(DownloadRef {
                url: format!("https://cdn.example/{id}.jpg"),
                extension: "jpg".into(),
                size: Some(1_000_000),
            }),
        }
    }

    fn unavailable(id: &str, created: DateTime<Utc>) -> RemoteAsset {
        RemoteAsset {
            download: None,
            ..remote(id, created)
        }
    }

    fn local(id: &str, modified: DateTime<Utc>) -> LocalFile {
        LocalFile {
            path: PathBuf::from(format!("/media/a/{id}.jpg")),
            id: id.into(),
            size: 1_000_000,
            modified,
        }
    }

    fn inventory(files: Vec<LocalFile>) -> Inventory {
        files.into_iter().map(|f| (f.id.clone(), f)).collect()
    }

    fn policy(keep_days: u32, max_files: u32, mirror_missing: bool) -> AlbumPolicy {
        AlbumPolicy {
            keep_days,
            max_files,
            mirror_missing,
        }
    }

    fn ids(files: &[LocalFile]) -> Vec<&str> {
        files.iter().map(|f| f.id.as_str()).collect()
    }

    fn fetch_ids(plan: &SyncPlan) -> Vec<&str> {
        plan.to_fetch.iter().map(|a| a.id.as_str()).collect()
    }

    /// Apply a plan to an inventory the way a fully successful run would.
    fn apply(plan: &SyncPlan, before: &Inventory) -> Inventory {
        let mut next = before.clone();
        for f in plan.to_delete_pruned.iter().chain(&plan.to_delete_mirrored) {
            next.remove(&f.id);
        }
        for a in &plan.to_fetch {
            next.insert(a.id.clone(), local(&a.id, a.created));
        }
        next
    }

    #[test]
    fn test_new_assets_are_fetched() {
        let remote = vec![remote("A", days_ago(1)), remote("B", days_ago(2))];
        let local = inventory(vec![local("A", days_ago(1))]);
        let plan = plan(&remote, &local, &policy(0, 0, true), now());
        assert_eq!(fetch_ids(&plan), vec!["B"]);
        assert!(plan.to_delete_pruned.is_empty());
        assert!(plan.to_delete_mirrored.is_empty());
    }

    #[test]
    fn test_age_rule() {
        let local = inventory(vec![
            local("D10", days_ago(10)),
            local("D40", days_ago(40)),
            local("D60", days_ago(60)),
        ]);
        let remote: Vec<_> = ["D10", "D40", "D60"]
            .iter()
            .map(|id| remote(id, days_ago(1)))
            .collect();
        let plan = plan(&remote, &local, &policy(30, 0, false), now());
        assert_eq!(ids(&plan.to_delete_pruned), vec!["D60", "D40"]);
        assert!(plan.to_fetch.is_empty());
    }

    #[test]
    fn test_count_rule() {
        let local = inventory(
            (1..=5)
                .map(|i| local(&format!("F{i}"), days_ago(i)))
                .collect(),
        );
        let plan = plan(&[], &local, &policy(0, 3, false), now());
        assert_eq!(ids(&plan.to_delete_pruned), vec!["F5", "F4"]);
    }

    #[test]
    fn test_mirror_rule() {
        let local = inventory(vec![
            local("A", days_ago(1)),
            local("B", days_ago(1)),
            local("C", days_ago(1)),
        ]);
        let remote = vec![remote("A", days_ago(1)), remote("C", days_ago(1))];
        let plan = plan(&remote, &local, &policy(0, 0, true), now());
        assert_eq!(ids(&plan.to_delete_mirrored), vec!["B"]);
        assert!(plan.to_delete_pruned.is_empty());
    }

    #[test]
    fn test_mirror_disabled() {
        let local = inventory(vec![local("B", days_ago(1))]);
        let plan = plan(&[], &local, &policy(0, 0, false), now());
        assert!(plan.to_delete_mirrored.is_empty());
        assert!(!plan.has_mutations());
    }

    #[test]
    fn test_zero_limits_never_prune() {
        let local = inventory(
            (0..50)
                .map(|i| local(&format!("F{i:02}"), days_ago(1000 + i)))
                .collect(),
        );
        let remote: Vec<_> = local.values().map(|f| remote(&f.id, f.modified)).collect();
        let plan = plan(&remote, &local, &policy(0, 0, true), now());
        assert!(plan.to_delete_pruned.is_empty());
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_old_fetch_candidates_are_skipped_not_fetched() {
        let remote = vec![remote("NEW", days_ago(2)), remote("OLD", days_ago(90))];
        let plan = plan(&remote, &Inventory::new(), &policy(30, 0, true), now());
        assert_eq!(fetch_ids(&plan), vec!["NEW"]);
        assert_eq!(plan.skipped, vec!["OLD"]);
        assert!(plan.to_delete_pruned.is_empty());
    }

    #[test]
    fn test_count_rule_spans_local_and_fetch_candidates() {
        // Post-fetch view: L1(5d) R1(1d) L2(20d) R2(30d), max 2 keeps the two newest.
        let local = inventory(vec![local("L1", days_ago(5)), local("L2", days_ago(20))]);
        let remote = vec![
            remote("L1", days_ago(5)),
            remote("L2", days_ago(20)),
            remote("R1", days_ago(1)),
            remote("R2", days_ago(30)),
        ];
        let plan = plan(&remote, &local, &policy(0, 2, true), now());
        assert_eq!(fetch_ids(&plan), vec!["R1"]);
        assert_eq!(plan.skipped, vec!["R2"]);
        assert_eq!(ids(&plan.to_delete_pruned), vec!["L2"]);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let t = days_ago(3);
        let local = inventory(vec![local("B", t), local("A", t), local("C", t)]);
        let plan = plan(&[], &local, &policy(0, 1, false), now());
        assert_eq!(ids(&plan.to_delete_pruned), vec!["A", "B"]);
    }

    #[test]
    fn test_over_count_and_gone_is_mirrored() {
        let local = inventory(vec![
            local("GONE", days_ago(50)),
            local("K1", days_ago(2)),
            local("K2", days_ago(1)),
        ]);
        let remote = vec![remote("K1", days_ago(2)), remote("K2", days_ago(1))];
        let plan = plan(&remote, &local, &policy(0, 2, true), now());
        assert_eq!(ids(&plan.to_delete_mirrored), vec!["GONE"]);
        assert!(plan.to_delete_pruned.is_empty());
    }

    #[test]
    fn test_pruned_file_not_also_mirrored() {
        let local = inventory(vec![local("GONE", days_ago(90)), local("KEEP", days_ago(1))]);
        let remote = vec![remote("KEEP", days_ago(1))];
        let plan = plan(&remote, &local, &policy(30, 0, true), now());
        assert_eq!(ids(&plan.to_delete_pruned), vec!["GONE"]);
        assert!(plan.to_delete_mirrored.is_empty());
    }

    #[test]
    fn test_unavailable_assets_are_not_fetched_or_mirrored() {
        let local = inventory(vec![local("THUMBONLY", days_ago(1))]);
        let remote = vec![
            unavailable("THUMBONLY", days_ago(1)),
            unavailable("OTHER", days_ago(1)),
        ];
        let plan = plan(&remote, &local, &policy(0, 0, true), now());
        assert!(plan.to_fetch.is_empty());
        assert!(plan.to_delete_mirrored.is_empty());
        assert_eq!(plan.unavailable, 1);
    }

    #[test]
    fn test_duplicate_remote_ids_fetched_once() {
        let remote = vec![remote("A", days_ago(1)), remote("A", days_ago(1))];
        let plan = plan(&remote, &Inventory::new(), &policy(0, 0, true), now());
        assert_eq!(fetch_ids(&plan), vec!["A"]);
    }

    #[test]
    fn test_sets_are_disjoint() {
        let local = inventory(vec![
            local("L1", days_ago(100)),
            local("L2", days_ago(50)),
            local("L3", days_ago(10)),
            local("L4", days_ago(2)),
            local("X1", days_ago(3)),
        ]);
        let remote = vec![
            remote("L1", days_ago(100)),
            remote("L2", days_ago(50)),
            remote("L3", days_ago(10)),
            remote("L4", days_ago(2)),
            remote("R1", days_ago(1)),
            remote("R2", days_ago(70)),
            remote("R3", days_ago(4)),
        ];
        let plan = plan(&remote, &local, &policy(60, 3, true), now());

        let fetch: HashSet<_> = fetch_ids(&plan).into_iter().collect();
        let pruned: HashSet<_> = ids(&plan.to_delete_pruned).into_iter().collect();
        let mirrored: HashSet<_> = ids(&plan.to_delete_mirrored).into_iter().collect();
        assert!(fetch.is_disjoint(&pruned));
        assert!(fetch.is_disjoint(&mirrored));
        assert!(pruned.is_disjoint(&mirrored));
        let skipped: HashSet<_> = plan.skipped.iter().map(String::as_str).collect();
        assert!(fetch.is_disjoint(&skipped));
    }

    #[test]
    fn test_plan_is_idempotent_after_execution() {
        let local = inventory(vec![
            local("L1", days_ago(100)),
            local("L2", days_ago(10)),
            local("L3", days_ago(5)),
            local("X1", days_ago(3)),
        ]);
        let remote = vec![
            remote("L1", days_ago(100)),
            remote("L2", days_ago(10)),
            remote("L3", days_ago(5)),
            remote("R1", days_ago(1)),
            remote("R2", days_ago(2)),
            remote("R3", days_ago(80)),
        ];
        let policy = policy(30, 3, true);
        let first = plan(&remote, &local, &policy, now());
        assert!(first.has_mutations());

        let after = apply(&first, &local);
        assert!(after.len() <= 3);
        let second = plan(&remote, &after, &policy, now());
        assert!(!second.has_mutations(), "second plan: {second:?}");
    }
}
