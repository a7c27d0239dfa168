// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Three-way configuration merge.
//!
//! Every commit ships a __pristine__ configuration tree. The administrator
//! edits the __live__ tree of the running system. When upgrading, the
//! pristine tree of the booted commit is the common ancestor of two
//! divergent revisions: the pristine tree of the new commit, and the live
//! tree. Comparing all three classifies each path as untouched, cleanly
//! updatable, or in conflict.
//!
//! # Classification
//!
//! Presence of a path in the old, new, and live trees, together with
//! [`PathInfo::is_equivalent`] between the trees that do carry it, decides
//! the action. Paths where everybody agrees produce no change at all:
//!
//! | old | new | live | condition | action |
//! |-----|-----|------|-----------|--------|
//! | yes | yes | yes | old = new = live | none |
//! | yes | yes | yes | old = new, old != live | user-only |
//! | yes | yes | yes | old != new, old = live | update |
//! | yes | yes | yes | old != new, new = live | none |
//! | yes | yes | yes | all differ | conflict |
//! | no  | yes | no  | | add |
//! | no  | yes | yes | new = live | none |
//! | no  | yes | yes | new != live | conflict |
//! | yes | no  | yes | old = live | remove |
//! | yes | no  | yes | old != live | conflict |
//! | yes | no  | no  | | none |
//! | yes | yes | no  | old = new | user-only |
//! | yes | yes | no  | old != new | conflict |
//! | no  | no  | yes | | user-only |
//!
//! Conflicts are not errors. They are collected for the administrator to
//! resolve by hand.

use crate::catalog::{Catalog, PathInfo};

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult},
};

/// What happens to a configuration path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EtcChangeAction {
    /// New upstream path absent from live tree.
    Add,

    /// Upstream changed path that live tree never touched.
    Update,

    /// Upstream deleted path that live tree never touched.
    Remove,

    /// Upstream and live tree changed path incompatibly.
    Conflict,

    /// Live tree differs in a way upstream never touched.
    UserOnly,
}

impl EtcChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Conflict => "conflict",
            Self::UserOnly => "user-only",
        }
    }
}

impl Display for EtcChangeAction {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Classified change of one configuration path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcChange {
    /// Path relative to configuration root.
    pub path: String,
    pub action: EtcChangeAction,
    pub old: Option<PathInfo>,
    pub new: Option<PathInfo>,
    pub user: Option<PathInfo>,
}

impl Display for EtcChange {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{:<10} {}", self.action.as_str(), self.path)
    }
}

/// Classify one path by its presence and content in each tree.
///
/// Returns `None` when the path needs no attention.
pub fn classify(
    old: Option<&PathInfo>,
    new: Option<&PathInfo>,
    user: Option<&PathInfo>,
) -> Option<EtcChangeAction> {
    use EtcChangeAction::*;

    match (old, new, user) {
        (Some(old), Some(new), Some(user)) => {
            let upstream_changed = !old.is_equivalent(new);
            let user_changed = !old.is_equivalent(user);
            match (upstream_changed, user_changed) {
                (false, false) => None,
                (false, true) => Some(UserOnly),
                (true, false) => Some(Update),
                (true, true) if new.is_equivalent(user) => None,
                (true, true) => Some(Conflict),
            }
        }
        (None, Some(_), None) => Some(Add),
        (None, Some(new), Some(user)) => (!new.is_equivalent(user)).then_some(Conflict),
        (Some(old), None, Some(user)) => {
            if old.is_equivalent(user) {
                Some(Remove)
            } else {
                Some(Conflict)
            }
        }
        (Some(_), None, None) => None,
        (Some(old), Some(new), None) => {
            if old.is_equivalent(new) {
                Some(UserOnly)
            } else {
                Some(Conflict)
            }
        }
        (None, None, Some(_)) => Some(UserOnly),
        (None, None, None) => None,
    }
}

/// Compute classified changes across three configuration trees.
///
/// Output is sorted by relative path, and only holds paths that need
/// attention.
pub fn compute_diff(old: &Catalog, new: &Catalog, user: &Catalog) -> Vec<EtcChange> {
    let keys = old
        .keys()
        .chain(new.keys())
        .chain(user.keys())
        .collect::<BTreeSet<_>>();

    keys.into_iter()
        .filter_map(|key| {
            let (old, new, user) = (old.get(key), new.get(key), user.get(key));
            classify(old, new, user).map(|action| EtcChange {
                path: key.clone(),
                action,
                old: old.cloned(),
                new: new.cloned(),
                user: user.cloned(),
            })
        })
        .collect()
}

/// Count changes per action.
pub fn summarize(changes: &[EtcChange]) -> BTreeMap<EtcChangeAction, usize> {
    let mut summary = BTreeMap::new();
    for change in changes {
        *summary.entry(change.action).or_insert(0) += 1;
    }

    summary
}

/// Select changes that need manual resolution.
pub fn conflicts(changes: &[EtcChange]) -> impl Iterator<Item = &EtcChange> {
    changes
        .iter()
        .filter(|change| change.action == EtcChangeAction::Conflict)
}

#[cfg(test)]
mod tests {
    use super::{
        EtcChangeAction::{Add, Conflict, Remove, Update, UserOnly},
        *,
    };
    use crate::catalog::parse_listing;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn file(checksum: &str) -> Option<PathInfo> {
        Some(
            format!("-00644 0 0 1 {checksum} /etc/file")
                .parse()
                .unwrap(),
        )
    }

    #[test_case(file("a"), file("a"), file("a"), None; "untouched everywhere")]
    #[test_case(file("a"), file("a"), file("u"), Some(UserOnly); "user edited")]
    #[test_case(file("a"), file("b"), file("a"), Some(Update); "upstream edited")]
    #[test_case(file("a"), file("b"), file("b"), None; "converged edit")]
    #[test_case(file("a"), file("b"), file("u"), Some(Conflict); "divergent edits")]
    #[test_case(None, file("b"), None, Some(Add); "upstream added")]
    #[test_case(None, file("b"), file("b"), None; "converged add")]
    #[test_case(None, file("b"), file("u"), Some(Conflict); "divergent adds")]
    #[test_case(file("a"), None, file("a"), Some(Remove); "upstream removed")]
    #[test_case(file("a"), None, file("u"), Some(Conflict); "removed but user edited")]
    #[test_case(file("a"), None, None, None; "removed everywhere")]
    #[test_case(file("a"), file("a"), None, Some(UserOnly); "user deleted")]
    #[test_case(file("a"), file("b"), None, Some(Conflict); "edited but user deleted")]
    #[test_case(None, None, file("u"), Some(UserOnly); "local addition")]
    #[test_case(None, None, None, None; "absent everywhere")]
    #[test]
    fn classification_table(
        old: Option<PathInfo>,
        new: Option<PathInfo>,
        user: Option<PathInfo>,
        expect: Option<EtcChangeAction>,
    ) {
        let result = classify(old.as_ref(), new.as_ref(), user.as_ref());
        pretty_assertions::assert_eq!(result, expect);
    }

    #[test]
    fn metadata_changes_count_as_edits() -> anyhow::Result<()> {
        let old: PathInfo = "-00644 0 0 1 a /usr/etc/file".parse()?;
        let new: PathInfo = "-00644 0 0 1 a /usr/etc/file".parse()?;
        let chmod: PathInfo = "-00600 0 0 1 a /file".parse()?;
        let link: PathInfo = "l00777 0 0 1 a /file -> elsewhere".parse()?;

        assert_eq!(
            classify(Some(&old), Some(&new), Some(&chmod)),
            Some(EtcChangeAction::UserOnly)
        );
        assert_eq!(
            classify(Some(&old), Some(&new), Some(&link)),
            Some(EtcChangeAction::UserOnly)
        );

        Ok(())
    }

    fn trees() -> anyhow::Result<(Catalog, Catalog, Catalog)> {
        let old = parse_listing(indoc! {r#"
            d00755 0 0 0 d0 d1 /usr/etc
            -00644 0 0 1 hosts-1 /usr/etc/hosts
            -00644 0 0 1 fstab-1 /usr/etc/fstab
            -00644 0 0 1 motd-1 /usr/etc/motd
            -00644 0 0 1 gone-1 /usr/etc/gone.conf
        "#})?;
        let new = parse_listing(indoc! {r#"
            d00755 0 0 0 d0 d1 /usr/etc
            -00644 0 0 1 hosts-2 /usr/etc/hosts
            -00644 0 0 1 fstab-2 /usr/etc/fstab
            -00644 0 0 1 motd-1 /usr/etc/motd
            -00644 0 0 1 fresh-1 /usr/etc/fresh.conf
        "#})?;
        let user = parse_listing(indoc! {r#"
            d00755 0 0 0 d0 d1 /
            -00644 0 0 1 hosts-1 /hosts
            -00644 0 0 1 fstab-u /fstab
            -00644 0 0 1 motd-1 /motd
            -00644 0 0 1 gone-1 /gone.conf
            -00600 0 0 1 local-1 /local.conf
        "#})?;

        Ok((
            Catalog::rooted("/usr/etc", old),
            Catalog::rooted("/usr/etc", new),
            Catalog::rooted("/", user),
        ))
    }

    #[test]
    fn diff_of_three_trees() -> anyhow::Result<()> {
        let (old, new, user) = trees()?;
        let result = compute_diff(&old, &new, &user)
            .into_iter()
            .map(|change| (change.path, change.action))
            .collect::<Vec<_>>();

        let expect = vec![
            ("fresh.conf".to_string(), EtcChangeAction::Add),
            ("fstab".to_string(), EtcChangeAction::Conflict),
            ("gone.conf".to_string(), EtcChangeAction::Remove),
            ("hosts".to_string(), EtcChangeAction::Update),
            ("local.conf".to_string(), EtcChangeAction::UserOnly),
        ];
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn diff_is_sorted_regardless_of_listing_order() -> anyhow::Result<()> {
        let added = parse_listing(indoc! {r#"
            -00644 0 0 1 z /usr/etc/zz
            -00644 0 0 1 a /usr/etc/aa
            -00644 0 0 1 m /usr/etc/mm
        "#})?;
        let local = parse_listing(indoc! {r#"
            -00644 0 0 1 y /yy
            -00644 0 0 1 b /bb
        "#})?;
        let mut reversed = added.clone();
        reversed.reverse();

        let old = Catalog::default();
        let user = Catalog::rooted("/", local);
        let forward = compute_diff(&old, &Catalog::rooted("/usr/etc", added), &user);
        let backward = compute_diff(&old, &Catalog::rooted("/usr/etc", reversed), &user);

        let expect = vec![
            ("aa", EtcChangeAction::Add),
            ("bb", EtcChangeAction::UserOnly),
            ("mm", EtcChangeAction::Add),
            ("yy", EtcChangeAction::UserOnly),
            ("zz", EtcChangeAction::Add),
        ];
        for result in [forward, backward] {
            let result = result
                .iter()
                .map(|change| (change.path.as_str(), change.action))
                .collect::<Vec<_>>();
            assert_eq!(result, expect);
        }

        Ok(())
    }

    #[test]
    fn diff_is_idempotent() -> anyhow::Result<()> {
        let (old, new, user) = trees()?;
        assert_eq!(compute_diff(&old, &new, &user), compute_diff(&old, &new, &user));

        Ok(())
    }

    #[test]
    fn root_entry_never_becomes_a_change() -> anyhow::Result<()> {
        let (old, new, _) = trees()?;
        let user = Catalog::rooted("/", parse_listing("d00755 0 0 0 x y /\n")?);
        let result = compute_diff(&old, &new, &user);
        assert!(result.iter().all(|change| !change.path.is_empty()));

        Ok(())
    }

    #[test]
    fn summary_and_conflicts() -> anyhow::Result<()> {
        let (old, new, user) = trees()?;
        let changes = compute_diff(&old, &new, &user);

        let summary = summarize(&changes);
        assert_eq!(summary.get(&EtcChangeAction::Conflict), Some(&1));
        assert_eq!(summary.get(&EtcChangeAction::Add), Some(&1));

        let result = conflicts(&changes).map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(result, vec!["conflict   fstab"]);

        Ok(())
    }
}
