// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package set differences between commits.
//!
//! Every commit carries the package database of the system it was built
//! from. Each installed package is a directory named `category/name-version`
//! directly below the database root. Comparing those directories between two
//! commits tells the user what an upgrade is about to change.
//!
//! Versions are not parsed. A package's identity is its name with the version
//! suffix stripped off at the last hyphen that is followed by a digit. That is
//! enough to pair `app-misc/foo-1.0` with `app-misc/foo-1.1` as an upgrade.

use crate::{
    catalog::{Catalog, PathInfo},
    config::PackageDatabase,
    ostree::{ListingReader, OstreeError},
};

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, instrument, warn};

/// Installed packages of one commit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PackageSet {
    packages: BTreeSet<String>,
}

impl PackageSet {
    /// Collect package directories from a listing of the database root.
    ///
    /// Only directories exactly two levels below `root` count as packages.
    pub fn from_listing(root: &str, entries: impl IntoIterator<Item = PathInfo>) -> Self {
        let catalog = Catalog::rooted(root, entries);
        let packages = catalog
            .iter()
            .filter(|(key, entry)| entry.is_dir() && key.matches('/').count() == 1)
            .map(|(key, _)| key.clone())
            .collect();

        Self { packages }
    }

    pub fn contains(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.packages.iter()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl<S> FromIterator<S> for PackageSet
where
    S: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            packages: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Read installed packages of `commit`.
///
/// Probes the fallback database location when the primary one cannot be
/// listed, or lists no packages.
///
/// # Errors
///
/// - Return [`OstreeError`] if no database location can be listed.
#[instrument(skip(reader, database), level = "debug")]
pub fn installed_packages(
    reader: &dyn ListingReader,
    commit: &str,
    database: &PackageDatabase,
) -> Result<PackageSet, OstreeError> {
    let primary = reader
        .list(commit, &database.primary)
        .map(|entries| PackageSet::from_listing(&database.primary, entries));

    let Some(fallback) = &database.fallback else {
        return primary;
    };

    match primary {
        Ok(packages) if !packages.is_empty() => Ok(packages),
        Ok(_) => {
            debug!("no packages under {}, probing {fallback}", database.primary);
            let entries = reader.list(commit, fallback)?;
            Ok(PackageSet::from_listing(fallback, entries))
        }
        Err(err) => {
            warn!("cannot list {} in {commit}: {err}", database.primary);
            let entries = reader.list(commit, fallback)?;
            Ok(PackageSet::from_listing(fallback, entries))
        }
    }
}

/// Strip version suffix from package.
///
/// Splits at the last `/`, then looks for the last hyphen followed by a digit
/// in the remainder. Packages without such a hyphen are returned unchanged.
pub fn base_name(package: &str) -> &str {
    let start = package.rfind('/').map(|slash| slash + 1).unwrap_or(0);
    let name = package[start..].as_bytes();

    for (index, pair) in name.windows(2).enumerate().rev() {
        if pair[0] == b'-' && pair[1].is_ascii_digit() {
            return &package[..start + index];
        }
    }

    package
}

/// Package pairs that changed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrade {
    pub old: String,
    pub new: String,
}

/// Difference between two package sets.
///
/// # Invariant
///
/// - All lists are sorted.
/// - An added package paired as an upgrade is never listed as added.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PackageDiff {
    pub upgraded: Vec<Upgrade>,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

impl PackageDiff {
    /// Compare old and new package sets.
    pub fn between(old: &PackageSet, new: &PackageSet) -> Self {
        let removed_candidates = old.iter().filter(|package| !new.contains(package));
        let mut added_candidates = new
            .iter()
            .filter(|package| !old.contains(package))
            .cloned()
            .collect::<Vec<_>>();

        let mut diff = Self::default();
        for old_package in removed_candidates {
            let base = base_name(old_package);
            let matched = added_candidates
                .iter()
                .position(|new_package| base_name(new_package) == base);

            match matched {
                Some(position) => diff.upgraded.push(Upgrade {
                    old: old_package.clone(),
                    new: added_candidates.remove(position),
                }),
                None => diff.removed.push(old_package.clone()),
            }
        }
        diff.added = added_candidates;

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.upgraded.is_empty() && self.removed.is_empty() && self.added.is_empty()
    }
}

impl Display for PackageDiff {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.is_empty() {
            return writeln!(fmt, "no package changes");
        }

        for upgrade in &self.upgraded {
            writeln!(fmt, "  upgraded  {} -> {}", upgrade.old, upgrade.new)?;
        }
        for package in &self.removed {
            writeln!(fmt, "  removed   {package}")?;
        }
        for package in &self.added {
            writeln!(fmt, "  new       {package}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::parse_listing;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::{cell::RefCell, path::Path};

    #[test_case("app-misc/foo-1.0", "app-misc/foo"; "simple version")]
    #[test_case("dev-libs/foo-bar-2.3-r1", "dev-libs/foo-bar"; "revision suffix")]
    #[test_case("x11-libs/gtk+-3.24.41", "x11-libs/gtk+"; "symbol in name")]
    #[test_case("app-misc/foo", "app-misc/foo"; "no version")]
    #[test_case("app-misc/foo-bar", "app-misc/foo-bar"; "hyphen without digit")]
    #[test_case("media-libs/libsdl2-2.30.0", "media-libs/libsdl2"; "digit in name")]
    #[test_case("sys-apps/7zip-24.05", "sys-apps/7zip"; "leading digit name")]
    #[test]
    fn strip_version(package: &str, expect: &str) {
        pretty_assertions::assert_eq!(base_name(package), expect);
    }

    #[test]
    fn single_upgrade() {
        let old = PackageSet::from_iter(["app-misc/foo-1.0"]);
        let new = PackageSet::from_iter(["app-misc/foo-1.1"]);

        let result = PackageDiff::between(&old, &new);
        let expect = PackageDiff {
            upgraded: vec![Upgrade {
                old: "app-misc/foo-1.0".into(),
                new: "app-misc/foo-1.1".into(),
            }],
            removed: vec![],
            added: vec![],
        };
        assert_eq!(result, expect);
    }

    #[test]
    fn mixed_changes() {
        let old = PackageSet::from_iter([
            "app-misc/foo-1.0",
            "dev-libs/gone-3",
            "sys-apps/same-1.2",
        ]);
        let new = PackageSet::from_iter([
            "app-misc/foo-2.0",
            "net-misc/fresh-0.1",
            "sys-apps/same-1.2",
        ]);

        let result = PackageDiff::between(&old, &new);
        assert_eq!(result.upgraded.len(), 1);
        assert_eq!(result.removed, vec!["dev-libs/gone-3"]);
        assert_eq!(result.added, vec!["net-misc/fresh-0.1"]);

        let expect = concat!(
            "  upgraded  app-misc/foo-1.0 -> app-misc/foo-2.0\n",
            "  removed   dev-libs/gone-3\n",
            "  new       net-misc/fresh-0.1\n",
        );
        assert_eq!(result.to_string(), expect);
    }

    #[test]
    fn same_name_in_other_category_is_not_an_upgrade() {
        let old = PackageSet::from_iter(["app-misc/foo-1.0"]);
        let new = PackageSet::from_iter(["dev-util/foo-1.1"]);

        let result = PackageDiff::between(&old, &new);
        assert!(result.upgraded.is_empty());
        assert_eq!(result.removed, vec!["app-misc/foo-1.0"]);
        assert_eq!(result.added, vec!["dev-util/foo-1.1"]);
    }

    #[test]
    fn identical_sets_report_no_changes() {
        let set = PackageSet::from_iter(["app-misc/foo-1.0"]);
        let result = PackageDiff::between(&set, &set);
        assert!(result.is_empty());
        assert_eq!(result.to_string(), "no package changes\n");
    }

    #[test]
    fn listing_keeps_only_package_directories() -> anyhow::Result<()> {
        let entries = parse_listing(indoc! {r#"
            d00755 0 0 0 a b /var/db/pkg
            d00755 0 0 0 a b /var/db/pkg/app-misc
            d00755 0 0 0 a b /var/db/pkg/app-misc/foo-1.0
            -00644 0 0 5 c /var/db/pkg/app-misc/foo-1.0/CONTENTS
            -00644 0 0 5 c /var/db/pkg/app-misc/stray-file
            d00755 0 0 0 a b /var/db/pkg/sys-apps/bar-2/deeper
        "#})?;

        let result = PackageSet::from_listing("/var/db/pkg", entries);
        assert_eq!(result, PackageSet::from_iter(["app-misc/foo-1.0"]));

        Ok(())
    }

    struct DatabaseReader {
        listings: Vec<(&'static str, &'static str)>,
        probed: RefCell<Vec<String>>,
    }

    impl ListingReader for DatabaseReader {
        fn list(&self, _commit: &str, path: &str) -> Result<Vec<PathInfo>, OstreeError> {
            self.probed.borrow_mut().push(path.into());
            let listing = self
                .listings
                .iter()
                .find(|(root, _)| *root == path)
                .map(|(_, listing)| *listing)
                .ok_or_else(|| OstreeError::EmptyOutput("ls".into()))?;
            Ok(parse_listing(listing)?)
        }

        fn resolve(&self, _refspec: &str) -> Result<String, OstreeError> {
            unreachable!()
        }

        fn snapshot(&self, _dir: &Path) -> Result<String, OstreeError> {
            unreachable!()
        }

        fn discard(&self, _commit: &str) -> Result<(), OstreeError> {
            unreachable!()
        }
    }

    #[test]
    fn empty_primary_database_falls_back() -> anyhow::Result<()> {
        let reader = DatabaseReader {
            listings: vec![
                ("/var/db/pkg", "d00755 0 0 0 a b /var/db/pkg\n"),
                ("/usr/lib/pkgdb", "d00755 0 0 0 a b /usr/lib/pkgdb/app-misc/foo-1.0\n"),
            ],
            probed: RefCell::new(vec![]),
        };
        let database = PackageDatabase {
            primary: "/var/db/pkg".into(),
            fallback: Some("/usr/lib/pkgdb".into()),
        };

        let result = installed_packages(&reader, "abc", &database)?;
        assert_eq!(result, PackageSet::from_iter(["app-misc/foo-1.0"]));
        assert_eq!(*reader.probed.borrow(), vec!["/var/db/pkg", "/usr/lib/pkgdb"]);

        Ok(())
    }

    #[test]
    fn missing_primary_database_without_fallback_fails() {
        let reader = DatabaseReader {
            listings: vec![],
            probed: RefCell::new(vec![]),
        };
        let database = PackageDatabase {
            primary: "/var/db/pkg".into(),
            fallback: None,
        };

        assert!(installed_packages(&reader, "abc", &database).is_err());
    }
}
