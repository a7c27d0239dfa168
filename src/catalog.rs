// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path catalog parsing.
//!
//! OSTree can list the contents of a commit recursively, annotating every
//! entry with its mode, ownership, size, and content checksum. This module
//! turns that listing into [`PathInfo`] records, and collects them into a
//! [`Catalog`] keyed by paths relative to the listed tree root.
//!
//! # Listing Layout
//!
//! Each line holds whitespace separated fields in a fixed order:
//!
//! ```text
//! -00644 0 0   1234 <checksum> /usr/etc/hosts
//! d00755 0 0      0 <dirtree> <dirmeta> /usr/etc
//! l00777 0 0      0 <checksum> /usr/etc/localtime -> ../usr/share/zoneinfo/UTC
//! ```
//!
//! Directories carry two checksums. Only the second one is kept.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

const SETUID: u32 = 0o4000;
const SETGID: u32 = 0o2000;
const STICKY: u32 = 0o1000;
const PERMISSIONS: u32 = 0o777;

/// Type of a listed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

impl FileType {
    /// Single character tag used in listing output.
    pub fn tag(&self) -> char {
        match self {
            Self::Regular => '-',
            Self::Directory => 'd',
            Self::Symlink => 'l',
        }
    }
}

impl TryFrom<char> for FileType {
    type Error = ParseError;

    fn try_from(tag: char) -> Result<Self> {
        match tag {
            '-' => Ok(Self::Regular),
            'd' => Ok(Self::Directory),
            'l' => Ok(Self::Symlink),
            _ => Err(ParseError::UnknownFileType(tag)),
        }
    }
}

/// Parsed mode string.
///
/// # Invariant
///
/// - `permissions` never holds more than the low nine bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode {
    pub file_type: FileType,
    pub setuid: bool,
    pub setgid: bool,
    pub sticky: bool,
    pub permissions: u32,
}

impl Mode {
    /// Full permission word, special bits included.
    pub fn bits(&self) -> u32 {
        let mut bits = self.permissions;
        if self.setuid {
            bits |= SETUID;
        }
        if self.setgid {
            bits |= SETGID;
        }
        if self.sticky {
            bits |= STICKY;
        }

        bits
    }
}

impl FromStr for Mode {
    type Err = ParseError;

    fn from_str(mode: &str) -> Result<Self> {
        if mode.chars().count() < 4 {
            return Err(ParseError::ModeTooShort(mode.into()));
        }

        let mut chars = mode.chars();
        // INVARIANT: Length check above guarantees a first character.
        let tag = chars.next().unwrap_or_default();
        let file_type = FileType::try_from(tag)?;
        let word = chars.as_str();
        if !word.bytes().all(|byte| matches!(byte, b'0'..=b'7')) {
            return Err(ParseError::InvalidPermissions(mode.into()));
        }
        let bits = u32::from_str_radix(word, 8)
            .map_err(|_| ParseError::InvalidPermissions(mode.into()))?;

        Ok(Self {
            file_type,
            setuid: bits & SETUID != 0,
            setgid: bits & SETGID != 0,
            sticky: bits & STICKY != 0,
            permissions: bits & PERMISSIONS,
        })
    }
}

impl Display for Mode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}{:05o}", self.file_type.tag(), self.bits())
    }
}

/// One entry of a recursive listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathInfo {
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub checksum: String,
    pub path: String,
    pub link: Option<String>,
}

impl PathInfo {
    /// Check if two entries describe the same file content.
    ///
    /// Compares checksum, mode, ownership, and symlink target. Location and
    /// size are ignored, because entries from different trees live under
    /// different roots, and size follows from the checksum.
    pub fn is_equivalent(&self, other: &PathInfo) -> bool {
        self.checksum == other.checksum
            && self.mode == other.mode
            && self.uid == other.uid
            && self.gid == other.gid
            && self.link == other.link
    }

    pub fn is_dir(&self) -> bool {
        self.mode.file_type == FileType::Directory
    }
}

impl FromStr for PathInfo {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self> {
        let fields = line.split_whitespace().collect::<Vec<_>>();
        if fields.len() < 6 {
            return Err(ParseError::TooFewFields(line.into()));
        }

        let mode: Mode = fields[0].parse()?;
        let uid = parse_number(fields[1], "uid", line)?;
        let gid = parse_number(fields[2], "gid", line)?;
        let size = parse_number(fields[3], "size", line)?;

        // INVARIANT: Directories list object checksum before content checksum.
        let (checksum, path, rest) = if mode.file_type == FileType::Directory {
            if fields.len() < 7 {
                return Err(ParseError::TooFewFields(line.into()));
            }
            (fields[5], fields[6], &fields[7..])
        } else {
            (fields[4], fields[5], &fields[6..])
        };

        let link = match (mode.file_type, rest) {
            (FileType::Symlink, [arrow, target @ ..]) if !target.is_empty() => {
                if *arrow != "->" {
                    return Err(ParseError::MissingLinkMarker(line.into()));
                }
                Some(target.join(" "))
            }
            (FileType::Symlink, [_]) => return Err(ParseError::MissingLinkMarker(line.into())),
            _ => None,
        };

        Ok(Self {
            mode,
            uid,
            gid,
            size,
            checksum: checksum.into(),
            path: path.into(),
            link,
        })
    }
}

fn parse_number<T: FromStr>(field: &str, name: &'static str, line: &str) -> Result<T> {
    field.parse().map_err(|_| ParseError::InvalidNumber {
        field: name,
        line: line.into(),
    })
}

/// Parse entire listing output.
///
/// Blank lines are skipped. Any malformed line fails the whole listing.
///
/// # Errors
///
/// - Return [`ParseError`] for the first malformed line.
pub fn parse_listing(listing: &str) -> Result<Vec<PathInfo>> {
    listing
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Listing entries keyed by path relative to a tree root.
///
/// # Invariant
///
/// - Keys never carry a leading separator.
/// - The tree root itself is never a key.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<String, PathInfo>,
}

impl Catalog {
    /// Re-key listing entries relative to `root`.
    ///
    /// Entries outside of `root` are dropped.
    pub fn rooted(root: &str, entries: impl IntoIterator<Item = PathInfo>) -> Self {
        let root = root.trim_end_matches('/');
        let mut catalog = BTreeMap::new();

        for entry in entries {
            let Some(relative) = relative_to(root, &entry.path) else {
                continue;
            };
            catalog.insert(relative.to_string(), entry);
        }

        Self { entries: catalog }
    }

    pub fn get(&self, key: &str) -> Option<&PathInfo> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PathInfo)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn relative_to<'a>(root: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(root)?;
    if !root.is_empty() && !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }

    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        return None;
    }

    Some(rest)
}

/// Listing parse error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Line does not carry enough fields.
    #[error("listing line has too few fields: {0:?}")]
    TooFewFields(String),

    /// Mode string cannot hold a type tag and permission word.
    #[error("mode string too short: {0:?}")]
    ModeTooShort(String),

    /// Mode string permission word is not octal.
    #[error("mode string has non-octal permissions: {0:?}")]
    InvalidPermissions(String),

    /// Mode string type tag is not recognized.
    #[error("unknown file type tag {0:?}")]
    UnknownFileType(char),

    /// Numeric field does not parse.
    #[error("invalid {field} in listing line: {line:?}")]
    InvalidNumber { field: &'static str, line: String },

    /// Symlink target is not introduced by an arrow.
    #[error("symlink entry lacks '->' marker: {0:?}")]
    MissingLinkMarker(String),
}

/// Friendly result alias :3
pub type Result<T, E = ParseError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("-00644", FileType::Regular, false, false, false, 0o644; "plain file")]
    #[test_case("d04755", FileType::Directory, true, false, false, 0o755; "setuid directory")]
    #[test_case("-02755", FileType::Regular, false, true, false, 0o755; "setgid file")]
    #[test_case("d01777", FileType::Directory, false, false, true, 0o777; "sticky directory")]
    #[test_case("l00777", FileType::Symlink, false, false, false, 0o777; "symlink")]
    #[test_case("-0600", FileType::Regular, false, false, false, 0o600; "short word")]
    #[test]
    fn parse_mode_string(
        input: &str,
        file_type: FileType,
        setuid: bool,
        setgid: bool,
        sticky: bool,
        permissions: u32,
    ) {
        let result: Mode = input.parse().unwrap();
        let expect = Mode {
            file_type,
            setuid,
            setgid,
            sticky,
            permissions,
        };
        pretty_assertions::assert_eq!(result, expect);
    }

    #[test_case("-06", ParseError::ModeTooShort("-06".into()); "too short")]
    #[test_case("-00689", ParseError::InvalidPermissions("-00689".into()); "not octal")]
    #[test_case("-+644", ParseError::InvalidPermissions("-+644".into()); "sign prefix")]
    #[test_case("--0644", ParseError::InvalidPermissions("--0644".into()); "negative word")]
    #[test_case("c00644", ParseError::UnknownFileType('c'); "unknown tag")]
    #[test]
    fn reject_bad_mode_string(input: &str, expect: ParseError) {
        let result = input.parse::<Mode>().unwrap_err();
        pretty_assertions::assert_eq!(result, expect);
    }

    #[test]
    fn mode_display_matches_listing_form() {
        let mode: Mode = "d04755".parse().unwrap();
        assert_eq!(mode.to_string(), "d04755");
        assert_eq!(mode.bits(), 0o4755);
    }

    #[test]
    fn parse_mixed_listing() -> anyhow::Result<()> {
        let listing = indoc! {r#"
            d00755 0 0      0 aaaa bbbb /usr/etc
            -00644 0 0     12 cccc /usr/etc/hosts
            l00777 0 0      0 dddd /usr/etc/localtime -> ../usr/share/zoneinfo/UTC

            -00600 0 42    33 eeee /usr/etc/shadow
        "#};
        let result = parse_listing(listing)?;

        assert_eq!(result.len(), 4);
        assert_eq!(result[0].checksum, "bbbb");
        assert_eq!(result[0].path, "/usr/etc");
        assert!(result[0].is_dir());
        assert_eq!(result[1].size, 12);
        assert_eq!(result[1].link, None);
        assert_eq!(
            result[2].link.as_deref(),
            Some("../usr/share/zoneinfo/UTC")
        );
        assert_eq!(result[3].gid, 42);

        Ok(())
    }

    #[test]
    fn malformed_line_fails_whole_listing() {
        let listing = indoc! {r#"
            -00644 0 0 12 cccc /usr/etc/hosts
            -00644 0 0 12 /usr/etc/broken
        "#};
        let result = parse_listing(listing);
        assert!(matches!(result, Err(ParseError::TooFewFields(_))));
    }

    #[test]
    fn directory_needs_both_checksums() {
        let result = "d00755 0 0 0 aaaa /usr/etc".parse::<PathInfo>();
        assert!(matches!(result, Err(ParseError::TooFewFields(_))));
    }

    #[test]
    fn symlink_without_arrow_is_rejected() {
        let result = "l00777 0 0 0 dddd /usr/etc/localtime => UTC".parse::<PathInfo>();
        assert!(matches!(result, Err(ParseError::MissingLinkMarker(_))));
    }

    #[test]
    fn equivalence_ignores_location_and_size() -> anyhow::Result<()> {
        let old: PathInfo = "-00644 0 0 12 cccc /usr/etc/hosts".parse()?;
        let user: PathInfo = "-00644 0 0 99 cccc /hosts".parse()?;
        let chmod: PathInfo = "-00600 0 0 12 cccc /hosts".parse()?;
        let chown: PathInfo = "-00644 1000 0 12 cccc /hosts".parse()?;

        assert!(old.is_equivalent(&user));
        assert!(!old.is_equivalent(&chmod));
        assert!(!old.is_equivalent(&chown));

        Ok(())
    }

    #[test]
    fn rooted_catalog_drops_root_entry() -> anyhow::Result<()> {
        let entries = parse_listing(indoc! {r#"
            d00755 0 0 0 aaaa bbbb /usr/etc
            -00644 0 0 1 cccc /usr/etc/hosts
            d00755 0 0 0 aaaa bbbb /usr/etc/ssh
            -00600 0 0 1 dddd /usr/etc/ssh/sshd_config
            -00644 0 0 1 eeee /usr/etcetera
        "#})?;
        let catalog = Catalog::rooted("/usr/etc/", entries);

        let result = catalog.keys().cloned().collect::<Vec<_>>();
        let expect = vec!["hosts", "ssh", "ssh/sshd_config"];
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn rooted_catalog_at_filesystem_root() -> anyhow::Result<()> {
        let entries = parse_listing(indoc! {r#"
            d00755 0 0 0 aaaa bbbb /
            -00644 0 0 1 cccc /hosts
        "#})?;
        let catalog = Catalog::rooted("/", entries);

        let result = catalog.keys().cloned().collect::<Vec<_>>();
        assert_eq!(result, vec!["hosts"]);

        Ok(())
    }
}
