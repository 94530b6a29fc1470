//! Ordered access levels attached to users and SSH keys.

use std::fmt;

/// An ordered capability level, from no access at all up to ownership of a repository.
///
/// The declaration order is the capability order, so `PartialOrd`/`Ord` compare levels directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessPermission {
    /// No access, the floor of the ladder.
    None,
    /// Explicitly excluded.
    Exclude,
    /// May see the repository, but not fetch from it.
    View,
    /// May fetch and clone.
    Clone,
    /// May push.
    Push,
    /// May push and create references.
    Create,
    /// May push, create and delete references.
    Delete,
    /// May rewrite history.
    Rewind,
    /// Owns the repository.
    Owner,
}

impl AccessPermission {
    /// All levels in ascending order.
    pub const ALL: [AccessPermission; 9] = [
        AccessPermission::None,
        AccessPermission::Exclude,
        AccessPermission::View,
        AccessPermission::Clone,
        AccessPermission::Push,
        AccessPermission::Create,
        AccessPermission::Delete,
        AccessPermission::Rewind,
        AccessPermission::Owner,
    ];

    /// The only levels that may be granted to an SSH key.
    pub const SSH_LEVELS: [AccessPermission; 3] =
        [AccessPermission::View, AccessPermission::Clone, AccessPermission::Push];

    /// The short code used in key files and on the command line, like `RW` for [`Push`](Self::Push).
    pub fn code(self) -> &'static str {
        match self {
            AccessPermission::None => "N",
            AccessPermission::Exclude => "X",
            AccessPermission::View => "V",
            AccessPermission::Clone => "R",
            AccessPermission::Push => "RW",
            AccessPermission::Create => "RWC",
            AccessPermission::Delete => "RWD",
            AccessPermission::Rewind | AccessPermission::Owner => "RW+",
        }
    }

    /// A lower-case human readable name.
    pub fn name(self) -> &'static str {
        match self {
            AccessPermission::None => "none",
            AccessPermission::Exclude => "exclude",
            AccessPermission::View => "view",
            AccessPermission::Clone => "clone",
            AccessPermission::Push => "push",
            AccessPermission::Create => "create",
            AccessPermission::Delete => "delete",
            AccessPermission::Rewind => "rewind",
            AccessPermission::Owner => "owner",
        }
    }

    /// Parse `input` as either a code or a name, ignoring case.
    ///
    /// Unknown input yields [`None`](Self::None), which callers treat as "no change requested".
    /// As `RW+` is shared by [`Rewind`](Self::Rewind) and [`Owner`](Self::Owner), the code parses as the former.
    pub fn from_code(input: &str) -> AccessPermission {
        let input = input.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.code().eq_ignore_ascii_case(input) || level.name().eq_ignore_ascii_case(input))
            .unwrap_or(AccessPermission::None)
    }

    /// Return `true` if this level is at least `other`.
    pub fn at_least(self, other: AccessPermission) -> bool {
        self >= other
    }

    /// Return `true` if this level is at most `other`.
    pub fn at_most(self, other: AccessPermission) -> bool {
        self <= other
    }

    /// Return `true` if this level is strictly above `other`.
    pub fn exceeds(self, other: AccessPermission) -> bool {
        self > other
    }

    /// Return `true` if this level may be assigned to an SSH key.
    pub fn is_ssh_level(self) -> bool {
        Self::SSH_LEVELS.contains(&self)
    }
}

impl fmt::Display for AccessPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
