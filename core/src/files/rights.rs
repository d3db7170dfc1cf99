//! Conversion between numeric permission bits and `user/group/other` rights.

use serde::{Deserialize, Serialize};

/// Mask of the nine `rwx` permission bits.
pub const PERMISSION_MASK: u32 = 0o777;

/// Rights of one entry, each category rendered as a subset of `rwx` in that
/// order. An empty string means no bits are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rights {
    pub user: String,
    pub group: String,
    pub other: String,
}

impl Rights {
    /// Build rights from a mode. Only the low nine bits are read.
    pub fn from_mode(mode: u32) -> Self {
        Self {
            user: triad((mode >> 6) & 0o7),
            group: triad((mode >> 3) & 0o7),
            other: triad(mode & 0o7),
        }
    }

    /// Inverse of [`Rights::from_mode`]. Characters other than `r`, `w`
    /// and `x` are ignored.
    pub fn to_mode(&self) -> u32 {
        (triad_bits(&self.user) << 6) | (triad_bits(&self.group) << 3) | triad_bits(&self.other)
    }
}

fn triad(bits: u32) -> String {
    let mut s = String::with_capacity(3);
    if bits & 0o4 != 0 {
        s.push('r');
    }
    if bits & 0o2 != 0 {
        s.push('w');
    }
    if bits & 0o1 != 0 {
        s.push('x');
    }
    s
}

fn triad_bits(s: &str) -> u32 {
    s.chars().fold(0, |acc, c| match c {
        'r' => acc | 0o4,
        'w' => acc | 0o2,
        'x' => acc | 0o1,
        _ => acc,
    })
}

/// Render the nine permission bits in `ls` form, e.g. `rwxr-x---`.
pub fn format_permissions(mode: u32) -> String {
    let flags = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    flags
        .iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect()
}
