//! Free drive-letter discovery for exposing the shadow volume.

use sp_error::{Result, SpError};
use std::collections::BTreeSet;

/// First letter in `a..=z` that is not in `in_use` (case-insensitive).
#[must_use]
pub fn free_drive_letter<I>(in_use: I) -> Option<char>
where
    I: IntoIterator<Item = char>,
{
    let taken: BTreeSet<char> = in_use
        .into_iter()
        .map(|letter| letter.to_ascii_lowercase())
        .collect();
    ('a'..='z').find(|letter| !taken.contains(letter))
}

/// Drive letters currently mapped on this machine.
///
/// A root that exists, or that exists but cannot be queried (an empty card
/// reader reports "device not ready"), counts as in use.
#[cfg(windows)]
#[must_use]
pub fn in_use_drive_letters() -> BTreeSet<char> {
    ('a'..='z')
        .filter(|letter| {
            let root = format!("{letter}:\\");
            !matches!(
                std::fs::metadata(&root),
                Err(ref err) if err.kind() == std::io::ErrorKind::NotFound
            )
        })
        .collect()
}

/// Drive letters do not exist outside Windows; every letter is free.
#[cfg(not(windows))]
#[must_use]
pub fn in_use_drive_letters() -> BTreeSet<char> {
    BTreeSet::new()
}

/// Pick a free drive letter for the next shadow mapping.
pub fn pick_free_drive() -> Result<char> {
    free_drive_letter(in_use_drive_letters()).ok_or(SpError::NoFreeDriveLetter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_gap() {
        assert_eq!(free_drive_letter(std::iter::empty()), Some('a'));
        assert_eq!(free_drive_letter(['a', 'b', 'c', 'e']), Some('d'));
        assert_eq!(free_drive_letter(['A', 'B', 'C']), Some('d'));
    }

    #[test]
    fn z_is_eligible() {
        let all_but_z: Vec<char> = ('a'..'z').collect();
        assert_eq!(free_drive_letter(all_but_z), Some('z'));
    }

    #[test]
    fn none_when_every_letter_is_taken() {
        assert_eq!(free_drive_letter('a'..='z'), None);
    }

    #[cfg(not(windows))]
    #[test]
    fn non_windows_always_has_a_letter() {
        assert_eq!(pick_free_drive().unwrap(), 'a');
    }
}
