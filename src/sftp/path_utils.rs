//! Path utilities for remote SFTP paths and local download targets
//!
//! Remote SFTP paths always use `/` (per SFTP protocol), local paths use the
//! platform-native separator.

use std::path::{Path, PathBuf};

use super::types::constants::{MAX_FILE_NAME_LEN, PARTIAL_SUFFIX};

/// Characters that are invalid in Windows file names
const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Join remote SFTP path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Last component of a remote path.
pub fn remote_basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Path of the partial artifact for a final local path (`name.ext.part`).
pub fn partial_path(local_path: &Path) -> PathBuf {
    let mut os = local_path.as_os_str().to_owned();
    os.push(PARTIAL_SUFFIX);
    PathBuf::from(os)
}

/// Make a remote basename safe to use as a local file name.
///
/// Invalid characters become `_`, control, format and private-use characters
/// are dropped, leading and trailing dots/spaces are trimmed, empty results become `file`, and the
/// result is capped at [`MAX_FILE_NAME_LEN`] characters keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .filter(|c| !is_other_char(*c))
        .map(|c| if INVALID_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    let sanitized = if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    };

    if sanitized.chars().count() <= MAX_FILE_NAME_LEN {
        return sanitized;
    }

    let (stem, ext) = split_extension(&sanitized);
    let ext_len = ext.chars().count();
    if ext_len >= MAX_FILE_NAME_LEN {
        return sanitized.chars().take(MAX_FILE_NAME_LEN).collect();
    }
    let stem: String = stem.chars().take(MAX_FILE_NAME_LEN - ext_len).collect();
    format!("{}{}", stem, ext)
}

/// Unicode general categories Cc, Cf and Co. Unassigned code points are kept.
fn is_other_char(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '\u{00AD}'
                | '\u{0600}'..='\u{0605}'
                | '\u{061C}'
                | '\u{06DD}'
                | '\u{070F}'
                | '\u{0890}'..='\u{0891}'
                | '\u{08E2}'
                | '\u{180E}'
                | '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{2064}'
                | '\u{2066}'..='\u{206F}'
                | '\u{E000}'..='\u{F8FF}'
                | '\u{FEFF}'
                | '\u{FFF9}'..='\u{FFFB}'
                | '\u{110BD}'
                | '\u{110CD}'
                | '\u{13430}'..='\u{1343F}'
                | '\u{1BCA0}'..='\u{1BCA3}'
                | '\u{1D173}'..='\u{1D17A}'
                | '\u{E0001}'
                | '\u{E0020}'..='\u{E007F}'
                | '\u{F0000}'..='\u{FFFFD}'
                | '\u{100000}'..='\u{10FFFD}'
        )
}

/// Split `name.ext` into (`name`, `.ext`). Dotfiles have no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(idx) => name.split_at(idx),
    }
}

/// `name_<n>.ext` for collision resolution
pub fn numbered_name(name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(name);
    format!("{}_{}{}", stem, n, ext)
}
