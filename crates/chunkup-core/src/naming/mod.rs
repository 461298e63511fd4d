//! Destination filename normalization.
//!
//! A user-supplied name such as `../My Report (final).PDF` becomes
//! `My_Report_final_1718000000_aB3dE5fG.pdf`: directories stripped, the stem
//! restricted to `[A-Za-z0-9_-]`, a uniqueness suffix appended and the
//! extension lowercased. The name is computed once per session and reused for
//! every chunk and for the final record.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Maximum stem length kept from the original name.
pub const MAX_STEM_LEN: usize = 180;

/// Length of the random part of the uniqueness suffix.
pub const RANDOM_TOKEN_LEN: usize = 8;

const FILLER: char = '_';

/// Normalize `original` using the current time and a fresh random token.
#[must_use]
pub fn normalize_filename(original: &str) -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_TOKEN_LEN)
        .map(char::from)
        .collect();

    normalize_filename_with(original, chrono::Utc::now().timestamp(), &token)
}

/// Normalize `original` with an explicit timestamp and token.
#[must_use]
pub fn normalize_filename_with(original: &str, unix_time: i64, token: &str) -> String {
    let (stem, extension) = split_name(base_name(original));
    let stem = sanitize_stem(stem);
    let extension = sanitize_extension(extension);

    let mut name = String::with_capacity(stem.len() + extension.len() + 32);
    if !stem.is_empty() {
        name.push_str(&stem);
        name.push(FILLER);
    }
    name.push_str(&format!("{unix_time}_{token}"));
    if !extension.is_empty() {
        name.push('.');
        name.push_str(&extension);
    }
    name
}

/// Last path component, treating both `/` and `\` as separators.
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Split at the last dot. A leading dot belongs to the stem.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx + 1..]),
        _ => (name, ""),
    }
}

fn sanitize_stem(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            c
        } else {
            FILLER
        };
        if c == FILLER && out.ends_with(FILLER) {
            continue;
        }
        out.push(c);
    }

    let capped: String = out.trim_matches(FILLER).chars().take(MAX_STEM_LEN).collect();
    capped.trim_end_matches(FILLER).to_string()
}

fn sanitize_extension(extension: &str) -> String {
    extension
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_name() {
        let name = normalize_filename_with("My Report (final).PDF", 1_700_000_000, "abcdEFGH");
        assert_eq!(name, "My_Report_final_1700000000_abcdEFGH.pdf");
    }

    #[test]
    fn test_directories_stripped() {
        assert_eq!(
            normalize_filename_with("../../etc/passwd", 1, "t"),
            "passwd_1_t"
        );
        assert_eq!(
            normalize_filename_with("C:\\Users\\me\\photo.JPG", 1, "t"),
            "photo_1_t.jpg"
        );
    }

    #[test]
    fn test_fillers_collapsed_and_trimmed() {
        assert_eq!(
            normalize_filename_with("__a   b!!c__.txt", 5, "x"),
            "a_b_c_5_x.txt"
        );
    }

    #[test]
    fn test_only_last_extension_is_kept() {
        assert_eq!(
            normalize_filename_with("archive.tar.GZ", 5, "x"),
            "archive_tar_5_x.gz"
        );
    }

    #[test]
    fn test_no_extension() {
        assert_eq!(normalize_filename_with("Makefile", 5, "x"), "Makefile_5_x");
        assert_eq!(normalize_filename_with(".env", 5, "x"), "env_5_x");
    }

    #[test]
    fn test_stem_capped() {
        let long = format!("{}.bin", "a".repeat(500));
        let name = normalize_filename_with(&long, 5, "x");
        assert_eq!(name, format!("{}_5_x.bin", "a".repeat(MAX_STEM_LEN)));
    }

    #[test]
    fn test_cap_does_not_leave_trailing_filler() {
        let long = format!("{} tail.txt", "b".repeat(MAX_STEM_LEN - 1));
        let name = normalize_filename_with(&long, 5, "x");
        assert_eq!(name, format!("{}_5_x.txt", "b".repeat(MAX_STEM_LEN - 1)));
        assert!(!name.contains("__"));
    }

    #[test]
    fn test_unsafe_only_stem_becomes_empty() {
        assert_eq!(normalize_filename_with("日本語.txt", 5, "x"), "5_x.txt");
    }

    #[test]
    fn test_random_suffix_differs_within_same_second() {
        let a = normalize_filename("My Report (final).PDF");
        let b = normalize_filename("My Report (final).PDF");

        assert_ne!(a, b);
        for name in [&a, &b] {
            assert!(name.starts_with("My_Report_final_"));
            assert!(name.ends_with(".pdf"));
            assert!(name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')));
        }
    }
}
