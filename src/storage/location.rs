//! Parses the `fs:`/`s3:` location URI grammar of spec.md §6.
//!
//! This is the "trivial glue" kind of parsing the spec allows internally —
//! every backend constructor needs it, and it is not the CLI/config layer
//! the spec excludes.

use crate::error::VaultError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Fs(String),
    S3 { bucket: String, prefix: String },
}

/// Parses a location URI. A missing scheme defaults to `fs:` (spec.md §6).
pub fn parse_location(uri: &str) -> Result<Location, VaultError> {
    let normalized = uri.replace('\\', "/");
    if let Some(rest) = normalized.strip_prefix("fs:") {
        return Ok(Location::Fs(rest.to_string()));
    }
    if let Some(rest) = normalized.strip_prefix("s3:") {
        return Ok(parse_s3_remainder(rest));
    }
    log::warn!(
        "location {:?} has no scheme, defaulting to fs:",
        normalized
    );
    Ok(Location::Fs(normalized))
}

fn parse_s3_remainder(rest: &str) -> Location {
    match rest.split_once('/') {
        Some((bucket, prefix)) => Location::S3 {
            bucket: bucket.to_string(),
            prefix: prefix.trim_end_matches('/').to_string(),
        },
        None => Location::S3 {
            bucket: rest.to_string(),
            prefix: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fs_scheme() {
        assert_eq!(
            parse_location("fs:/var/db").unwrap(),
            Location::Fs("/var/db".to_string())
        );
    }

    #[test]
    fn parses_s3_scheme_with_prefix() {
        assert_eq!(
            parse_location("s3:bucket/prefix/path").unwrap(),
            Location::S3 {
                bucket: "bucket".to_string(),
                prefix: "prefix/path".to_string()
            }
        );
    }

    #[test]
    fn parses_s3_scheme_without_prefix() {
        assert_eq!(
            parse_location("s3:bucket").unwrap(),
            Location::S3 {
                bucket: "bucket".to_string(),
                prefix: String::new()
            }
        );
    }

    #[test]
    fn missing_scheme_defaults_to_fs() {
        assert_eq!(
            parse_location("/var/db").unwrap(),
            Location::Fs("/var/db".to_string())
        );
    }
}
