//! OS-specific bind-mount syntax parsers.
//!
//! The daemon's OS decides which syntax volume declarations use; the parser
//! is selected once during Prepare as part of the per-OS capability bundle.

use super::VolumesError;

/// A parsed volume declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVolume {
    /// Host path or named volume. `None` for an anonymous cache path.
    pub source: Option<String>,
    pub destination: String,
    pub mode: Option<String>,
}

impl ParsedVolume {
    /// Renders back to the daemon bind syntax.
    pub fn definition(&self) -> String {
        let mut out = String::new();
        if let Some(src) = &self.source {
            out.push_str(src);
            out.push(':');
        }
        out.push_str(&self.destination);
        if let Some(mode) = &self.mode {
            out.push(':');
            out.push_str(mode);
        }
        out
    }
}

pub trait VolumeParser: Send + Sync {
    fn parse(&self, spec: &str) -> Result<ParsedVolume, VolumesError>;

    /// True when `child` equals `parent` or lives underneath it, using the
    /// platform's path rules.
    fn contains_path(&self, parent: &str, child: &str) -> bool;
}

// ── Linux ───────────────────────────────────────────────────────

pub struct LinuxParser;

const LINUX_MODES: &[&str] = &[
    "ro", "rw", "z", "Z", "shared", "slave", "private", "rshared", "rslave", "rprivate",
    "cached", "delegated", "consistent", "nocopy",
];

impl LinuxParser {
    fn valid_mode(mode: &str) -> bool {
        !mode.is_empty() && mode.split(',').all(|m| LINUX_MODES.contains(&m))
    }

    fn valid_source(source: &str) -> bool {
        if source.starts_with('/') || source.starts_with("./") || source.starts_with("~/") {
            return true;
        }
        // Named volume.
        !source.is_empty()
            && source
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    }
}

impl VolumeParser for LinuxParser {
    fn parse(&self, spec: &str) -> Result<ParsedVolume, VolumesError> {
        let invalid = || VolumesError::InvalidVolume(spec.to_string());
        let parts: Vec<&str> = spec.split(':').collect();

        let parsed = match parts.as_slice() {
            [dst] => ParsedVolume {
                source: None,
                destination: (*dst).to_string(),
                mode: None,
            },
            [src, dst] => ParsedVolume {
                source: Some((*src).to_string()),
                destination: (*dst).to_string(),
                mode: None,
            },
            [src, dst, mode] => ParsedVolume {
                source: Some((*src).to_string()),
                destination: (*dst).to_string(),
                mode: Some((*mode).to_string()),
            },
            _ => return Err(invalid()),
        };

        if !parsed.destination.starts_with('/') {
            return Err(invalid());
        }
        if let Some(src) = &parsed.source {
            if !Self::valid_source(src) {
                return Err(invalid());
            }
        }
        if let Some(mode) = &parsed.mode {
            if !Self::valid_mode(mode) {
                return Err(invalid());
            }
        }

        Ok(parsed)
    }

    fn contains_path(&self, parent: &str, child: &str) -> bool {
        let parent = parent.trim_end_matches('/');
        child == parent || child.starts_with(&format!("{}/", parent))
    }
}

// ── Windows ─────────────────────────────────────────────────────

pub struct WindowsParser;

impl WindowsParser {
    /// Splits on `:` but keeps drive letters (`c:\...`) glued to their path.
    fn tokens(spec: &str) -> Vec<String> {
        let raw: Vec<&str> = spec.split(':').collect();
        let mut out: Vec<String> = Vec::new();
        let mut i = 0;
        while i < raw.len() {
            let piece = raw[i];
            let is_drive = piece.len() == 1
                && piece.chars().all(|c| c.is_ascii_alphabetic())
                && raw
                    .get(i + 1)
                    .is_some_and(|next| next.starts_with('\\') || next.starts_with('/'));
            if is_drive {
                out.push(format!("{}:{}", piece, raw[i + 1]));
                i += 2;
            } else {
                out.push(piece.to_string());
                i += 1;
            }
        }
        out
    }

    fn is_windows_path(path: &str) -> bool {
        let mut chars = path.chars();
        matches!(
            (chars.next(), chars.next(), chars.next()),
            (Some(drive), Some(':'), Some('\\' | '/')) if drive.is_ascii_alphabetic()
        ) || path.starts_with("\\\\")
    }
}

impl VolumeParser for WindowsParser {
    fn parse(&self, spec: &str) -> Result<ParsedVolume, VolumesError> {
        let invalid = || VolumesError::InvalidVolume(spec.to_string());
        let tokens = Self::tokens(spec);

        let parsed = match tokens.as_slice() {
            [dst] => ParsedVolume {
                source: None,
                destination: dst.clone(),
                mode: None,
            },
            [src, dst] => ParsedVolume {
                source: Some(src.clone()),
                destination: dst.clone(),
                mode: None,
            },
            [src, dst, mode] if matches!(mode.as_str(), "ro" | "rw") => ParsedVolume {
                source: Some(src.clone()),
                destination: dst.clone(),
                mode: Some(mode.clone()),
            },
            _ => return Err(invalid()),
        };

        if !Self::is_windows_path(&parsed.destination) {
            return Err(invalid());
        }

        Ok(parsed)
    }

    fn contains_path(&self, parent: &str, child: &str) -> bool {
        let norm = |p: &str| p.replace('/', "\\").to_ascii_lowercase();
        let parent = norm(parent);
        let parent = parent.trim_end_matches('\\');
        let child = norm(child);
        child == parent || child.starts_with(&format!("{}\\", parent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Linux ───────────────────────────────────────────────────

    #[test]
    fn test_linux_destination_only() {
        let parsed = LinuxParser.parse("/cache").unwrap();
        assert_eq!(parsed.source, None);
        assert_eq!(parsed.destination, "/cache");
    }

    #[test]
    fn test_linux_bind_with_mode() {
        let parsed = LinuxParser.parse("/host/dir:/container/dir:ro").unwrap();
        assert_eq!(parsed.source.as_deref(), Some("/host/dir"));
        assert_eq!(parsed.destination, "/container/dir");
        assert_eq!(parsed.mode.as_deref(), Some("ro"));
    }

    #[test]
    fn test_linux_named_volume_source() {
        let parsed = LinuxParser.parse("my-cache_1:/cache").unwrap();
        assert_eq!(parsed.source.as_deref(), Some("my-cache_1"));
    }

    #[test]
    fn test_linux_rejects_relative_destination() {
        assert!(LinuxParser.parse("cache").is_err());
        assert!(LinuxParser.parse("/src:relative/dst").is_err());
    }

    #[test]
    fn test_linux_rejects_bad_mode() {
        assert!(LinuxParser.parse("/a:/b:rainbow").is_err());
        assert!(LinuxParser.parse("/a:/b:ro,rainbow").is_err());
        assert!(LinuxParser.parse("/a:/b:ro,z").is_ok());
    }

    #[test]
    fn test_linux_rejects_too_many_parts() {
        assert!(LinuxParser.parse("/a:/b:ro:extra").is_err());
    }

    #[test]
    fn test_linux_definition_round_trip() {
        for spec in ["/cache", "/src:/dst", "/src:/dst:ro"] {
            assert_eq!(LinuxParser.parse(spec).unwrap().definition(), spec);
        }
    }

    #[test]
    fn test_linux_contains_path() {
        let p = LinuxParser;
        assert!(p.contains_path("/builds", "/builds/group/project"));
        assert!(p.contains_path("/builds", "/builds"));
        assert!(!p.contains_path("/builds", "/builds-other"));
        assert!(!p.contains_path("/builds/deep", "/builds"));
    }

    // ── Windows ─────────────────────────────────────────────────

    #[test]
    fn test_windows_bind_with_drive_letters() {
        let parsed = WindowsParser.parse(r"c:\host:d:\container").unwrap();
        assert_eq!(parsed.source.as_deref(), Some(r"c:\host"));
        assert_eq!(parsed.destination, r"d:\container");
    }

    #[test]
    fn test_windows_destination_only() {
        let parsed = WindowsParser.parse(r"c:\cache").unwrap();
        assert_eq!(parsed.source, None);
        assert_eq!(parsed.destination, r"c:\cache");
    }

    #[test]
    fn test_windows_mode() {
        let parsed = WindowsParser.parse(r"c:\a:c:\b:ro").unwrap();
        assert_eq!(parsed.mode.as_deref(), Some("ro"));
        assert!(WindowsParser.parse(r"c:\a:c:\b:rainbow").is_err());
    }

    #[test]
    fn test_windows_named_volume_source() {
        let parsed = WindowsParser.parse(r"cache-1:c:\cache").unwrap();
        assert_eq!(parsed.source.as_deref(), Some("cache-1"));
    }

    #[test]
    fn test_windows_rejects_non_windows_destination() {
        assert!(WindowsParser.parse("/unix/path").is_err());
    }

    #[test]
    fn test_windows_contains_path_case_insensitive() {
        let p = WindowsParser;
        assert!(p.contains_path(r"C:\builds", r"c:\Builds\project"));
        assert!(!p.contains_path(r"C:\builds", r"c:\cache"));
    }
}
