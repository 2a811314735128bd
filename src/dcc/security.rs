//! DCC offer hygiene.
//!
//! Bots name the file being sent, so the name must never be trusted as a
//! path: directory components, control characters, and leading dots are
//! stripped before the destination is formed. Offers pointing at private or
//! loopback addresses can optionally be rejected.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Check if an address is private/loopback (rejectable via config).
pub fn is_private_ip(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
}

/// Sanitize a filename received via DCC to prevent path traversal.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    // Strip path components for both Unix and Windows-style paths; backslash
    // is a valid filename char on Unix so it must be handled manually.
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);

    if name.is_empty() {
        return None;
    }

    let sanitized: String = name
        .chars()
        .filter(|c| !c.is_control() && *c != '/' && *c != '\\' && *c != ':')
        .collect();

    // Leading dots would hide the file or re-introduce traversal.
    let sanitized = sanitized.trim_start_matches('.');

    if sanitized.is_empty() {
        return None;
    }

    let truncated = if sanitized.len() > 255 {
        &sanitized[..255]
    } else {
        sanitized
    };

    Some(truncated.to_string())
}

/// Resolve the destination path for an offered file, keeping it inside the
/// download directory. Unlike a chat client the engine never renames on
/// collision: an existing file is the trigger for resume negotiation.
pub fn destination_path(download_dir: &Path, filename: &str) -> Option<PathBuf> {
    let sanitized = sanitize_filename(filename)?;
    let path = download_dir.join(&sanitized);
    if !path.starts_with(download_dir) {
        return None;
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("hello.txt"), Some("hello.txt".into()));
        assert_eq!(
            sanitize_filename("../../../etc/passwd"),
            Some("passwd".into())
        );
        assert_eq!(
            sanitize_filename("..\\..\\windows\\system32"),
            Some("system32".into())
        );
        assert_eq!(sanitize_filename(".hidden"), Some("hidden".into()));
        assert_eq!(sanitize_filename("..."), None);
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(
            sanitize_filename("normal file.pdf"),
            Some("normal file.pdf".into())
        );
    }

    #[test]
    fn test_is_private_ip() {
        assert!(is_private_ip("127.0.0.1".parse().unwrap()));
        assert!(is_private_ip("192.168.1.1".parse().unwrap()));
        assert!(is_private_ip("10.0.0.1".parse().unwrap()));
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_destination_path_stays_inside() {
        let dir = Path::new("/tmp/downloads");
        assert_eq!(
            destination_path(dir, "a.txt"),
            Some(PathBuf::from("/tmp/downloads/a.txt"))
        );
        assert_eq!(
            destination_path(dir, "../escape.txt"),
            Some(PathBuf::from("/tmp/downloads/escape.txt"))
        );
        assert_eq!(destination_path(dir, "..."), None);
    }
}
