use std::path::{Component, Path};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("remote path contains unsupported component")]
    UnsupportedComponent,
}

/// Canonical form of a remote path: leading `/`, no empty or `.` segments,
/// no trailing separator except for the root itself.
pub fn normalize(remote_path: &str) -> Result<String, PathError> {
    if remote_path.trim().is_empty() {
        return Err(PathError::Empty);
    }

    // Remote paths are POSIX-like ("/Docs/A.txt") regardless of the host.
    let mut out = String::new();
    for component in Path::new(remote_path).components() {
        match component {
            Component::Normal(part) => {
                out.push('/');
                out.push_str(&part.to_string_lossy());
            }
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// True when `path` is `ancestor` or lies below it. Both must be normalised.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" || path == ancestor {
        return true;
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// True when either path contains the other.
pub fn is_related(a: &str, b: &str) -> bool {
    is_within(a, b) || is_within(b, a)
}

/// Parent folder of a normalised path; the root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

/// Last segment of a normalised path, empty for the root.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

pub fn join(folder: &str, name: &str) -> String {
    if folder == "/" {
        format!("/{name}")
    } else {
        format!("{folder}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators() {
        assert_eq!(normalize("/A/B/").unwrap(), "/A/B");
        assert_eq!(normalize("A//B/./C").unwrap(), "/A/B/C");
        assert_eq!(normalize("/").unwrap(), "/");
    }

    #[test]
    fn rejects_empty_and_parent_dir() {
        assert_eq!(normalize(""), Err(PathError::Empty));
        assert_eq!(normalize("/A/../secret"), Err(PathError::UnsupportedComponent));
    }

    #[test]
    fn containment_respects_segment_boundaries() {
        assert!(is_within("/A/B/C", "/A"));
        assert!(is_within("/A", "/A"));
        assert!(is_within("/anything", "/"));
        assert!(!is_within("/AB", "/A"));
        assert!(!is_within("/A", "/A/B"));
    }

    #[test]
    fn splits_parent_and_name() {
        assert_eq!(parent("/Docs/A.txt"), "/Docs");
        assert_eq!(parent("/A.txt"), "/");
        assert_eq!(file_name("/Docs/A.txt"), "A.txt");
        assert_eq!(join("/", "A.txt"), "/A.txt");
        assert_eq!(join("/Docs", "A.txt"), "/Docs/A.txt");
    }

    #[test]
    fn relation_is_symmetric() {
        assert!(is_related("/A", "/A/B"));
        assert!(is_related("/A/B/C", "/A/B"));
        assert!(!is_related("/photos", "/photos-old"));
    }
}
