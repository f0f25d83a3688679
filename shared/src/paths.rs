//! Lexical path containment.
//!
//! Archive entries and resource URIs come from outside the service, so every
//! relative path is resolved against its base directory without touching the
//! filesystem and rejected if the result is not strictly below the base.

use std::path::{Component, Path, PathBuf};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PathError {
    #[error("{0}: illegal file path")]
    Traversal(String),
}

/// Joins `relative` onto `base`, failing if the result escapes `base` or
/// resolves to `base` itself.
pub fn contained_join(base: &Path, relative: &str) -> Result<PathBuf, PathError> {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(PathError::Traversal(relative.to_string()));
                }
                normalized.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Traversal(relative.to_string()));
            }
        }
    }

    if depth == 0 {
        return Err(PathError::Traversal(relative.to_string()));
    }

    Ok(base.join(normalized))
}

/// Checks that `name` can be used as a single directory name below a base folder.
pub fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}
