//! Mountpoint resolution.

use std::path::{Component, Path, PathBuf};

use crate::error::{VolumeError, VolumeResult};

/// Mountpoint for a volume: `home/name`.
pub fn mountpoint(home: &Path, name: &str) -> PathBuf {
    home.join(name)
}

/// Check that a volume name is a single, plain path component.
///
/// Rejects empty names, separators, `.` and `..` so a mountpoint can never
/// land outside `home` or on `home` itself.
pub fn validate_name(name: &str) -> VolumeResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == name => Ok(()),
        _ => Err(VolumeError::InvalidName(name.to_string())),
    }
}
