use std::path::Path;

/// Markers identifying a version-controlled project root.
const ROOT_MARKERS: &[&str] = &[".git", ".hg", ".svn"];

/// Name of the nearest enclosing project root of `file`, if any.
pub fn find_workspace(file: &Path) -> Option<String> {
    file.ancestors()
        .skip(1)
        .find(|dir| ROOT_MARKERS.iter().any(|marker| dir.join(marker).exists()))
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
}
