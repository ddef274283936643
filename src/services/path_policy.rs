//! Admission control for client-supplied destination paths.

/// Logical folders uploads may target.
pub const DEFAULT_ALLOWED_PREFIXES: &[&str] = &[
    "tags/global",
    "tags/clients",
    "tags/brands",
    "tags/icons",
    "solutions",
    "products",
    "industry",
    "posts",
    "resources",
];

/// Root for identity-namespaced keys.
pub const ADMIN_UPLOADS_ROOT: &str = "admin-uploads";

/// Accept `path` only if it sits under an allow-listed prefix and carries no
/// traversal sequence. The admitted path is canonical: no surrounding
/// slashes, no empty or `.` segments.
pub fn sanitize_path(path: &str, allowed_prefixes: &[&str]) -> Option<String> {
    if path.contains("..") {
        return None;
    }

    let canonical = canonical_segments(path).collect::<Vec<_>>().join("/");
    let admitted = allowed_prefixes.iter().any(|prefix| {
        canonical
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    });

    admitted.then_some(canonical)
}

fn canonical_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".")
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sanitize every `/`-separated segment of an admitted path.
pub fn sanitize_segments(admitted_path: &str) -> String {
    canonical_segments(admitted_path)
        .map(sanitize_segment)
        .filter(|s| !s.chars().all(|c| c == '.'))
        .collect::<Vec<_>>()
        .join("/")
}

/// `admin-uploads/{uid}/{segments…}` for an already admitted path.
pub fn namespaced_key(uid: &str, admitted_path: &str) -> String {
    format!(
        "{}/{}/{}",
        ADMIN_UPLOADS_ROOT,
        sanitize_segment(uid),
        sanitize_segments(admitted_path)
    )
}
