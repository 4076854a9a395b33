//! String path helpers.
//!
//! Entries keep their paths as `/`-separated strings so attribute values can
//! be produced without re-encoding on every test.

const SEPARATOR: char = '/';

/// Joins two path fragments; an empty fragment yields the other one.
pub fn join(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (false, true) => head.to_string(),
        (false, false) if head.ends_with(SEPARATOR) => format!("{head}{tail}"),
        (false, false) => format!("{head}{SEPARATOR}{tail}"),
    }
}

/// Splits a path into its directory and its final component.
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind(SEPARATOR) {
        None => ("", path),
        Some(0) => ("/", &path[1..]),
        Some(index) => (&path[..index], &path[index + 1..]),
    }
}

/// Splits off the extension including its dot. Leading dots of the final
/// component do not start an extension.
pub fn splitext(path: &str) -> (&str, &str) {
    let name_start = path.rfind(SEPARATOR).map_or(0, |index| index + 1);
    if let Some(dot) = path.rfind('.') {
        if dot > name_start && path[name_start..dot].chars().any(|c| c != '.') {
            return (&path[..dot], &path[dot..]);
        }
    }
    (path, "")
}
