use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Maps a request path onto the filesystem below `root`.
///
/// The location prefix is stripped first, so `/images/a.png` under a
/// location `/images` rooted at `./img` becomes `./img/a.png`. The path
/// has already been normalised by the parser and holds no `..`.
pub fn construct_file_path(root: &Path, location_path: &str, request_path: &str) -> PathBuf {
    let prefix = location_path.trim_end_matches('/');
    let relative = request_path.strip_prefix(prefix).unwrap_or(request_path);
    let relative = relative.trim_matches('/');

    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// First configured index file that exists in `dir`.
pub fn find_index_file(dir: &Path, index: &[String]) -> Option<PathBuf> {
    index
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Target of a configured redirect for `path`.
///
/// A key matches exactly, or as a prefix when it ends in `/`; in the
/// prefix case the rest of the path is appended to the target.
pub fn check_redirect(path: &str, redirects: &BTreeMap<String, String>) -> Option<String> {
    redirects.iter().find_map(|(from, to)| {
        if path == from {
            Some(to.clone())
        } else if from.ends_with('/') {
            path.strip_prefix(from.as_str()).map(|rest| format!("{to}{rest}"))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_location_prefix() {
        let root = Path::new("./www");
        assert_eq!(construct_file_path(root, "/", "/index.html"), PathBuf::from("./www/index.html"));
        assert_eq!(construct_file_path(root, "/images", "/images/a.png"), PathBuf::from("./www/a.png"));
        assert_eq!(construct_file_path(root, "/images/", "/images/"), PathBuf::from("./www"));
        assert_eq!(construct_file_path(root, "/", "/"), PathBuf::from("./www"));
    }

    #[test]
    fn redirects_exact_and_prefix() {
        let mut redirects = BTreeMap::new();
        redirects.insert("/old".to_string(), "/new".to_string());
        redirects.insert("/docs/".to_string(), "https://example.com/docs/".to_string());

        assert_eq!(check_redirect("/old", &redirects).as_deref(), Some("/new"));
        assert_eq!(check_redirect("/old/x", &redirects), None);
        assert_eq!(
            check_redirect("/docs/intro.html", &redirects).as_deref(),
            Some("https://example.com/docs/intro.html")
        );
    }
}
