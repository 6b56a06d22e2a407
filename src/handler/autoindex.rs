use std::fs;
use std::io;
use std::path::Path;

/// HTML listing of `dir` as seen at `request_path`.
///
/// Directories come first, then files; each group is sorted by name.
pub fn render(dir: &Path, request_path: &str) -> io::Result<String> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    dirs.sort();
    files.sort();

    let base = if request_path.ends_with('/') {
        request_path.to_string()
    } else {
        format!("{request_path}/")
    };
    let title = escape_html(request_path);

    let mut html = format!(
        "<html><head><title>Index of {title}</title></head><body><h1>Index of {title}</h1><ul>\n"
    );
    if request_path != "/" {
        html.push_str(&format!("<li><a href=\"{}..\">../</a></li>\n", escape_html(&base)));
    }
    for name in &dirs {
        let name = escape_html(name);
        html.push_str(&format!("<li><a href=\"{}{name}/\">{name}/</a></li>\n", escape_html(&base)));
    }
    for name in &files {
        let name = escape_html(name);
        html.push_str(&format!("<li><a href=\"{}{name}\">{name}</a></li>\n", escape_html(&base)));
    }
    html.push_str("</ul></body></html>\n");

    Ok(html)
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
