//! Extension-based content types. Advisory metadata only.

use std::path::Path;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
        None => return DEFAULT_MIME_TYPE,
    };
    match ext.as_str() {
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "ts" => "text/typescript",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/x-yaml",
        "go" => "text/x-go",
        "py" => "text/x-python",
        "java" => "text/x-java",
        "c" | "h" => "text/x-c",
        "cpp" | "hpp" => "text/x-c++",
        "rs" => "text/x-rust",
        "rb" => "text/x-ruby",
        "php" => "text/x-php",
        "sh" => "text/x-shellscript",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "csv" => "text/csv",
        _ => DEFAULT_MIME_TYPE,
    }
}
