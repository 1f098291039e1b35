//! Content types keyed by file extension.
//!
//! Binary types bypass directive scanning and are streamed straight from the
//! backend with the backend-reported size as `Content-Length`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileType {
    pub mime: &'static str,
    pub binary: bool,
}

const DEFAULT: FileType = FileType {
    mime: "text/html",
    binary: false,
};

const TYPES: &[(&str, FileType)] = &[
    ("jpg", FileType { mime: "image/jpeg", binary: true }),
    ("jpeg", FileType { mime: "image/jpeg", binary: true }),
    ("png", FileType { mime: "image/png", binary: true }),
    ("gif", FileType { mime: "image/gif", binary: true }),
    ("ico", FileType { mime: "image/x-icon", binary: true }),
    ("wav", FileType { mime: "audio/wav", binary: true }),
    ("mp3", FileType { mime: "audio/mp3", binary: true }),
    ("wmv", FileType { mime: "video/x-ms-wmv", binary: true }),
    ("pdf", FileType { mime: "application/pdf", binary: true }),
    ("swf", FileType { mime: "application/x-shockwave-flash", binary: true }),
    ("css", FileType { mime: "text/css", binary: false }),
    ("js", FileType { mime: "application/javascript", binary: false }),
    ("txt", FileType { mime: "text/plain", binary: false }),
    ("xml", FileType { mime: "text/xml", binary: false }),
];

/// Looks up the type from the text after the last dot; names without a
/// known extension are served as scanned HTML.
pub fn file_type(name: &str) -> FileType {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return DEFAULT;
    };
    TYPES
        .iter()
        .find(|(e, _)| e.eq_ignore_ascii_case(ext))
        .map(|(_, t)| *t)
        .unwrap_or(DEFAULT)
}
