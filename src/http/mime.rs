//! Content-Type classification.

/// Coarse category of a body, used to decide whether it can be printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeCategory {
    Text,
    Binary,
    Unknown,
}

const TEXT_SUBTYPES: &[&str] = &[
    "html",
    "xml",
    "json",
    "www-form-urlencoded",
    "javascript",
    "ecmascript",
    "postscript",
    "atom+xml",
    "atomcat+xml",
    "atomsvc+xml",
    "rdf+xml",
    "rss+xml",
    "svg+xml",
    "wsdl+xml",
    "xhtml+xml",
    "xslt+xml",
    "xml-dtd",
    "java-jnlp-file",
    "latex",
    "mpegurl",
    "rtf",
    "uri-list",
    "ns-proxy-autoconfig",
    "javascript-config",
];

const BINARY_TYPES: &[&str] = &["image", "audio", "video", "font"];

const BINARY_SUBTYPES: &[&str] = &[
    "octet-stream",
    "7z-compressed",
    "zip",
    "gzip",
    "bzip",
    "bzip2",
    "pdf",
    "shockwave-flash",
    "java-archive",
    "java-vm",
    "java-serialized-object",
    "debian-package",
    "epub+zip",
    "msdownload",
    "ms-excel",
    "ms-powerpoint",
    "msword",
    "openxmlformats-officedocument",
    "ogg",
    "protobuf",
    "x509-ca-cert",
    "font-ttf",
    "font-otf",
    "png",
    "ppt",
    "xls",
];

/// Split a `Content-Type` value into its lowercased media type and charset.
pub fn parse_content_type(value: &str) -> (String, Option<String>) {
    let mut params = value.split(';');
    let mime = params.next().unwrap_or_default().trim().to_ascii_lowercase();
    let charset = params.find_map(|p| {
        let (key, value) = p.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    });
    (mime, charset.filter(|c| !c.is_empty()))
}

/// Classify a `Content-Type` value.
///
/// The subtype is normalised before lookup: `x-` and `vnd.` prefixes are
/// dropped and anything after the first remaining `.` is ignored, so
/// `application/vnd.ms-excel.sheet` classifies like `ms-excel`.
pub fn classify(content_type: Option<&str>) -> MimeCategory {
    let Some(content_type) = content_type else {
        return MimeCategory::Unknown;
    };
    let (mime, _) = parse_content_type(content_type);
    let (main, sub) = mime.split_once('/').unwrap_or((mime.as_str(), ""));

    let sub = sub.strip_prefix("x-").unwrap_or(sub);
    let sub = sub.strip_prefix("vnd.").unwrap_or(sub);
    let sub = sub.split('.').next().unwrap_or(sub);
    // structured syntax suffixes: application/problem+json, application/foo+xml
    let suffix = sub.rsplit_once('+').map(|(_, s)| s);

    if main == "text" || TEXT_SUBTYPES.contains(&sub) || matches!(suffix, Some("json" | "xml")) {
        MimeCategory::Text
    } else if BINARY_TYPES.contains(&main) || BINARY_SUBTYPES.contains(&sub) || suffix == Some("zip") {
        MimeCategory::Binary
    } else {
        MimeCategory::Unknown
    }
}
