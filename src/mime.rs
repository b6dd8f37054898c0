use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes read from a file when sniffing its content.
const SAMPLE_SIZE: usize = 4096;

/// Sniffed types that say nothing useful about the content and defer to the
/// extension.
const INCONCLUSIVE_MIME_TYPES: &[&str] = &[
    "application/x-empty",
    "text/plain",
    "text/x-asm",
    "application/octet-stream",
    "inode/x-empty",
];

pub trait MimeTypeDetector: Send + Sync {
    fn detect_mime_type(&self, path: &str, contents: &[u8]) -> Option<String>;

    fn detect_mime_type_from_buffer(&self, contents: &[u8]) -> Option<String>;

    fn detect_mime_type_from_path(&self, path: &str) -> Option<String>;

    fn detect_mime_type_from_file(&self, path: &Path) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct ExtensionMimeTypeDetector {
    overrides: HashMap<String, String>,
}

impl ExtensionMimeTypeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, extension: &str, mime_type: &str) -> Self {
        self.overrides
            .insert(extension.to_ascii_lowercase(), mime_type.to_string());
        self
    }

    fn lookup(&self, path: &str) -> Option<String> {
        let extension = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
        if let Some(mime_type) = self.overrides.get(&extension) {
            return Some(mime_type.clone());
        }
        mime_guess::from_ext(&extension)
            .first()
            .map(|mime| mime.essence_str().to_string())
    }
}

impl MimeTypeDetector for ExtensionMimeTypeDetector {
    fn detect_mime_type(&self, path: &str, _contents: &[u8]) -> Option<String> {
        self.lookup(path)
    }

    fn detect_mime_type_from_buffer(&self, _contents: &[u8]) -> Option<String> {
        None
    }

    fn detect_mime_type_from_path(&self, path: &str) -> Option<String> {
        self.lookup(path)
    }

    fn detect_mime_type_from_file(&self, path: &Path) -> Option<String> {
        self.lookup(&path.to_string_lossy())
    }
}

/// Sniffs well-known signatures and falls back to the extension when the
/// content is inconclusive.
#[derive(Debug, Clone, Default)]
pub struct ContentMimeTypeDetector {
    extensions: ExtensionMimeTypeDetector,
}

impl ContentMimeTypeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension_detector(extensions: ExtensionMimeTypeDetector) -> Self {
        Self { extensions }
    }
}

impl MimeTypeDetector for ContentMimeTypeDetector {
    fn detect_mime_type(&self, path: &str, contents: &[u8]) -> Option<String> {
        match sniff(contents) {
            Some(mime_type) if !INCONCLUSIVE_MIME_TYPES.contains(&mime_type) => {
                Some(mime_type.to_string())
            }
            sniffed => self
                .extensions
                .lookup(path)
                .or_else(|| sniffed.map(str::to_string)),
        }
    }

    fn detect_mime_type_from_buffer(&self, contents: &[u8]) -> Option<String> {
        sniff(contents).map(str::to_string)
    }

    fn detect_mime_type_from_path(&self, path: &str) -> Option<String> {
        self.extensions.lookup(path)
    }

    fn detect_mime_type_from_file(&self, path: &Path) -> Option<String> {
        let mut sample = Vec::with_capacity(SAMPLE_SIZE);
        let sniffed = File::open(path)
            .and_then(|file| file.take(SAMPLE_SIZE as u64).read_to_end(&mut sample))
            .ok()
            .and_then(|_| sniff(&sample));
        match sniffed {
            Some(mime_type) => Some(mime_type.to_string()),
            None => self.extensions.lookup(&path.to_string_lossy()),
        }
    }
}

fn sniff(contents: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b", "application/gzip"),
        (b"BM", "image/bmp"),
        (b"<?xml", "text/xml"),
    ];

    if contents.is_empty() {
        return Some("application/x-empty");
    }
    if contents.len() >= 12 && &contents[..4] == b"RIFF" && &contents[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if let Some((_, mime_type)) = SIGNATURES
        .iter()
        .find(|(signature, _)| contents.starts_with(signature))
    {
        return Some(*mime_type);
    }
    if !contents.contains(&0) && std::str::from_utf8(contents).is_ok() {
        return Some("text/plain");
    }
    None
}
