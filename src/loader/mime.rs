//! Fixed registry of recognized file types.
//!
//! Each entry ties a declared MIME type to the magic-byte prefix that
//! identifies the payload on the wire and to the canonical extension used
//! for archive entry names. The registry is consulted twice per download:
//! once by declared type (response header) and once by the actual leading
//! bytes of the body.

/// A recognized file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileType {
    pub mime: &'static str,
    magic: &'static [u8],
    extensions: &'static [&'static str],
}

impl FileType {
    /// Canonical extension (leading dot) for archive entry names.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        self.extensions.first().copied().unwrap_or("")
    }
}

const FILE_TYPES: &[FileType] = &[
    FileType {
        mime: "image/jpeg",
        magic: &[0xFF, 0xD8, 0xFF],
        extensions: &[".jpg", ".jpeg"],
    },
    FileType {
        mime: "image/png",
        magic: &[0x89, 0x50, 0x4E, 0x47],
        extensions: &[".png"],
    },
    FileType {
        mime: "image/gif",
        magic: &[0x47, 0x49, 0x46, 0x38],
        extensions: &[".gif"],
    },
    FileType {
        mime: "application/pdf",
        magic: &[0x25, 0x50, 0x44, 0x46],
        extensions: &[".pdf"],
    },
    FileType {
        mime: "application/zip",
        magic: &[0x50, 0x4B, 0x03, 0x04],
        extensions: &[".zip"],
    },
];

/// Identifies a type by the leading bytes of a payload.
#[must_use]
pub fn by_signature(magic: &[u8]) -> Option<&'static FileType> {
    FILE_TYPES.iter().find(|ft| magic.starts_with(ft.magic))
}

/// Looks up a type by its declared MIME string.
#[must_use]
pub fn by_mime(mime: &str) -> Option<&'static FileType> {
    FILE_TYPES.iter().find(|ft| ft.mime == mime)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_by_signature_matches_known_prefixes() {
        let cases: &[(&[u8], &str)] = &[
            (&[0xFF, 0xD8, 0xFF, 0xE0, 0x00], "image/jpeg"),
            (&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A], "image/png"),
            (b"GIF89a...", "image/gif"),
            (b"%PDF-1.7", "application/pdf"),
            (&[0x50, 0x4B, 0x03, 0x04, 0x14], "application/zip"),
        ];
        for (magic, mime) in cases {
            assert_eq!(by_signature(magic).unwrap().mime, *mime);
        }
    }

    #[test]
    fn test_by_signature_rejects_unknown_and_short_prefixes() {
        assert!(by_signature(b"hello world").is_none());
        assert!(by_signature(&[]).is_none());
        // Two bytes of a three-byte JPEG magic are not enough.
        assert!(by_signature(&[0xFF, 0xD8]).is_none());
    }

    #[test]
    fn test_by_mime_returns_canonical_extension() {
        assert_eq!(by_mime("image/jpeg").unwrap().extension(), ".jpg");
        assert_eq!(by_mime("application/zip").unwrap().extension(), ".zip");
        assert!(by_mime("text/html").is_none());
    }
}
