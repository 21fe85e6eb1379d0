//! Attachments captured while decoding a message.
//!
//! Unlike a mailbox viewer we keep the decoded bytes: the only consumer is the
//! digest image extractor, which runs right after decoding.

/// A non-body MIME part (regular attachment or inline image).
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Filename from `Content-Disposition`/`Content-Type`, if any.
    pub filename: Option<String>,

    /// MIME content type (e.g. `"image/jpeg"`).
    pub content_type: String,

    /// `Content-ID` without the surrounding angle brackets.
    pub content_id: Option<String>,

    /// `true` if the part is inline (referenced from HTML via `cid:`).
    pub is_inline: bool,

    /// Decoded content.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Whether this part is an image.
    pub fn is_image(&self) -> bool {
        self.content_type.to_ascii_lowercase().starts_with("image/")
    }

    /// File extension for saving: the filename's own, else one derived from the type.
    pub fn extension(&self) -> String {
        if let Some(ext) = self
            .filename
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        {
            return format!(".{ext}");
        }
        let ctype = self.content_type.to_ascii_lowercase();
        if ctype.ends_with("jpeg") || ctype.ends_with("jpg") {
            ".jpg".to_string()
        } else if ctype.ends_with("png") {
            ".png".to_string()
        } else if ctype.ends_with("gif") {
            ".gif".to_string()
        } else if ctype.ends_with("webp") {
            ".webp".to_string()
        } else {
            ".bin".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(filename: Option<&str>, content_type: &str) -> Attachment {
        Attachment {
            filename: filename.map(String::from),
            content_type: content_type.to_string(),
            content_id: None,
            is_inline: true,
            data: Vec::new(),
        }
    }

    #[test]
    fn test_extension_prefers_filename() {
        assert_eq!(part(Some("scan.PNG"), "image/jpeg").extension(), ".png");
    }

    #[test]
    fn test_extension_from_content_type() {
        assert_eq!(part(None, "image/jpeg").extension(), ".jpg");
        assert_eq!(part(None, "image/png").extension(), ".png");
        assert_eq!(part(None, "application/octet-stream").extension(), ".bin");
    }

    #[test]
    fn test_is_image() {
        assert!(part(None, "IMAGE/GIF").is_image());
        assert!(!part(None, "application/pdf").is_image());
    }
}
