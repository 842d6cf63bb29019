use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::JobError;

/// A local file selected as input, fully read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Transmissible form of a [`SourceFile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn open(path: &Path) -> Result<Self, JobError> {
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Err(JobError::Decode(format!("{} is empty", path.display())));
        }
        let mime_type = mime_for_path(path)
            .or_else(|| sniff_mime(&bytes))
            .unwrap_or("application/octet-stream");
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("input")
            .to_string();
        Ok(Self::new(name, mime_type, bytes))
    }
}

pub fn encode(file: &SourceFile) -> EncodedImage {
    EncodedImage {
        data: BASE64.encode(&file.bytes),
        mime_type: file.mime_type.clone(),
    }
}

/// Turns encoded text back into a file. Accepts bare base64 or a full
/// `data:<mime>;base64,` URI; a mime type in the URI wins over `mime_type`
/// only when the latter is blank.
pub fn decode(text: &str, mime_type: &str, file_name: &str) -> Result<SourceFile, JobError> {
    let trimmed = text.trim();
    let (uri_mime, payload) = split_data_uri(trimmed);
    if payload.is_empty() {
        return Err(JobError::Decode("encoded data is empty".to_string()));
    }
    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|err| JobError::Decode(err.to_string()))?;
    if bytes.is_empty() {
        return Err(JobError::Decode("encoded data is empty".to_string()));
    }
    let mime = Some(mime_type.trim())
        .filter(|value| !value.is_empty())
        .or(uri_mime)
        .map(str::to_string)
        .or_else(|| sniff_mime(&bytes).map(str::to_string))
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(SourceFile::new(file_name, mime, bytes))
}

fn split_data_uri(text: &str) -> (Option<&str>, &str) {
    let Some(rest) = text.strip_prefix("data:") else {
        return (None, text);
    };
    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header
                .split(';')
                .next()
                .map(str::trim)
                .filter(|value| !value.is_empty());
            (mime, payload)
        }
        None => (None, ""),
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

/// File extension used when saving an artifact of the given mime type.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let lowered = mime_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    if lowered.contains("png") {
        return "png";
    }
    if lowered.contains("webm") {
        return "webm";
    }
    if lowered.starts_with("video/") {
        return "mp4";
    }
    "bin"
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{decode, encode, extension_for_mime, mime_for_path, SourceFile};
    use crate::error::JobError;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn open_reads_bytes_and_mime_from_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("ref.JPG");
        std::fs::write(&path, b"not really a jpeg")?;
        let file = SourceFile::open(&path)?;
        assert_eq!(file.name, "ref.JPG");
        assert_eq!(file.mime_type, "image/jpeg");
        assert_eq!(file.bytes, b"not really a jpeg");
        Ok(())
    }

    #[test]
    fn open_sniffs_mime_without_known_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("upload.bin");
        std::fs::write(&path, PNG_HEADER)?;
        assert_eq!(SourceFile::open(&path)?.mime_type, "image/png");
        Ok(())
    }

    #[test]
    fn open_rejects_empty_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("empty.png");
        std::fs::write(&path, b"")?;
        assert!(matches!(SourceFile::open(&path), Err(JobError::Decode(_))));
        Ok(())
    }

    #[test]
    fn encode_then_decode_restores_file() -> anyhow::Result<()> {
        let file = SourceFile::new("a.png", "image/png", PNG_HEADER.to_vec());
        let encoded = encode(&file);
        assert_eq!(encoded.mime_type, "image/png");
        let decoded = decode(&encoded.data, &encoded.mime_type, "a.png")?;
        assert_eq!(decoded, file);
        Ok(())
    }

    #[test]
    fn decode_accepts_data_uri_and_takes_its_mime() -> anyhow::Result<()> {
        let decoded = decode("data:image/webp;base64,AAEC", "", "x.webp")?;
        assert_eq!(decoded.mime_type, "image/webp");
        assert_eq!(decoded.bytes, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn decode_rejects_empty_and_malformed_text() {
        assert!(matches!(decode("", "image/png", "x"), Err(JobError::Decode(_))));
        assert!(matches!(
            decode("data:image/png;base64,", "", "x"),
            Err(JobError::Decode(_))
        ));
        assert!(matches!(
            decode("***not base64***", "image/png", "x"),
            Err(JobError::Decode(_))
        ));
    }

    #[test]
    fn mime_and_extension_helpers_agree() {
        assert_eq!(mime_for_path(Path::new("a.webp")), Some("image/webp"));
        assert_eq!(mime_for_path(Path::new("a.tiff")), None);
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("video/mp4"), "mp4");
        assert_eq!(extension_for_mime("application/x-thing"), "bin");
    }
}
