use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mediaforge_contracts::request::ApiKey;
use url::Url;

use crate::api::GenerativeApi;
use crate::client::{InlineArtifact, RemoteArtifact};
use crate::encoder::extension_for_mime;
use crate::error::JobError;
use crate::progress::ProgressSink;

const BLOB_URL_PREFIX: &str = "blob:mediaforge/";

/// A generated artifact in a form that can be displayed or saved locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedArtifact {
    /// `data:` URI, nothing to release.
    Inline { url: String, mime_type: String },
    /// Object URL backed by a file in the [`BlobStore`].
    Blob {
        url: String,
        path: PathBuf,
        mime_type: String,
    },
}

impl ResolvedArtifact {
    pub fn url(&self) -> &str {
        match self {
            Self::Inline { url, .. } | Self::Blob { url, .. } => url,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Self::Inline { mime_type, .. } | Self::Blob { mime_type, .. } => mime_type,
        }
    }

    pub fn file_extension(&self) -> &'static str {
        extension_for_mime(self.mime_type())
    }

    pub fn bytes(&self) -> Result<Vec<u8>, JobError> {
        match self {
            Self::Inline { url, .. } => {
                let payload = url
                    .split_once(',')
                    .map(|(_, payload)| payload)
                    .unwrap_or_default();
                BASE64
                    .decode(payload.as_bytes())
                    .map_err(|err| JobError::Decode(err.to_string()))
            }
            Self::Blob { path, .. } => Ok(fs::read(path)?),
        }
    }

    /// Writes the artifact to `dest`, the equivalent of following the
    /// download link. Returns the number of bytes written.
    pub fn save_to(&self, dest: &Path) -> Result<u64, JobError> {
        let bytes = self.bytes()?;
        if let Some(parent) = dest.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, &bytes)?;
        Ok(bytes.len() as u64)
    }
}

/// Holds downloaded artifacts until their object URL is revoked.
#[derive(Debug)]
pub struct BlobStore {
    dir: PathBuf,
    live: Mutex<HashMap<String, PathBuf>>,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(&self, bytes: &[u8], mime_type: &str) -> Result<ResolvedArtifact, JobError> {
        fs::create_dir_all(&self.dir)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let path = self
            .dir
            .join(format!("blob-{id}.{}", extension_for_mime(mime_type)));
        fs::write(&path, bytes)?;
        let url = format!("{BLOB_URL_PREFIX}{id}");
        if let Ok(mut live) = self.live.lock() {
            live.insert(url.clone(), path.clone());
        }
        Ok(ResolvedArtifact::Blob {
            url,
            path,
            mime_type: mime_type.to_string(),
        })
    }

    pub fn lookup(&self, url: &str) -> Option<PathBuf> {
        self.live.lock().ok()?.get(url).cloned()
    }

    /// Releases the blob behind `url`. Returns false for unknown or already
    /// revoked URLs.
    pub fn revoke(&self, url: &str) -> bool {
        let removed = self
            .live
            .lock()
            .ok()
            .and_then(|mut live| live.remove(url));
        match removed {
            Some(path) => {
                if let Err(err) = fs::remove_file(&path) {
                    log::debug!("failed removing blob {}: {err}", path.display());
                }
                true
            }
            None => false,
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

pub struct ArtifactResolver {
    blobs: BlobStore,
}

impl ArtifactResolver {
    pub fn new(blobs: BlobStore) -> Self {
        Self { blobs }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn resolve_inline(&self, artifact: &InlineArtifact) -> ResolvedArtifact {
        ResolvedArtifact::Inline {
            url: format!(
                "data:{};base64,{}",
                artifact.mime_type, artifact.data_base64
            ),
            mime_type: artifact.mime_type.clone(),
        }
    }

    pub fn resolve_remote<A: GenerativeApi + ?Sized>(
        &self,
        api: &A,
        key: &ApiKey,
        artifact: &RemoteArtifact,
        progress: &dyn ProgressSink,
    ) -> Result<ResolvedArtifact, JobError> {
        progress.report("Downloading generated video...");
        let url = authorized_download_url(&artifact.uri, key)?;
        let download = api.download(&url)?;
        if !download.is_success() {
            let status_text = if download.status_text.is_empty() {
                download.status.to_string()
            } else {
                format!("{} {}", download.status, download.status_text)
            };
            return Err(JobError::Download(format!(
                "Failed to download video: {status_text}"
            )));
        }
        if download.bytes.is_empty() {
            return Err(JobError::Download(
                "Failed to download video: empty response body".to_string(),
            ));
        }
        let mime_type = download
            .content_type
            .as_deref()
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|value| value.starts_with("video/") || value.starts_with("image/"))
            .unwrap_or("video/mp4");
        self.blobs.create(&download.bytes, mime_type)
    }

    /// Revokes the object URL behind a blob artifact; inline artifacts hold
    /// nothing.
    pub fn release(&self, artifact: &ResolvedArtifact) {
        if let ResolvedArtifact::Blob { url, .. } = artifact {
            self.blobs.revoke(url);
        }
    }
}

/// Adds the credential as the `key` query parameter unless one is already
/// there.
pub fn authorized_download_url(uri: &str, key: &ApiKey) -> Result<Url, JobError> {
    let mut url = Url::parse(uri.trim())
        .map_err(|err| JobError::Generation(format!("Invalid artifact URI '{uri}': {err}")))?;
    let has_key = url.query_pairs().any(|(name, _)| name == "key");
    if !has_key {
        url.query_pairs_mut().append_pair("key", key.expose());
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use mediaforge_contracts::request::ApiKey;

    use super::{authorized_download_url, ArtifactResolver, BlobStore, ResolvedArtifact};
    use crate::api::Download;
    use crate::client::{InlineArtifact, RemoteArtifact};
    use crate::error::JobError;
    use crate::testing::{ok_download, RecordingProgress, ScriptedApi};

    fn key() -> ApiKey {
        ApiKey::new("secret-key").unwrap()
    }

    #[test]
    fn inline_png_becomes_data_uri() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let resolver = ArtifactResolver::new(BlobStore::new(temp.path()));
        let resolved = resolver.resolve_inline(&InlineArtifact {
            data_base64: "iVBORw0KGgo=".to_string(),
            mime_type: "image/png".to_string(),
        });
        assert!(resolved.url().starts_with("data:image/png;base64,"));
        assert_eq!(resolved.url(), "data:image/png;base64,iVBORw0KGgo=");
        assert_eq!(resolved.bytes()?, b"\x89PNG\r\n\x1a\n");
        assert_eq!(resolved.file_extension(), "png");
        Ok(())
    }

    #[test]
    fn download_url_gets_key_exactly_once() -> anyhow::Result<()> {
        let url = authorized_download_url(
            "https://files.test/v1beta/files/abc:download?alt=media",
            &key(),
        )?;
        assert_eq!(
            url.as_str(),
            "https://files.test/v1beta/files/abc:download?alt=media&key=secret-key"
        );
        let again = authorized_download_url(url.as_str(), &key())?;
        assert_eq!(again.query_pairs().filter(|(name, _)| name == "key").count(), 1);

        let bare = authorized_download_url("https://files.test/video.mp4", &key())?;
        assert_eq!(bare.as_str(), "https://files.test/video.mp4?key=secret-key");
        Ok(())
    }

    #[test]
    fn invalid_uri_is_a_generation_error() {
        assert!(matches!(
            authorized_download_url("not a url", &key()),
            Err(JobError::Generation(_))
        ));
    }

    #[test]
    fn remote_artifact_is_downloaded_into_a_blob() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let resolver = ArtifactResolver::new(BlobStore::new(temp.path().join("blobs")));
        let api = ScriptedApi::new();
        api.push_download(Ok(ok_download(b"mp4-bytes", "video/mp4; codecs=avc1")));
        let progress = RecordingProgress::new();

        let resolved = resolver.resolve_remote(
            &api,
            &key(),
            &RemoteArtifact {
                uri: "https://files.test/v?alt=media".to_string(),
            },
            &progress,
        )?;
        assert_eq!(
            api.download_urls(),
            vec!["https://files.test/v?alt=media&key=secret-key"]
        );
        assert!(resolved.url().starts_with("blob:mediaforge/"));
        assert_eq!(resolved.mime_type(), "video/mp4");
        assert_eq!(resolved.bytes()?, b"mp4-bytes");
        assert_eq!(progress.messages(), vec!["Downloading generated video..."]);
        assert_eq!(resolver.blobs().live_count(), 1);

        let dest = temp.path().join("out").join("video.mp4");
        assert_eq!(resolved.save_to(&dest)?, 9);
        assert_eq!(std::fs::read(&dest)?, b"mp4-bytes");
        Ok(())
    }

    #[test]
    fn non_success_status_is_a_download_error_with_status_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let resolver = ArtifactResolver::new(BlobStore::new(temp.path()));
        let api = ScriptedApi::new();
        api.push_download(Ok(Download {
            status: 403,
            status_text: "Forbidden".to_string(),
            content_type: None,
            bytes: Vec::new(),
        }));

        let err = resolver
            .resolve_remote(
                &api,
                &key(),
                &RemoteArtifact {
                    uri: "https://files.test/v".to_string(),
                },
                &RecordingProgress::new(),
            )
            .unwrap_err();
        assert!(matches!(err, JobError::Download(_)));
        assert_eq!(err.to_string(), "Failed to download video: 403 Forbidden");
        assert_eq!(resolver.blobs().live_count(), 0);
        Ok(())
    }

    #[test]
    fn release_revokes_blob_and_removes_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let resolver = ArtifactResolver::new(BlobStore::new(temp.path()));
        let blob = resolver.blobs().create(b"abc", "video/webm")?;
        let ResolvedArtifact::Blob { url, path, .. } = blob.clone() else {
            panic!("expected blob artifact");
        };
        assert!(path.exists());
        assert_eq!(resolver.blobs().lookup(&url), Some(path.clone()));

        resolver.release(&blob);
        assert!(!path.exists());
        assert_eq!(resolver.blobs().lookup(&url), None);
        assert!(!resolver.blobs().revoke(&url));
        Ok(())
    }
}
