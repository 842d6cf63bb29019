use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::request::{GenerationOptions, Modality};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptArtifact {
    pub path: String,
    pub mime_type: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Record of one finished job, written next to the saved artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReceipt {
    pub schema_version: u64,
    pub job_id: String,
    pub session_id: String,
    pub modality: Modality,
    pub prompt: String,
    pub options: GenerationOptions,
    #[serde(default)]
    pub models: Vec<String>,
    pub input_image: Option<String>,
    pub artifact: ReceiptArtifact,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub started_at: String,
    pub finished_at: String,
    pub latency_s: f64,
}

impl ReceiptArtifact {
    pub fn describe(path: &Path, mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            path: path.to_string_lossy().to_string(),
            mime_type: mime_type.to_string(),
            bytes: bytes.len() as u64,
            sha256: content_digest(bytes),
        }
    }
}

pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn write_receipt(path: &Path, receipt: &JobReceipt) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(receipt)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{content_digest, write_receipt, JobReceipt, ReceiptArtifact, RECEIPT_SCHEMA_VERSION};
    use crate::request::{AspectRatio, GenerationOptions, Modality};

    #[test]
    fn digest_is_lowercase_sha256_hex() {
        assert_eq!(
            content_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn receipt_writes_expected_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let artifact_path = temp.path().join("artifact.mp4");
        let receipt_path = temp.path().join("artifact.mp4.receipt.json");

        let receipt = JobReceipt {
            schema_version: RECEIPT_SCHEMA_VERSION,
            job_id: "job-1".to_string(),
            session_id: "session-1".to_string(),
            modality: Modality::Video,
            prompt: "cat, negative prompt: dog".to_string(),
            options: GenerationOptions {
                aspect_ratio: Some(AspectRatio::Landscape16x9),
                ..GenerationOptions::default()
            },
            models: vec!["veo-3.0-generate-preview".to_string()],
            input_image: None,
            artifact: ReceiptArtifact::describe(&artifact_path, "video/mp4", b"mp4"),
            warnings: vec!["status check 1 failed".to_string()],
            started_at: "2026-02-19T00:00:00+00:00".to_string(),
            finished_at: "2026-02-19T00:01:00+00:00".to_string(),
            latency_s: 60.0,
        };
        write_receipt(&receipt_path, &receipt)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&receipt_path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["modality"], json!("video"));
        assert_eq!(parsed["options"]["aspect_ratio"], json!("16:9"));
        assert_eq!(parsed["artifact"]["bytes"], json!(3));
        assert_eq!(parsed["artifact"]["mime_type"], json!("video/mp4"));

        let reparsed: JobReceipt = serde_json::from_value(parsed)?;
        assert_eq!(reparsed, receipt);
        Ok(())
    }
}
