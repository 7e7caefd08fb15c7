use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MAX_ARCHIVE_SIZE: usize = 100 * 1024 * 1024; // 100MB

/// Where a candidate submission comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmissionSource {
    /// A directory already on disk.
    Path { path: PathBuf },
    /// A zip or tar.gz archive fetched over HTTP.
    Url { url: String },
}

/// A submission staged for evaluation: its source tree plus the archive
/// digest recorded as the submission fingerprint.
#[derive(Debug, Clone)]
pub struct StagedSubmission {
    pub root: PathBuf,
    pub digest: Option<String>,
}

/// Stage a submission into `dest`. Local paths are used in place; archives
/// are downloaded (size-capped), hashed, and extracted.
pub async fn stage_submission(source: &SubmissionSource, dest: &Path) -> Result<StagedSubmission> {
    match source {
        SubmissionSource::Path { path } => {
            if !path.is_dir() {
                anyhow::bail!("submission directory {} not found", path.display());
            }
            Ok(StagedSubmission {
                root: path.clone(),
                digest: None,
            })
        }
        SubmissionSource::Url { url } => {
            let bytes = download_archive(url).await?;
            let digest = hex::encode(Sha256::digest(&bytes));
            info!(url = %url, bytes = %bytes.len(), digest = %digest, "Downloaded submission archive");

            tokio::fs::create_dir_all(dest)
                .await
                .context("failed to create extraction directory")?;

            let dest_owned = dest.to_path_buf();
            tokio::task::spawn_blocking(move || extract_archive(&bytes, &dest_owned))
                .await
                .context("extraction task panicked")??;

            let root = find_submission_root(dest)?;
            Ok(StagedSubmission {
                root,
                digest: Some(digest),
            })
        }
    }
}

async fn download_archive(url: &str) -> Result<Vec<u8>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?;

    let resp = client
        .get(url)
        .send()
        .await
        .context("failed to download submission archive")?;

    if !resp.status().is_success() {
        anyhow::bail!("archive download failed: HTTP {}", resp.status().as_u16());
    }

    let bytes = resp.bytes().await.context("failed to read response body")?;
    if bytes.len() > MAX_ARCHIVE_SIZE {
        anyhow::bail!(
            "archive too large: {} bytes (max {})",
            bytes.len(),
            MAX_ARCHIVE_SIZE
        );
    }
    Ok(bytes.to_vec())
}

fn extract_archive(data: &[u8], dest: &Path) -> Result<()> {
    if let Ok(mut archive) = zip::ZipArchive::new(std::io::Cursor::new(data)) {
        debug!("Extracting ZIP archive ({} entries)", archive.len());
        archive.extract(dest).context("failed to extract ZIP archive")?;
        return Ok(());
    }

    let gz = flate2::read::GzDecoder::new(data);
    let mut archive = tar::Archive::new(gz);
    archive
        .unpack(dest)
        .context("failed to extract tar.gz archive")?;
    debug!("Extracted tar.gz archive");
    Ok(())
}

const ROOT_MARKERS: &[&str] = &[
    "Dockerfile",
    "package.json",
    "requirements.txt",
    "setup.py",
    "pyproject.toml",
    "go.mod",
    "Cargo.toml",
    "pom.xml",
    "build.gradle",
];

/// Locate the buildable root inside an extracted archive: the extraction
/// directory itself, or a single nested directory carrying a build manifest.
pub fn find_submission_root(base: &Path) -> Result<PathBuf> {
    let has_marker =
        |dir: &Path| ROOT_MARKERS.iter().any(|marker| dir.join(marker).exists());

    if has_marker(base) {
        return Ok(base.to_path_buf());
    }

    for entry in std::fs::read_dir(base).context("failed to read extracted directory")? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() && has_marker(&path) {
            return Ok(path);
        }
    }

    anyhow::bail!(
        "no build manifest found in extracted archive at {}",
        base.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_stage_local_path() {
        let tmp = tempfile::tempdir().unwrap();
        let source = SubmissionSource::Path {
            path: tmp.path().to_path_buf(),
        };
        let dest = tempfile::tempdir().unwrap();

        let staged = stage_submission(&source, dest.path()).await.unwrap();
        assert_eq!(staged.root, tmp.path());
        assert!(staged.digest.is_none());
    }

    #[tokio::test]
    async fn test_stage_missing_local_path() {
        let source = SubmissionSource::Path {
            path: PathBuf::from("/nonexistent/submission"),
        };
        let dest = tempfile::tempdir().unwrap();
        assert!(stage_submission(&source, dest.path()).await.is_err());
    }

    fn make_targz(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_extract_targz() {
        let data = make_targz(&[("app/main.py", "print('hi')"), ("app/requirements.txt", "")]);
        let tmp = tempfile::tempdir().unwrap();
        extract_archive(&data, tmp.path()).unwrap();
        assert!(tmp.path().join("app/main.py").exists());
    }

    #[test]
    fn test_extract_zip() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("main.py", options).unwrap();
            writer.write_all(b"print('zip')").unwrap();
            writer.finish().unwrap();
        }
        let tmp = tempfile::tempdir().unwrap();
        extract_archive(cursor.get_ref(), tmp.path()).unwrap();
        assert!(tmp.path().join("main.py").exists());
    }

    #[test]
    fn test_find_submission_root_direct() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("requirements.txt"), "").unwrap();
        assert_eq!(find_submission_root(tmp.path()).unwrap(), tmp.path());
    }

    #[test]
    fn test_find_submission_root_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("my-submission");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("package.json"), "{}").unwrap();
        assert_eq!(find_submission_root(tmp.path()).unwrap(), nested);
    }

    #[test]
    fn test_find_submission_root_missing() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(find_submission_root(tmp.path()).is_err());
    }

    #[test]
    fn test_source_serde_tagging() {
        let json = r#"{"type": "url", "url": "https://example.com/sub.tar.gz"}"#;
        let source: SubmissionSource = serde_json::from_str(json).unwrap();
        assert!(matches!(source, SubmissionSource::Url { .. }));

        let json = r#"{"type": "path", "path": "/tmp/sub"}"#;
        let source: SubmissionSource = serde_json::from_str(json).unwrap();
        assert!(matches!(source, SubmissionSource::Path { .. }));
    }
}
