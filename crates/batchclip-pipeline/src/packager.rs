//! Output packaging.
//!
//! Decides per job whether to emit individual files or one archive. A
//! packaging failure degrades to individual-file delivery with a warning;
//! completed work is never dropped.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PackagingError;
use crate::scheduler::CompletedJob;

/// How a job's outputs are delivered.
#[derive(Debug)]
pub enum Delivery {
    /// One clip, emitted directly
    Single(PathBuf),
    /// Clips emitted individually, in index order
    Files(Vec<PathBuf>),
    /// All clips bundled into one gzip-compressed tar archive
    Archive { path: PathBuf, manifest: Manifest },
}

impl Delivery {
    /// Short label for summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Delivery::Single(_) => "single",
            Delivery::Files(_) => "files",
            Delivery::Archive { .. } => "archive",
        }
    }

    /// Number of clips delivered.
    pub fn clip_count(&self) -> usize {
        match self {
            Delivery::Single(_) => 1,
            Delivery::Files(files) => files.len(),
            Delivery::Archive { manifest, .. } => manifest
                .entries
                .iter()
                .filter(|e| e.status == EntryStatus::Ok)
                .count(),
        }
    }
}

/// Per-segment status inside an archive manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Ok,
    Failed,
    Skipped,
}

/// One manifest row. Failed and skipped indices are listed so the
/// archive's missing clips are self-explanatory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// 1-based batch position
    pub index: u32,
    /// Original range, `HH:MM:SS-HH:MM:SS`
    pub range: String,
    /// Outcome for this segment
    pub status: EntryStatus,
    /// Archive entry name, present for `ok` rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Failure reason, present for `failed` rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Archive manifest, stored as `manifest.json` inside the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

/// Decides and assembles the delivery form for a completed job.
#[derive(Debug, Clone)]
pub struct OutputPackager {
    per_file_threshold: usize,
}

impl OutputPackager {
    pub fn new(config: &crate::config::PipelineConfig) -> Self {
        Self {
            per_file_threshold: config.per_file_threshold,
        }
    }

    /// Package a completed job's outputs into `dest_dir`.
    ///
    /// One clip is emitted directly; below the threshold clips are
    /// emitted individually; at or above it they are bundled into one
    /// archive with a manifest. Archive failure falls back to individual
    /// files.
    pub async fn package(&self, completed: &CompletedJob, dest_dir: &Path) -> Delivery {
        // The executor settles segments in completion order; re-sort by
        // index happens upstream, so outputs arrive ordered here.
        let files: Vec<PathBuf> = completed.outputs.iter().map(|o| o.location.clone()).collect();

        match files.len() {
            0 => Delivery::Files(Vec::new()),
            1 => Delivery::Single(files[0].clone()),
            n if n < self.per_file_threshold => Delivery::Files(files),
            _ => match self.build_archive(completed, dest_dir).await {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(
                        job_id = %completed.job.id,
                        error = %e,
                        "Archive packaging failed, degrading to individual files"
                    );
                    Delivery::Files(files)
                }
            },
        }
    }

    async fn build_archive(
        &self,
        completed: &CompletedJob,
        dest_dir: &Path,
    ) -> Result<Delivery, PackagingError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let archive_path = dest_dir.join(format!("batchclip_{}.tar.gz", completed.job.id));

        let manifest = build_manifest(completed);
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| PackagingError::Archive(e.to_string()))?;

        let entries: Vec<(String, PathBuf)> = manifest
            .entries
            .iter()
            .filter_map(|entry| entry.name.clone().map(|name| (name, entry.index)))
            .filter_map(|(name, index)| {
                completed
                    .outputs
                    .iter()
                    .find(|o| o.index == index)
                    .map(|o| (name, o.location.clone()))
            })
            .collect();

        let path = archive_path.clone();
        tokio::task::spawn_blocking(move || write_archive(&path, &entries, &manifest_json))
            .await
            .map_err(|e| PackagingError::Archive(format!("archive task failed: {}", e)))??;

        info!(
            job_id = %completed.job.id,
            archive = %archive_path.display(),
            clips = completed.outputs.len(),
            "Packaged archive"
        );

        Ok(Delivery::Archive {
            path: archive_path,
            manifest,
        })
    }
}

/// Build the manifest covering every segment of the job.
fn build_manifest(completed: &CompletedJob) -> Manifest {
    let mut entries = Vec::with_capacity(completed.job.segments.len());

    for segment in &completed.job.segments {
        let index = segment.index;
        let range = segment.range.to_string();

        let entry = if let Some(output) = completed.outputs.iter().find(|o| o.index == index) {
            let ext = output
                .location
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("mp4");
            ManifestEntry {
                index,
                range,
                status: EntryStatus::Ok,
                name: Some(format!("clip_{:03}_{}.{}", index, segment.range.slug(), ext)),
                reason: None,
            }
        } else if let Some(failure) = completed.failures.iter().find(|f| f.index == index) {
            ManifestEntry {
                index,
                range,
                status: EntryStatus::Failed,
                name: None,
                reason: Some(failure.reason.clone()),
            }
        } else {
            ManifestEntry {
                index,
                range,
                status: EntryStatus::Skipped,
                name: None,
                reason: None,
            }
        };

        entries.push(entry);
    }

    Manifest { entries }
}

/// Assemble the `.tar.gz` on a blocking thread.
fn write_archive(
    dest: &Path,
    entries: &[(String, PathBuf)],
    manifest_json: &[u8],
) -> Result<(), PackagingError> {
    let file = std::fs::File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (name, path) in entries {
        builder
            .append_path_with_name(path, name)
            .map_err(|e| PackagingError::Archive(format!("append {}: {}", name, e)))?;
    }

    let mut header = tar::Header::new_gnu();
    header.set_size(manifest_json.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "manifest.json", manifest_json)
        .map_err(|e| PackagingError::Archive(format!("append manifest: {}", e)))?;

    let mut encoder = builder
        .into_inner()
        .map_err(|e| PackagingError::Archive(format!("finish tar: {}", e)))?;
    encoder
        .try_finish()
        .map_err(|e| PackagingError::Archive(format!("finish gzip: {}", e)))?;
    encoder.get_mut().flush()?;

    Ok(())
}
