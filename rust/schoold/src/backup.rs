use anyhow::{anyhow, bail, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DB_FILE: &str = "school.sqlite3";
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/school.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "schoold-workspace-v1";
pub const LEGACY_SQLITE_FORMAT: &str = "legacy-sqlite3";

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub db_sha256: String,
    pub db_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_sha256: String,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn sha256_file(path: &Path) -> anyhow::Result<(String, u64)> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    let n = std::io::copy(&mut f, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.to_string_lossy()))?;
    Ok((hex(&hasher.finalize()), n))
}

/// Writes `manifest.json` and the database into a zip. The manifest records
/// the database checksum so imports can reject damaged bundles.
pub fn export_workspace_bundle(workspace: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let db_path = workspace.join(DB_FILE);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", db_path.to_string_lossy());
    }
    let (db_sha256, db_bytes) = sha256_file(&db_path)?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "db": { "entry": DB_ENTRY, "sha256": db_sha256, "bytes": db_bytes },
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())
        .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;
    zip.finish().context("failed to finalize bundle")?;

    log::info!("exported workspace bundle to {}", out_path.to_string_lossy());
    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        db_sha256,
        db_bytes,
    })
}

/// Restores a bundle (or a bare SQLite file) as the workspace database. The
/// existing database is only replaced once the new one is fully extracted.
pub fn import_workspace_bundle(in_path: &Path, workspace: &Path) -> anyhow::Result<ImportSummary> {
    let magic = read_magic(in_path)?;
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let dst = workspace.join(DB_FILE);
    let tmp = workspace.join(format!("{}.importing", DB_FILE));
    if tmp.exists() {
        let _ = std::fs::remove_file(&tmp);
    }

    let (format, db_sha256) = if magic.starts_with(SQLITE_MAGIC) {
        std::fs::copy(in_path, &tmp).with_context(|| {
            format!("failed to copy sqlite file {}", in_path.to_string_lossy())
        })?;
        let (sha, _) = sha256_file(&tmp)?;
        (LEGACY_SQLITE_FORMAT.to_string(), sha)
    } else if magic.starts_with(&ZIP_MAGIC) {
        let sha = extract_bundle(in_path, &tmp)?;
        (BUNDLE_FORMAT_V1.to_string(), sha)
    } else {
        bail!("not a workspace bundle or SQLite file: {}", in_path.to_string_lossy());
    };

    std::fs::rename(&tmp, &dst)
        .with_context(|| format!("failed to move database into {}", dst.to_string_lossy()))?;
    log::info!("imported {} into {}", format, workspace.to_string_lossy());
    Ok(ImportSummary {
        bundle_format_detected: format,
        db_sha256,
    })
}

fn extract_bundle(in_path: &Path, tmp: &Path) -> anyhow::Result<String> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest.get("format").and_then(|v| v.as_str()).unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        bail!("unsupported bundle format: {}", format);
    }
    let expected = manifest
        .pointer("/db/sha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest missing db.sha256"))?
        .to_ascii_lowercase();

    {
        let mut out = File::create(tmp)
            .with_context(|| format!("failed to create {}", tmp.to_string_lossy()))?;
        let mut entry = archive
            .by_name(DB_ENTRY)
            .with_context(|| format!("bundle missing {}", DB_ENTRY))?;
        std::io::copy(&mut entry, &mut out).context("failed to extract database entry")?;
        out.flush().context("failed to flush extracted database")?;
    }

    let (actual, _) = sha256_file(tmp)?;
    if actual != expected {
        let _ = std::fs::remove_file(tmp);
        bail!("database checksum mismatch: expected {}, got {}", expected, actual);
    }
    Ok(actual)
}

fn read_magic(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut buf = [0u8; 16];
    let mut filled = 0;
    while filled < buf.len() {
        let n = f.read(&mut buf[filled..]).context("failed to read file signature")?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(buf[..filled].to_vec())
}
