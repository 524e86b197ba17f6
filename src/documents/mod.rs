//! Artifact generation: case report PDFs, QR codes and content digests.
//!
//! Generated files live below the configured uploads directory. Only QR codes are
//! served statically, under `/uploads/qrcodes`.

pub mod pdf;
pub mod qr;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// `true` for a 64 character lowercase/uppercase hex string.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Writes `bytes` to `<dir>/<uuid>.<ext>` and returns the full path.
pub async fn store_file(dir: &Path, ext: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.{}", Uuid::new_v4(), ext));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Public URL for a file stored below `uploads_root`, e.g. `/uploads/qrcodes/x.svg`.
pub fn public_url(uploads_root: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(uploads_root).unwrap_or(file);
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("/uploads/{}", rel)
}

/// File extension for an accepted upload content type.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "application/pdf" => "pdf",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "text/plain" => "txt",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        _ => "bin",
    }
}

/// Strips directory components and control characters from a client-supplied filename.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).take(255).collect();
    let cleaned = cleaned.trim().trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
