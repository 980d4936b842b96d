use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use zip::ZipArchive;
use zip::result::ZipError;

use crate::plugin::manifest::{MANIFEST_FILE, PluginManifest};

pub type PluginArchive<R> = ZipArchive<R>;

/// Upper bound on the size of `mine.json`.
pub const MAX_MANIFEST_BYTES: u64 = 64 * 1024;

pub fn open(path: &Path) -> Result<PluginArchive<File>, ZipError> {
    let file = File::open(path)?;
    ZipArchive::new(file)
}

/// Read `mine.json` from the archive root.
pub fn read_manifest<R: Read + Seek>(archive: &mut PluginArchive<R>) -> Result<PluginManifest, String> {
    let mut entry = archive
        .by_name(MANIFEST_FILE)
        .map_err(|err| format!("{MANIFEST_FILE}: {err}"))?;

    // Declared sizes come from the uploader and are not trusted.
    if entry.size() > MAX_MANIFEST_BYTES {
        return Err(format!(
            "{MANIFEST_FILE}: declares {} bytes, limit is {MAX_MANIFEST_BYTES}",
            entry.size()
        ));
    }

    let mut raw = Vec::new();
    entry
        .by_ref()
        .take(MAX_MANIFEST_BYTES + 1)
        .read_to_end(&mut raw)
        .map_err(|err| format!("{MANIFEST_FILE}: {err}"))?;
    if raw.len() as u64 > MAX_MANIFEST_BYTES {
        return Err(format!("{MANIFEST_FILE}: larger than {MAX_MANIFEST_BYTES} bytes"));
    }

    PluginManifest::from_slice(&raw).map_err(|err| format!("{MANIFEST_FILE}: {err}"))
}

/// Extract into `dest`; on failure remove every directory this call created,
/// including missing ancestors of `dest`.
pub fn extract_fresh<R: Read + Seek>(
    archive: &mut PluginArchive<R>,
    dest: &Path,
) -> Result<usize, ZipError> {
    let created = first_missing_ancestor(dest);
    extract_into(archive, dest).inspect_err(|_| {
        if let Some(created) = created.as_ref() {
            let _ = fs::remove_dir_all(created);
        }
    })
}

/// Outermost ancestor of `path` (or `path` itself) that does not exist yet.
fn first_missing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut missing = None;
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() || ancestor.exists() {
            break;
        }
        missing = Some(ancestor.to_path_buf());
    }
    missing
}

/// Extract every entry below `dest`. Entries that would land outside `dest`
/// and symlinks are skipped. Returns the number of files written.
pub fn extract_into<R: Read + Seek>(
    archive: &mut PluginArchive<R>,
    dest: &Path,
) -> Result<usize, ZipError> {
    fs::create_dir_all(dest)?;
    let dest = dest.canonicalize()?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel_path) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            tracing::debug!("skipping unsafe archive entry {}", entry.name());
            continue;
        };

        if let Some(mode) = entry.unix_mode() {
            if (mode & 0o170000) == 0o120000 {
                tracing::debug!("skipping symlink entry {}", entry.name());
                continue;
            }
        }

        let outpath = dest.join(&rel_path);
        if !outpath.starts_with(&dest) {
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        io::copy(&mut entry, &mut outfile)?;
        written += 1;
    }

    Ok(written)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Archive whose `mine.json` is stored as a zip64 entry declaring
    /// `declared` uncompressed bytes in the central directory.
    pub(crate) fn zip_with_declared_manifest_size(body: &str, declared: u64) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(
                MANIFEST_FILE,
                SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Stored)
                    .large_file(true),
            )
            .unwrap();
        writer.write_all(body.as_bytes()).unwrap();
        let mut bytes = writer.finish().unwrap().into_inner();

        let header = bytes
            .windows(4)
            .position(|window| window == b"PK\x01\x02")
            .unwrap();
        assert_eq!(bytes[header + 24..header + 28], u32::MAX.to_le_bytes());
        let name_len = u16::from_le_bytes([bytes[header + 28], bytes[header + 29]]) as usize;
        let extra_len = u16::from_le_bytes([bytes[header + 30], bytes[header + 31]]) as usize;

        let mut at = header + 46 + name_len;
        let end = at + extra_len;
        while at < end {
            let id = u16::from_le_bytes([bytes[at], bytes[at + 1]]);
            let len = u16::from_le_bytes([bytes[at + 2], bytes[at + 3]]) as usize;
            if id == 0x0001 {
                // Uncompressed size is the first zip64 field.
                bytes[at + 4..at + 12].copy_from_slice(&declared.to_le_bytes());
                return bytes;
            }
            at += 4 + len;
        }
        panic!("central directory entry has no zip64 extra field");
    }

    #[test]
    fn reads_root_manifest() {
        let bytes = zip_bytes(&[
            ("mine.json", r#"{"name":"acme/widget","version":"1.0"}"#),
            ("src/lib.php", "<?php"),
        ]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let manifest = read_manifest(&mut archive).unwrap();
        assert_eq!(manifest.name, "acme/widget");
    }

    #[test]
    fn nested_manifest_is_not_the_root_manifest() {
        let bytes = zip_bytes(&[("widget/mine.json", r#"{"name":"acme/widget"}"#)]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let err = read_manifest(&mut archive).unwrap_err();
        assert!(err.starts_with("mine.json"));
    }

    #[test]
    fn extraction_skips_escaping_entries() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("acme/widget");
        let bytes = zip_bytes(&[
            ("mine.json", "{}"),
            ("assets/app.js", "console.log(1)"),
            ("../escape.txt", "nope"),
        ]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let written = extract_into(&mut archive, &dest).unwrap();

        assert_eq!(written, 2);
        assert!(dest.join("mine.json").is_file());
        assert!(dest.join("assets/app.js").is_file());
        assert!(!dir.path().join("acme/escape.txt").exists());
    }

    #[test]
    fn manifest_declaring_a_huge_size_is_rejected() {
        let bytes = zip_with_declared_manifest_size(r#"{"name":"acme/widget"}"#, u64::MAX - 1);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let err = read_manifest(&mut archive).unwrap_err();
        assert!(err.contains("declares"), "{err}");
    }

    #[test]
    fn oversized_manifest_is_rejected() {
        let padding = " ".repeat(MAX_MANIFEST_BYTES as usize);
        let body = format!(r#"{{"name":"acme/widget"}}{padding}"#);
        let bytes = zip_bytes(&[("mine.json", body.as_str())]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let err = read_manifest(&mut archive).unwrap_err();
        assert!(err.starts_with("mine.json"), "{err}");
    }

    #[test]
    fn extraction_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("acme/widget");
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("mine.json", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"{}").unwrap();
        writer
            .add_symlink("passwd", "/etc/passwd", SimpleFileOptions::default())
            .unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let written = extract_into(&mut archive, &dest).unwrap();

        assert_eq!(written, 1);
        assert!(fs::symlink_metadata(dest.join("passwd")).is_err());
    }

    #[test]
    fn failed_extraction_removes_new_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("plugin");
        fs::create_dir_all(root.join("existing")).unwrap();
        // `lib` is written as a file, so `lib/a.php` cannot be created.
        let bytes = zip_bytes(&[("mine.json", "{}"), ("lib", "x"), ("lib/a.php", "<?php")]);

        let mut archive = ZipArchive::new(Cursor::new(bytes.clone())).unwrap();
        assert!(extract_fresh(&mut archive, &root.join("fresh/widget")).is_err());
        assert!(!root.join("fresh").exists());
        assert!(root.is_dir());

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert!(extract_fresh(&mut archive, &root.join("existing/widget")).is_err());
        assert!(!root.join("existing/widget").exists());
        assert!(root.join("existing").is_dir());
    }

    #[test]
    fn missing_ancestor_is_the_outermost_absent_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            first_missing_ancestor(&dir.path().join("a/b/c")),
            Some(dir.path().join("a"))
        );
        assert_eq!(first_missing_ancestor(dir.path()), None);
    }
}
