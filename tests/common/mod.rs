#![allow(dead_code)]

use std::path::{Path, PathBuf};

use zip_util::ZipWriter;
use zip_util::zip::DosDateTime;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Entry to place in a fixture archive.
pub enum Fixture<'a> {
    Dir(&'a str),
    File(&'a str, &'a [u8]),
}

/// Build an archive in memory with entries in exactly the given order.
pub async fn archive_bytes(entries: &[Fixture<'_>]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Vec::new());
    for entry in entries {
        match entry {
            Fixture::Dir(name) => writer
                .add_directory(name, DosDateTime::MIN, None)
                .await
                .unwrap(),
            Fixture::File(name, data) => writer.add_bytes(name, data).await.unwrap(),
        }
    }
    writer.finish().await.unwrap()
}

pub async fn write_archive(dir: &Path, name: &str, entries: &[Fixture<'_>]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, archive_bytes(entries).await).unwrap();
    path
}

/// `sample.zip`: index.html, assets/, assets/logo.png
pub fn sample_entries() -> Vec<Fixture<'static>> {
    vec![
        Fixture::File("index.html", b"<html><body>hi</body></html>"),
        Fixture::Dir("assets/"),
        Fixture::File("assets/logo.png", b"\x89PNG\r\n\x1a\nnot really a png"),
    ]
}

/// Every file and directory under `root`, as sorted slash-separated paths
/// with file contents (`None` for directories).
pub fn snapshot(root: &Path) -> Vec<(String, Option<Vec<u8>>)> {
    let mut items: Vec<_> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap();
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let content = e
                .file_type()
                .is_file()
                .then(|| std::fs::read(e.path()).unwrap());
            (name, content)
        })
        .collect();
    items.sort();
    items
}
