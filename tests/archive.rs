mod common;

use std::fs;

use futures_util::StreamExt;
use tempfile::TempDir;
use zip_util::{Error, GlobOptions, create_archive, extract};

use common::{init_tracing, snapshot};

fn source_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("assets/img")).unwrap();
    fs::create_dir_all(root.join("empty")).unwrap();
    fs::write(root.join("index.html"), "<html></html>").unwrap();
    fs::write(root.join("assets/site.css"), "body { margin: 0 }").unwrap();
    let big: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    fs::write(root.join("assets/img/big.bin"), big).unwrap();
    dir
}

#[tokio::test]
async fn archive_then_extract_reproduces_the_tree() -> anyhow::Result<()> {
    init_tracing();
    let source = source_tree();
    let work = TempDir::new()?;
    let archive_path = work.path().join("site.zip");

    let mut out = tokio::fs::File::create(&archive_path).await?;
    let written = create_archive(["**/*"], GlobOptions::default().cwd(source.path()))
        .write_to(&mut out)
        .await?;
    drop(out);
    assert_eq!(written, fs::metadata(&archive_path)?.len());

    let restored = work.path().join("restored");
    extract(&archive_path, &restored).await?;

    assert_eq!(snapshot(&restored), snapshot(source.path()));
    Ok(())
}

#[tokio::test]
async fn streamed_chunks_form_a_valid_archive() {
    let source = source_tree();
    let work = TempDir::new().unwrap();
    let mut stream = create_archive("**/*.bin", GlobOptions::default().cwd(source.path()));

    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        assert!(!chunk.is_empty());
        bytes.extend_from_slice(&chunk);
    }

    let path = work.path().join("bin.zip");
    fs::write(&path, bytes).unwrap();
    let out = work.path().join("out");
    extract(&path, &out).await.unwrap();

    // Named relative to the pattern's static prefix, which is the cwd here
    assert_eq!(
        fs::read(out.join("assets/img/big.bin")).unwrap(),
        fs::read(source.path().join("assets/img/big.bin")).unwrap()
    );
    assert_eq!(snapshot(&out).len(), 3);
}

#[tokio::test]
async fn empty_selection_is_a_readable_empty_archive() {
    let work = TempDir::new().unwrap();
    let path = work.path().join("empty.zip");

    let bytes = create_archive(Vec::<&str>::new(), GlobOptions::default())
        .into_bytes()
        .await
        .unwrap();
    fs::write(&path, bytes).unwrap();

    let out = work.path().join("out");
    extract(&path, &out).await.unwrap();
    assert!(snapshot(&out).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_source_puts_the_stream_in_error() {
    let source = source_tree();
    // lstat sees a symlink, not a directory, so it is read as a file
    std::os::unix::fs::symlink(source.path().join("assets"), source.path().join("link")).unwrap();

    let mut stream = create_archive("link", GlobOptions::default().cwd(source.path()));

    let mut error = None;
    while let Some(item) = stream.next().await {
        if let Err(e) = item {
            error = Some(e);
        }
    }

    assert!(matches!(error, Some(Error::Stream { ref path, .. }) if path.ends_with("link")));
}
