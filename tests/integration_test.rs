use std::{env, path::PathBuf};

use anyhow::Result;
use carscope::{
    builder::{text_map, RepoBuilder},
    error::DecodeError,
    file::import_path,
    import,
    repo::{DecodeOptions, SizeAccounting},
    tree::TreeNode,
    ImportOpts,
};
use ciborium::value::Value;
use serial_test::serial;
use tempfile::TempDir;

const DID: &str = "did:plc:ewvi7nxzyoun6zhxrhs64oiz";

fn post(text: &str, created_at: &str) -> Value {
    text_map(vec![
        ("$type", Value::Text("app.bsky.feed.post".into())),
        ("text", Value::Text(text.into())),
        ("createdAt", Value::Text(created_at.into())),
    ])
}

fn sample_repo() -> Result<Vec<u8>> {
    RepoBuilder::new(DID)
        .rev("3kbp4qnnxyc2s")
        .record("app.bsky.feed.post", "3jzfcijpj2z2a", post("hello world", "2023-04-01T10:00:00.000Z"))
        .record("app.bsky.feed.post", "3jzfcijpj2z2b", post("second", "not-a-date"))
        .record(
            "app.bsky.feed.like",
            "3jzfd2ohmsz2a",
            text_map(vec![("createdAt", Value::Text("2023-04-02".into()))]),
        )
        .record(
            "app.bsky.actor.profile",
            "self",
            text_map(vec![("displayName", Value::Text("Alice".into()))]),
        )
        .record("app.bsky.graph.follow", "3jzfe", Value::Null)
        .build()
}

fn write_archive(dir: &TempDir, bytes: &[u8]) -> Result<PathBuf> {
    let path = dir.path().join("repo.car");
    std::fs::write(&path, bytes)?;
    Ok(path)
}

/// Points the config lookup at an empty directory so every test sees the defaults.
fn isolate_config() {
    env::set_var("CARSCOPE_CFG_DIR", env::temp_dir().join("carscope-test-cfg-absent"));
}

fn file_named<'a>(nodes: &[&'a TreeNode], label: &str) -> &'a TreeNode {
    nodes
        .iter()
        .copied()
        .find(|node| node.label() == label)
        .expect("file present")
}

#[tokio::test]
#[serial]
async fn import_archive_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_archive(&dir, &sample_repo()?)?;

    let index = import_path(&path, DecodeOptions::default()).await?;

    assert_eq!(index.record_count, 5);
    assert_eq!(index.did.as_deref(), Some(DID));
    assert_eq!(index.rev.as_deref(), Some("3kbp4qnnxyc2s"));
    assert!(index.warnings.is_empty());

    let top: Vec<_> = index.root.iter().map(TreeNode::label).collect();
    assert_eq!(top, ["app.bsky"]);

    // collections are visited in key order
    let second: Vec<_> = index.root[0].children().iter().map(TreeNode::label).collect();
    assert_eq!(second, ["actor", "feed", "graph"]);

    let posts = index.lookup(&["app.bsky", "feed", "post"]);
    assert_eq!(posts.len(), 2);

    match file_named(&posts, "3jzfcijpj2z2a") {
        TreeNode::File { created_at, .. } => {
            assert_eq!(created_at.map(|at| at.to_rfc3339()).as_deref(), Some("2023-04-01T10:00:00+00:00"))
        }
        other => panic!("unexpected {:?}", other),
    }
    match file_named(&posts, "3jzfcijpj2z2b") {
        TreeNode::File { created_at, .. } => assert!(created_at.is_none()),
        other => panic!("unexpected {:?}", other),
    }

    Ok(())
}

#[tokio::test]
#[serial]
async fn total_is_sum_of_top_level() -> Result<()> {
    let index = import(&sample_repo()?, DecodeOptions::default())?;

    let top: u64 = index.root.iter().map(TreeNode::size).sum();
    assert_eq!(index.total_size, top);

    let files: u64 = index.files().iter().map(|(_, node)| node.size()).sum();
    assert_eq!(index.total_size, files);

    Ok(())
}

#[tokio::test]
#[serial]
async fn every_file_is_reachable_by_its_path() -> Result<()> {
    let index = import(&sample_repo()?, DecodeOptions::default())?;

    for (mut path, node) in index.files() {
        if let TreeNode::File { collection, .. } = node {
            assert_eq!(path.len(), collection.split('.').count() - 1);
        }
        path.push(node.label());
        assert_eq!(index.lookup(&path), vec![node]);
    }

    Ok(())
}

#[tokio::test]
#[serial]
async fn import_is_deterministic() -> Result<()> {
    let bytes = sample_repo()?;
    assert_eq!(
        import(&bytes, DecodeOptions::default())?,
        import(&bytes, DecodeOptions::default())?
    );
    Ok(())
}

#[tokio::test]
#[serial]
async fn payload_sizes_leave_out_framing() -> Result<()> {
    let bytes = sample_repo()?;
    let framed = import(&bytes, DecodeOptions::default())?;
    let payload = import(
        &bytes,
        DecodeOptions {
            size_accounting: SizeAccounting::Payload,
            ..Default::default()
        },
    )?;

    // one length byte and a 36 byte CID per small record
    assert_eq!(framed.total_size, payload.total_size + 5 * 37);
    Ok(())
}

#[tokio::test]
#[serial]
async fn truncated_archive_is_rejected() -> Result<()> {
    let mut bytes = sample_repo()?;
    bytes.truncate(bytes.len() - 1);

    assert!(matches!(
        import(&bytes, DecodeOptions::default()),
        Err(DecodeError::TruncatedBlock { .. })
    ));

    isolate_config();
    let dir = tempfile::tempdir()?;
    let path = write_archive(&dir, &bytes)?;
    let err = carscope::summary(&path, ImportOpts::default())
        .await
        .expect_err("truncated archive");
    assert!(err.downcast_ref::<DecodeError>().is_some());

    Ok(())
}

#[tokio::test]
#[serial]
async fn empty_repository() -> Result<()> {
    let bytes = RepoBuilder::new(DID).build()?;
    let index = import(&bytes, DecodeOptions::default())?;

    assert!(index.root.is_empty());
    assert_eq!(index.total_size, 0);
    assert_eq!(index.record_count, 0);
    assert!(index.lookup::<&str>(&[]).is_empty());

    Ok(())
}

#[tokio::test]
#[serial]
async fn verification_catches_tampering() -> Result<()> {
    let mut bytes = sample_repo()?;
    let at = bytes
        .windows(b"hello world".len())
        .position(|w| w == b"hello world")
        .expect("record text in archive");
    bytes[at] = b'j';

    // same length, still valid CBOR
    assert_eq!(import(&bytes, DecodeOptions::default())?.record_count, 5);

    let verified = import(
        &bytes,
        DecodeOptions {
            verify_blocks: true,
            ..Default::default()
        },
    );
    assert!(matches!(verified, Err(DecodeError::DigestMismatch { .. })));

    isolate_config();
    let dir = tempfile::tempdir()?;
    let path = write_archive(&dir, &bytes)?;
    let opts = ImportOpts {
        verify: true,
        ..Default::default()
    };
    assert!(carscope::summary(&path, opts).await.is_err());

    Ok(())
}

#[tokio::test]
#[serial]
async fn cli_operations() -> Result<()> {
    isolate_config();
    let dir = tempfile::tempdir()?;
    let path = write_archive(&dir, &sample_repo()?)?;

    let index = carscope::summary(&path, ImportOpts::default()).await?;
    assert_eq!(index.record_count, 5);

    let index = carscope::tree(&path, Some(1), ImportOpts::default()).await?;
    assert_eq!(index.folder_count(), 8);

    let path_args = vec!["app.bsky".to_owned(), "feed".to_owned()];
    let index = carscope::list(&path, &path_args, ImportOpts::default()).await?;
    assert_eq!(index.lookup(&path_args).len(), 2);

    Ok(())
}
