use anyhow::Result;
use pretty_assertions::assert_eq;
use sapling_bucket::{
    BucketKey, CONFIG_FILE, DATA_DIR, ResourceConfig, SaplingBucketError, Session, TransactionState,
};
use sapling_node::{
    BlockNode, BlockNodeFactory, NodeRecord, ROOT_NODE_KEY, TreeNode, TreeNodeFactory,
    ValueDelegate,
};
use sapling_storage::{
    CombinedStorageBackend, FaultyStorageBackend, MeasuredStorageBackend, MemoryStorageBackend,
    SaplingStorageError, StorageBackend,
};

type Memory = MemoryStorageBackend<Vec<u8>, Vec<u8>>;

fn text(key: u64, value: &str) -> TreeNode {
    TreeNode::text(key, ROOT_NODE_KEY, ValueDelegate::new(0, value))
}

#[test_log::test(tokio::test)]
async fn it_publishes_nothing_when_a_commit_fails() -> Result<()> {
    let memory = Memory::default();
    let backend = FaultyStorageBackend::new(memory.clone());
    let session = Session::open(
        TreeNodeFactory,
        backend.clone(),
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?;

    let mut writer = session.begin_write_transaction().await?;
    let doomed = writer.allocate_node_key()?;
    writer.insert(text(doomed, "doomed")).await?;

    // Seven node-tree buckets, the revision root and eight revision-tree
    // buckets get through; the uber bucket does not.
    backend.fail_writes_after(16);
    assert!(matches!(
        writer.commit().await,
        Err(SaplingBucketError::Io(SaplingStorageError::StorageBackend(_)))
    ));
    assert_eq!(writer.state(), TransactionState::Aborted);
    assert!(!session.has_active_writer());
    assert_eq!(session.latest_revision(), 0);

    backend.heal();
    let reader = session.begin_latest_read_transaction().await?;
    assert_eq!(reader.get_node(doomed).await?, None);

    let mut writer = session.begin_write_transaction().await?;
    let key = writer.allocate_node_key()?;
    assert!(key > doomed);
    writer.insert(text(key, "kept")).await?;
    assert_eq!(writer.commit().await?, 1);

    drop(session);
    let reopened = Session::open(
        TreeNodeFactory,
        memory,
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?;
    assert_eq!(reopened.latest_revision(), 1);
    let reader = reopened.begin_latest_read_transaction().await?;
    assert_eq!(reader.get_node(doomed).await?, None);
    assert!(reader.get_node(key).await?.is_some());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_keeps_a_failed_commit_off_the_local_side_of_a_combined_store() -> Result<()> {
    let local = Memory::default();
    let remote = FaultyStorageBackend::new(Memory::default());
    let session = Session::open(
        TreeNodeFactory,
        CombinedStorageBackend::new(local.clone(), remote.clone()),
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?;

    let mut writer = session.begin_write_transaction().await?;
    let doomed = writer.allocate_node_key()?;
    writer.insert(text(doomed, "doomed")).await?;

    remote.fail_writes_after(16);
    assert!(writer.commit().await.is_err());
    assert_eq!(session.latest_revision(), 0);

    drop(session);
    remote.heal();
    let reopened = Session::open(
        TreeNodeFactory,
        CombinedStorageBackend::new(local, remote),
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?;
    assert_eq!(reopened.latest_revision(), 0);
    let reader = reopened.begin_latest_read_transaction().await?;
    assert_eq!(reader.get_node(doomed).await?, None);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_never_rewrites_buckets_left_by_a_failed_commit() -> Result<()> {
    async fn snapshot(memory: &Memory) -> Result<Vec<(u64, Vec<u8>)>> {
        let mut stored = Vec::new();
        for key in 0..256 {
            if let Some(bytes) = memory.get(&BucketKey(key).to_bytes()).await? {
                stored.push((key, bytes));
            }
        }
        Ok(stored)
    }

    let memory = Memory::default();
    let backend = FaultyStorageBackend::new(memory.clone());
    let session = Session::open(
        TreeNodeFactory,
        backend.clone(),
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?;
    let bootstrapped = snapshot(&memory).await?.len();

    let mut writer = session.begin_write_transaction().await?;
    let doomed = writer.allocate_node_key()?;
    writer.insert(text(doomed, "doomed")).await?;
    backend.fail_writes_after(16);
    assert!(writer.commit().await.is_err());
    drop(session);

    let orphaned = snapshot(&memory).await?;
    assert_eq!(orphaned.len(), bootstrapped + 16);

    backend.heal();
    let reopened = Session::open(
        TreeNodeFactory,
        backend,
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?;
    let mut writer = reopened.begin_write_transaction().await?;
    let key = writer.allocate_node_key()?;
    writer.insert(text(key, "kept")).await?;
    assert_eq!(writer.commit().await?, 1);

    let stored = snapshot(&memory).await?;
    for (key, bytes) in &orphaned {
        let current = stored.iter().find(|(stored_key, _)| stored_key == key);
        assert_eq!(current.map(|(_, bytes)| bytes), Some(bytes));
    }
    assert_eq!(stored.len(), orphaned.len() + 16);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_copies_only_the_touched_path_on_commit() -> Result<()> {
    let backend = MeasuredStorageBackend::new(Memory::default());
    let session = Session::open(
        BlockNodeFactory,
        backend.clone(),
        ResourceConfig::new(BlockNodeFactory::ID),
    )
    .await?;

    let mut writer = session.begin_write_transaction().await?;
    for _ in 0..300 {
        let key = writer.allocate_node_key()?;
        writer.insert(BlockNode::new(key, format!("v1 {key}"))).await?;
    }
    // Three data buckets share one indirect path
    assert_eq!(writer.dirty_buckets(), 9);
    writer.commit().await?;

    backend.reset();
    let mut writer = session.begin_write_transaction().await?;
    writer.update(BlockNode::new(299, "v2")).await?;
    assert_eq!(writer.dirty_buckets(), 7);
    assert_eq!(writer.commit().await?, 2);

    // Node path, revision root, revision path, uber bucket
    assert_eq!(backend.writes(), 7 + 1 + 8 + 1);

    let first = session.begin_read_transaction(1).await?;
    let second = session.begin_read_transaction(2).await?;
    for key in [0, 127, 128, 298] {
        assert_eq!(first.get_node(key).await?, second.get_node(key).await?);
    }
    assert_eq!(
        first.get_node(299).await?.as_ref().and_then(BlockNode::bytes),
        Some(&b"v1 299"[..])
    );
    assert_eq!(
        second.get_node(299).await?.as_ref().and_then(BlockNode::bytes),
        Some(&b"v2"[..])
    );

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_serves_repeated_reads_from_cache() -> Result<()> {
    let backend = MeasuredStorageBackend::new(Memory::default());
    let session = Session::open(
        TreeNodeFactory,
        backend.clone(),
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?;

    backend.reset();
    let reader = session.begin_latest_read_transaction().await?;
    assert!(reader.get_node(ROOT_NODE_KEY).await?.is_some());
    assert!(reader.get_node(ROOT_NODE_KEY).await?.is_some());
    assert_eq!(backend.reads(), 0);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_memoizes_buckets_within_a_read_transaction_without_a_cache() -> Result<()> {
    let backend = MeasuredStorageBackend::new(Memory::default());
    let session = Session::open(
        TreeNodeFactory,
        backend.clone(),
        ResourceConfig::new(TreeNodeFactory::ID).with_cache_capacity(0),
    )
    .await?;

    backend.reset();
    let reader = session.begin_latest_read_transaction().await?;
    assert!(reader.get_node(ROOT_NODE_KEY).await?.is_some());
    let reads = backend.reads();
    assert!(reads > 0);

    assert!(reader.get_node(ROOT_NODE_KEY).await?.is_some());
    assert_eq!(backend.reads(), reads);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_never_touches_storage_when_aborting() -> Result<()> {
    let backend = MeasuredStorageBackend::new(Memory::default());
    let session = Session::open(
        TreeNodeFactory,
        backend.clone(),
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?;

    backend.reset();
    let mut writer = session.begin_write_transaction().await?;
    for _ in 0..10 {
        let key = writer.allocate_node_key()?;
        writer.insert(text(key, "discarded")).await?;
    }
    writer.abort()?;

    assert_eq!(backend.writes(), 0);
    assert_eq!(session.latest_revision(), 0);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_reopens_a_directory_with_its_stored_configuration() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let config = ResourceConfig::new(TreeNodeFactory::ID).with_transforms(["brotli", "checksum"]);

    let session = Session::open_directory(directory.path(), TreeNodeFactory, config.clone()).await?;
    let mut writer = session.begin_write_transaction().await?;
    let key = writer.allocate_node_key()?;
    writer.insert(text(key, "persisted")).await?;
    writer.commit().await?;
    session.close().await?;

    assert!(directory.path().join(CONFIG_FILE).exists());
    assert!(directory.path().join(DATA_DIR).is_dir());

    let reopened = Session::open_directory(
        directory.path(),
        TreeNodeFactory,
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?;
    assert_eq!(reopened.config(), &config);
    assert_eq!(reopened.latest_revision(), 1);

    let reader = reopened.begin_latest_read_transaction().await?;
    let node = reader.get_node(key).await?.expect("persisted node");
    assert_eq!(
        node.value().map(|value| value.value.clone()),
        Some(b"persisted".to_vec())
    );

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_refuses_a_directory_created_for_another_factory() -> Result<()> {
    let directory = tempfile::tempdir()?;
    Session::open_directory(
        directory.path(),
        TreeNodeFactory,
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?
    .close()
    .await?;

    let result = Session::open_directory(
        directory.path(),
        BlockNodeFactory,
        ResourceConfig::new(BlockNodeFactory::ID),
    )
    .await;
    assert!(matches!(result, Err(SaplingBucketError::Configuration(_))));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_detects_tampered_buckets() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let config = ResourceConfig::new(TreeNodeFactory::ID).with_transforms(["checksum"]);
    Session::open_directory(directory.path(), TreeNodeFactory, config.clone())
        .await?
        .close()
        .await?;

    for entry in std::fs::read_dir(directory.path().join(DATA_DIR))? {
        let path = entry?.path();
        let mut bytes = std::fs::read(&path)?;
        if let Some(first) = bytes.first_mut() {
            *first ^= 0xff;
        }
        std::fs::write(&path, bytes)?;
    }

    let result = Session::open_directory(directory.path(), TreeNodeFactory, config).await;
    assert!(matches!(
        result,
        Err(SaplingBucketError::Io(SaplingStorageError::Verification(_)))
    ));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_stores_raw_blocks_without_a_bootstrap_record() -> Result<()> {
    let session = Session::open(
        BlockNodeFactory,
        Memory::default(),
        ResourceConfig::new(BlockNodeFactory::ID),
    )
    .await?;
    assert_eq!(session.latest_revision(), 0);

    let empty = session.begin_read_transaction(0).await?;
    assert_eq!(empty.max_node_key(), None);
    assert_eq!(empty.get_node(0).await?, None);

    let mut writer = session.begin_write_transaction().await?;
    let key = writer.allocate_node_key()?;
    assert_eq!(key, 0);
    writer.insert(BlockNode::new(key, *b"block")).await?;
    writer.commit().await?;

    let mut writer = session.begin_write_transaction().await?;
    let removed = writer.remove(key).await?;
    assert!(removed.is_tombstone());
    assert_eq!(removed.hash(), 0);
    writer.commit().await?;

    let before = session.begin_read_transaction(1).await?;
    assert_eq!(
        before.get_node(key).await?.as_ref().and_then(BlockNode::bytes),
        Some(&b"block"[..])
    );
    let after = session.begin_read_transaction(2).await?;
    assert!(after.get_node(key).await?.expect("tombstone").is_tombstone());

    Ok(())
}
