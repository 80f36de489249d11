use anyhow::Result;
use pretty_assertions::assert_eq;
use sapling_bucket::{ResourceConfig, SaplingBucketError, Session, TransactionState};
use futures_util::future::try_join_all;
use sapling_node::{
    BlockNode, BlockNodeFactory, NodeRecord, ROOT_NODE_KEY, TreeNode, TreeNodeFactory,
    ValueDelegate,
};
use sapling_storage::MemoryStorageBackend;

type Backend = MemoryStorageBackend<Vec<u8>, Vec<u8>>;

async fn open_session(backend: Backend) -> Result<Session<TreeNodeFactory, Backend>> {
    Ok(Session::open(
        TreeNodeFactory,
        backend,
        ResourceConfig::new(TreeNodeFactory::ID),
    )
    .await?)
}

fn text(key: u64, value: &str) -> TreeNode {
    TreeNode::text(key, ROOT_NODE_KEY, ValueDelegate::new(0, value))
}

#[test_log::test(tokio::test)]
async fn it_bootstraps_an_empty_store_with_revision_zero() -> Result<()> {
    let session = open_session(Backend::default()).await?;
    assert_eq!(session.latest_revision(), 0);

    let reader = session.begin_read_transaction(0).await?;
    assert_eq!(reader.max_node_key(), Some(ROOT_NODE_KEY));
    let root = reader.get_node(ROOT_NODE_KEY).await?;
    assert_eq!(root, Some(TreeNode::document_root()).map(|mut root| {
        root.set_hash(root.content_hash());
        root
    }));
    assert_eq!(reader.get_node(1).await?, None);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_keeps_old_revisions_readable_after_a_delete() -> Result<()> {
    let session = open_session(Backend::default()).await?;

    let mut writer = session.begin_write_transaction().await?;
    for expected in 1..=100 {
        let key = writer.allocate_node_key()?;
        assert_eq!(key, expected);
        writer.insert(text(key, &format!("node {key}"))).await?;
    }
    assert_eq!(writer.commit().await?, 1);

    let first = session.begin_read_transaction(1).await?;
    let node = first.get_node(50).await?.expect("node 50 is present");
    assert_eq!(node.value().map(|value| value.value.clone()), Some(b"node 50".to_vec()));

    let mut writer = session.begin_write_transaction().await?;
    let tombstone = writer.remove(50).await?;
    assert!(tombstone.is_tombstone());
    assert_eq!(writer.commit().await?, 2);

    assert!(!first.get_node(50).await?.expect("still present").is_tombstone());

    let second = session.begin_read_transaction(2).await?;
    assert!(second.get_node(50).await?.expect("tombstone").is_tombstone());
    assert!(!second.get_node(49).await?.expect("untouched").is_tombstone());

    let still_first = session.begin_read_transaction(1).await?;
    assert!(!still_first.get_node(50).await?.expect("still present").is_tombstone());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_hides_uncommitted_writes_from_readers() -> Result<()> {
    let session = open_session(Backend::default()).await?;
    let reader = session.begin_latest_read_transaction().await?;

    let mut writer = session.begin_write_transaction().await?;
    let key = writer.allocate_node_key()?;
    writer.insert(text(key, "pending")).await?;
    assert!(writer.get_node(key).await?.is_some());

    assert_eq!(reader.get_node(key).await?, None);
    let during = session.begin_latest_read_transaction().await?;
    assert_eq!(during.get_node(key).await?, None);

    writer.commit().await?;
    assert_eq!(reader.get_node(key).await?, None);
    assert_eq!(during.get_node(key).await?, None);

    let after = session.begin_latest_read_transaction().await?;
    assert!(after.get_node(key).await?.is_some());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_never_reissues_node_keys() -> Result<()> {
    let backend = Backend::default();
    let session = open_session(backend.clone()).await?;

    let mut writer = session.begin_write_transaction().await?;
    assert_eq!(writer.allocate_node_key()?, 1);
    assert_eq!(writer.allocate_node_key()?, 2);
    writer.abort()?;
    assert_eq!(writer.state(), TransactionState::Aborted);

    let mut writer = session.begin_write_transaction().await?;
    let key = writer.allocate_node_key()?;
    assert_eq!(key, 3);
    writer.insert(text(key, "kept")).await?;
    writer.commit().await?;
    drop(session);

    let reopened = open_session(backend).await?;
    let mut writer = reopened.begin_write_transaction().await?;
    assert_eq!(writer.allocate_node_key()?, 4);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_allows_a_single_writer_at_a_time() -> Result<()> {
    let session = open_session(Backend::default()).await?;

    let writer = session.begin_write_transaction().await?;
    assert!(session.has_active_writer());
    assert!(matches!(
        session.begin_write_transaction().await,
        Err(SaplingBucketError::ConcurrentWriteViolation)
    ));

    drop(writer);
    assert!(!session.has_active_writer());
    let mut writer = session.begin_write_transaction().await?;
    writer.commit().await?;
    assert!(!session.has_active_writer());
    session.begin_write_transaction().await?;

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_rejects_revisions_that_were_never_committed() -> Result<()> {
    let session = open_session(Backend::default()).await?;

    assert!(matches!(
        session.begin_read_transaction(5).await,
        Err(SaplingBucketError::InvalidRevision {
            requested: 5,
            latest: Some(0)
        })
    ));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_resolves_every_historic_revision() -> Result<()> {
    let session = open_session(Backend::default()).await?;

    for revision in 1..=20u64 {
        let mut writer = session.begin_write_transaction().await?;
        let key = writer.allocate_node_key()?;
        writer.insert(text(key, &format!("revision {revision}"))).await?;
        assert_eq!(writer.commit().await?, revision);
    }

    for revision in 0..=20u64 {
        let reader = session.begin_read_transaction(revision).await?;
        assert_eq!(reader.revision(), revision);
        assert_eq!(reader.max_node_key(), Some(revision));
        assert!(reader.get_node(revision).await?.is_some());
        assert_eq!(reader.get_node(revision + 1).await?, None);
    }

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_refuses_invalid_record_operations() -> Result<()> {
    let session = open_session(Backend::default()).await?;
    let mut writer = session.begin_write_transaction().await?;

    assert!(matches!(
        writer.insert(text(7, "unallocated")).await,
        Err(SaplingBucketError::InvalidOperation(_))
    ));

    let key = writer.allocate_node_key()?;
    writer.insert(text(key, "first")).await?;
    assert!(matches!(
        writer.insert(text(key, "again")).await,
        Err(SaplingBucketError::InvalidOperation(_))
    ));

    let orphan = writer.allocate_node_key()?;
    assert!(matches!(
        writer
            .insert(TreeNode::text(orphan, 999, ValueDelegate::new(0, "orphan")))
            .await,
        Err(SaplingBucketError::InvalidOperation(_))
    ));

    assert!(matches!(
        writer.remove(ROOT_NODE_KEY).await,
        Err(SaplingBucketError::InvalidOperation(_))
    ));

    let moved = TreeNode::text(key, orphan, ValueDelegate::new(0, "moved"));
    assert!(matches!(
        writer.update(moved).await,
        Err(SaplingBucketError::InvalidOperation(_))
    ));

    writer.remove(key).await?;
    assert!(matches!(
        writer.remove(key).await,
        Err(SaplingBucketError::InvalidOperation(_))
    ));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_closes_transactions_and_sessions() -> Result<()> {
    let session = open_session(Backend::default()).await?;

    let mut writer = session.begin_write_transaction().await?;
    writer.commit().await?;
    assert_eq!(writer.state(), TransactionState::Committed);
    assert!(matches!(
        writer.allocate_node_key(),
        Err(SaplingBucketError::TransactionClosed)
    ));
    assert!(matches!(writer.abort(), Err(SaplingBucketError::TransactionClosed)));

    let first = session.begin_latest_read_transaction().await?;
    let second = session.begin_latest_read_transaction().await?;
    assert_eq!(session.active_readers(), 2);

    first.close();
    first.close();
    assert_eq!(session.active_readers(), 1);
    assert!(matches!(
        first.get_node(ROOT_NODE_KEY).await,
        Err(SaplingBucketError::TransactionClosed)
    ));

    session.close().await?;
    session.close().await?;
    assert!(matches!(
        second.get_node(ROOT_NODE_KEY).await,
        Err(SaplingBucketError::SessionClosed)
    ));
    assert!(matches!(
        session.begin_write_transaction().await,
        Err(SaplingBucketError::SessionClosed)
    ));

    drop(second);
    assert_eq!(session.active_readers(), 0);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn it_interns_names_and_metadata_per_revision() -> Result<()> {
    let session = open_session(Backend::default()).await?;

    let mut writer = session.begin_write_transaction().await?;
    let item = writer.create_name_key("item").await?;
    assert_eq!(writer.create_name_key("item").await?, item);
    assert_ne!(writer.create_name_key("other").await?, item);
    writer.set_meta(b"author".to_vec(), b"ada".to_vec()).await?;
    assert_eq!(writer.name(item).await?, Some("item".to_string()));
    writer.commit().await?;

    let mut writer = session.begin_write_transaction().await?;
    writer.set_meta(b"author".to_vec(), b"grace".to_vec()).await?;
    writer.commit().await?;

    let first = session.begin_read_transaction(1).await?;
    assert_eq!(first.name(item).await?, Some("item".to_string()));
    assert_eq!(first.get_meta(b"author").await?, Some(b"ada".to_vec()));

    let second = session.begin_read_transaction(2).await?;
    assert_eq!(second.name(item).await?, Some("item".to_string()));
    assert_eq!(second.get_meta(b"author").await?, Some(b"grace".to_vec()));

    let bootstrap = session.begin_read_transaction(0).await?;
    assert_eq!(bootstrap.name(item).await?, None);

    Ok(())
}

fn block_value(revision: u64, key: u64) -> Vec<u8> {
    format!("r{revision} {key}").into_bytes()
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn it_isolates_readers_from_concurrent_commits() -> Result<()> {
    const BLOCKS: u64 = 200;
    const REVISIONS: u64 = 12;

    let session = Session::open(
        BlockNodeFactory,
        Backend::default(),
        ResourceConfig::new(BlockNodeFactory::ID),
    )
    .await?;

    let mut writer = session.begin_write_transaction().await?;
    for _ in 0..BLOCKS {
        let key = writer.allocate_node_key()?;
        writer.insert(BlockNode::new(key, block_value(1, key))).await?;
    }
    assert_eq!(writer.commit().await?, 1);

    let mut readers = Vec::new();
    for _ in 0..2 {
        let reader = session.begin_read_transaction(1).await?;
        readers.push(tokio::spawn(async move {
            for _ in 0..20 {
                for key in 0..BLOCKS {
                    let node = reader.get_node(key).await?;
                    assert_eq!(
                        node.as_ref().and_then(BlockNode::bytes),
                        Some(&block_value(1, key)[..])
                    );
                }
                tokio::task::yield_now().await;
            }
            anyhow::Ok(())
        }));
    }
    for _ in 0..2 {
        let session = session.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..40 {
                let reader = session.begin_latest_read_transaction().await?;
                let revision = reader.revision();
                for key in 0..BLOCKS {
                    let node = reader.get_node(key).await?;
                    assert_eq!(
                        node.as_ref().and_then(BlockNode::bytes),
                        Some(&block_value(revision, key)[..])
                    );
                }
                tokio::task::yield_now().await;
            }
            anyhow::Ok(())
        }));
    }

    for revision in 2..=REVISIONS {
        let mut writer = session.begin_write_transaction().await?;
        for key in 0..BLOCKS {
            writer.update(BlockNode::new(key, block_value(revision, key))).await?;
        }
        assert_eq!(writer.commit().await?, revision);
        tokio::task::yield_now().await;
    }

    for outcome in try_join_all(readers).await? {
        outcome?;
    }
    assert_eq!(session.latest_revision(), REVISIONS);

    Ok(())
}
