//! Content-addressed storage round trip: hash, shard, store, read back.

use bytes::Bytes;
use chorus_core::cid::{compute_cid, compute_cid_from_reader};
use chorus_storage::{shard_cid, unshard_key, Bucket, LocalBucket};

#[tokio::test]
async fn cid_write_read_returns_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = LocalBucket::new(dir.path()).await.unwrap();

    let payload = Bytes::from((0..100_000u32).flat_map(|i| i.to_le_bytes()).collect::<Vec<u8>>());
    let cid = compute_cid(&payload);
    let key = shard_cid(&cid);

    bucket.write_all(&key, payload.clone()).await.unwrap();

    let read_back = bucket.read(&key).await.unwrap();
    assert_eq!(read_back, payload);

    // the stored bytes still hash to the CID they were stored under
    assert_eq!(
        compute_cid_from_reader(std::io::Cursor::new(&read_back[..])).unwrap(),
        cid
    );
    assert_eq!(unshard_key(&key), cid);
}

#[tokio::test]
async fn rewriting_same_key_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = LocalBucket::new(dir.path()).await.unwrap();

    let payload = Bytes::from_static(b"same bytes every time");
    let cid = compute_cid(&payload);
    let key = shard_cid(&cid);

    bucket.write_all(&key, payload.clone()).await.unwrap();
    let first = bucket.attributes(&key).await.unwrap();
    bucket.write_all(&key, payload.clone()).await.unwrap();
    let second = bucket.attributes(&key).await.unwrap();

    assert_eq!(first.size, second.size);
    assert_eq!(first.digest, second.digest);
}

#[tokio::test]
async fn distinct_payloads_never_collide_under_sharding() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = LocalBucket::new(dir.path()).await.unwrap();

    for i in 0..50u8 {
        let payload = Bytes::from(vec![i; 64]);
        let cid = compute_cid(&payload);
        bucket.write_all(&shard_cid(&cid), payload).await.unwrap();
    }

    for i in 0..50u8 {
        let payload = Bytes::from(vec![i; 64]);
        let cid = compute_cid(&payload);
        let read_back = bucket.read(&shard_cid(&cid)).await.unwrap();
        assert_eq!(read_back, payload);
    }
}
