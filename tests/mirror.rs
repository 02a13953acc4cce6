//! Mirror scenarios: member loss, replacement and rebuild

mod common;

use redmux::testutil::{BlockDevice, FaultyDevice};
use redmux::{Mirror, State};

use common::{random_data, read_to_end, sha256, write_in_chunks};

const MIB: usize = 1 << 20;

#[tokio::test]
async fn mirror_tolerates_member_failure_and_rebuilds() {
    let m = Mirror::new(vec![
        Box::new(BlockDevice::new(MIB)),
        Box::new(FaultyDevice::new(MIB, 20)),
    ]);

    let data = random_data(MIB);
    let digest = sha256(&data);

    m.open().await;

    // the faulty member dies 20 writes in; every write still lands whole
    for piece in data.chunks(1024) {
        assert_eq!(m.write(piece).await, Ok(1024));
    }
    assert_eq!(m.health().await, State::Degraded);

    m.close().await.unwrap();

    // swap in a fresh stream; replace blocks until the rebuild finished
    // and leaves the mirror closed
    m.replace(1, Box::new(BlockDevice::new(MIB))).await.unwrap();

    assert_eq!(m.open().await, State::Ok);

    let mut handle = m.clone();
    let reread = read_to_end(&mut handle, 1024).await;

    assert_eq!(reread.len(), data.len());
    assert_eq!(sha256(&reread), digest);
}

#[tokio::test]
async fn reopen_is_idempotent() {
    let m = Mirror::new(vec![
        Box::new(BlockDevice::new(64 << 10)),
        Box::new(BlockDevice::new(64 << 10)),
    ]);

    let data = random_data(64 << 10);
    let digest = sha256(&data);

    m.open().await;
    write_in_chunks(&mut m.clone(), &data, 1024).await;
    m.close().await.unwrap();

    // an extra open/close cycle must not disturb the replay position
    m.open().await;
    m.close().await.unwrap();

    m.open().await;
    let reread = read_to_end(&mut m.clone(), 1024).await;
    assert_eq!(sha256(&reread), digest);
}
