//! Dedicated-parity scenarios: parity loss on write, data loss on read

mod common;

use redmux::testutil::{BlockDevice, FaultyDevice};
use redmux::{ByteStream, DedicatedParity, State};

use common::{random_data, read_to_end, sha256};

const MIB: usize = 1 << 20;

#[tokio::test]
async fn survives_parity_member_failure() {
    let data_streams: Vec<Box<dyn ByteStream>> = (0..4)
        .map(|_| Box::new(BlockDevice::new(MIB)) as Box<dyn ByteStream>)
        .collect();
    let mut dp = DedicatedParity::new(Box::new(FaultyDevice::new(MIB, 100)), data_streams);

    let data = random_data(4 * MIB);
    let digest = sha256(&data);

    dp.open().await;

    // the parity member dies 100 writes in; the stripe keeps going
    for piece in data.chunks(1024) {
        assert_eq!(dp.write(piece).await, Ok(1024));
    }
    assert_eq!(dp.health(), State::Degraded);

    dp.close().await.unwrap();
    assert_eq!(dp.open().await, State::Degraded);

    let reread = read_to_end(&mut dp, 1024).await;

    assert_eq!(reread.len(), data.len());
    assert_eq!(sha256(&reread), digest);
    assert_eq!(dp.health(), State::Degraded);
}

#[tokio::test]
async fn reconstructs_data_member_on_degraded_read() {
    let mut data_streams: Vec<Box<dyn ByteStream>> = Vec::new();
    for i in 0..4 {
        if i == 2 {
            // healthy while writing, trips 10 reads into the read-back
            data_streams.push(Box::new(FaultyDevice::failing_reads(64 << 10, 10)));
        } else {
            data_streams.push(Box::new(BlockDevice::new(64 << 10)));
        }
    }
    let mut dp = DedicatedParity::new(Box::new(BlockDevice::new(64 << 10)), data_streams);

    let data = random_data(256 << 10);
    let digest = sha256(&data);

    dp.open().await;
    for piece in data.chunks(1024) {
        assert_eq!(dp.write(piece).await, Ok(1024));
    }
    dp.close().await.unwrap();

    dp.open().await;

    // every read past the trip point reconstructs member 2's share from
    // the surviving shares and parity
    let reread = read_to_end(&mut dp, 1024).await;

    assert_eq!(reread.len(), data.len());
    assert_eq!(sha256(&reread), digest);
    assert_eq!(dp.health(), State::Degraded);
}

#[tokio::test]
async fn second_failure_is_fatal() {
    let data_streams: Vec<Box<dyn ByteStream>> = (0..4)
        .map(|_| Box::new(FaultyDevice::new(MIB, 50)) as Box<dyn ByteStream>)
        .collect();
    let mut dp = DedicatedParity::new(Box::new(BlockDevice::new(MIB)), data_streams);

    let data = random_data(MIB);

    dp.open().await;

    let mut failed = false;
    for piece in data.chunks(1024) {
        if dp.write(piece).await.is_err() {
            failed = true;
            break;
        }
    }

    // all four data members trip on the same write: one loss is absorbed,
    // the second is fatal
    assert!(failed);
    assert_eq!(dp.health(), State::Failed);
    assert!(dp.write(&data[..1024]).await.is_err());
}
