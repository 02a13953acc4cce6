//! Shared helpers for the scenario tests
#![allow(dead_code)]

use rand::RngCore;
use redmux::{ByteStream, Error};
use sha2::{Digest, Sha256};

pub fn random_data(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Write `data` in fixed-size chunks, asserting every chunk lands whole.
pub async fn write_in_chunks<S: ByteStream + ?Sized>(stream: &mut S, data: &[u8], chunk: usize) {
    for piece in data.chunks(chunk) {
        let n = stream.write(piece).await.expect("write");
        assert_eq!(n, piece.len());
    }
}

/// Read in fixed-size chunks until end of stream.
pub async fn read_to_end<S: ByteStream + ?Sized>(stream: &mut S, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];

    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(Error::Eof) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(err) => panic!("read: {err}"),
        }
    }

    out
}
