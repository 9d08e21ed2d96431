//! Pipeline integration: each shipped transform, and stacks of them, must
//! be invisible to the caller - spill, drain, and get your bytes back.

use std::sync::{Arc, Mutex};

use spoolbuf::{ChecksumTransform, EncryptionTransform, Error, Lz4Transform, MemoryStore, SpoolBuffer};

const KEY: [u8; 32] = [0x5au8; 32];

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 17 % 253) as u8).collect()
}

fn shared_store(blob: &Arc<Mutex<Vec<u8>>>) -> impl Fn() -> MemoryStore + Send + 'static {
    let blob = Arc::clone(blob);
    move || MemoryStore::with_shared(Arc::clone(&blob))
}

#[test]
fn lz4_spill_roundtrip_and_shrink() {
    let blob = Arc::new(Mutex::new(Vec::new()));
    let mut buf = SpoolBuffer::builder()
        .threshold(1024)
        .store(shared_store(&blob))
        .transform(Lz4Transform::new())
        .build();

    // Highly compressible payload.
    let data = vec![b'z'; 256 * 1024];
    buf.append(&data).unwrap();
    assert!(buf.is_spilled());
    assert_eq!(buf.drain_to_vec().unwrap(), data);

    assert!(blob.lock().unwrap().len() < data.len() / 4);
}

#[test]
fn checksum_spill_roundtrip() {
    let data = sample(100_000);
    let mut buf = SpoolBuffer::builder()
        .threshold(256)
        .store(MemoryStore::new)
        .transform(ChecksumTransform::new())
        .build();

    buf.append(&data).unwrap();
    assert_eq!(buf.drain_to_vec().unwrap(), data);
}

#[test]
fn checksum_detects_blob_corruption() {
    use std::io::Write;

    let blob = Arc::new(Mutex::new(Vec::new()));
    let mut buf = SpoolBuffer::builder()
        .threshold(16)
        .store(shared_store(&blob))
        .transform(ChecksumTransform::new())
        .build();

    buf.append(&sample(1000)).unwrap();
    assert!(buf.is_spilled());

    // Push the pending frame into the blob, then flip one byte of the
    // stored bytes behind the buffer's back.
    buf.flush().unwrap();
    blob.lock().unwrap()[20] ^= 0xff;

    let mut out = [0u8; 64];
    assert!(matches!(
        buf.consume(&mut out),
        Err(Error::StoreCorrupt(_))
    ));
}

#[test]
fn encryption_spill_roundtrip() {
    let data = sample(200_000);
    let mut buf = SpoolBuffer::builder()
        .threshold(512)
        .store(MemoryStore::new)
        .transform(EncryptionTransform::new(KEY))
        .build();

    buf.append(&data).unwrap();
    assert_eq!(buf.drain_to_vec().unwrap(), data);
}

#[test]
fn compress_then_encrypt_stack() {
    let blob = Arc::new(Mutex::new(Vec::new()));
    let mut buf = SpoolBuffer::builder()
        .threshold(1024)
        .store(shared_store(&blob))
        .transform(Lz4Transform::new())
        .transform(EncryptionTransform::new(KEY))
        .build();

    // Compressible plaintext: with compression nearest the caller it still
    // shrinks, because the compressor runs before the cipher.
    let data = vec![b'q'; 512 * 1024];
    buf.append(&data).unwrap();
    assert_eq!(buf.drain_to_vec().unwrap(), data);

    assert!(blob.lock().unwrap().len() < data.len() / 4);
}

#[test]
fn encrypt_then_compress_stack() {
    // The reverse stacking is pointless in practice but must still be
    // lossless.
    let data = sample(64 * 1024);
    let mut buf = SpoolBuffer::builder()
        .threshold(64)
        .store(MemoryStore::new)
        .transform(EncryptionTransform::new(KEY))
        .transform(Lz4Transform::new())
        .build();

    buf.append(&data).unwrap();
    assert_eq!(buf.drain_to_vec().unwrap(), data);
}

#[test]
fn full_stack_checksum_compress_encrypt() {
    let data = sample(300_000);
    let mut buf = SpoolBuffer::builder()
        .threshold(4096)
        .store(MemoryStore::new)
        .transform(ChecksumTransform::new())
        .transform(Lz4Transform::new())
        .transform(EncryptionTransform::new(KEY))
        .build();

    for piece in data.chunks(10_000) {
        buf.append(piece).unwrap();
    }
    assert_eq!(buf.drain_to_vec().unwrap(), data);
}

#[test]
fn pipeline_survives_truncate_and_reset() {
    let data = sample(50_000);
    let mut buf = SpoolBuffer::builder()
        .threshold(128)
        .store(MemoryStore::new)
        .transform(Lz4Transform::new())
        .transform(EncryptionTransform::new(KEY))
        .build();

    buf.append(&data).unwrap();
    buf.truncate(1000).unwrap();
    assert_eq!(buf.drain_to_vec().unwrap(), &data[..1000]);

    buf.reset().unwrap();
    buf.append(b"after reset").unwrap();
    assert_eq!(buf.drain_to_vec().unwrap(), b"after reset");
}
