//! Authenticated Encryption Transform
//!
//! Encrypts the spill stream with AES-256-GCM so spilled bytes never reach
//! the store in the clear, and any tampering fails authentication on the
//! way back.
//!
//! ## Stream Format
//!
//! ```text
//! ┌───────┬────────────┬────────────────────────────────┐
//! │ Magic │ Base Nonce │ Chunk ... Chunk (final flagged)│
//! │ (4 B) │ (12 B)     │                                │
//! └───────┴────────────┴────────────────────────────────┘
//!
//! Chunk:
//! ┌──────┬──────────────┬─────────────────────────┐
//! │ Flag │ Cipher Size  │ Ciphertext + GCM tag    │
//! │ (1 B)│ (4 bytes LE) │ (N + 16 bytes)          │
//! └──────┴──────────────┴─────────────────────────┘
//! ```
//!
//! Plaintext is sealed in chunks of up to 64 KiB. Each chunk's nonce is the
//! random base nonce XORed with the chunk counter, so nonces never repeat
//! within a stream and two streams never share one. The flag byte (`more`
//! or `final`) is bound into the GCM tag as associated data, which makes
//! chunk reordering and stream truncation fail authentication instead of
//! decoding short: the writer always seals a final-flagged chunk (possibly
//! empty) on finish, and the reader requires it before reporting EOF.

use std::io::{self, Read, Write};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use spoolbuf_core::{Error, Result, SpillWriter, Transform};

const STREAM_MAGIC: [u8; 4] = *b"SBX1";
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Plaintext bytes sealed per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

const FLAG_MORE: u8 = 0x00;
const FLAG_FINAL: u8 = 0x01;

/// AES-256-GCM encryption for spill streams.
pub struct EncryptionTransform {
    key: [u8; 32],
}

impl EncryptionTransform {
    /// Build a transform around a caller-supplied 256-bit key.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }
}

impl Transform for EncryptionTransform {
    fn wrap_writer(&self, mut inner: Box<dyn SpillWriter>) -> Result<Box<dyn SpillWriter>> {
        let base_nonce: [u8; NONCE_SIZE] = Aes256Gcm::generate_nonce(&mut OsRng).into();

        inner.write_all(&STREAM_MAGIC)?;
        inner.write_all(&base_nonce)?;

        Ok(Box::new(EncryptedWriter {
            cipher: self.cipher(),
            inner,
            base_nonce,
            counter: 0,
            chunk: Vec::with_capacity(CHUNK_SIZE),
            finished: false,
        }))
    }

    fn wrap_reader(&self, mut inner: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        let mut magic = [0u8; 4];
        inner
            .read_exact(&mut magic)
            .map_err(|e| Error::StoreCorrupt(format!("encrypted stream header: {e}")))?;
        if magic != STREAM_MAGIC {
            return Err(Error::StoreCorrupt(
                "bad encrypted stream magic".to_string(),
            ));
        }

        let mut base_nonce = [0u8; NONCE_SIZE];
        inner
            .read_exact(&mut base_nonce)
            .map_err(|e| Error::StoreCorrupt(format!("encrypted stream nonce: {e}")))?;

        Ok(Box::new(EncryptedReader {
            cipher: self.cipher(),
            inner,
            base_nonce,
            counter: 0,
            current: io::Cursor::new(Vec::new()),
            done: false,
        }))
    }
}

/// Nonce for chunk `counter`: the base nonce with the counter XORed into
/// its trailing eight bytes.
fn chunk_nonce(base: &[u8; NONCE_SIZE], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (b, c) in nonce[4..].iter_mut().zip(counter.to_le_bytes()) {
        *b ^= c;
    }
    nonce
}

struct EncryptedWriter {
    cipher: Aes256Gcm,
    inner: Box<dyn SpillWriter>,
    base_nonce: [u8; NONCE_SIZE],
    counter: u64,
    chunk: Vec<u8>,
    finished: bool,
}

impl EncryptedWriter {
    fn seal_chunk(&mut self, flag: u8) -> io::Result<()> {
        let nonce = chunk_nonce(&self.base_nonce, self.counter);
        self.counter += 1;

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &self.chunk,
                    aad: &[flag],
                },
            )
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "aes-gcm encryption failed"))?;
        self.chunk.clear();

        self.inner.write_all(&[flag])?;
        self.inner
            .write_all(&(ciphertext.len() as u32).to_le_bytes())?;
        self.inner.write_all(&ciphertext)?;
        Ok(())
    }
}

impl Write for EncryptedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "encrypted stream already finished",
            ));
        }

        let mut rest = buf;
        while !rest.is_empty() {
            let room = CHUNK_SIZE - self.chunk.len();
            let take = room.min(rest.len());
            self.chunk.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.chunk.len() == CHUNK_SIZE {
                self.seal_chunk(FLAG_MORE)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Plaintext is sealed only when a chunk fills or the stream
        // finishes; flush passes through without cutting a chunk.
        self.inner.flush()
    }
}

impl SpillWriter for EncryptedWriter {
    fn finish(&mut self) -> Result<()> {
        if !self.finished {
            // The final chunk is sealed even when empty: its tag is what
            // proves the stream was not cut short.
            self.seal_chunk(FLAG_FINAL)?;
            self.finished = true;
        }
        self.inner.finish()
    }
}

struct EncryptedReader {
    cipher: Aes256Gcm,
    inner: Box<dyn Read + Send>,
    base_nonce: [u8; NONCE_SIZE],
    counter: u64,
    current: io::Cursor<Vec<u8>>,
    done: bool,
}

impl EncryptedReader {
    /// Read and authenticate the next chunk. Returns false once the final
    /// chunk has been consumed.
    fn next_chunk(&mut self) -> io::Result<bool> {
        if self.done {
            return Ok(false);
        }

        let mut flag = [0u8; 1];
        read_section(&mut self.inner, &mut flag, "chunk flag")?;
        if flag[0] != FLAG_MORE && flag[0] != FLAG_FINAL {
            return Err(corrupt("unknown chunk flag"));
        }

        let mut len_buf = [0u8; 4];
        read_section(&mut self.inner, &mut len_buf, "chunk length")?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len < TAG_SIZE || len > CHUNK_SIZE + TAG_SIZE {
            return Err(corrupt("chunk length field out of range"));
        }

        let mut ciphertext = vec![0u8; len];
        read_section(&mut self.inner, &mut ciphertext, "chunk body")?;

        let nonce = chunk_nonce(&self.base_nonce, self.counter);
        self.counter += 1;

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &[flag[0]],
                },
            )
            .map_err(|_| corrupt("spill stream failed authentication"))?;

        if flag[0] == FLAG_FINAL {
            self.done = true;
        }
        self.current = io::Cursor::new(plaintext);
        Ok(true)
    }
}

impl Read for EncryptedReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.current.read(out)?;
            if n > 0 {
                return Ok(n);
            }
            if !self.next_chunk()? {
                return Ok(0);
            }
        }
    }
}

fn corrupt(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// Fill `buf` exactly; any EOF is a truncated stream, which for an
/// authenticated format is corruption.
fn read_section(reader: &mut impl Read, buf: &mut [u8], what: &str) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(corrupt(&format!("encrypted stream truncated in {what}"))),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spoolbuf_core::{MemoryStore, SpillStore};
    use std::sync::{Arc, Mutex};

    const KEY: [u8; 32] = [7u8; 32];

    fn encode(store: &mut MemoryStore, data: &[u8]) {
        let transform = EncryptionTransform::new(KEY);
        let mut writer = transform.wrap_writer(store.create().unwrap()).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
    }

    fn decode(store: &mut MemoryStore, key: [u8; 32]) -> io::Result<Vec<u8>> {
        let transform = EncryptionTransform::new(key);
        let mut reader = transform.wrap_reader(store.open().unwrap()).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_roundtrip() {
        let mut store = MemoryStore::new();
        encode(&mut store, b"top secret");
        assert_eq!(decode(&mut store, KEY).unwrap(), b"top secret");
    }

    #[test]
    fn test_roundtrip_empty() {
        let mut store = MemoryStore::new();
        encode(&mut store, b"");
        assert_eq!(decode(&mut store, KEY).unwrap(), b"");
    }

    #[test]
    fn test_roundtrip_multiple_chunks() {
        let mut store = MemoryStore::new();
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 256) as u8).collect();
        encode(&mut store, &data);
        assert_eq!(decode(&mut store, KEY).unwrap(), data);
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let blob = Arc::new(Mutex::new(Vec::new()));
        let mut store = MemoryStore::with_shared(Arc::clone(&blob));
        encode(&mut store, b"find me if you can");

        let stored = blob.lock().unwrap().clone();
        let needle = b"find me";
        assert!(!stored
            .windows(needle.len())
            .any(|window| window == needle));
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut store = MemoryStore::new();
        encode(&mut store, b"keyed");
        let err = decode(&mut store, [8u8; 32]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let blob = Arc::new(Mutex::new(Vec::new()));
        let mut store = MemoryStore::with_shared(Arc::clone(&blob));
        encode(&mut store, b"tamper evident");

        {
            let mut stored = blob.lock().unwrap();
            let last = stored.len() - 1;
            stored[last] ^= 0x80;
        }

        let err = decode(&mut store, KEY).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_stream_fails() {
        let blob = Arc::new(Mutex::new(Vec::new()));
        let mut store = MemoryStore::with_shared(Arc::clone(&blob));
        encode(&mut store, b"no silent truncation");

        {
            let mut stored = blob.lock().unwrap();
            let keep = stored.len() - 6;
            stored.truncate(keep);
        }

        let err = decode(&mut store, KEY).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_fresh_nonce_per_stream() {
        let blob_a = Arc::new(Mutex::new(Vec::new()));
        let blob_b = Arc::new(Mutex::new(Vec::new()));

        let mut store_a = MemoryStore::with_shared(Arc::clone(&blob_a));
        let mut store_b = MemoryStore::with_shared(Arc::clone(&blob_b));
        encode(&mut store_a, b"same plaintext");
        encode(&mut store_b, b"same plaintext");

        // Same key, same plaintext, but the random base nonce makes the
        // streams differ.
        assert_ne!(&*blob_a.lock().unwrap(), &*blob_b.lock().unwrap());
    }
}
