use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hex-encoded BLAKE3 digest of a file's full content.
pub fn hash_file(file: &Path) -> io::Result<String> {
    let f = File::open(file)?;
    hash_reader(BufReader::with_capacity(READ_BUFFER_SIZE, f))
}

pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Writer adapter that hashes every byte passing through it.
///
/// Used while extracting archives so content is hashed without a second read.
pub struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
        }
    }

    /// Flush and return `(hex digest, bytes written)`.
    pub fn finish(mut self) -> io::Result<(String, u64)> {
        self.inner.flush()?;
        Ok((self.hasher.finalize().to_hex().to_string(), self.written))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_writer_matches_hash_reader() {
        let data = vec![0x5Au8; 200_000];
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(&data).unwrap();
        let (digest, written) = writer.finish().unwrap();

        assert_eq!(written, data.len() as u64);
        assert_eq!(digest, hash_reader(&data[..]).unwrap());
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let a = hash_reader(&b"alpha"[..]).unwrap();
        let b = hash_reader(&b"beta"[..]).unwrap();
        assert_ne!(a, b);
    }
}
