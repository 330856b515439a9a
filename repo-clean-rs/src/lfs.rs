use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::reader::StreamReader;
use crate::record::Blob;

pub const LFS_SPEC_URL: &str = "https://git-lfs.github.com/spec/v1";

/// A well-formed pointer never exceeds this; anything longer is a bug.
pub const MAX_POINTER_LEN: usize = 200;

/// Render a pointer file for a payload with the given content hash and size.
pub fn pointer_bytes(sha256_hex: &str, size: u64) -> io::Result<Vec<u8>> {
    let rendered = format!("version {LFS_SPEC_URL}\noid sha256:{sha256_hex}\nsize {size}\n");
    if rendered.len() > MAX_POINTER_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("LFS pointer grew to {} bytes", rendered.len()),
        ));
    }
    Ok(rendered.into_bytes())
}

/// Replace a blob's payload with an LFS pointer.
///
/// The payload is streamed out of the reader chunk by chunk: hashed with
/// SHA-256 and written into the repository's LFS object store under
/// `lfs/objects/xx/yy/<sha256>`. The blob record is rewritten in place to
/// describe the pointer (its oid becomes the SHA-1 of the pointer bytes, the
/// way the object store will see it), and the pointer bytes are returned for
/// emission.
pub fn convert_blob<R: Read>(
    reader: &mut StreamReader<R>,
    blob: &mut Blob,
    git_dir: &Path,
) -> io::Result<Vec<u8>> {
    let payload_size = blob.size;
    let tmp_path = lfs_temp_path(git_dir, blob.old_mark)?;
    let mut hasher = Sha256::new();
    {
        let mut tmp = File::create(&tmp_path)?;
        let copy = reader.copy_exact(payload_size, |chunk| {
            hasher.update(chunk);
            tmp.write_all(chunk)
        });
        if let Err(e) = copy {
            drop(tmp);
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        tmp.flush()?;
    }
    let sha256_hex = hex::encode(hasher.finalize());

    let object_dir = git_dir
        .join("lfs")
        .join("objects")
        .join(&sha256_hex[0..2])
        .join(&sha256_hex[2..4]);
    fs::create_dir_all(&object_dir)?;
    let object_path = object_dir.join(&sha256_hex);
    if object_path.exists() {
        // content-addressed store, duplicate payloads collapse
        let _ = fs::remove_file(&tmp_path);
    } else {
        fs::rename(&tmp_path, &object_path)?;
    }

    let pointer = pointer_bytes(&sha256_hex, payload_size)?;
    let mut sha1 = Sha1::new();
    sha1.update(&pointer);
    blob.oid = hex::encode(sha1.finalize()).into_bytes();
    blob.size = pointer.len() as u64;
    Ok(pointer)
}

fn lfs_temp_path(git_dir: &Path, mark: u32) -> io::Result<PathBuf> {
    let tmp_dir = git_dir.join("lfs").join("tmp");
    fs::create_dir_all(&tmp_dir)?;
    Ok(tmp_dir.join(format!("incoming-{}-{}", std::process::id(), mark)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn reader(bytes: &[u8]) -> StreamReader<Cursor<Vec<u8>>> {
        StreamReader::new(Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn pointer_matches_the_published_layout() {
        let sha = "6c17f2a25cd2b1795e82e5bdc4af9d1d24add16f9e14d76c1e0d4e27e4b29bdc";
        let ptr = pointer_bytes(sha, 1073741824).unwrap();
        let text = String::from_utf8(ptr.clone()).unwrap();
        assert!(text.starts_with("version https://git-lfs.github.com/spec/v1\n"));
        assert!(text.contains(&format!("oid sha256:{sha}\n")));
        assert!(text.ends_with("size 1073741824\n"));
        assert!(ptr.len() <= MAX_POINTER_LEN);
    }

    #[test]
    fn conversion_stores_payload_and_rewrites_the_blob() {
        let temp = TempDir::new().unwrap();
        let git_dir = temp.path();
        let payload = b"big binary payload".to_vec();
        let mut r = reader(&payload);
        let mut blob = Blob {
            old_mark: 7,
            mark: None,
            oid: b"401fb905f1abf1d35331d0cddc8556ba23c1a212".to_vec(),
            size: payload.len() as u64,
            dumped: true,
        };
        let pointer = convert_blob(&mut r, &mut blob, git_dir).unwrap();

        let mut hasher = Sha256::new();
        hasher.update(&payload);
        let sha256_hex = hex::encode(hasher.finalize());
        let stored = git_dir
            .join("lfs")
            .join("objects")
            .join(&sha256_hex[0..2])
            .join(&sha256_hex[2..4])
            .join(&sha256_hex);
        assert_eq!(fs::read(&stored).unwrap(), payload);

        assert_eq!(blob.size, pointer.len() as u64);
        let mut sha1 = Sha1::new();
        sha1.update(&pointer);
        assert_eq!(blob.oid, hex::encode(sha1.finalize()).into_bytes());
        let text = String::from_utf8(pointer).unwrap();
        assert!(text.contains(&format!("oid sha256:{sha256_hex}")));
        assert!(text.contains(&format!("size {}", payload.len())));
    }
}
