use crate::model::{HashCode, HASH_WIDTH};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub struct FileHasher;

impl FileHasher {
    pub async fn hash<P>(file: P) -> Result<HashCode, FileHasherError>
    where
        P: AsRef<Path>,
    {
        let f = File::open(file.as_ref()).map_err(|err| FileHasherError::CouldNotOpenFile {
            err,
            file: file.as_ref().to_path_buf(),
        })?;
        let mut sha = Sha256::new();
        let mut buffer = [0; 2048];
        let mut reader = BufReader::new(f);
        while let Ok(len) = reader.read(&mut buffer) {
            if len == 0 {
                break;
            }
            sha.update(&buffer[..len]);
        }
        let digest = sha.finalize();
        let mut bytes = [0u8; HASH_WIDTH];
        bytes.copy_from_slice(&digest[..HASH_WIDTH]);
        Ok(HashCode::from_bytes(bytes))
    }
}

#[derive(Error, Debug)]
pub enum FileHasherError {
    #[error("Could not open file at {file:?} due to {err:?}")]
    CouldNotOpenFile { err: std::io::Error, file: PathBuf },
}
