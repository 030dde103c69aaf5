//! On-disk identity secret material (spec 6): `keys/signing.dsa` and
//! `keys/encryption.kem`, each holding the 32-byte seed that deterministically
//! regenerates the corresponding keypair (spec 4.1's `generate_deterministic`
//! / `key_gen_internal`). Protected by exclusive 0600 permissions, the same
//! pattern the pack uses for on-disk identity secrets (restrict right after
//! create, before any data is written).

use super::error::{StorageError, StorageResult};
use crate::crypto::bip39::MasterSeed;
use std::io::Write;
use std::path::Path;

fn write_exclusive_0600(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(bytes)?;
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file.metadata()?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

pub fn save_signing_seed(path: &Path, seed: &MasterSeed) -> StorageResult<()> {
    write_exclusive_0600(path, seed.as_bytes())
}

pub fn save_encryption_seed(path: &Path, seed: &MasterSeed) -> StorageResult<()> {
    write_exclusive_0600(path, seed.as_bytes())
}

pub fn load_seed(path: &Path) -> StorageResult<MasterSeed> {
    let bytes = std::fs::read(path)?;
    if bytes.len() != 32 {
        return Err(StorageError::Parse(format!(
            "key file {} is {} bytes, expected 32",
            path.display(),
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(MasterSeed::from_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_sets_exclusive_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.dsa");
        let seed = MasterSeed::from_bytes([7u8; 32]);
        save_signing_seed(&path, &seed).unwrap();

        let loaded = load_seed(&path).unwrap();
        assert_eq!(loaded.as_bytes(), seed.as_bytes());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn rejects_wrong_length_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.dsa");
        std::fs::write(&path, b"too short").unwrap();
        assert!(load_seed(&path).is_err());
    }
}
