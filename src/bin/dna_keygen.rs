//! Create a new on-disk identity (spec 3, 6).
//!
//! Grounded in the teacher's `src/bin/photon-keygen.rs` generate-keys-and-
//! report-the-fingerprint shape, adapted from a single hardcoded key pair
//! path to this crate's `<data_dir>/<identity-name>` layout, and extended to
//! accept a BIP39 mnemonic as an alternative identity source to fresh
//! random seeds.
//!
//! Usage: dna-keygen <identity-name> [--data-dir <path>] [--mnemonic "word1 word2 ..."]

use dna_messenger_core::crypto::bip39::derive_identity_seeds;
use dna_messenger_core::engine::identity::{random_identity_seeds, LoadedIdentity};
use dna_messenger_core::storage::default_data_dir;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: dna-keygen <identity-name> [--data-dir <path>] [--mnemonic \"word1 word2 ...\"]");
        return ExitCode::FAILURE;
    }
    let name = &args[1];

    let mut data_dir: Option<PathBuf> = None;
    let mut mnemonic: Option<String> = None;
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" => {
                i += 1;
                data_dir = args.get(i).map(PathBuf::from);
            }
            "--mnemonic" => {
                i += 1;
                mnemonic = args.get(i).cloned();
            }
            other => {
                eprintln!("unrecognized argument: {other}");
                return ExitCode::FAILURE;
            }
        }
        i += 1;
    }

    let data_dir = match data_dir.or_else(|| default_data_dir().ok()) {
        Some(dir) => dir,
        None => {
            eprintln!("could not determine a default data directory; pass --data-dir");
            return ExitCode::FAILURE;
        }
    };

    match LoadedIdentity::list(&data_dir) {
        Ok(existing) if existing.iter().any(|n| n == name) => {
            eprintln!("identity '{name}' already exists under {}", data_dir.display());
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("failed to inspect {}: {e}", data_dir.display());
            return ExitCode::FAILURE;
        }
        _ => {}
    }

    let (signing_seed, encryption_seed) = match mnemonic {
        Some(phrase) => match derive_identity_seeds(&phrase, "") {
            Ok(seeds) => seeds,
            Err(e) => {
                eprintln!("invalid mnemonic: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => match random_identity_seeds() {
            Ok(seeds) => seeds,
            Err(e) => {
                eprintln!("failed to generate random seeds: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    let loaded = match LoadedIdentity::create(&data_dir, name, &signing_seed, &encryption_seed) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("failed to create identity: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("identity '{name}' created under {}", data_dir.display());
    println!("fingerprint: {}", loaded.identity.fingerprint);
    ExitCode::SUCCESS
}
