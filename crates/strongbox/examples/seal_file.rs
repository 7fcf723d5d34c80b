#![allow(clippy::expect_used)]

//! Copy a plain file into a container, stamp it and print its layout.
//!
//! Usage:
//!   RUST_LOG=debug cargo run --example seal_file -p strongbox -- <input> <output> [passphrase]

use std::fs::File;
use std::io;

use strongbox::{CryptFile, OpenMode, ProcessorConfig};
use strongbox_crypto::MasterKey;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let input = args.next().expect("missing input path");
    let output = args.next().expect("missing output path");
    let passphrase = args.next().unwrap_or_else(|| "strongbox".to_string());

    let key = MasterKey::from_passphrase(&passphrase).expect("empty passphrase");
    let mut container =
        CryptFile::new(&output, key, ProcessorConfig::default()).expect("invalid configuration");

    container
        .open(OpenMode::Write)
        .expect("failed to create container");
    let mut source = File::open(&input).expect("failed to open input");
    let copied = io::copy(&mut source, &mut container).expect("failed to copy");
    container.close().expect("failed to close container");

    container.stamp_mac().expect("failed to stamp");
    container.verify_stamp_mac().expect("stamp does not verify");

    println!("Sealed {input} into {output}");
    println!("  content:    {copied} bytes");
    println!(
        "  used:       {} bytes",
        container.used_size().expect("failed to read header")
    );
    println!(
        "  on disk:    {} bytes",
        container.storage_size().expect("failed to stat")
    );
    println!(
        "  digest:     {}",
        hex::encode(container.digest().expect("failed to hash"))
    );
}
