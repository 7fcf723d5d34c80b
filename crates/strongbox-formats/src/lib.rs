//! On-disk structures of strongbox encrypted containers
//!
//! A container file is laid out as:
//!
//! ```text
//! [ header (22 bytes) ]
//! [ descriptor        ]
//! [ chunk 0 ciphertext ]
//! [ chunk 1 ciphertext ]
//! ...
//! [ optional stamp: u16 LE length || record ]
//! ```
//!
//! This crate only parses and builds the metadata structures. Chunk
//! ciphertext is produced by `strongbox-crypto`.
//!
//! # Example
//!
//! ```
//! use strongbox_formats::{ContainerDescriptor, ContainerHeader};
//!
//! let descriptor = ContainerDescriptor::new(1, 2, 0, 0, 16 * 1024, vec![0; 16]).unwrap();
//! let encoded = descriptor.build().unwrap();
//! let header = ContainerHeader::new(false, encoded.len() as u16, 0);
//!
//! let parsed = ContainerHeader::parse(&header.build().unwrap()).unwrap();
//! assert_eq!(parsed.descriptor_size as usize, encoded.len());
//! ```

#![warn(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod header;
pub mod stamp;

pub use descriptor::ContainerDescriptor;
pub use error::{FormatError, FormatResult};
pub use header::{ContainerHeader, HEADER_SIZE};
pub use stamp::FileStamp;
