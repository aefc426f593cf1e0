//! Firmware image generator core.
//!
//! An XML schema describes a binary image as a tree of components: numbers,
//! strings, raw bytes, bit fields, tables, embedded files, digests, CRCs,
//! signatures and encrypted regions. [`Generator`] constructs the tree, lets
//! callers override values, lays every component out in a fixed-capacity
//! buffer and builds the final bytes. Formulas in the schema reference other
//! components by path, so values such as a header CRC over a later payload
//! are computed on demand.
//!
//! # Usage
//!
//! ```
//! use fwgen_core::{BuildOptions, Generator};
//!
//! let schema = r#"
//!     <root size="16">
//!         <layout>
//!             <number name="magic" size="2" value="0x55AA"/>
//!             <crc name="crc" algorithm="crc16" input="[0:2]"/>
//!         </layout>
//!     </root>"#;
//! let mut generator = Generator::from_str(schema, BuildOptions::default())?;
//! let image = generator.build()?;
//! assert_eq!(&image[..2], &[0xAA, 0x55]);
//! # Ok::<(), fwgen_core::Error>(())
//! ```

#![forbid(unsafe_code)]

pub mod buffer;
pub mod component;
pub mod crypto;
pub mod dependency;
mod engine;
pub mod error;
pub mod expr;
pub mod generator;
pub mod options;
pub mod schema;
pub mod value;

pub use component::{Component, Kind, NodeId, State, Tree};
pub use dependency::Rule;
pub use error::{Error, ErrorKind, Result};
pub use generator::{Generator, Placement};
pub use options::{BuildOptions, OfflineMode, OfflineProfile, parse_override};
pub use schema::SchemaNode;
pub use value::{ByteOrder, Value};
