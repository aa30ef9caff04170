//! protopad
//!
//! Converts protobuf messages between the binary wire format and an editable
//! JSON text form, driven by `.proto` schemas registered by the user.
//!
//! ## Features
//!
//! - **Type Resolution**: bare or module-prefixed type names resolved across
//!   every compiled schema module
//! - **Transcoding**: binary <-> JSON following the protobuf JSON mapping
//! - **Nested Payloads**: `bytes` fields holding another message are shown
//!   as that message and packed back on the way in
//! - **Templates**: default-populated messages to start editing from
//! - **Auto-Detection**: input is read as text when possible, binary otherwise
//!
//! ## Architecture
//!
//! ```text
//! <data dir>/
//! ├── compiled/
//! │   ├── pkgA/
//! │   │   └── widget.pb      (protoc --include_imports --descriptor_set_out)
//! │   └── manifest.json      (sources + SHA256 checksums)
//! └── temp.json              (last edited document)
//! ```

pub mod checksum;
pub mod codec;
pub mod compiler;
pub mod config;
pub mod detect;
pub mod editor;
pub mod error;
pub mod message;
pub mod names;
pub mod payload;
pub mod registry;
pub mod schema;
pub mod template;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use codec::{decode_binary, decode_text, encode_binary, encode_text};
pub use config::ProtopadConfig;
pub use detect::parse_any;
pub use error::{ProtopadError, Result};
pub use message::{DynamicMessage, MapKey, Value};
pub use payload::{parse_text, render_text};
pub use registry::{SchemaModule, SchemaRegistry};
pub use schema::{FieldDescriptor, MessageDescriptor};
pub use template::build_template;
