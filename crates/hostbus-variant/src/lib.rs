//! Tagged argument values shared by every hostbus transport.
//!
//! A [`Variant`] is one of null, boolean, number, string or binary. A
//! variant array is the universal message envelope: element 0 names a
//! function, the rest are its positional arguments.
//!
//! Two encodings are provided:
//! - [`codec`]: compact self-delimiting binary, one tag byte per value
//! - [`json`]: JSON text, for transports whose peers speak JSON

pub mod codec;
pub mod error;
pub mod json;
pub mod value;

pub use codec::{decode_array, encode_array, encode_array_into};
pub use error::{Result, VariantError};
pub use json::{decode_json_array, encode_json_array, from_json, to_json};
pub use value::Variant;
