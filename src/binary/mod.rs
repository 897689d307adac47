//! Binary (.wasm) encoding of desugared modules.

pub mod encode;

pub use encode::{EncodeError, encode, encode_with_customs};
