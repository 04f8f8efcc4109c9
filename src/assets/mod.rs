/// Image decoding capability and its built-in implementations.
pub mod decode;
