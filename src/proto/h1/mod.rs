//! The HTTP/1.x wire codec: head parsing, body framing, and emission.

pub use self::decode::{BodyConfig, BodyDecoder};
pub use self::decompress::DecompressBuffer;
pub use self::encode::PayloadWriter;
pub use self::message::MessageWriter;
pub use self::parse::{ParseConfig, RequestParser, ResponseParser};

mod date;
pub mod decode;
pub mod decompress;
pub mod encode;
pub mod message;
pub mod parse;
