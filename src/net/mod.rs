pub mod framing;

pub use framing::{HEADER_LEN, read_frame, read_message, write_frame, write_message};
