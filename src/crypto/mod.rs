pub mod codec;
pub mod modp;
pub mod negotiate;

pub use codec::Codec;
pub use negotiate::{Algorithm, client_negotiate, server_negotiate};
