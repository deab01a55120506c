pub mod tcp;
pub mod traits;

pub use tcp::TcpTransportListener;
pub use traits::{TransportListener, TransportStream};
