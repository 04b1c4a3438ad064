pub mod kamino;
pub mod marinade;
pub mod provider;

pub use kamino::{KaminoAdapter, KaminoHealthSource};
pub use marinade::MarinadeAdapter;
pub use provider::{HealthSource, ProtocolAdapter, ProtocolRegistry};
