pub mod config;

pub use config::{P2pConfig, TwoPcConfig, TwoPcOptions};
