//! Block header sources for the fleet monitor.
//!
//! A [`HeaderSource`] answers three questions about one remote endpoint: what
//! software it runs, what header it has at a given height, and which blocks it
//! has rejected. Variants cover plain JSON-RPC endpoints, Etherscan-style REST
//! proxies, and deterministic in-process chains used by the test suites.

mod error;
pub use error::SourceError;

mod traits;
pub use traits::{BadBlockArgs, HeaderSource};

mod rpc;
pub use rpc::RpcSource;

mod etherscan;
pub use etherscan::EtherscanSource;

mod testchain;
pub use testchain::{BrokenSource, TestChainSource};
