//! chainsync-rpc: the EVM JSON-RPC chain source for ChainSync.
//!
//! - [`request`]: JSON-RPC 2.0 wire types
//! - [`transport`]: single-shot HTTP transport over `reqwest`
//! - [`error`]: transport failures and their retry classification
//! - [`erc20`]: `Transfer(address,address,uint256)` log decoding
//! - [`source`]: [`EvmChainSource`], the `ChainSource` used in production
//!
//! Retries are not handled here. Every failure carries an
//! [`RpcErrorKind`](chainsync_core::RpcErrorKind) and the core retry policy
//! decides what to do with it.

pub mod erc20;
pub mod error;
pub mod request;
pub mod source;
pub mod transport;

pub use error::TransportError;
pub use source::EvmChainSource;
pub use transport::{HttpTransport, RpcTransport};
