pub mod chains;
pub mod orders;
pub mod timelocks;
pub mod tokens;

pub use chains::{ChainFamily, ChainId, ChainInfo, ChainRegistry};
pub use orders::{accept, propose, Order, OrderId, OrderStatus, OrderTerms, Party};
pub use timelocks::{Timelock, TimelockPair, TimelockUnit};
pub use tokens::{Amount, Token};
