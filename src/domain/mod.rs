mod address;
mod ledger;
mod money;
mod transaction;
mod wallet;
mod withdrawal;

pub use address::*;
pub use ledger::*;
pub use money::*;
pub use transaction::*;
pub use wallet::*;
pub use withdrawal::*;
