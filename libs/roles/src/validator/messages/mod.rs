//! Messages and data types of the consensus protocol.
mod certificate;
mod epoch;
mod ledger;
mod msg;
mod sync;
mod validator_set;
mod vertex;
mod view;
mod vote;

pub use certificate::*;
pub use epoch::*;
pub use ledger::*;
pub use msg::*;
pub use sync::*;
pub use validator_set::*;
pub use vertex::*;
pub use view::*;
pub use vote::*;
