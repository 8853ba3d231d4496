//! State-based CRDT primitives used by every aidmesh replica.

pub mod gcounter;
pub mod lattice;
pub mod lwwreg;
pub mod orset;
pub mod pncounter;

pub use gcounter::GCounter;
pub use lattice::Lattice;
pub use lwwreg::LWWRegister;
pub use orset::{ORSet, Tag};
pub use pncounter::PNCounter;
