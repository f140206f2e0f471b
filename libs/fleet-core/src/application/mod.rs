pub mod fleet;
pub mod worknode;

pub use fleet::Fleet;
pub use worknode::WorkNode;
