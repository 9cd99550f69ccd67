// core.rs splits responsibilities into submodules: block types and the
// consensus engine, the node index, genesis construction and validation.
pub mod chain;
pub mod genesis;
pub mod index;
pub mod validation;

pub use chain::*;
pub use genesis::*;
pub use index::*;
pub use validation::*;
