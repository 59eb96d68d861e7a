pub mod endpoint;
pub mod node;
pub mod selection;

pub use endpoint::*;
pub use node::*;
pub use selection::*;
