pub mod endpoint;
pub mod options;
pub mod trial;

pub use endpoint::*;
pub use options::*;
pub use trial::*;
