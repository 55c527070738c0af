pub mod error;
pub mod field;
pub mod id;
pub mod value;

pub use error::*;
pub use field::*;
pub use id::*;
pub use value::*;
