pub mod corridor;
pub mod identity;
pub mod macros;
pub mod sailing;
pub mod time;

pub use corridor::*;
pub use identity::*;
pub use sailing::*;
pub use time::*;
