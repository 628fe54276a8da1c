/// Device module - backend abstraction traits and descriptors

pub mod types;
pub mod device;
pub mod command_list;
pub mod software;

pub use types::*;
pub use device::*;
pub use command_list::*;
