/// Software backend - a CPU `GraphicsDevice` for tests and headless use

mod command_list;
mod device;
mod resources;

pub use device::{SoftwareCounters, SoftwareDevice};
