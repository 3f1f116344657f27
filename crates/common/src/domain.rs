mod directory;
mod pour_event;
mod queue;
mod reading;
mod result;

pub use directory::*;
pub use pour_event::*;
pub use queue::*;
pub use reading::*;
pub use result::*;
