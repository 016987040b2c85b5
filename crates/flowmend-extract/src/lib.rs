mod decode;
mod extract;
mod pipeline;

pub use decode::*;
pub use extract::*;
pub use pipeline::*;
