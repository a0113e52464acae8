pub mod evaluation;
pub mod material;
pub mod requirement;

pub use evaluation::*;
pub use material::*;
pub use requirement::*;
