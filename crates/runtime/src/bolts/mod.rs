//! Bolt implementations.

mod machine;
mod outcome;
mod resource;

pub use machine::{BoltContext, MachineBolt};
pub use outcome::OutcomeBolt;
pub use resource::ResourceBolt;
