mod gate;

pub use gate::{SessionGate, headers_to_bag};
