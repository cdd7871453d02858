pub mod client;
pub mod fake;
pub mod types;

pub use client::{CloudCompute, GceHttpClient};
pub use fake::FakeCloud;
