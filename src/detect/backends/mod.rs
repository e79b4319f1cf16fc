pub mod replay;
pub mod stub;

pub use replay::ReplaySource;
pub use stub::StubSource;
