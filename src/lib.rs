#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

pub mod acquisition;
pub mod config;
pub mod conversion;
pub mod error;
pub mod export;
pub mod fit;
pub mod math;
pub mod model;
pub mod polyfit;
pub mod reference;
pub mod sensor;
pub mod session;
pub mod store;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;
