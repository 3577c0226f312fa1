mod builder;
mod sequential;
#[cfg(test)]
mod tests;

pub use builder::*;
pub use sequential::*;
