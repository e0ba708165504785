pub mod controller;
pub mod engine;
pub mod local;
pub mod progress;

#[cfg(test)]
pub mod testing;
