mod client;
mod datatype;

pub use client::BacnetClient;
