pub mod http_remote;
pub mod local;
#[cfg(test)]
pub mod memory_remote;
pub mod remote;
