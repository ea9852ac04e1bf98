pub mod appointments;
pub mod audio;
pub mod feed;
pub mod inbox;
pub mod init;
pub mod listener;
pub mod notices;
pub mod store;
pub mod views;

#[cfg(test)]
pub mod testing;
