pub mod cookie_jar;
pub mod panel;
pub mod transport;
