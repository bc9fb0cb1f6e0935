//! Core trait definitions

mod connection;

pub use connection::{BoxedConn, Conn, Dialer};
