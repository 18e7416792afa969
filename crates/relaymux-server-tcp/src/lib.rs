//! Front-door TCP server for the relaymux relay

pub mod server;

pub use server::{
    handle_connection, ControlConn, ControlConnStream, ControlHandler, FrontServer,
    FrontServerConfig, FrontServerError,
};
