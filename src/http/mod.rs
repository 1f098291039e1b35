//! HTTP protocol pieces used by the session engine.
//!
//! # Architecture
//!
//! - **`parser`**: finds the header terminator and extracts the request line
//!   and the handful of header lines the engine uses
//! - **`request`**: method and parsed request representation
//! - **`response`**: status codes, reply heads and error pages
//! - **`writer`**: the chained output segments and their partial-write
//!   transmitter
//! - **`form`**: query string / POST body decoding
//! - **`auth`**: Basic credential decoding
//! - **`mime`**: content type and binary detection by file extension
//!
//! Nothing here touches sockets directly except through `std::io::Write`,
//! which keeps every piece testable against in-memory buffers.

pub mod auth;
pub mod form;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
