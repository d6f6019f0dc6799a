//! HTTP Module
//!
//! Request/response snapshots and the transport they move through.
//! `Dispatch` is the seam between the execution layer and the network.

pub mod client;
pub mod request;
pub mod response;

pub use client::{Dispatch, HttpClient};
pub use request::HttpRequest;
pub use response::HttpResponse;
