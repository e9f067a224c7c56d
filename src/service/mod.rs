//! HTTP service wiring (C9, §4.8): the `ProxyHttp` implementation that runs
//! the whole Request Pipeline for each accepted connection.

pub mod http;
