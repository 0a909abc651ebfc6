#![forbid(unsafe_code)]

pub mod dscp_service_impl;

