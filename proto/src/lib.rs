//! Generated gRPC types for the tempo service.
//!
//! The wire surface lives in `proto/*.proto`; everything here is produced by
//! `tonic-build` at compile time.

tonic::include_proto!("tempo");
