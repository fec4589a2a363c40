//! Command line front-end for BigFile archives

pub mod commands;
pub mod transcode;
