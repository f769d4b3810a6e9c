//! IPMI access: the ipmitool gateway, SDR/FRU parsers, and reading types.

pub mod gateway;
pub mod parser;
pub mod types;
