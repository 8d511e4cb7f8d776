//! NextGCore MME (Mobility Management Entity)
//!
//! S11 side of the MME: the GTPv2-C path towards the SGW-C, the domain
//! context its transactions belong to, and the payload builder for the
//! messages the MME sends.

pub mod config;
pub mod context;
pub mod event;
pub mod gtp_path;
pub mod mme_path;
pub mod s11_build;
pub mod sm;

#[cfg(test)]
mod property_tests;
#[cfg(test)]
mod test_util;
