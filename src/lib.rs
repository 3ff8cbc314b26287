// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! This crate provides communication tools for Allen-Bradley PLC devices
//! over EtherNet/IP. ControlLogix and CompactLogix controllers are
//! addressed by symbolic tag names through [`client::Driver`]; SLC 500 and
//! PLC-5 controllers keep the classic data file addresses and are served by
//! [`slc::Driver`].
//! # Examples
//! ```no_run
//! # extern crate abeip;
//! # use abeip::{client::Driver, field::Value, session, tcp};
//! # use std::time::Duration;
//! # use std::net::{Ipv4Addr, IpAddr};
//!
//! # fn main() {
//!     let addr = Ipv4Addr::new(127, 0, 0, 1);
//!     let mut opts = tcp::Options::new(IpAddr::from(addr), tcp::EIP_PORT);
//!     opts.read_timeout = Duration::from_secs(2);
//!     opts.write_timeout = Duration::from_secs(2);
//!     let t = match tcp::Transport::connect(opts) {
//!         Ok(t) => t,
//!         Err(e) => {
//!             println!("{:?}", e.to_string());
//!             return;
//!         }
//!     };
//!     let mut cl = Driver::new(t, session::Config::default()).unwrap();
//!
//!     match cl.write_tag("Counts", Value::Int(26)) {
//!         Ok(()) => println!("written"),
//!         Err(e) => println!("error: {:?}", e),
//!     }
//! # }
//! ```
pub mod client;
mod constant;
pub mod epath;
pub mod error;
pub mod field;
pub mod session;
pub mod slc;
pub mod tcp;
pub mod transport;
