// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Transport definition for PLC

use super::error::Error;

/// an abstract communication used by the session to move encapsulation frames
/// ## How can I implement `Transport`?
///
/// Types that are [`Transport`] must return complete frames: the fixed
/// 24 byte encapsulation header plus the body announced by the length field
/// at bytes 2..4.
pub trait Transport {
    /// write one request frame and read back the complete reply frame
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, Error>;
    /// write one request frame without waiting for a reply,
    /// used by NOP and by the unregister teardown
    fn send(&mut self, request: &[u8]) -> Result<(), Error>;
}
