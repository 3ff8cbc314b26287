// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Encapsulation session and connected messaging.
//!
//! One [`Session`] owns one transport and one registered session handle.
//! It builds the fixed 24 byte encapsulation header, validates replies
//! against the request, opens and closes the Class 3 connection through the
//! Connection Manager and numbers connected messages with the sequence
//! counter the connection requires.

use super::constant::*;
use super::error::{encapsulation_text, extended_text, service_text, Error, Status};
use super::transport::Transport;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

/// Per instance protocol configuration.
/// Defaults are the Rockwell reference values; unknown knobs do not exist.
#[derive(Debug, Clone)]
pub struct Config {
    /// requested packet interval for both directions, microseconds
    pub rpi_us: u32,
    /// backplane port of the connection path
    pub backplane: u8,
    /// controller slot in the chassis
    pub cpu_slot: u8,
    pub vendor_id: [u8; 2],
    pub vendor_serial: [u8; 4],
    /// connection serial number of this originator
    pub originator_serial: [u8; 2],
    /// connection id offered for the target to originator direction
    pub originator_cid: [u8; 4],
    /// echoed opaque in every encapsulation header
    pub context: [u8; 8],
    pub option: u32,
    /// timeout field of the unconnected common packet format
    pub unconnected_timeout: u16,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            rpi_us: 5000,
            backplane: 1,
            cpu_slot: 0,
            vendor_id: [0x09, 0x10],
            vendor_serial: [0x09, 0x10, 0x19, 0x71],
            originator_serial: [0x27, 0x04],
            originator_cid: [0x27, 0x04, 0x19, 0x71],
            context: *b"_abeip__",
            option: 0,
            unconnected_timeout: 10,
        }
    }
}

pub struct Session<T: Transport> {
    transport: T,
    config: Config,
    handle: u32,
    sequence: u16,
    sequence_seed: u16,
    target_cid: [u8; 4],
    target_connected: bool,
    status: Status,
    device_description: String,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: Config) -> Session<T> {
        let seed = sequence_seed();
        Session {
            transport,
            config,
            handle: 0,
            sequence: seed,
            sequence_seed: seed,
            target_cid: [0; 4],
            target_connected: false,
            status: (0, String::new()),
            device_description: String::from("Device Unknown"),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_registered(&self) -> bool {
        self.handle != 0
    }

    pub fn is_target_connected(&self) -> bool {
        self.target_connected
    }

    pub fn session_handle(&self) -> u32 {
        self.handle
    }

    pub fn target_cid(&self) -> [u8; 4] {
        self.target_cid
    }

    pub fn description(&self) -> &str {
        &self.device_description
    }

    /// last structured status
    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn clear_status(&mut self) {
        self.status = (0, String::new());
    }

    pub fn set_status(&mut self, code: i32, text: String) {
        self.status = (code, text);
    }

    /// Increase and return the sequence used with connected messages.
    /// Stays inside [1, 65535]; the wrap restarts at the process seed so
    /// concurrent processes against the same target do not collide.
    pub fn next_sequence(&mut self) -> u16 {
        if self.sequence < 0xFFFF {
            self.sequence += 1;
        } else {
            self.sequence = self.sequence_seed;
        }
        self.sequence
    }

    /// register the session and drop any stale Class 3 connection the
    /// target may still hold for this originator
    pub fn open(&mut self) -> Result<u32, Error> {
        let handle = self.register_session()?;
        if let Err(e) = self.forward_close() {
            debug!("no stale connection to close: {}", e);
        }
        Ok(handle)
    }

    /// forward close if connected, unregister, swallow teardown trouble
    /// into the status slot
    pub fn close(&mut self) {
        if self.target_connected {
            if let Err(e) = self.forward_close() {
                self.status = (14, format!("forward close during teardown: {}", e));
            }
        }
        if self.handle != 0 {
            self.un_register_session();
        }
    }

    /// Register a new session with the communication partner.
    /// Repeated calls return the cached handle.
    pub fn register_session(&mut self) -> Result<u32, Error> {
        if self.handle != 0 {
            return Ok(self.handle);
        }

        let mut message = self.build_header(REGISTER_SESSION, 4);
        let mut body = [0u8; 4];
        LittleEndian::write_u16(&mut body[0..2], 1); // protocol version
        LittleEndian::write_u16(&mut body[2..4], 0); // option flags
        message.extend_from_slice(&body);

        let reply = self.exchange_checked(REGISTER_SESSION, &message)?;
        if reply.len() < ENCAP_SESSION_OFFSET + 4 {
            self.status = (13, String::from("session not registered"));
            return Err(Error::InvalidResponse {
                reason: String::from("register session reply too short"),
                bytes: reply,
            });
        }
        self.handle = LittleEndian::read_u32(&reply[ENCAP_SESSION_OFFSET..ENCAP_SESSION_OFFSET + 4]);
        debug!("session {:#010x} has been registered", self.handle);
        Ok(self.handle)
    }

    /// Un-register the session. The target replies nothing; local state is
    /// cleared no matter what happened on the wire.
    pub fn un_register_session(&mut self) {
        if self.handle != 0 {
            let message = self.build_header(UNREGISTER_SESSION, 0);
            if let Err(e) = self.transport.send(&message) {
                self.status = (14, format!("unregister during teardown: {}", e));
            }
        }
        self.handle = 0;
        self.target_connected = false;
    }

    /// A NOP provides a way to determine if the TCP connection is still open.
    /// The target never replies to it.
    pub fn nop(&mut self) -> Result<(), Error> {
        let message = self.build_header(NOP, 0);
        self.transport.send(&message)
    }

    /// ListIdentity locates and identifies the target.
    /// The product name is kept as the device description.
    pub fn list_identity(&mut self) -> Result<&str, Error> {
        let message = self.build_header(LIST_IDENTITY, 0);
        let reply = self.exchange_checked(LIST_IDENTITY, &message)?;
        if reply.len() <= IDENTITY_NAME_OFFSET + 1 {
            return Err(Error::InvalidResponse {
                reason: String::from("identity reply carries no product name"),
                bytes: reply,
            });
        }
        let name = &reply[IDENTITY_NAME_OFFSET..reply.len() - 1];
        self.device_description = String::from_utf8_lossy(name).into_owned();
        Ok(&self.device_description)
    }

    /// CIP forward open, ODVA Volume 1 3-5.5.2.
    /// The connection path is backplane port, cpu slot, message router.
    pub fn forward_open(&mut self) -> Result<(), Error> {
        if self.handle == 0 {
            self.status = (4, String::from("a session is needed before forward open"));
            return Err(Error::SessionRequired);
        }

        let mut message = Vec::with_capacity(64);
        message.push(FORWARD_OPEN);
        message.push(2); // request path size in words
        message.push(CLASS_ID_8BIT);
        message.extend_from_slice(&CONNECTION_MANAGER_PATH);
        message.push(PRIORITY);
        message.push(TIMEOUT_TICKS);
        message.extend_from_slice(&[0, 0, 0, 0]); // O->T connection id, target assigns
        message.extend_from_slice(&self.config.originator_cid);
        message.extend_from_slice(&self.config.originator_serial);
        message.extend_from_slice(&self.config.vendor_id);
        message.extend_from_slice(&self.config.vendor_serial);
        message.push(TIMEOUT_MULTIPLIER);
        message.extend_from_slice(&[0, 0, 0]); // reserved
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, self.config.rpi_us);
        message.extend_from_slice(&word); // O->T RPI
        let mut half = [0u8; 2];
        LittleEndian::write_u16(&mut half, CONNECTION_PARAMETER_DEFAULT);
        message.extend_from_slice(&half);
        message.extend_from_slice(&word); // T->O RPI
        message.extend_from_slice(&half);
        message.push(TRANSPORT_CLASS);
        message.push(CONNECTION_SIZE_BACKPLANE);
        message.push(self.config.backplane);
        message.push(self.config.cpu_slot);
        message.push(CLASS_ID_8BIT);
        message.extend_from_slice(&ROUTER_PATH);

        let reply = self.send_rr_data(&message)?;
        let status = general_status(&reply, RR_STATUS_OFFSET);
        if status != SUCCESS {
            self.status = (4, format!("forward open refused: {}", service_text(status)));
            warn!("{}", self.status.1);
            return Err(service_error(&reply, RR_STATUS_OFFSET));
        }
        if reply.len() < FORWARD_OPEN_CID_OFFSET + 4 {
            return Err(Error::InvalidResponse {
                reason: String::from("forward open reply too short"),
                bytes: reply,
            });
        }
        self.target_cid
            .copy_from_slice(&reply[FORWARD_OPEN_CID_OFFSET..FORWARD_OPEN_CID_OFFSET + 4]);
        self.target_connected = true;
        debug!("target connection id {:02x?}", self.target_cid);
        Ok(())
    }

    /// CIP forward close, ODVA Volume 1 3-5.5.3. Idempotent; the local
    /// connection state is dropped whatever the target answers.
    pub fn forward_close(&mut self) -> Result<(), Error> {
        if self.handle == 0 {
            self.status = (5, String::from("a session is needed before forward close"));
            return Err(Error::SessionRequired);
        }
        self.target_connected = false;

        let mut message = Vec::with_capacity(32);
        message.push(FORWARD_CLOSE);
        message.push(2); // request path size in words
        message.push(CLASS_ID_8BIT);
        message.extend_from_slice(&CONNECTION_MANAGER_PATH);
        message.push(PRIORITY);
        message.push(TIMEOUT_TICKS);
        message.extend_from_slice(&self.config.originator_serial);
        message.extend_from_slice(&self.config.vendor_id);
        message.extend_from_slice(&self.config.vendor_serial);
        message.push(CONNECTION_SIZE_BACKPLANE);
        message.push(0); // reserved
        message.push(self.config.backplane);
        message.push(self.config.cpu_slot);
        message.push(CLASS_ID_8BIT);
        message.extend_from_slice(&ROUTER_PATH);

        let reply = self.send_rr_data(&message)?;
        let status = general_status(&reply, RR_STATUS_OFFSET);
        if status != SUCCESS {
            self.status = (5, format!("forward close refused: {}", service_text(status)));
            return Err(service_error(&reply, RR_STATUS_OFFSET));
        }
        Ok(())
    }

    /// connect the Class 3 target if it is not connected yet
    pub fn ensure_connected(&mut self) -> Result<(), Error> {
        if self.target_connected {
            return Ok(());
        }
        self.forward_open().map_err(|e| {
            if e.is_communication() {
                e
            } else {
                Error::TargetNotConnected
            }
        })
    }

    /// SendRRData transfers an unconnected request/reply packet.
    /// Returns the validated raw reply frame; the general status at byte 42
    /// is for the caller, which knows which values are terminal.
    pub fn send_rr_data(&mut self, message: &[u8]) -> Result<Vec<u8>, Error> {
        if self.handle == 0 {
            return Err(self.fail(Error::SessionRequired));
        }
        let body = self.common_packet(
            DATA_ITEM_UNCONNECTED,
            message,
            ADDRESS_ITEM_NULL,
            None,
        );
        let mut frame = self.build_header(SEND_RR_DATA, body.len() as u16);
        frame.extend_from_slice(&body);

        let reply = self.exchange_checked(SEND_RR_DATA, &frame)?;
        if reply.len() < RR_STATUS_OFFSET + 2 {
            return Err(Error::InvalidResponse {
                reason: String::from("unconnected reply truncated"),
                bytes: reply,
            });
        }
        Ok(reply)
    }

    /// SendUnitData transfers a connected message. The message must begin
    /// with the 2 byte Class 3 sequence obtained from [`next_sequence`];
    /// the echo at bytes 44..46 of the reply has to match it.
    ///
    /// [`next_sequence`]: Session::next_sequence
    pub fn send_unit_data(&mut self, message: &[u8]) -> Result<Vec<u8>, Error> {
        if self.handle == 0 {
            return Err(self.fail(Error::SessionRequired));
        }
        if message.len() < 2 {
            return Err(Error::InvalidInput {
                input: String::from("connected message without a sequence number"),
            });
        }
        let sent_sequence = LittleEndian::read_u16(&message[0..2]);
        let cid = self.target_cid;
        let body = self.common_packet(
            DATA_ITEM_CONNECTED,
            message,
            ADDRESS_ITEM_CONNECTION_BASED,
            Some(&cid),
        );
        let mut frame = self.build_header(SEND_UNIT_DATA, body.len() as u16);
        frame.extend_from_slice(&body);

        let reply = self.exchange_checked(SEND_UNIT_DATA, &frame)?;
        if reply.len() < UNIT_DATA_OFFSET {
            return Err(Error::InvalidResponse {
                reason: String::from("connected reply truncated"),
                bytes: reply,
            });
        }
        let echoed =
            LittleEndian::read_u16(&reply[UNIT_SEQUENCE_OFFSET..UNIT_SEQUENCE_OFFSET + 2]);
        if echoed != sent_sequence {
            self.status = (3, format!("sequence mismatch, sent {} got {}", sent_sequence, echoed));
            return Err(Error::Sequence {
                sent: sent_sequence,
                received: echoed,
            });
        }
        Ok(reply)
    }

    /// The header is 24 bytes fixed length and includes the command and the
    /// length of the optional data portion.
    fn build_header(&self, command: u16, length: u16) -> Vec<u8> {
        let mut h = vec![0u8; HEADER_SIZE];
        LittleEndian::write_u16(&mut h[0..2], command);
        LittleEndian::write_u16(&mut h[2..4], length);
        LittleEndian::write_u32(&mut h[4..8], self.handle);
        // status stays zero on send
        h[12..20].copy_from_slice(&self.config.context);
        LittleEndian::write_u32(&mut h[20..24], self.config.option);
        h
    }

    /// common part of a CIP message, Volume 2 page 2.22
    fn common_packet(
        &self,
        data_item: u16,
        message: &[u8],
        address_item: u16,
        addr_data: Option<&[u8]>,
    ) -> Vec<u8> {
        let mut msg = Vec::with_capacity(16 + message.len());
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, 0); // interface handle, 0 for CIP
        msg.extend_from_slice(&word);
        let mut half = [0u8; 2];
        LittleEndian::write_u16(&mut half, self.config.unconnected_timeout);
        msg.extend_from_slice(&half);
        LittleEndian::write_u16(&mut half, 2); // item count, address and data
        msg.extend_from_slice(&half);
        LittleEndian::write_u16(&mut half, address_item);
        msg.extend_from_slice(&half);
        match addr_data {
            Some(data) => {
                LittleEndian::write_u16(&mut half, data.len() as u16);
                msg.extend_from_slice(&half);
                msg.extend_from_slice(data);
            }
            None => {
                LittleEndian::write_u16(&mut half, 0);
                msg.extend_from_slice(&half);
            }
        }
        LittleEndian::write_u16(&mut half, data_item);
        msg.extend_from_slice(&half);
        LittleEndian::write_u16(&mut half, message.len() as u16);
        msg.extend_from_slice(&half);
        msg.extend_from_slice(message);
        msg
    }

    /// one round trip plus reply validation; a communication error drops
    /// the session and connection state
    fn exchange_checked(&mut self, command: u16, frame: &[u8]) -> Result<Vec<u8>, Error> {
        let reply = match self.transport.exchange(frame) {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(e)),
        };
        match check_reply(command, &reply) {
            Ok(()) => Ok(reply),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// record the error in the status slot; communication errors
    /// invalidate the session
    fn fail(&mut self, e: Error) -> Error {
        self.status = (3, e.to_string());
        if e.is_communication() {
            self.handle = 0;
            self.target_connected = false;
        }
        e
    }
}

/// A reply is well formed iff the encapsulation status is zero, the command
/// echoes the request and the length field matches the received body.
/// An unknown command is the one data shaped failure here.
fn check_reply(sent_command: u16, reply: &[u8]) -> Result<(), Error> {
    if reply.len() < HEADER_SIZE {
        return Err(Error::Length {
            expected: HEADER_SIZE,
            received: reply.len(),
        });
    }
    let command = LittleEndian::read_u16(&reply[0..2]);
    if !is_known_command(command) {
        return Err(Error::UnknownCommand(command));
    }
    if command != sent_command {
        return Err(Error::Command {
            sent: sent_command,
            received: command,
        });
    }
    let status = LittleEndian::read_u32(&reply[ENCAP_STATUS_OFFSET..ENCAP_STATUS_OFFSET + 4]);
    if status != 0 {
        debug!("encapsulation status {}: {}", status, encapsulation_text(status));
        return Err(Error::Encapsulation { code: status });
    }
    let announced = LittleEndian::read_u16(&reply[2..4]) as usize;
    if announced != reply.len() - HEADER_SIZE {
        return Err(Error::Length {
            expected: announced,
            received: reply.len() - HEADER_SIZE,
        });
    }
    Ok(())
}

/// CIP general status of a reply, offset 42 unconnected or 48 connected
pub fn general_status(reply: &[u8], offset: usize) -> u8 {
    reply.get(offset).copied().unwrap_or(0xFF)
}

/// decode the extended status that follows the general status byte:
/// a size in words, then a 0, 1, 2 or 4 byte sub code
pub fn extended_status(reply: &[u8], status_offset: usize) -> String {
    let general = general_status(reply, status_offset);
    let size_words = reply.get(status_offset + 1).copied().unwrap_or(0) as usize;
    let start = status_offset + 2;
    let extended = match size_words * 2 {
        0 => 0u32,
        2 if reply.len() >= start + 2 => {
            LittleEndian::read_u16(&reply[start..start + 2]) as u32
        }
        4 if reply.len() >= start + 4 => LittleEndian::read_u32(&reply[start..start + 4]),
        _ => return String::from("Extended Status Size Unknown"),
    };
    String::from(extended_text(general, extended))
}

/// build the service error for a non-zero general status
pub fn service_error(reply: &[u8], status_offset: usize) -> Error {
    Error::Service {
        code: general_status(reply, status_offset),
        extended: extended_status(reply, status_offset),
    }
}

fn sequence_seed() -> u16 {
    // the wrap restart must never be zero
    let seed = (std::process::id() % 0xFFFF) as u16;
    if seed == 0 {
        1
    } else {
        seed
    }
}

#[test]
fn test_sequence_never_zero_and_increasing() {
    struct NoWire;
    impl Transport for NoWire {
        fn exchange(&mut self, _request: &[u8]) -> Result<Vec<u8>, Error> {
            Err(Error::Send)
        }
        fn send(&mut self, _request: &[u8]) -> Result<(), Error> {
            Ok(())
        }
    }

    let mut session = Session::new(NoWire, Config::default());
    session.sequence = 0xFFFE;
    session.sequence_seed = 0x1234;
    let mut previous = session.sequence;
    for _ in 0..4 {
        let seq = session.next_sequence();
        assert_ne!(seq, 0);
        if previous < 0xFFFF {
            assert_eq!(seq, previous + 1);
        } else {
            assert_eq!(seq, 0x1234);
        }
        previous = seq;
    }
}

#[test]
fn test_header_layout() {
    struct NoWire;
    impl Transport for NoWire {
        fn exchange(&mut self, _request: &[u8]) -> Result<Vec<u8>, Error> {
            Err(Error::Send)
        }
        fn send(&mut self, _request: &[u8]) -> Result<(), Error> {
            Ok(())
        }
    }

    let mut session = Session::new(NoWire, Config::default());
    session.handle = 0x44332211;
    let h = session.build_header(SEND_UNIT_DATA, 0x10);
    assert_eq!(h.len(), 24);
    assert_eq!(&h[0..2], &[0x70, 0x00]);
    assert_eq!(&h[2..4], &[0x10, 0x00]);
    assert_eq!(&h[4..8], &[0x11, 0x22, 0x33, 0x44]);
    assert_eq!(&h[8..12], &[0, 0, 0, 0]);
    assert_eq!(&h[12..20], b"_abeip__");
    assert_eq!(&h[20..24], &[0, 0, 0, 0]);
}

#[test]
fn test_check_reply_rules() {
    let mut reply = vec![0u8; 24];
    reply[0] = 0x6F; // send_rr_data echo
    assert!(check_reply(SEND_RR_DATA, &reply).is_ok());

    // command mismatch
    match check_reply(SEND_UNIT_DATA, &reply) {
        Err(Error::Command { .. }) => {}
        other => panic!("expected command mismatch, got {:?}", other),
    }

    // unknown command is a data error, not a mismatch
    reply[0] = 0x42;
    match check_reply(SEND_RR_DATA, &reply) {
        Err(Error::UnknownCommand(0x42)) => {}
        other => panic!("expected unknown command, got {:?}", other),
    }

    // bad encapsulation status
    reply[0] = 0x6F;
    reply[8] = 0x64;
    match check_reply(SEND_RR_DATA, &reply) {
        Err(Error::Encapsulation { code: 0x64 }) => {}
        other => panic!("expected encapsulation error, got {:?}", other),
    }

    // length field disagrees with the body
    reply[8] = 0;
    reply[2] = 4;
    match check_reply(SEND_RR_DATA, &reply) {
        Err(Error::Length { .. }) => {}
        other => panic!("expected length error, got {:?}", other),
    }
}
