// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use std::error;
use std::fmt;
use std::io::{Error as IOError, ErrorKind};

/// last structured status, a numeric group code and a text detail.
/// It is set before any error is raised so callers can introspect
/// after a handled failure.
pub type Status = (i32, String);

#[derive(Debug)]
pub enum Error {
    /// connection could not be established
    Connect(String),
    IOError(ErrorKind),
    /// the peer closed the connection or a send made no progress
    Send,
    /// non-zero status in the encapsulation header of a reply
    Encapsulation { code: u32 },
    /// the reply echoed a different command than the request
    Command { sent: u16, received: u16 },
    /// the reply length field does not match the received body
    Length { expected: usize, received: usize },
    /// an operation that needs a registered session was called without one
    SessionRequired,
    /// the reply carried a command this client never sends
    UnknownCommand(u16),
    /// non-zero CIP general status with its decoded extended status
    Service { code: u8, extended: String },
    /// connected reply echoed the wrong class 3 sequence number
    Sequence { sent: u16, received: u16 },
    /// non-zero PCCC status byte
    Pccc { code: u8 },
    /// a data type code this client cannot decode
    UnknownType(u16),
    /// a tag or file address that does not parse
    InvalidAddress(String),
    InvalidInput { input: String },
    InvalidResponse { reason: String, bytes: Vec<u8> },
    /// forward open did not yield a usable connection
    TargetNotConnected,
}

impl Error {
    /// communication errors invalidate the session and the connection;
    /// data errors leave the session usable
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            Error::Connect(_)
                | Error::IOError(_)
                | Error::Send
                | Error::Encapsulation { .. }
                | Error::Command { .. }
                | Error::Length { .. }
                | Error::SessionRequired
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Connect(s) => write!(f, "connection error: {}", s),
            Error::IOError(kind) => write!(f, "IO error: {:?}", kind),
            Error::Send => write!(f, "socket connection broken"),
            Error::Encapsulation { code } => {
                write!(f, "encapsulation status: {}", encapsulation_text(*code))
            }
            Error::Command { sent, received } => write!(
                f,
                "reply command {:#04x} does not match request {:#04x}",
                received, sent
            ),
            Error::Length { expected, received } => write!(
                f,
                "reply length field {} does not match body size {}",
                expected, received
            ),
            Error::SessionRequired => write!(f, "a session needs to be registered first"),
            Error::UnknownCommand(cmd) => write!(f, "unknown encapsulation command {:#04x}", cmd),
            Error::Service { code, extended } => write!(
                f,
                "service reply: {} - extended status: {}",
                service_text(*code),
                extended
            ),
            Error::Sequence { sent, received } => write!(
                f,
                "connected reply sequence {} does not match request {}",
                received, sent
            ),
            Error::Pccc { code } => write!(f, "PCCC error: {}", pccc_text(*code)),
            Error::UnknownType(code) => write!(f, "unknown data type code {:#04x}", code),
            Error::InvalidAddress(addr) => write!(f, "could not parse address {}", addr),
            Error::InvalidInput { input } => write!(f, "invalid input: {}", input),
            Error::InvalidResponse { reason, bytes } => {
                write!(f, "invalid response {:?} err {}", bytes, reason)
            }
            Error::TargetNotConnected => write!(f, "target did not connect"),
        }
    }
}

impl From<IOError> for Error {
    fn from(e: IOError) -> Self {
        Error::IOError(e.kind())
    }
}
// This is important for other errors to wrap this one.
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        None
    }
}

/// EtherNet/IP encapsulation error codes returned in the message header
pub fn encapsulation_text(code: u32) -> &'static str {
    match code {
        0x0000 => "Success",
        0x0001 => "The sender issued an invalid or unsupported encapsulation command",
        0x0002 => "Insufficient memory",
        0x0003 => "Poorly formed or incorrect data in the data portion",
        0x0064 => "An originator used an invalid session handle when sending an encapsulation message to the target",
        0x0065 => "The target received a message of invalid length",
        0x0069 => "Unsupported Protocol Version",
        _ => "Unknown encapsulation status",
    }
}

/// CIP general status, from Rockwell publication 1756-RM003
pub fn service_text(code: u8) -> &'static str {
    match code {
        0x00 => "Success",
        0x01 => "Connection failure (see extended status)",
        0x02 => "Insufficient resource",
        0x03 => "Invalid value",
        0x04 => "IOI syntax error. A syntax error was detected decoding the Request Path (see extended status)",
        0x05 => "Destination unknown, class unsupported, instance undefined or structure element undefined (see extended status)",
        0x06 => "Insufficient Packet Space",
        0x07 => "Connection lost",
        0x08 => "Service not supported",
        0x09 => "Error in data segment or invalid attribute value",
        0x0A => "Attribute list error",
        0x0B => "State already exist",
        0x0C => "Object state conflict",
        0x0D => "Object already exist",
        0x0E => "Attribute not settable",
        0x0F => "Permission denied",
        0x10 => "Device state conflict",
        0x11 => "Reply data too large",
        0x12 => "Fragmentation of a primitive value",
        0x13 => "Insufficient command data",
        0x14 => "Attribute not supported",
        0x15 => "Too much data",
        0x1A => "Bridge request too large",
        0x1B => "Bridge response too large",
        0x1C => "Attribute list shortage",
        0x1D => "Invalid attribute list",
        0x1E => "Request service error",
        0x1F => "Connection related failure (see extended status)",
        0x22 => "Invalid reply received",
        0x25 => "Key segment error",
        0x26 => "Invalid IOI error",
        0x27 => "Unexpected attribute in list",
        0x28 => "DeviceNet error - invalid member ID",
        0x29 => "DeviceNet error - member not settable",
        0xD1 => "Module not in run state",
        0xFB => "Message port not supported",
        0xFC => "Message unsupported data type",
        0xFD => "Message uninitialized",
        0xFE => "Message timeout",
        0xFF => "General Error (see extended status)",
        _ => "Unknown service status",
    }
}

/// two-level extended status lookup keyed by (general, extended)
pub fn extended_text(general: u8, extended: u32) -> &'static str {
    let text = match general {
        0x01 => match extended {
            0x0100 => Some("Connection in use"),
            0x0103 => Some("Transport not supported"),
            0x0106 => Some("Ownership conflict"),
            0x0107 => Some("Connection not found"),
            0x0108 => Some("Invalid connection type"),
            0x0109 => Some("Invalid connection size"),
            0x0110 => Some("Module not configured"),
            0x0111 => Some("EPR not supported"),
            0x0114 => Some("Wrong module"),
            0x0115 => Some("Wrong device type"),
            0x0116 => Some("Wrong revision"),
            0x0118 => Some("Invalid configuration format"),
            0x011A => Some("Application out of connections"),
            0x0203 => Some("Connection timeout"),
            0x0204 => Some("Unconnected message timeout"),
            0x0205 => Some("Unconnected send parameter error"),
            0x0206 => Some("Message too large"),
            0x0301 => Some("No buffer memory"),
            0x0302 => Some("Bandwidth not available"),
            0x0303 => Some("No screeners available"),
            0x0305 => Some("Signature match"),
            0x0311 => Some("Port not available"),
            0x0312 => Some("Link address not available"),
            0x0315 => Some("Invalid segment type"),
            0x0317 => Some("Connection not scheduled"),
            _ => None,
        },
        0x04 | 0x05 => match extended {
            0x0000 => Some("Extended status out of memory"),
            0x0001 => Some("Extended status out of instances"),
            _ => None,
        },
        0x1F => match extended {
            0x0203 => Some("Connection timeout"),
            _ => None,
        },
        0xFF => match extended {
            0x0007 => Some("Wrong data type"),
            0x2001 => Some("Excessive IOI"),
            0x2002 => Some("Bad parameter value"),
            0x2018 => Some("Semaphore reject"),
            0x201B => Some("Size too small"),
            0x201C => Some("Invalid size"),
            0x2100 => Some("Privilege failure"),
            0x2101 => Some("Invalid keyswitch position"),
            0x2102 => Some("Password invalid"),
            0x2103 => Some("No password issued"),
            0x2104 => Some("Address out of range"),
            0x2105 => Some("Address and how many out of range"),
            0x2106 => Some("Data in use"),
            0x2107 => Some("Type is invalid or not supported"),
            0x2108 => Some("Controller in upload or download mode"),
            0x2109 => Some("Attempt to change number of array dimensions"),
            0x210A => Some("Invalid symbol name"),
            0x210B => Some("Symbol does not exist"),
            0x210E => Some("Search failed"),
            0x210F => Some("Task cannot start"),
            0x2110 => Some("Unable to write"),
            0x2111 => Some("Unable to read"),
            0x2112 => Some("Shared routine not editable"),
            0x2113 => Some("Controller in faulted mode"),
            0x2114 => Some("Run mode inhibited"),
            _ => None,
        },
        _ => None,
    };
    text.unwrap_or("Extended Status info not present")
}

/// PCCC status byte decode
pub fn pccc_text(code: u8) -> &'static str {
    match code {
        0 => "OK",
        16 => "Illegal Command or Format, Address may not exist or not enough elements in data file",
        32 => "PLC Has a Problem and Will Not Communicate",
        48 => "Remote Node Host is Missing, Disconnected, or Shut Down",
        64 => "Host Could Not Complete Function Due To Hardware Fault",
        80 => "Addressing problem or Memory Protect Rungs",
        96 => "Function not allows due to command protection selection",
        112 => "Processor is in Program mode",
        128 => "Compatibility mode file missing or communication zone problem",
        144 => "Remote node cannot buffer command",
        240 => "Error code in EXT STS Byte",
        _ => "Unknown PCCC error",
    }
}
