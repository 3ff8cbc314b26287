// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Protocol numbers for the EtherNet/IP encapsulation and the CIP services it carries

/// Encapsulation header is 24 bytes fixed length
pub const HEADER_SIZE: usize = 24;

// Encapsulation commands, Volume 2: 2-3.2
pub const NOP: u16 = 0x0000;
#[allow(dead_code)]
pub const LIST_TARGETS: u16 = 0x0001;
#[allow(dead_code)]
pub const LIST_SERVICES: u16 = 0x0004;
pub const LIST_IDENTITY: u16 = 0x0063;
#[allow(dead_code)]
pub const LIST_INTERFACES: u16 = 0x0064;
pub const REGISTER_SESSION: u16 = 0x0065;
pub const UNREGISTER_SESSION: u16 = 0x0066;
pub const SEND_RR_DATA: u16 = 0x006F;
pub const SEND_UNIT_DATA: u16 = 0x0070;

/// true for commands a target may legitimately echo back
pub fn is_known_command(command: u16) -> bool {
    matches!(
        command,
        NOP | LIST_TARGETS
            | LIST_SERVICES
            | LIST_IDENTITY
            | LIST_INTERFACES
            | REGISTER_SESSION
            | UNREGISTER_SESSION
            | SEND_RR_DATA
            | SEND_UNIT_DATA
    )
}

// Logical segment selectors
pub const CLASS_ID_8BIT: u8 = 0x20;
#[allow(dead_code)]
pub const CLASS_ID_16BIT: u8 = 0x21;
pub const INSTANCE_ID_8BIT: u8 = 0x24;
pub const INSTANCE_ID_16BIT: u8 = 0x25;
pub const ELEMENT_ID_8BIT: u8 = 0x28;
pub const ELEMENT_ID_16BIT: u8 = 0x29;
pub const ELEMENT_ID_32BIT: u8 = 0x2A;

/// ANSI extended symbolic segment
pub const EXTENDED_SYMBOL: u8 = 0x91;
pub const PADDING_BYTE: u8 = 0x00;

// Class codes
pub const MESSAGE_ROUTER: u8 = 0x02; // Volume 1: 5-1
pub const CONNECTION_MANAGER: u8 = 0x06; // Volume 1: 3-5
pub const SYMBOL_OBJECT: u8 = 0x6B;
pub const TEMPLATE_OBJECT: u8 = 0x6C;

// Paths, combined as CLASS_ID_8BIT + PATH.
// The PCCC object path is 0x20 0x67 0x24 0x01.
pub const CONNECTION_MANAGER_PATH: [u8; 3] = [CONNECTION_MANAGER, INSTANCE_ID_8BIT, 0x01];
pub const ROUTER_PATH: [u8; 3] = [MESSAGE_ROUTER, INSTANCE_ID_8BIT, 0x01];
pub const PCCC_PATH: [u8; 3] = [0x67, INSTANCE_ID_8BIT, 0x01];

// Tag services
pub const READ_TAG: u8 = 0x4C;
pub const READ_TAG_FRAGMENTED: u8 = 0x52;
pub const WRITE_TAG: u8 = 0x4D;
pub const WRITE_TAG_FRAGMENTED: u8 = 0x53;
pub const MULTIPLE_SERVICE_PACKET: u8 = 0x0A;
pub const GET_INSTANCE_ATTRIBUTES_LIST: u8 = 0x55;
pub const GET_ATTRIBUTES: u8 = 0x03;
/// shares the service code with [`READ_TAG`]; the outstanding request decides the parse
pub const READ_TEMPLATE: u8 = 0x4C;

// Connection Manager services
pub const FORWARD_OPEN: u8 = 0x54;
pub const FORWARD_CLOSE: u8 = 0x4E;

/// Execute PCCC service on the PCCC object (class 0x67)
pub const PCCC_EXECUTE: u8 = 0x4B;

/// a reply service code is the request service with this bit set
pub const REPLY_SERVICE_BIT: u8 = 0x80;

// Common Packet Format item types
pub const ADDRESS_ITEM_NULL: u16 = 0x0000;
pub const ADDRESS_ITEM_CONNECTION_BASED: u16 = 0x00A1;
pub const DATA_ITEM_CONNECTED: u16 = 0x00B1;
pub const DATA_ITEM_UNCONNECTED: u16 = 0x00B2;

// Forward open parameters, Volume 1: 3-5.5.2
pub const PRIORITY: u8 = 0x0A;
pub const TIMEOUT_TICKS: u8 = 0x05;
pub const TIMEOUT_MULTIPLIER: u8 = 0x01;
pub const TRANSPORT_CLASS: u8 = 0xA3;
pub const CONNECTION_PARAMETER_DEFAULT: u16 = 0x43F8;
/// connection path size in words for backplane + slot + message router
pub const CONNECTION_SIZE_BACKPLANE: u8 = 0x03;

// General status values that are not plain errors
pub const SUCCESS: u8 = 0;
/// partial reply, more data available; fragmented and enumerated services loop on it
pub const INSUFFICIENT_PACKETS: u8 = 0x06;
/// a multiple service packet reply where at least one embedded service failed
pub const EMBEDDED_SERVICE_ERROR: u8 = 0x1E;

// Reply byte offsets. A send_rr_data reply carries the CIP service at 40,
// a send_unit_data reply is shifted by the connected address item and the
// 2-byte sequence echo.
pub const ENCAP_SESSION_OFFSET: usize = 4;
pub const ENCAP_STATUS_OFFSET: usize = 8;
pub const RR_SERVICE_OFFSET: usize = 40;
pub const RR_STATUS_OFFSET: usize = 42;
pub const UNIT_SEQUENCE_OFFSET: usize = 44;
pub const UNIT_SERVICE_OFFSET: usize = 46;
pub const UNIT_STATUS_OFFSET: usize = 48;
pub const UNIT_DATA_OFFSET: usize = 50;
/// target connection id in a forward open reply
pub const FORWARD_OPEN_CID_OFFSET: usize = 44;
/// product name inside a list identity reply
pub const IDENTITY_NAME_OFFSET: usize = 63;

// PCCC / DF1 tunnelling
pub const PCCC_READ_FUNC: u8 = 0xA2;
pub const PCCC_WRITE_FUNC: u8 = 0xAB;
pub const PCCC_STATUS_OFFSET: usize = 58;
pub const PCCC_DATA_OFFSET: usize = 61;

// Timer/counter sub-element codes
pub const CT_PRE: u8 = 1;
pub const CT_ACC: u8 = 2;
pub const CT_EN: u8 = 15;
pub const CT_TT: u8 = 14;
pub const CT_DN: u8 = 13;
pub const CT_CU: u8 = 15;
pub const CT_CD: u8 = 14;
pub const CT_OV: u8 = 12;
pub const CT_UN: u8 = 11;
pub const CT_UA: u8 = 10;

/// DF1 file type byte for a data file letter
pub fn pccc_file_code(file_type: char) -> Option<u8> {
    match file_type {
        'N' => Some(0x89),
        'B' => Some(0x85),
        'T' => Some(0x86),
        'C' => Some(0x87),
        'S' => Some(0x84),
        'F' => Some(0x8A),
        'A' => Some(0x8E),
        'R' => Some(0x88),
        'O' => Some(0x8B),
        'I' => Some(0x8C),
        _ => None,
    }
}

/// element size in bytes for a data file letter
pub fn pccc_data_size(file_type: char) -> Option<usize> {
    match file_type {
        'N' | 'B' | 'S' | 'A' | 'O' | 'I' => Some(2),
        'T' | 'C' | 'R' => Some(6),
        'F' => Some(4),
        _ => None,
    }
}
