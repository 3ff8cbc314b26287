// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! PCCC client for SLC 500 and PLC-5 controllers.
//!
//! These families predate symbolic addressing: a tag is a data file address
//! such as `N7:0`, `F8:0/3` or `T4:3.PRE`. The DF1 command that carries the
//! access is tunnelled through CIP with the Execute PCCC service on the
//! PCCC object, class 0x67.

use super::constant::*;
use super::error::{Error, Status};
use super::field::{TagType, Value};
use super::session::{extended_status, general_status, service_error, Config, Session};
use super::transport::Transport;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

/// a parsed data file address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub file_type: char,
    pub file_number: u8,
    pub element: u8,
    /// bit number, or the timer/counter sub-element code
    pub sub_element: Option<u8>,
    /// 3 when a bit or named sub-element is addressed, 2 for whole elements
    pub address_field: u8,
}

impl Address {
    fn is_bit_access(&self) -> bool {
        self.address_field == 3
    }

    fn data_size(&self) -> Result<usize, Error> {
        pccc_data_size(self.file_type).ok_or_else(|| Error::InvalidAddress(self.to_string()))
    }

    fn file_code(&self) -> Result<u8, Error> {
        pccc_file_code(self.file_type).ok_or_else(|| Error::InvalidAddress(self.to_string()))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}{}:{}", self.file_type, self.file_number, self.element)
    }
}

/// Parse a data file address. The five accepted shapes, tried in order:
/// `T4:0.PRE` and the other timer/counter sub-elements, `N7:1/15` style
/// data files, `I:1.0/2` style I/O files, `S:1/5` status file entries and
/// `B3/42` flat bit addresses, where element and bit are derived from the
/// flat number.
pub fn parse_address(tag: &str) -> Option<Address> {
    let up = tag.trim().to_ascii_uppercase();
    timer_counter_sub(&up)
        .or_else(|| data_file(&up))
        .or_else(|| io_file(&up))
        .or_else(|| status_file(&up))
        .or_else(|| flat_bit(&up))
}

/// digits only, inside the closed range
fn number(s: &str, lo: u16, hi: u16) -> Option<u8> {
    if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let v: u16 = s.parse().ok()?;
    if v < lo || v > hi {
        return None;
    }
    Some(v as u8)
}

fn ct_code(name: &str) -> Option<u8> {
    match name {
        "PRE" => Some(CT_PRE),
        "ACC" => Some(CT_ACC),
        "EN" => Some(CT_EN),
        "TT" => Some(CT_TT),
        "DN" => Some(CT_DN),
        "CU" => Some(CT_CU),
        "CD" => Some(CT_CD),
        "OV" => Some(CT_OV),
        "UN" => Some(CT_UN),
        "UA" => Some(CT_UA),
        _ => None,
    }
}

/// `CT<n>:<e>.<sub>`
fn timer_counter_sub(tag: &str) -> Option<Address> {
    let file_type = tag.chars().next()?;
    if file_type != 'C' && file_type != 'T' {
        return None;
    }
    let (num, rest) = tag[1..].split_once(':')?;
    let (elem, sub) = rest.split_once('.')?;
    Some(Address {
        file_type,
        file_number: number(num, 1, 255)?,
        element: number(elem, 0, 255)?,
        sub_element: Some(ct_code(sub)?),
        address_field: 3,
    })
}

/// `[FBN]<n>:<e>[/<bit>]`
fn data_file(tag: &str) -> Option<Address> {
    let file_type = tag.chars().next()?;
    if file_type != 'F' && file_type != 'B' && file_type != 'N' {
        return None;
    }
    let (num, rest) = tag[1..].split_once(':')?;
    let file_number = number(num, 1, 255)?;
    let (elem, sub_element, address_field) = element_and_bit(rest)?;
    Some(Address {
        file_type,
        file_number,
        element: elem,
        sub_element,
        address_field,
    })
}

/// `[IO]:<n>.<e>[/<bit>]`
fn io_file(tag: &str) -> Option<Address> {
    let file_type = tag.chars().next()?;
    if file_type != 'I' && file_type != 'O' {
        return None;
    }
    let rest = tag[1..].strip_prefix(':')?;
    let (num, rest) = rest.split_once('.')?;
    let file_number = number(num, 0, 255)?;
    let (elem, sub_element, address_field) = element_and_bit(rest)?;
    Some(Address {
        file_type,
        file_number,
        element: elem,
        sub_element,
        address_field,
    })
}

/// `S:<e>[/<bit>]`, the status file is always file 2
fn status_file(tag: &str) -> Option<Address> {
    let rest = tag.strip_prefix("S:")?;
    let (elem, sub_element, address_field) = element_and_bit(rest)?;
    Some(Address {
        file_type: 'S',
        file_number: 2,
        element: elem,
        sub_element,
        address_field,
    })
}

/// `B<n>/<bitflat>`, element and bit re-derived from the flat bit number
fn flat_bit(tag: &str) -> Option<Address> {
    let rest = tag.strip_prefix('B')?;
    let (num, flat) = rest.split_once('/')?;
    let file_number = number(num, 1, 255)?;
    if flat.is_empty() || flat.len() > 4 || !flat.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let flat: u16 = flat.parse().ok()?;
    if flat > 4095 {
        return None;
    }
    Some(Address {
        file_type: 'B',
        file_number,
        element: (flat / 16) as u8,
        sub_element: Some((flat % 16) as u8),
        address_field: 3,
    })
}

fn element_and_bit(rest: &str) -> Option<(u8, Option<u8>, u8)> {
    match rest.split_once('/') {
        Some((elem, bit)) => Some((number(elem, 0, 255)?, Some(number(bit, 0, 15)?), 3)),
        None => Some((number(rest, 0, 255)?, None, 2)),
    }
}

/// the value shape each data file holds
fn file_tag_type(file_type: char) -> TagType {
    match file_type {
        'F' => TagType::Real,
        'A' => TagType::Sint,
        'R' => TagType::Dint,
        _ => TagType::Int,
    }
}

/// pack one value for a data file, None when the value does not fit the file
fn pack_file_value(file_type: char, value: &Value) -> Option<Vec<u8>> {
    if value.tag_type() != file_tag_type(file_type) {
        return None;
    }
    Some(value.pack())
}

/// mask and value words of a single bit write
fn bit_write_payload(bit_position: u8, set: bool) -> Vec<u8> {
    let mask = 1u16 << bit_position;
    let mut payload = vec![0u8; 4];
    LittleEndian::write_u16(&mut payload[0..2], mask);
    LittleEndian::write_u16(&mut payload[2..4], if set { mask } else { 0 });
    payload
}

/// SLC / PLC-5 driver
pub struct Driver<T: Transport> {
    session: Session<T>,
}

impl<T: Transport> Driver<T> {
    /// Registers the session and drops any stale connection the target may
    /// still hold for this originator.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::net::{IpAddr, Ipv4Addr};
    /// use abeip::{session, slc, tcp};
    ///
    /// let addr = Ipv4Addr::new(127, 0, 0, 1);
    /// let opts = tcp::Options::new(IpAddr::from(addr), tcp::EIP_PORT);
    /// let t = tcp::Transport::connect(opts).unwrap();
    /// let mut cl = slc::Driver::new(t, session::Config::default()).unwrap();
    ///
    /// match cl.read_tag("F8:0") {
    ///     Ok(value) => println!("F8:0 = {:?}", value),
    ///     Err(e) => println!("error: {:?}", e),
    /// }
    /// ```
    pub fn new(transport: T, config: Config) -> Result<Driver<T>, Error> {
        let mut session = Session::new(transport, config);
        session.open()?;
        Ok(Driver { session })
    }

    pub fn close(&mut self) {
        self.session.close()
    }

    pub fn get_status(&self) -> &Status {
        self.session.status()
    }

    pub fn clear(&mut self) {
        self.session.clear_status()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_registered()
    }

    pub fn description(&self) -> &str {
        self.session.description()
    }

    /// keepalive probe, the target never replies
    pub fn nop(&mut self) -> Result<(), Error> {
        self.session.nop()
    }

    /// identify the target and remember its product name
    pub fn list_identity(&mut self) -> Result<&str, Error> {
        self.session.list_identity()
    }

    /// Read one element, one named timer/counter sub-element or one bit.
    /// `T4:0.ACC` yields the accumulator as an INT, `B3/42` the addressed
    /// bit as a BOOL.
    pub fn read_tag(&mut self, tag: &str) -> Result<Value, Error> {
        let addr = self.parse_or_status(tag)?;
        let size = addr.data_size()?;
        let reply = self.pccc_read(&addr, size)?;
        let typ = file_tag_type(addr.file_type);

        if addr.is_bit_access() {
            let bit_position = addr.sub_element.unwrap_or(0);
            if addr.file_type == 'T' || addr.file_type == 'C' {
                // preset and accumulator live behind the control word
                if bit_position == CT_PRE {
                    return typ.unpack(reply_data(&reply, 2)?);
                }
                if bit_position == CT_ACC {
                    return typ.unpack(reply_data(&reply, 4)?);
                }
            }
            let word = match typ.unpack(reply_data(&reply, 0)?)? {
                Value::Int(v) => v as u16,
                value => {
                    return Err(Error::InvalidResponse {
                        reason: format!("bit access on a {:?} element", value.tag_type()),
                        bytes: reply,
                    })
                }
            };
            return Ok(Value::Bool(word & (1 << bit_position) != 0));
        }

        typ.unpack(reply_data(&reply, 0)?)
    }

    /// Read `count` consecutive elements starting at the address.
    /// Bit and sub-element addresses cannot be read as arrays.
    pub fn read_array(&mut self, tag: &str, count: u8) -> Result<Vec<Value>, Error> {
        let addr = self.parse_or_status(tag)?;
        if addr.is_bit_access() {
            self.session
                .set_status(1000, format!("array read of a bit address {}", tag));
            return Err(Error::InvalidAddress(tag.to_string()));
        }
        let size = addr.data_size()?;
        let byte_count = size * count as usize;
        if count == 0 || byte_count > u8::MAX as usize {
            return Err(Error::InvalidInput {
                input: format!("{} elements of {}", count, tag),
            });
        }

        let reply = self.pccc_read(&addr, byte_count)?;
        let typ = file_tag_type(addr.file_type);
        let mut values = Vec::with_capacity(count as usize);
        let mut idx = PCCC_DATA_OFFSET;
        while idx + size <= reply.len() {
            values.push(typ.unpack(&reply[idx..idx + size])?);
            idx += size;
        }
        Ok(values)
    }

    /// Write one element, one timer/counter preset or accumulator, or one
    /// bit. Bits go out as the controller's mask/value word pair.
    pub fn write_tag(&mut self, tag: &str, value: Value) -> Result<(), Error> {
        let addr = self.parse_or_status(tag)?;

        let (sub_element, byte_count, payload) = if addr.is_bit_access() {
            let bit_position = addr.sub_element.unwrap_or(0);
            let is_ct = addr.file_type == 'T' || addr.file_type == 'C';
            if is_ct && (bit_position == CT_PRE || bit_position == CT_ACC) {
                let mut payload = vec![0xFF, 0xFF];
                payload.extend_from_slice(&self.pack_or_status(&addr, tag, &value)?);
                (bit_position, 2u8, payload)
            } else {
                let set = match value {
                    Value::Bool(b) => b,
                    Value::Int(v) => v > 0,
                    _ => {
                        self.session
                            .set_status(1000, format!("bit write to {} needs a BOOL", tag));
                        return Err(Error::InvalidInput {
                            input: format!("{:?} into bit {}", value, tag),
                        });
                    }
                };
                (0, 2, bit_write_payload(bit_position, set))
            }
        } else {
            let mut payload = vec![0xFF, 0xFF];
            payload.extend_from_slice(&self.pack_or_status(&addr, tag, &value)?);
            (0, addr.data_size()? as u8, payload)
        };

        let reply = self.pccc_request(PCCC_WRITE_FUNC, byte_count, &addr, sub_element, &payload)?;
        self.check_pccc_status(&reply, tag)?;
        debug!("wrote {} = {:?}", tag, value);
        Ok(())
    }

    /// Write consecutive elements starting at the address.
    /// Lists cannot go to bit or sub-element addresses.
    pub fn write_array(&mut self, tag: &str, values: &[Value]) -> Result<(), Error> {
        let addr = self.parse_or_status(tag)?;
        if addr.is_bit_access() {
            self.session
                .set_status(1000, format!("array write to a bit address {}", tag));
            return Err(Error::InvalidAddress(tag.to_string()));
        }
        let size = addr.data_size()?;
        let byte_count = size * values.len();
        if values.is_empty() || byte_count > u8::MAX as usize {
            return Err(Error::InvalidInput {
                input: format!("{} values into {}", values.len(), tag),
            });
        }

        let mut payload = vec![0xFF, 0xFF];
        for value in values {
            payload.extend_from_slice(&self.pack_or_status(&addr, tag, value)?);
        }

        let reply =
            self.pccc_request(PCCC_WRITE_FUNC, byte_count as u8, &addr, 0, &payload)?;
        self.check_pccc_status(&reply, tag)
    }

    /// Reads always start at the element; preset, accumulator and bits are
    /// picked out of the returned words.
    fn pccc_read(&mut self, addr: &Address, byte_count: usize) -> Result<Vec<u8>, Error> {
        let reply = self.pccc_request(PCCC_READ_FUNC, byte_count as u8, addr, 0, &[])?;
        self.check_pccc_status(&reply, &addr.to_string())?;
        Ok(reply)
    }

    /// DF1 command tunnelled with the Execute PCCC service:
    /// requestor id, originator vendor and serial, command 0x0F, the
    /// transaction number, then the function specific address fields.
    fn pccc_request(
        &mut self,
        function: u8,
        byte_count: u8,
        addr: &Address,
        sub_element: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, Error> {
        self.ensure_connected()?;

        let sequence = self.session.next_sequence();
        let mut seq_bytes = [0u8; 2];
        LittleEndian::write_u16(&mut seq_bytes, sequence);

        let config = self.session.config();
        let vendor_id = config.vendor_id;
        let vendor_serial = config.vendor_serial;

        let mut message = Vec::with_capacity(24 + payload.len());
        message.extend_from_slice(&seq_bytes);
        message.push(PCCC_EXECUTE);
        message.push(2); // request path size in words
        message.push(CLASS_ID_8BIT);
        message.extend_from_slice(&PCCC_PATH);
        message.push(7); // requestor id length
        message.extend_from_slice(&vendor_id);
        message.extend_from_slice(&vendor_serial);
        message.push(0x0F); // DF1 typed command
        message.push(0x00);
        // transaction number, echoed by the target
        message.push(seq_bytes[1]);
        message.push(seq_bytes[0]);
        message.push(function);
        message.push(byte_count);
        message.push(addr.file_number);
        message.push(addr.file_code()?);
        message.push(addr.element);
        message.push(sub_element);
        message.extend_from_slice(payload);

        let reply = self.session.send_unit_data(&message)?;
        let status = general_status(&reply, UNIT_STATUS_OFFSET);
        if status != SUCCESS {
            self.session.set_status(
                3,
                format!(
                    "PCCC carrier reply status {:#04x} - extended status: {}",
                    status,
                    extended_status(&reply, UNIT_STATUS_OFFSET)
                ),
            );
            return Err(service_error(&reply, UNIT_STATUS_OFFSET));
        }
        Ok(reply)
    }

    fn check_pccc_status(&mut self, reply: &[u8], tag: &str) -> Result<(), Error> {
        let code = match reply.get(PCCC_STATUS_OFFSET) {
            Some(code) => *code,
            None => {
                return Err(Error::InvalidResponse {
                    reason: String::from("PCCC reply without a status byte"),
                    bytes: reply.to_vec(),
                })
            }
        };
        if code != 0 {
            self.session
                .set_status(1000, format!("error {:#04x} returned for {}", code, tag));
            warn!("{}", self.session.status().1);
            return Err(Error::Pccc { code });
        }
        Ok(())
    }

    fn ensure_connected(&mut self) -> Result<(), Error> {
        if let Err(e) = self.session.ensure_connected() {
            self.session.set_status(
                5,
                String::from("target did not connect, the request will not be executed"),
            );
            return Err(e);
        }
        Ok(())
    }

    fn parse_or_status(&mut self, tag: &str) -> Result<Address, Error> {
        match parse_address(tag) {
            Some(addr) => Ok(addr),
            None => {
                self.session
                    .set_status(1000, format!("error parsing the address {}", tag));
                warn!("{}", self.session.status().1);
                Err(Error::InvalidAddress(tag.to_string()))
            }
        }
    }

    fn pack_or_status(
        &mut self,
        addr: &Address,
        tag: &str,
        value: &Value,
    ) -> Result<Vec<u8>, Error> {
        match pack_file_value(addr.file_type, value) {
            Some(bytes) => Ok(bytes),
            None => {
                self.session.set_status(
                    1000,
                    format!(
                        "value {:?} does not pack for {} file {}",
                        value, addr.file_type, tag
                    ),
                );
                Err(Error::InvalidInput {
                    input: format!("{:?} into {}", value, tag),
                })
            }
        }
    }
}

/// reply payload starting at the fixed data offset plus `skip`
fn reply_data(reply: &[u8], skip: usize) -> Result<&[u8], Error> {
    let start = PCCC_DATA_OFFSET + skip;
    if reply.len() <= start {
        return Err(Error::InvalidResponse {
            reason: String::from("PCCC reply shorter than its data offset"),
            bytes: reply.to_vec(),
        });
    }
    Ok(&reply[start..])
}

#[test]
fn test_timer_counter_addresses() {
    let addr = parse_address("T4:3.PRE").unwrap();
    assert_eq!(addr.file_type, 'T');
    assert_eq!(addr.file_number, 4);
    assert_eq!(addr.element, 3);
    assert_eq!(addr.sub_element, Some(CT_PRE));
    assert_eq!(addr.address_field, 3);

    let addr = parse_address("c5:10.acc").unwrap();
    assert_eq!(addr.file_type, 'C');
    assert_eq!(addr.sub_element, Some(CT_ACC));

    let addr = parse_address("T4:0.DN").unwrap();
    assert_eq!(addr.sub_element, Some(CT_DN));

    assert!(parse_address("T4:0.XY").is_none());
    assert!(parse_address("T0:0.PRE").is_none()); // file number starts at 1
}

#[test]
fn test_data_file_addresses() {
    let addr = parse_address("N7:0").unwrap();
    assert_eq!(
        addr,
        Address {
            file_type: 'N',
            file_number: 7,
            element: 0,
            sub_element: None,
            address_field: 2,
        }
    );

    let addr = parse_address("F8:0/3").unwrap();
    assert_eq!(addr.file_type, 'F');
    assert_eq!(addr.sub_element, Some(3));
    assert_eq!(addr.address_field, 3);

    assert!(parse_address("N7:256").is_none());
    assert!(parse_address("N7:0/16").is_none());
    assert!(parse_address("X7:0").is_none());
}

#[test]
fn test_io_and_status_addresses() {
    let addr = parse_address("I:1.0").unwrap();
    assert_eq!(addr.file_type, 'I');
    assert_eq!(addr.file_number, 1);
    assert_eq!(addr.element, 0);
    assert_eq!(addr.address_field, 2);

    let addr = parse_address("O:0.2/5").unwrap();
    assert_eq!(addr.file_type, 'O');
    assert_eq!(addr.sub_element, Some(5));

    let addr = parse_address("S:1/15").unwrap();
    assert_eq!(addr.file_type, 'S');
    assert_eq!(addr.file_number, 2);
    assert_eq!(addr.element, 1);
    assert_eq!(addr.sub_element, Some(15));
}

#[test]
fn test_flat_bit_addresses() {
    let addr = parse_address("B3/21").unwrap();
    assert_eq!(addr.file_type, 'B');
    assert_eq!(addr.element, 1);
    assert_eq!(addr.sub_element, Some(5));

    // element and bit always recombine into the flat address
    for flat in &[0u16, 15, 16, 100, 4095] {
        let addr = parse_address(&format!("B3/{}", flat)).unwrap();
        let sub = addr.sub_element.unwrap() as u16;
        assert_eq!(addr.element as u16 * 16 + sub, *flat);
        assert!(sub < 16);
    }

    assert!(parse_address("B3/4096").is_none());
    // with a colon it is an element address, not a flat bit
    let addr = parse_address("B3:2/5").unwrap();
    assert_eq!(addr.element, 2);
    assert_eq!(addr.sub_element, Some(5));
}

#[test]
fn test_bit_write_payload() {
    // setting bit 5: mask 0x0020, value 0x0020
    assert_eq!(bit_write_payload(5, true), vec![0x20, 0x00, 0x20, 0x00]);
    // clearing bit 5: mask 0x0020, value 0
    assert_eq!(bit_write_payload(5, false), vec![0x20, 0x00, 0x00, 0x00]);
}

#[test]
fn test_file_value_shapes() {
    assert_eq!(
        pack_file_value('N', &Value::Int(-30)).unwrap(),
        vec![0xE2, 0xFF]
    );
    assert_eq!(
        pack_file_value('T', &Value::Int(431)).unwrap(),
        vec![0xAF, 0x01]
    );
    assert!(pack_file_value('N', &Value::Real(1.0)).is_none());
    assert!(pack_file_value('F', &Value::Int(1)).is_none());
    assert_eq!(file_tag_type('F'), TagType::Real);
    assert_eq!(file_tag_type('A'), TagType::Sint);
    assert_eq!(file_tag_type('R'), TagType::Dint);
}
