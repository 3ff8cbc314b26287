// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Symbolic tag client for ControlLogix and CompactLogix controllers.
//!
//! Reads and writes are explicit Class 3 messages built from the services of
//! Rockwell publication 1756-PM020: Read Tag (0x4C), Read Tag Fragmented
//! (0x52), Write Tag (0x4D), Write Tag Fragmented (0x53), Multiple Service
//! Packet (0x0A), plus the Symbol and Template object services used by tag
//! discovery. Read Tag and Read Template share the 0x4C code; every reply
//! here is parsed by the request that was just sent, so the collision never
//! picks a wrong parser.

use super::constant::*;
use super::epath;
use super::error::{Error, Status};
use super::field::{TagType, Value};
use super::session::{extended_status, general_status, service_error, Config, Session};
use super::transport::Transport;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

/// a write fragment is flushed once this many payload bytes are packed
const WRITE_FRAGMENT_SIZE: usize = 450;

/// outcome of one entry in a multi tag write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Good,
    Bad,
}

/// one tag discovered by [`Driver::get_tag_list`]
#[derive(Debug, Clone)]
pub struct TagInfo {
    pub instance_id: u32,
    pub name: String,
    /// array dimension count, 0 for scalars
    pub dim: u8,
    pub kind: TagKind,
}

#[derive(Debug, Clone)]
pub enum TagKind {
    Atomic {
        data_type: TagType,
        /// for BOOL members, the bit position inside the containing word
        bit_position: Option<u8>,
    },
    Struct {
        template_instance_id: u16,
        template: Template,
        udt: Udt,
    },
}

/// structure makeup attributes of a Template Object instance
#[derive(Debug, Clone, Default)]
pub struct Template {
    pub object_definition_size: u32,
    pub structure_size: u32,
    pub member_count: u16,
    pub structure_handle: u16,
}

/// decoded template: structure name, member names and member layout
#[derive(Debug, Clone, Default)]
pub struct Udt {
    pub name: String,
    pub internal_tags: Vec<String>,
    /// (array size, member data type if atomic, byte offset)
    pub members: Vec<(u16, Option<TagType>, u32)>,
}

/// This EtherNet/IP client addresses the controller by symbolic tag names.
///
/// http://literature.rockwellautomation.com/idc/groups/literature/documents/pm/1756-pm020_-en-p.pdf
pub struct Driver<T: Transport> {
    session: Session<T>,
    last_tag_read: Option<(String, Option<Value>)>,
    last_tag_write: Option<(String, WriteStatus)>,
}

impl<T: Transport> Driver<T> {
    /// Registers the session and drops any stale connection the target may
    /// still hold for this originator.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::net::{IpAddr, Ipv4Addr};
    /// use abeip::{client, session, tcp};
    /// use std::time::Duration;
    ///
    /// let addr = Ipv4Addr::new(127, 0, 0, 1);
    /// let mut opts = tcp::Options::new(IpAddr::from(addr), tcp::EIP_PORT);
    /// opts.read_timeout = Duration::from_secs(2);
    /// opts.write_timeout = Duration::from_secs(2);
    ///
    /// let t = tcp::Transport::connect(opts).unwrap();
    /// let mut cl = client::Driver::new(t, session::Config::default()).unwrap();
    ///
    /// match cl.read_tag("Counts") {
    ///     Ok(value) => println!("Counts = {:?}", value),
    ///     Err(e) => println!("error: {:?}", e),
    /// }
    /// ```
    pub fn new(transport: T, config: Config) -> Result<Driver<T>, Error> {
        let mut session = Session::new(transport, config);
        session.open()?;
        Ok(Driver {
            session,
            last_tag_read: None,
            last_tag_write: None,
        })
    }

    /// forward close if connected, unregister, swallow teardown errors
    /// into the status slot
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

    /// last tag touched by a multi request read
    pub fn get_last_tag_read(&self) -> Option<&(String, Option<Value>)> {
        self.last_tag_read.as_ref()
    }

    /// last tag touched by a multi request write
    pub fn get_last_tag_write(&self) -> Option<&(String, WriteStatus)> {
        self.last_tag_write.as_ref()
    }

    /// Read a single tag. The reply carries the data type code, so the
    /// returned [`Value`] is tagged with the controller's own type.
    pub fn read_tag(&mut self, tag: &str) -> Result<Value, Error> {
        self.session.ensure_connected()?;
        let rp = self.tag_path_or_status(tag, false, 6)?;

        let mut message = self.connected_message(READ_TAG, &rp);
        let mut half = [0u8; 2];
        LittleEndian::write_u16(&mut half, 1); // element count
        message.extend_from_slice(&half);

        let reply = self.session.send_unit_data(&message)?;
        self.check_service_status(&reply, &[SUCCESS])?;

        read_typed_value(&reply, UNIT_DATA_OFFSET)
    }

    /// Read a list of tags in one Multiple Service Packet. Entries that the
    /// controller rejects come back as `(tag, None)`.
    pub fn read_tags(&mut self, tags: &[&str]) -> Result<Vec<(String, Option<Value>)>, Error> {
        self.session.ensure_connected()?;

        let mut services = Vec::with_capacity(tags.len());
        for tag in tags {
            let rp = self.tag_path_or_status(tag, true, 6)?;
            let mut service = Vec::with_capacity(rp.len() + 3);
            service.push(READ_TAG);
            service.extend_from_slice(&rp);
            let mut half = [0u8; 2];
            LittleEndian::write_u16(&mut half, 1);
            service.extend_from_slice(&half);
            services.push(service);
        }

        let message = self.multiple_service(&services);
        let reply = self.session.send_unit_data(&message)?;
        // 0x1E means one of the embedded services failed; the per entry
        // status still tells which
        self.check_service_status(&reply, &[SUCCESS, EMBEDDED_SERVICE_ERROR])?;

        let mut results = Vec::with_capacity(tags.len());
        for (index, start) in sub_reply_offsets(&reply)?.into_iter().enumerate() {
            let tag = tags.get(index).copied().unwrap_or_default().to_string();
            let value = match general_status(&reply, start + 2) {
                SUCCESS => read_typed_value(&reply, start + 4).ok(),
                _ => None,
            };
            self.last_tag_read = Some((tag.clone(), value.clone()));
            results.push((tag, value));
        }
        Ok(results)
    }

    /// Read `count` elements of an array tag with the fragmented service,
    /// looping on the byte offset until the target reports completion.
    pub fn read_array(&mut self, tag: &str, count: u16) -> Result<Vec<Value>, Error> {
        let (typ, bytes) = self.read_fragmented(tag, count)?;
        let size = typ.size().ok_or_else(|| Error::UnknownType(typ.code()))?;
        let mut values = Vec::with_capacity(bytes.len() / size);
        let mut idx = 0;
        while idx + size <= bytes.len() {
            values.push(typ.unpack(&bytes[idx..idx + size])?);
            idx += size;
        }
        Ok(values)
    }

    /// raw variant of [`read_array`]: the concatenated little endian element
    /// bytes without decoding
    ///
    /// [`read_array`]: Driver::read_array
    pub fn read_array_raw(&mut self, tag: &str, count: u16) -> Result<Vec<u8>, Error> {
        Ok(self.read_fragmented(tag, count)?.1)
    }

    /// Write a single tag; the wire type code is taken from the value.
    pub fn write_tag(&mut self, tag: &str, value: Value) -> Result<(), Error> {
        self.session.ensure_connected()?;
        let rp = self.tag_path_or_status(tag, false, 8)?;

        let mut message = self.connected_message(WRITE_TAG, &rp);
        let mut half = [0u8; 2];
        LittleEndian::write_u16(&mut half, value.tag_type().code());
        message.extend_from_slice(&half);
        LittleEndian::write_u16(&mut half, 1); // element count
        message.extend_from_slice(&half);
        message.extend_from_slice(&value.pack());

        let reply = self.session.send_unit_data(&message)?;
        self.check_service_status(&reply, &[SUCCESS])?;
        Ok(())
    }

    /// Write a list of `(tag, value, declared type)` entries in one Multiple
    /// Service Packet. An entry whose value does not pack as its declared
    /// type is dropped from the request before sending and noted in the
    /// status slot; the returned list aligns with the entries actually sent.
    pub fn write_tags(
        &mut self,
        tags: &[(String, Value, TagType)],
    ) -> Result<Vec<(String, WriteStatus)>, Error> {
        self.session.ensure_connected()?;

        let mut kept = Vec::with_capacity(tags.len());
        let mut services = Vec::with_capacity(tags.len());
        for (name, value, typ) in tags {
            let rp = self.tag_path_or_status(name, true, 8)?;
            if value.tag_type() != *typ {
                self.session.set_status(
                    8,
                    format!(
                        "tag {} type {} removed from write list: value is {}",
                        name,
                        typ.name(),
                        value.tag_type().name()
                    ),
                );
                warn!("{}", self.session.status().1);
                continue;
            }
            let mut service = Vec::with_capacity(rp.len() + 16);
            service.push(WRITE_TAG);
            service.extend_from_slice(&rp);
            let mut half = [0u8; 2];
            LittleEndian::write_u16(&mut half, typ.code());
            service.extend_from_slice(&half);
            LittleEndian::write_u16(&mut half, 1);
            service.extend_from_slice(&half);
            service.extend_from_slice(&value.pack());
            services.push(service);
            kept.push(name.clone());
        }

        let message = self.multiple_service(&services);
        let reply = self.session.send_unit_data(&message)?;
        self.check_service_status(&reply, &[SUCCESS, EMBEDDED_SERVICE_ERROR])?;

        let mut results = Vec::with_capacity(kept.len());
        for (index, start) in sub_reply_offsets(&reply)?.into_iter().enumerate() {
            let name = kept.get(index).cloned().unwrap_or_default();
            let outcome = if general_status(&reply, start + 2) == SUCCESS {
                WriteStatus::Good
            } else {
                WriteStatus::Bad
            };
            self.last_tag_write = Some((name.clone(), outcome));
            results.push((name, outcome));
        }
        Ok(results)
    }

    /// Write an array of values with the fragmented service, flushing a
    /// request every [`WRITE_FRAGMENT_SIZE`] packed bytes.
    pub fn write_array(&mut self, tag: &str, typ: TagType, values: &[Value]) -> Result<(), Error> {
        self.session.ensure_connected()?;
        if values.len() > u16::MAX as usize {
            return Err(Error::InvalidInput {
                input: format!("{} elements into {}", values.len(), tag),
            });
        }

        let mut packed = Vec::with_capacity(WRITE_FRAGMENT_SIZE);
        let mut byte_offset = 0u32;
        for (i, value) in values.iter().enumerate() {
            if value.tag_type() != typ {
                self.session.set_status(
                    9,
                    format!("value {:?} does not pack as {}", value, typ.name()),
                );
                return Err(Error::InvalidInput {
                    input: format!("{:?} as {}", value, typ.name()),
                });
            }
            packed.extend_from_slice(&value.pack());

            if packed.len() >= WRITE_FRAGMENT_SIZE || i == values.len() - 1 {
                self.write_fragment(tag, typ, values.len() as u16, byte_offset, &packed)?;
                byte_offset += packed.len() as u32;
                packed.clear();
            }
        }
        Ok(())
    }

    /// raw variant of [`write_array`]: `data` already holds the packed
    /// little endian elements
    ///
    /// [`write_array`]: Driver::write_array
    pub fn write_array_raw(&mut self, tag: &str, typ: TagType, data: &[u8]) -> Result<(), Error> {
        self.session.ensure_connected()?;
        let size = typ.size().ok_or_else(|| Error::UnknownType(typ.code()))?;
        if data.is_empty() || data.len() % size != 0 {
            return Err(Error::InvalidInput {
                input: format!("{} raw bytes for {} elements", data.len(), typ.name()),
            });
        }
        let count = (data.len() / size) as u16;

        let mut byte_offset = 0u32;
        for chunk in data.chunks(WRITE_FRAGMENT_SIZE) {
            self.write_fragment(tag, typ, count, byte_offset, chunk)?;
            byte_offset += chunk.len() as u32;
        }
        Ok(())
    }

    /// Discover the controller scope tags.
    ///
    /// Three phases: enumerate the Symbol Object instances, keep the
    /// user visible ones and decode their symbol type word, then fetch and
    /// parse the Template Object for every structure tag.
    pub fn get_tag_list(&mut self) -> Result<Vec<TagInfo>, Error> {
        let raw = self.instance_attribute_list()?;

        let mut tags = Vec::with_capacity(raw.len());
        for (instance_id, name, symbol_type) in raw {
            if let Some(info) = decode_symbol(instance_id, name, symbol_type)? {
                tags.push(info);
            }
        }

        for tag in &mut tags {
            if let TagKind::Struct {
                template_instance_id,
                template,
                udt,
            } = &mut tag.kind
            {
                let instance = *template_instance_id;
                *template = self.structure_makeup(instance)?;
                let buffer = self.read_template(instance, template.object_definition_size)?;
                *udt = parse_template_buffer(&buffer, template.member_count)?;
            }
        }
        Ok(tags)
    }

    /// Finding user-created controller scope tags in a Logix5000 controller:
    /// walk the Symbol Object instances asking for name and symbol type,
    /// resuming after the last seen instance while the target reports more.
    fn instance_attribute_list(&mut self) -> Result<Vec<(u32, String, u16)>, Error> {
        self.session.ensure_connected()?;

        let mut raw = Vec::new();
        let mut last_instance = 0u16;
        loop {
            let mut body = Vec::with_capacity(16);
            body.push(GET_INSTANCE_ATTRIBUTES_LIST);
            body.push(3); // request path size in words
            body.extend_from_slice(&[CLASS_ID_8BIT, SYMBOL_OBJECT, INSTANCE_ID_16BIT, 0x00]);
            let mut half = [0u8; 2];
            LittleEndian::write_u16(&mut half, last_instance);
            body.extend_from_slice(&half);
            LittleEndian::write_u16(&mut half, 2); // attribute count
            body.extend_from_slice(&half);
            LittleEndian::write_u16(&mut half, 1); // symbol name
            body.extend_from_slice(&half);
            LittleEndian::write_u16(&mut half, 2); // symbol type
            body.extend_from_slice(&half);

            let message = self.sequenced(&body);
            let reply = self.session.send_unit_data(&message)?;
            let status = self.check_service_status(&reply, &[SUCCESS, INSUFFICIENT_PACKETS])?;

            let mut newest_instance = 0u32;
            let mut idx = UNIT_DATA_OFFSET;
            while idx + 8 <= reply.len() {
                let instance = LittleEndian::read_u32(&reply[idx..idx + 4]);
                idx += 4;
                let name_len = LittleEndian::read_u16(&reply[idx..idx + 2]) as usize;
                idx += 2;
                if idx + name_len + 2 > reply.len() {
                    return Err(Error::InvalidResponse {
                        reason: String::from("truncated symbol instance record"),
                        bytes: reply,
                    });
                }
                let name = String::from_utf8_lossy(&reply[idx..idx + name_len]).into_owned();
                idx += name_len;
                let symbol_type = LittleEndian::read_u16(&reply[idx..idx + 2]);
                idx += 2;
                newest_instance = instance;
                raw.push((instance, name, symbol_type));
            }

            if status == SUCCESS {
                break;
            }
            last_instance = (newest_instance + 1) as u16;
        }
        debug!("symbol enumeration returned {} instances", raw.len());
        Ok(raw)
    }

    /// structure makeup attributes for one Template Object instance
    fn structure_makeup(&mut self, instance_id: u16) -> Result<Template, Error> {
        self.session.ensure_connected()?;

        let mut body = Vec::with_capacity(20);
        body.push(GET_ATTRIBUTES);
        body.push(3); // request path size in words
        body.extend_from_slice(&[CLASS_ID_8BIT, TEMPLATE_OBJECT, INSTANCE_ID_16BIT, 0x00]);
        let mut half = [0u8; 2];
        LittleEndian::write_u16(&mut half, instance_id);
        body.extend_from_slice(&half);
        for attribute in &[4u16, 4, 5, 2, 1] {
            // count, then: definition size, structure size, member count, handle
            LittleEndian::write_u16(&mut half, *attribute);
            body.extend_from_slice(&half);
        }

        let message = self.sequenced(&body);
        let reply = self.session.send_unit_data(&message)?;
        self.check_service_status(&reply, &[SUCCESS])?;

        parse_structure_makeup(&reply)
    }

    /// Read Template by byte offset until the target reports completion.
    /// Shares the 0x4C code with Read Tag; the parse below is tied to this
    /// request, not to the reply byte.
    fn read_template(&mut self, instance_id: u16, object_definition_size: u32) -> Result<Vec<u8>, Error> {
        self.session.ensure_connected()?;

        let mut buffer = Vec::new();
        let mut byte_offset = 0u32;
        loop {
            // the template body is the definition size in words minus the
            // 23 bytes of object header
            let total = object_definition_size.saturating_mul(4).saturating_sub(23);
            let mut body = Vec::with_capacity(16);
            body.push(READ_TEMPLATE);
            body.push(3); // request path size in words
            body.extend_from_slice(&[CLASS_ID_8BIT, TEMPLATE_OBJECT, INSTANCE_ID_16BIT, 0x00]);
            let mut half = [0u8; 2];
            LittleEndian::write_u16(&mut half, instance_id);
            body.extend_from_slice(&half);
            let mut word = [0u8; 4];
            LittleEndian::write_u32(&mut word, byte_offset);
            body.extend_from_slice(&word);
            LittleEndian::write_u16(&mut half, total.saturating_sub(byte_offset) as u16);
            body.extend_from_slice(&half);

            let message = self.sequenced(&body);
            let reply = self.session.send_unit_data(&message)?;
            let status = self.check_service_status(&reply, &[SUCCESS, INSUFFICIENT_PACKETS])?;

            let received = reply.len() - UNIT_DATA_OFFSET;
            buffer.extend_from_slice(&reply[UNIT_DATA_OFFSET..]);
            if status == SUCCESS {
                break;
            }
            byte_offset += received as u32;
        }
        Ok(buffer)
    }

    /// fragmented read loop shared by the decoded and raw array reads
    fn read_fragmented(&mut self, tag: &str, count: u16) -> Result<(TagType, Vec<u8>), Error> {
        self.session.ensure_connected()?;

        let mut bytes = Vec::new();
        let mut data_type = None;
        let mut byte_offset = 0u32;
        loop {
            let rp = self.tag_path_or_status(tag, false, 7)?;
            let mut message = self.connected_message(READ_TAG_FRAGMENTED, &rp);
            let mut half = [0u8; 2];
            LittleEndian::write_u16(&mut half, count);
            message.extend_from_slice(&half);
            let mut word = [0u8; 4];
            LittleEndian::write_u32(&mut word, byte_offset);
            message.extend_from_slice(&word);

            let reply = self.session.send_unit_data(&message)?;
            let status = self.check_service_status(&reply, &[SUCCESS, INSUFFICIENT_PACKETS])?;
            if reply.len() < UNIT_DATA_OFFSET + 2 {
                return Err(Error::InvalidResponse {
                    reason: String::from("fragmented reply without a data type"),
                    bytes: reply,
                });
            }

            let code = LittleEndian::read_u16(&reply[UNIT_DATA_OFFSET..UNIT_DATA_OFFSET + 2]);
            let typ = TagType::from_code(code).ok_or(Error::UnknownType(code))?;
            data_type = Some(typ);

            let fragment = &reply[UNIT_DATA_OFFSET + 2..];
            bytes.extend_from_slice(fragment);
            if status == SUCCESS {
                break;
            }
            byte_offset += fragment.len() as u32;
        }

        match data_type {
            Some(typ) => Ok((typ, bytes)),
            None => Err(Error::InvalidResponse {
                reason: String::from("no fragment received"),
                bytes,
            }),
        }
    }

    /// one Write Tag Fragmented request
    fn write_fragment(
        &mut self,
        tag: &str,
        typ: TagType,
        total_count: u16,
        byte_offset: u32,
        data: &[u8],
    ) -> Result<(), Error> {
        let rp = self.tag_path_or_status(tag, false, 9)?;
        let mut message = self.connected_message(WRITE_TAG_FRAGMENTED, &rp);
        let mut half = [0u8; 2];
        LittleEndian::write_u16(&mut half, typ.code());
        message.extend_from_slice(&half);
        LittleEndian::write_u16(&mut half, total_count);
        message.extend_from_slice(&half);
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, byte_offset);
        message.extend_from_slice(&word);
        message.extend_from_slice(data);

        let reply = self.session.send_unit_data(&message)?;
        self.check_service_status(&reply, &[SUCCESS, INSUFFICIENT_PACKETS])?;
        Ok(())
    }

    /// sequence, service, path size in words, path
    fn connected_message(&mut self, service: u8, rp: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(rp.len() + 2);
        body.push(service);
        body.push((rp.len() / 2) as u8);
        body.extend_from_slice(rp);
        self.sequenced(&body)
    }

    /// prefix a CIP body with the next Class 3 sequence number
    fn sequenced(&mut self, body: &[u8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(body.len() + 2);
        let mut half = [0u8; 2];
        LittleEndian::write_u16(&mut half, self.session.next_sequence());
        message.extend_from_slice(&half);
        message.extend_from_slice(body);
        message
    }

    /// wrap a list of service requests into one Multiple Service Packet
    fn multiple_service(&mut self, services: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::with_capacity(8 + services.len() * 2);
        body.push(MULTIPLE_SERVICE_PACKET);
        body.push(2); // request path size in words
        body.push(CLASS_ID_8BIT);
        body.push(MESSAGE_ROUTER);
        body.push(INSTANCE_ID_8BIT);
        body.push(1);
        let mut half = [0u8; 2];
        LittleEndian::write_u16(&mut half, services.len() as u16);
        body.extend_from_slice(&half);
        let mut offset = services.len() * 2 + 2;
        for service in services {
            LittleEndian::write_u16(&mut half, offset as u16);
            body.extend_from_slice(&half);
            offset += service.len();
        }
        for service in services {
            body.extend_from_slice(service);
        }
        self.sequenced(&body)
    }

    /// build the request path or record a data failure in the status slot
    fn tag_path_or_status(&mut self, tag: &str, multi: bool, group: i32) -> Result<Vec<u8>, Error> {
        match epath::tag_path(tag, multi) {
            Some(rp) => Ok(rp),
            None => {
                self.session
                    .set_status(group, format!("cannot create a request packet for tag {}", tag));
                warn!("{}", self.session.status().1);
                Err(Error::InvalidAddress(tag.to_string()))
            }
        }
    }

    /// Check the connected reply's general status against the values this
    /// service treats as progress; anything else raises the decoded service
    /// error and records it.
    fn check_service_status(&mut self, reply: &[u8], accepted: &[u8]) -> Result<u8, Error> {
        let status = general_status(reply, UNIT_STATUS_OFFSET);
        if accepted.contains(&status) {
            return Ok(status);
        }
        self.session.set_status(
            3,
            format!(
                "service reply status {:#04x} - extended status: {}",
                status,
                extended_status(reply, UNIT_STATUS_OFFSET)
            ),
        );
        Err(service_error(reply, UNIT_STATUS_OFFSET))
    }
}

/// data type code then one value of that type, the layout of a Read Tag reply
fn read_typed_value(reply: &[u8], offset: usize) -> Result<Value, Error> {
    if reply.len() < offset + 2 {
        return Err(Error::InvalidResponse {
            reason: String::from("reply too short for a data type code"),
            bytes: reply.to_vec(),
        });
    }
    let code = LittleEndian::read_u16(&reply[offset..offset + 2]);
    let typ = TagType::from_code(code).ok_or(Error::UnknownType(code))?;
    typ.unpack(&reply[offset + 2..])
}

/// per sub-service start offsets of a Multiple Service Packet reply
fn sub_reply_offsets(reply: &[u8]) -> Result<Vec<usize>, Error> {
    let base = UNIT_DATA_OFFSET;
    if reply.len() < base + 2 {
        return Err(Error::InvalidResponse {
            reason: String::from("multi service reply without a count"),
            bytes: reply.to_vec(),
        });
    }
    let count = LittleEndian::read_u16(&reply[base..base + 2]) as usize;
    let mut offsets = Vec::with_capacity(count);
    let mut position = base + 2;
    let mut previous = 0usize;
    for _ in 0..count {
        if position + 2 > reply.len() {
            return Err(Error::InvalidResponse {
                reason: String::from("multi service reply offset table truncated"),
                bytes: reply.to_vec(),
            });
        }
        let offset = LittleEndian::read_u16(&reply[position..position + 2]) as usize;
        let start = base + offset;
        if start + 3 > reply.len() || offset < previous {
            return Err(Error::InvalidResponse {
                reason: String::from("multi service sub reply out of bounds"),
                bytes: reply.to_vec(),
            });
        }
        previous = offset;
        offsets.push(start);
        position += 2;
    }
    Ok(offsets)
}

/// Decode one enumerated symbol into a tag, or None for the controller's own
/// entries: module-qualified names, double underscore internals and anything
/// with the reserved bit set.
fn decode_symbol(
    instance_id: u32,
    name: String,
    symbol_type: u16,
) -> Result<Option<TagInfo>, Error> {
    if name.contains(':') || name.contains("__") {
        return Ok(None);
    }
    if symbol_type & 0x1000 != 0 {
        return Ok(None);
    }
    let dim = ((symbol_type & 0x6000) >> 13) as u8;

    if symbol_type & 0x8000 != 0 {
        return Ok(Some(TagInfo {
            instance_id,
            name,
            dim,
            kind: TagKind::Struct {
                template_instance_id: symbol_type & 0x0FFF,
                template: Template::default(),
                udt: Udt::default(),
            },
        }));
    }

    let code = symbol_type & 0x00FF;
    let data_type = TagType::from_code(code).ok_or(Error::UnknownType(code))?;
    let bit_position = if data_type == TagType::Bool {
        Some(((symbol_type & 0x0700) >> 8) as u8)
    } else {
        None
    };
    Ok(Some(TagInfo {
        instance_id,
        name,
        dim,
        kind: TagKind::Atomic {
            data_type,
            bit_position,
        },
    }))
}

/// The four structure makeup attributes, each preceded by its own status
/// word: definition size and structure size as UDINT, member count and
/// structure handle as UINT.
fn parse_structure_makeup(reply: &[u8]) -> Result<Template, Error> {
    let base = UNIT_DATA_OFFSET;
    if reply.len() < base + 30 {
        return Err(Error::InvalidResponse {
            reason: String::from("structure makeup reply truncated"),
            bytes: reply.to_vec(),
        });
    }
    let word = |at: usize| LittleEndian::read_u16(&reply[base + at..base + at + 2]);
    let dword = |at: usize| LittleEndian::read_u32(&reply[base + at..base + at + 4]);

    for &(status_at, attribute) in &[
        (4usize, "object definition size"),
        (12, "structure size"),
        (20, "member count"),
        (26, "structure handle"),
    ] {
        if word(status_at) != 0 {
            return Err(Error::InvalidResponse {
                reason: format!("{} attribute error", attribute),
                bytes: reply.to_vec(),
            });
        }
    }
    Ok(Template {
        object_definition_size: dword(6),
        structure_size: dword(14),
        member_count: word(22),
        structure_handle: word(28),
    })
}

/// Split a template buffer into its structure name, member names and member
/// records. The records sit at the front, 8 bytes per member with the first
/// one skipped; the NUL separated name block follows.
fn parse_template_buffer(buffer: &[u8], member_count: u16) -> Result<Udt, Error> {
    let mut udt = Udt {
        name: String::from("Not an user defined structure"),
        ..Udt::default()
    };

    for token in buffer.split(|b| *b == 0) {
        if token.len() <= 1 {
            continue;
        }
        let token = String::from_utf8_lossy(token);
        if let Some(semicolon) = token.find(';') {
            if udt.name == "Not an user defined structure" {
                udt.name = token[..semicolon].to_string();
            }
        } else if token.contains("ZZZZZZZZZZ") {
            continue;
        } else if token.chars().all(|c| c.is_ascii_alphabetic()) {
            udt.internal_tags.push(token.into_owned());
        }
    }

    if buffer.len() < member_count as usize * 8 {
        return Err(Error::InvalidResponse {
            reason: String::from("template buffer shorter than its member records"),
            bytes: buffer.to_vec(),
        });
    }
    let mut cursor = 0usize;
    for i in 0..member_count {
        if i != 0 {
            let array_size = LittleEndian::read_u16(&buffer[cursor..cursor + 2]);
            let data_type = TagType::from_code(LittleEndian::read_u16(&buffer[cursor + 2..cursor + 4]));
            let offset = LittleEndian::read_u32(&buffer[cursor + 4..cursor + 8]);
            udt.members.push((array_size, data_type, offset));
        }
        cursor += 8;
    }
    Ok(udt)
}

#[test]
fn test_decode_symbol_filters_and_fields() {
    // module qualified and internal names disappear
    assert!(decode_symbol(1, "Local:1:I".to_string(), 0x00C3)
        .unwrap()
        .is_none());
    assert!(decode_symbol(1, "__hidden".to_string(), 0x00C3)
        .unwrap()
        .is_none());
    // reserved bit 12
    assert!(decode_symbol(1, "Sys".to_string(), 0x10C3).unwrap().is_none());

    // plain INT scalar
    let info = decode_symbol(7, "Counts".to_string(), 0x00C3)
        .unwrap()
        .unwrap();
    assert_eq!(info.dim, 0);
    match info.kind {
        TagKind::Atomic {
            data_type,
            bit_position,
        } => {
            assert_eq!(data_type, TagType::Int);
            assert_eq!(bit_position, None);
        }
        _ => panic!("expected atomic"),
    }

    // BOOL carries its bit position, dimension bits decode
    let info = decode_symbol(8, "Flag".to_string(), 0x23C1).unwrap().unwrap();
    assert_eq!(info.dim, 1);
    match info.kind {
        TagKind::Atomic {
            data_type,
            bit_position,
        } => {
            assert_eq!(data_type, TagType::Bool);
            assert_eq!(bit_position, Some(3));
        }
        _ => panic!("expected atomic"),
    }

    // struct flag routes to the template instance
    let info = decode_symbol(9, "Recipe".to_string(), 0x8123).unwrap().unwrap();
    match info.kind {
        TagKind::Struct {
            template_instance_id,
            ..
        } => assert_eq!(template_instance_id, 0x0123),
        _ => panic!("expected struct"),
    }

    // an atomic code outside the table is a data error
    assert!(decode_symbol(10, "Odd".to_string(), 0x0042).is_err());
}

#[test]
fn test_multi_service_offsets_must_increase() {
    let mut reply = vec![0u8; 60];
    reply[UNIT_DATA_OFFSET] = 2; // two sub replies
    // offsets 6 and 4: not monotone
    reply[UNIT_DATA_OFFSET + 2] = 6;
    reply[UNIT_DATA_OFFSET + 4] = 4;
    assert!(sub_reply_offsets(&reply).is_err());

    reply[UNIT_DATA_OFFSET + 2] = 6;
    reply[UNIT_DATA_OFFSET + 4] = 8;
    let offsets = sub_reply_offsets(&reply).unwrap();
    assert_eq!(offsets, vec![UNIT_DATA_OFFSET + 6, UNIT_DATA_OFFSET + 8]);
}

#[test]
fn test_parse_template_buffer() {
    // two member records (first skipped), then the name block
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]); // host record
    buffer.extend_from_slice(&[0x0A, 0x00]); // array size 10
    buffer.extend_from_slice(&[0xC4, 0x00]); // DINT
    buffer.extend_from_slice(&[0x04, 0x00, 0x00, 0x00]); // offset 4
    buffer.extend_from_slice(b"MyUdt;ZZ\x00");
    buffer.extend_from_slice(b"Level\x00");
    buffer.extend_from_slice(b"ZZZZZZZZZZMember\x00");

    let udt = parse_template_buffer(&buffer, 2).unwrap();
    assert_eq!(udt.name, "MyUdt");
    assert_eq!(udt.internal_tags, vec!["Level".to_string()]);
    assert_eq!(udt.members, vec![(10, Some(TagType::Dint), 4)]);
}
