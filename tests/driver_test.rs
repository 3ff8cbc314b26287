extern crate abeip;

use abeip::client;
use abeip::error::Error;
use abeip::field::{TagType, Value};
use abeip::session::Config;
use abeip::slc;
use abeip::transport::Transport;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

type SentLog = Rc<RefCell<Vec<Vec<u8>>>>;

/// Feeds scripted reply frames and records every request the driver sends.
/// Connected replies get the request's sequence number stitched in at bytes
/// 44..46 so the echo check passes, unless `patch_sequence` is off.
struct Scripted {
    replies: VecDeque<Vec<u8>>,
    sent: SentLog,
    patch_sequence: bool,
}

impl Scripted {
    fn new(replies: Vec<Vec<u8>>) -> (Scripted, SentLog) {
        let sent: SentLog = Rc::new(RefCell::new(Vec::new()));
        (
            Scripted {
                replies: replies.into(),
                sent: Rc::clone(&sent),
                patch_sequence: true,
            },
            sent,
        )
    }
}

impl Transport for Scripted {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, Error> {
        self.sent.borrow_mut().push(request.to_vec());
        let mut reply = self.replies.pop_front().ok_or(Error::Send)?;
        if self.patch_sequence
            && reply.len() >= 46
            && request.len() >= 46
            && reply[0] == 0x70
            && request[0] == 0x70
        {
            let sequence = [request[44], request[45]];
            reply[44..46].copy_from_slice(&sequence);
        }
        Ok(reply)
    }

    fn send(&mut self, request: &[u8]) -> Result<(), Error> {
        self.sent.borrow_mut().push(request.to_vec());
        Ok(())
    }
}

fn write_u16(frame: &mut Vec<u8>, value: u16) {
    frame.extend_from_slice(&value.to_le_bytes());
}

/// 24 byte encapsulation header plus body
fn encap_reply(command: u16, session: u32, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(24 + body.len());
    write_u16(&mut frame, command);
    write_u16(&mut frame, body.len() as u16);
    frame.extend_from_slice(&session.to_le_bytes());
    frame.extend_from_slice(&[0u8; 4]); // status
    frame.extend_from_slice(b"_abeip__"); // context echo
    frame.extend_from_slice(&[0u8; 4]); // option
    frame.extend_from_slice(body);
    frame
}

/// unconnected reply: null address item, unconnected data item, `cip` runs
/// from the reply service byte at frame offset 40
fn rr_reply(session: u32, cip: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(16 + cip.len());
    body.extend_from_slice(&[0u8; 4]); // interface handle
    write_u16(&mut body, 10); // timeout
    write_u16(&mut body, 2); // item count
    write_u16(&mut body, 0x0000); // null address item
    write_u16(&mut body, 0);
    write_u16(&mut body, 0x00B2); // unconnected data item
    write_u16(&mut body, cip.len() as u16);
    body.extend_from_slice(cip);
    encap_reply(0x6F, session, &body)
}

/// connected reply: the sequence lands at frame offset 44, `cip` runs from
/// the reply service byte at frame offset 46
fn unit_reply(session: u32, cid: [u8; 4], cip: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(20 + cip.len());
    body.extend_from_slice(&[0u8; 4]); // interface handle
    write_u16(&mut body, 10); // timeout
    write_u16(&mut body, 2); // item count
    write_u16(&mut body, 0x00A1); // connected address item
    write_u16(&mut body, 4);
    body.extend_from_slice(&cid);
    write_u16(&mut body, 0x00B1); // connected data item
    write_u16(&mut body, 2 + cip.len() as u16);
    write_u16(&mut body, 0); // sequence, patched by the mock
    body.extend_from_slice(cip);
    encap_reply(0x70, session, &body)
}

const SESSION: u32 = 0x4433_2211;
const CID: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];

fn register_reply() -> Vec<u8> {
    encap_reply(0x65, SESSION, &[0x01, 0x00, 0x00, 0x00])
}

fn forward_close_reply() -> Vec<u8> {
    rr_reply(SESSION, &[0xCE, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
}

fn forward_open_reply() -> Vec<u8> {
    let mut cip = vec![0xD4, 0x00, 0x00, 0x00];
    cip.extend_from_slice(&CID); // frame bytes 44..48
    cip.extend_from_slice(&[0x00; 8]); // rest of the connect reply
    rr_reply(SESSION, &cip)
}

#[test]
fn test_register_session_happy_path() {
    let (transport, sent) = Scripted::new(vec![register_reply(), forward_close_reply()]);
    let cl = client::Driver::new(transport, Config::default()).unwrap();
    assert!(cl.is_connected());

    let sent = sent.borrow();
    // register request: command, length 4, no session yet, zero status
    let register = &sent[0];
    assert_eq!(&register[0..4], &[0x65, 0x00, 0x04, 0x00]);
    assert_eq!(&register[4..12], &[0u8; 8]);
    assert_eq!(&register[12..20], b"_abeip__");
    // body: protocol version 1, option flags 0
    assert_eq!(&register[24..28], &[0x01, 0x00, 0x00, 0x00]);

    // the adopted handle shows up in the next header
    let close_stale = &sent[1];
    assert_eq!(&close_stale[4..8], &[0x11, 0x22, 0x33, 0x44]);
}

#[test]
fn test_read_tag_int() {
    let (transport, _sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        // Read Tag reply: INT, value 26
        unit_reply(SESSION, CID, &[0xCC, 0x00, 0x00, 0x00, 0xC3, 0x00, 0x1A, 0x00]),
    ]);
    let mut cl = client::Driver::new(transport, Config::default()).unwrap();

    let value = cl.read_tag("Counts").unwrap();
    assert_eq!(value, Value::Int(26));
    assert_eq!(value.tag_type().name(), "INT");
}

#[test]
fn test_write_tag_request_layout() {
    let (transport, sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        unit_reply(SESSION, CID, &[0xCD, 0x00, 0x00, 0x00]),
    ]);
    let mut cl = client::Driver::new(transport, Config::default()).unwrap();
    cl.write_tag("Counts", Value::Int(26)).unwrap();

    let sent = sent.borrow();
    let write = sent.last().unwrap();
    // connected data item carries the target connection id
    assert_eq!(&write[36..40], &CID);
    // service, path words, path, type, count, value
    assert_eq!(
        &write[46..],
        &[
            0x4D, 0x04, 0x91, 0x06, b'C', b'o', b'u', b'n', b't', b's', 0xC3, 0x00, 0x01, 0x00,
            0x1A, 0x00
        ]
    );
}

#[test]
fn test_fragmented_array_read() {
    // 1750 SINT elements arrive as three partial fragments and a final one
    let mut replies = vec![register_reply(), forward_close_reply(), forward_open_reply()];
    for (status, count) in &[(0x06u8, 450usize), (0x06, 450), (0x06, 450), (0x00, 400)] {
        let mut cip = vec![0xD2, 0x00, *status, 0x00, 0xC2, 0x00];
        cip.extend(std::iter::repeat(0x7Fu8).take(*count));
        replies.push(unit_reply(SESSION, CID, &cip));
    }
    let (transport, sent) = Scripted::new(replies);
    let mut cl = client::Driver::new(transport, Config::default()).unwrap();

    let values = cl.read_array("TotalCount", 1750).unwrap();
    assert_eq!(values.len(), 1750);
    assert!(values.iter().all(|v| *v == Value::Sint(0x7F)));

    let sent = sent.borrow();
    // four round trips after register, stale close and forward open
    assert_eq!(sent.len(), 7);
    // the byte offset advances by the received data
    for (request, offset) in sent[3..].iter().zip(&[0u32, 450, 900, 1350]) {
        // service, path size, 12 byte path, element count, then the offset
        let at = 46 + 2 + 12 + 2;
        assert_eq!(&request[at..at + 4], &offset.to_le_bytes());
    }
}

#[test]
fn test_multi_write_drops_bad_entry() {
    let mut cip = vec![0x8A, 0x00, 0x00, 0x00];
    cip.extend_from_slice(&[0x02, 0x00]); // two sub replies
    cip.extend_from_slice(&[0x06, 0x00, 0x0A, 0x00]); // offsets
    cip.extend_from_slice(&[0xCD, 0x00, 0x00, 0x00]); // A written
    cip.extend_from_slice(&[0xCD, 0x00, 0x00, 0x00]); // C written
    let (transport, sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        unit_reply(SESSION, CID, &cip),
    ]);
    let mut cl = client::Driver::new(transport, Config::default()).unwrap();

    let entries = vec![
        ("A".to_string(), Value::Int(1), TagType::Int),
        ("B".to_string(), Value::Real(f32::NAN), TagType::Int),
        ("C".to_string(), Value::Int(3), TagType::Int),
    ];
    let results = cl.write_tags(&entries).unwrap();
    assert_eq!(
        results,
        vec![
            ("A".to_string(), client::WriteStatus::Good),
            ("C".to_string(), client::WriteStatus::Good),
        ]
    );
    // the dropped entry is reported through the status slot
    assert!(cl.get_status().1.contains("B"));

    let sent = sent.borrow();
    let request = sent.last().unwrap();
    // service count inside the multiple service packet is two
    assert_eq!(&request[52..54], &[0x02, 0x00]);
}

#[test]
fn test_multi_read_mixed_results() {
    let mut cip = vec![0x8A, 0x00, 0x1E, 0x00]; // one embedded service failed
    cip.extend_from_slice(&[0x02, 0x00]);
    cip.extend_from_slice(&[0x06, 0x00, 0x0E, 0x00]);
    cip.extend_from_slice(&[0xCC, 0x00, 0x00, 0x00, 0xC3, 0x00, 0x1A, 0x00]);
    cip.extend_from_slice(&[0xCC, 0x00, 0x05, 0x00]); // destination unknown
    let (transport, _sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        unit_reply(SESSION, CID, &cip),
    ]);
    let mut cl = client::Driver::new(transport, Config::default()).unwrap();

    let results = cl.read_tags(&["Counts", "Missing"]).unwrap();
    assert_eq!(
        results,
        vec![
            ("Counts".to_string(), Some(Value::Int(26))),
            ("Missing".to_string(), None),
        ]
    );
}

#[test]
fn test_tag_list_enumeration_resumes() {
    // first page, more to come: Counts plus a module tag that gets filtered
    let mut page1 = vec![0xD5, 0x00, 0x06, 0x00];
    page1.extend_from_slice(&7u32.to_le_bytes());
    page1.extend_from_slice(&[0x06, 0x00]);
    page1.extend_from_slice(b"Counts");
    page1.extend_from_slice(&[0xC3, 0x00]);
    page1.extend_from_slice(&9u32.to_le_bytes());
    page1.extend_from_slice(&[0x09, 0x00]);
    page1.extend_from_slice(b"Local:1:I");
    page1.extend_from_slice(&[0xC3, 0x00]);
    // final page: a one dimensional REAL array
    let mut page2 = vec![0xD5, 0x00, 0x00, 0x00];
    page2.extend_from_slice(&12u32.to_le_bytes());
    page2.extend_from_slice(&[0x05, 0x00]);
    page2.extend_from_slice(b"Level");
    page2.extend_from_slice(&[0xCA, 0x20]);

    let (transport, sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        unit_reply(SESSION, CID, &page1),
        unit_reply(SESSION, CID, &page2),
    ]);
    let mut cl = client::Driver::new(transport, Config::default()).unwrap();

    let tags = cl.get_tag_list().unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].name, "Counts");
    assert_eq!(tags[0].dim, 0);
    assert_eq!(tags[1].name, "Level");
    assert_eq!(tags[1].dim, 1);

    let sent = sent.borrow();
    // the second enumeration request resumes after the last seen instance
    let resume = &sent[4];
    let instance_at = 46 + 2 + 4; // service, path size, class and instance segments
    assert_eq!(&resume[instance_at..instance_at + 2], &[0x0A, 0x00]);
}

#[test]
fn test_sequence_mismatch_is_a_data_error() {
    let (mut transport, _sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        unit_reply(SESSION, CID, &[0xCC, 0x00, 0x00, 0x00, 0xC3, 0x00, 0x1A, 0x00]),
    ]);
    transport.patch_sequence = false;
    let mut cl = client::Driver::new(transport, Config::default()).unwrap();

    match cl.read_tag("Counts") {
        Err(Error::Sequence { .. }) => {}
        other => panic!("expected a sequence mismatch, got {:?}", other),
    }
    // a data error keeps the session
    assert!(cl.is_connected());
}

#[test]
fn test_encapsulation_error_drops_the_session() {
    let mut bad = unit_reply(SESSION, CID, &[0xCC, 0x00, 0x00, 0x00, 0xC3, 0x00, 0x1A, 0x00]);
    bad[8] = 0x64; // invalid session handle
    let (transport, _sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        bad,
    ]);
    let mut cl = client::Driver::new(transport, Config::default()).unwrap();

    match cl.read_tag("Counts") {
        Err(Error::Encapsulation { code: 0x64 }) => {}
        other => panic!("expected an encapsulation error, got {:?}", other),
    }
    assert!(!cl.is_connected());
}

#[test]
fn test_pccc_preset_write() {
    let mut cip = vec![0xCB, 0x00, 0x00, 0x00];
    cip.extend_from_slice(&[0x07, 0x09, 0x10, 0x09, 0x10, 0x19, 0x71]); // requestor echo
    cip.push(0x4F); // DF1 reply command
    cip.push(0x00); // PCCC status, frame byte 58
    cip.extend_from_slice(&[0x00, 0x00]); // transaction number echo
    let (transport, sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        unit_reply(SESSION, CID, &cip),
    ]);
    let mut cl = slc::Driver::new(transport, Config::default()).unwrap();

    cl.write_tag("T4:3.PRE", Value::Int(431)).unwrap();

    let sent = sent.borrow();
    let request = sent.last().unwrap();
    // Execute PCCC service and object path
    assert_eq!(&request[46..52], &[0x4B, 0x02, 0x20, 0x67, 0x24, 0x01]);
    // requestor id: length, vendor id, vendor serial
    assert_eq!(&request[52..59], &[0x07, 0x09, 0x10, 0x09, 0x10, 0x19, 0x71]);
    // DF1 command
    assert_eq!(&request[59..61], &[0x0F, 0x00]);
    // function, byte count, file, type, element, sub element, mask, preset
    assert_eq!(
        &request[63..],
        &[0xAB, 0x02, 0x04, 0x86, 0x03, 0x01, 0xFF, 0xFF, 0xAF, 0x01]
    );
}

#[test]
fn test_pccc_timer_preset_and_accumulator_read() {
    let mut cip = vec![0xCB, 0x00, 0x00, 0x00];
    cip.extend_from_slice(&[0x07, 0x09, 0x10, 0x09, 0x10, 0x19, 0x71]);
    cip.push(0x4F);
    cip.push(0x00);
    cip.extend_from_slice(&[0x00, 0x00]);
    // timer element: control word, preset 431, accumulator 77
    cip.extend_from_slice(&[0x00, 0x20]);
    cip.extend_from_slice(&431i16.to_le_bytes());
    cip.extend_from_slice(&77i16.to_le_bytes());
    let (transport, _sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        unit_reply(SESSION, CID, &cip.clone()),
        unit_reply(SESSION, CID, &cip),
    ]);
    let mut cl = slc::Driver::new(transport, Config::default()).unwrap();

    assert_eq!(cl.read_tag("T4:3.PRE").unwrap(), Value::Int(431));
    assert_eq!(cl.read_tag("T4:3.ACC").unwrap(), Value::Int(77));
}

#[test]
fn test_pccc_bit_read() {
    let mut cip = vec![0xCB, 0x00, 0x00, 0x00];
    cip.extend_from_slice(&[0x07, 0x09, 0x10, 0x09, 0x10, 0x19, 0x71]);
    cip.push(0x4F);
    cip.push(0x00);
    cip.extend_from_slice(&[0x00, 0x00]);
    cip.extend_from_slice(&0b0000_0000_0010_0000u16.to_le_bytes()); // bit 5 set
    let (transport, _sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        unit_reply(SESSION, CID, &cip.clone()),
        unit_reply(SESSION, CID, &cip),
    ]);
    let mut cl = slc::Driver::new(transport, Config::default()).unwrap();

    assert_eq!(cl.read_tag("B3/21").unwrap(), Value::Bool(true));
    assert_eq!(cl.read_tag("B3/22").unwrap(), Value::Bool(false));
}

#[test]
fn test_pccc_error_status() {
    let mut cip = vec![0xCB, 0x00, 0x00, 0x00];
    cip.extend_from_slice(&[0x07, 0x09, 0x10, 0x09, 0x10, 0x19, 0x71]);
    cip.push(0x4F);
    cip.push(0x10); // illegal command or format
    cip.extend_from_slice(&[0x00, 0x00]);
    let (transport, _sent) = Scripted::new(vec![
        register_reply(),
        forward_close_reply(),
        forward_open_reply(),
        unit_reply(SESSION, CID, &cip),
    ]);
    let mut cl = slc::Driver::new(transport, Config::default()).unwrap();

    match cl.read_tag("N7:0") {
        Err(Error::Pccc { code: 0x10 }) => {}
        other => panic!("expected a PCCC error, got {:?}", other),
    }
    assert_ne!(cl.get_status().0, 0);
}
