// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Request path construction for symbolic tags.
//!
//! A dotted tag expression such as `Outer.Inner[3,0].Bit` becomes a stream of
//! ANSI extended symbolic segments with element identifier sub-segments, the
//! IOI the message router walks to reach the addressed object.

use super::constant::{
    ELEMENT_ID_16BIT, ELEMENT_ID_32BIT, ELEMENT_ID_8BIT, EXTENDED_SYMBOL, PADDING_BYTE,
};
use byteorder::{ByteOrder, LittleEndian};

/// Build the request path for a tag expression.
///
/// Returns None when no valid path can be built: an empty member name, a
/// malformed index list or an index beyond the 32 bit element identifier.
/// With `multi` set the path is prefixed with its length in words, the form
/// a multiple service packet entry expects.
pub fn tag_path(tag: &str, multi: bool) -> Option<Vec<u8>> {
    let mut rp = Vec::with_capacity(tag.len() + 8);

    for member in tag.split('.') {
        let (name, indices) = split_indices(member)?;
        if name.is_empty() || name.len() > u8::MAX as usize {
            return None;
        }

        rp.push(EXTENDED_SYMBOL);
        rp.push(name.len() as u8);
        rp.extend_from_slice(name.as_bytes());
        // total request path length must be word aligned
        if name.len() % 2 == 1 {
            rp.push(PADDING_BYTE);
        }

        for index in indices {
            if index <= 0xFF {
                rp.push(ELEMENT_ID_8BIT);
                rp.push(index as u8);
            } else if index <= 0xFFFF {
                rp.push(ELEMENT_ID_16BIT);
                rp.push(PADDING_BYTE);
                let mut buf = [0u8; 2];
                LittleEndian::write_u16(&mut buf, index as u16);
                rp.extend_from_slice(&buf);
            } else {
                rp.push(ELEMENT_ID_32BIT);
                rp.push(PADDING_BYTE);
                let mut buf = [0u8; 4];
                LittleEndian::write_u32(&mut buf, index);
                rp.extend_from_slice(&buf);
            }
        }
    }

    if multi {
        let mut prefixed = Vec::with_capacity(rp.len() + 1);
        prefixed.push((rp.len() / 2) as u8);
        prefixed.extend_from_slice(&rp);
        return Some(prefixed);
    }
    Some(rp)
}

/// split one dotted member into its name and bracketed index list
fn split_indices(member: &str) -> Option<(&str, Vec<u32>)> {
    let open = match member.find('[') {
        Some(pos) => pos,
        None => return Some((member, Vec::new())),
    };
    if !member.ends_with(']') {
        return None;
    }

    let name = &member[..open];
    let inside = &member[open + 1..member.len() - 1];
    let mut indices = Vec::new();
    for part in inside.split(',') {
        // an index beyond u32 cannot be encoded in any element identifier
        indices.push(part.trim().parse::<u32>().ok()?);
    }
    Some((name, indices))
}

#[test]
fn test_plain_tag() {
    let rp = tag_path("Counts", false).unwrap();
    assert_eq!(rp, vec![0x91, 0x06, b'C', b'o', b'u', b'n', b't', b's']);
}

#[test]
fn test_odd_name_is_padded() {
    let rp = tag_path("parts", false).unwrap();
    assert_eq!(rp, vec![0x91, 0x05, b'p', b'a', b'r', b't', b's', 0x00]);
    assert_eq!(rp.len() % 2, 0);
}

#[test]
fn test_nested_members_with_indices() {
    let rp = tag_path("Outer.Inner[3,0].Bit", false).unwrap();
    let expected = vec![
        0x91, 0x05, b'O', b'u', b't', b'e', b'r', 0x00, // Outer + pad
        0x91, 0x05, b'I', b'n', b'n', b'e', b'r', 0x00, // Inner + pad
        0x28, 0x03, // element 3
        0x28, 0x00, // element 0
        0x91, 0x03, b'B', b'i', b't', 0x00, // Bit + pad
    ];
    assert_eq!(rp, expected);
}

#[test]
fn test_element_identifier_widths() {
    let rp = tag_path("a[255]", false).unwrap();
    assert_eq!(&rp[4..], &[0x28, 0xFF]);
    let rp = tag_path("a[256]", false).unwrap();
    assert_eq!(&rp[4..], &[0x29, 0x00, 0x00, 0x01]);
    let rp = tag_path("a[65535]", false).unwrap();
    assert_eq!(&rp[4..], &[0x29, 0x00, 0xFF, 0xFF]);
    let rp = tag_path("a[65536]", false).unwrap();
    assert_eq!(&rp[4..], &[0x2A, 0x00, 0x00, 0x00, 0x01, 0x00]);
}

#[test]
fn test_multi_prefix_is_word_count() {
    let rp = tag_path("Counts", true).unwrap();
    assert_eq!(rp[0], 4);
    assert_eq!(&rp[1..3], &[0x91, 0x06]);
}

#[test]
fn test_always_even_and_starts_with_symbol_segment() {
    for tag in &["a", "ab", "abc", "tank.level[2]", "x[1,2,3].y", "m[70000]"] {
        let rp = tag_path(tag, false).unwrap();
        assert_eq!(rp.len() % 2, 0, "odd path for {}", tag);
        assert_eq!(rp[0], 0x91);
    }
}

#[test]
fn test_rejected_expressions() {
    assert!(tag_path("", false).is_none());
    assert!(tag_path("a.", false).is_none());
    assert!(tag_path("a[", false).is_none());
    assert!(tag_path("a[1", false).is_none());
    assert!(tag_path("a[one]", false).is_none());
    // beyond the 32 bit element identifier
    assert!(tag_path("a[4294967296]", false).is_none());
}
