// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Typed values and their little endian CIP wire format

use super::error::Error;
use byteorder::{ByteOrder, LittleEndian};

/// wire encoding of a true BOOL.
/// When reading a BOOL tag the controller returns 0 or 0xFF, never 0x01.
pub const BOOL_ONE: u8 = 0xFF;

/// CIP atomic data type descriptor.
/// Each variant maps to a wire type code and, for the fixed size types,
/// a byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    Bool,
    Sint,
    Int,
    Dint,
    Lint,
    Usint,
    Uint,
    Udint,
    Ulint,
    Real,
    Lreal,
    Stime,
    Date,
    TimeOfDay,
    DateAndTime,
    String,
    Byte,
    Word,
    Dword,
    Lword,
    String2,
    Ftime,
    Ltime,
    Itime,
    Stringn,
    ShortString,
    Time,
    Epath,
    Engunit,
    Stringi,
}

impl TagType {
    pub fn code(self) -> u16 {
        match self {
            TagType::Bool => 0xC1,
            TagType::Sint => 0xC2,
            TagType::Int => 0xC3,
            TagType::Dint => 0xC4,
            TagType::Lint => 0xC5,
            TagType::Usint => 0xC6,
            TagType::Uint => 0xC7,
            TagType::Udint => 0xC8,
            TagType::Ulint => 0xC9,
            TagType::Real => 0xCA,
            TagType::Lreal => 0xCB,
            TagType::Stime => 0xCC,
            TagType::Date => 0xCD,
            TagType::TimeOfDay => 0xCE,
            TagType::DateAndTime => 0xCF,
            TagType::String => 0xD0,
            TagType::Byte => 0xD1,
            TagType::Word => 0xD2,
            TagType::Dword => 0xD3,
            TagType::Lword => 0xD4,
            TagType::String2 => 0xD5,
            TagType::Ftime => 0xD6,
            TagType::Ltime => 0xD7,
            TagType::Itime => 0xD8,
            TagType::Stringn => 0xD9,
            TagType::ShortString => 0xDA,
            TagType::Time => 0xDB,
            TagType::Epath => 0xDC,
            TagType::Engunit => 0xDD,
            TagType::Stringi => 0xDE,
        }
    }

    pub fn from_code(code: u16) -> Option<TagType> {
        let typ = match code {
            0xC1 => TagType::Bool,
            0xC2 => TagType::Sint,
            0xC3 => TagType::Int,
            0xC4 => TagType::Dint,
            0xC5 => TagType::Lint,
            0xC6 => TagType::Usint,
            0xC7 => TagType::Uint,
            0xC8 => TagType::Udint,
            0xC9 => TagType::Ulint,
            0xCA => TagType::Real,
            0xCB => TagType::Lreal,
            0xCC => TagType::Stime,
            0xCD => TagType::Date,
            0xCE => TagType::TimeOfDay,
            0xCF => TagType::DateAndTime,
            0xD0 => TagType::String,
            0xD1 => TagType::Byte,
            0xD2 => TagType::Word,
            0xD3 => TagType::Dword,
            0xD4 => TagType::Lword,
            0xD5 => TagType::String2,
            0xD6 => TagType::Ftime,
            0xD7 => TagType::Ltime,
            0xD8 => TagType::Itime,
            0xD9 => TagType::Stringn,
            0xDA => TagType::ShortString,
            0xDB => TagType::Time,
            0xDC => TagType::Epath,
            0xDD => TagType::Engunit,
            0xDE => TagType::Stringi,
            _ => return None,
        };
        Some(typ)
    }

    pub fn name(self) -> &'static str {
        match self {
            TagType::Bool => "BOOL",
            TagType::Sint => "SINT",
            TagType::Int => "INT",
            TagType::Dint => "DINT",
            TagType::Lint => "LINT",
            TagType::Usint => "USINT",
            TagType::Uint => "UINT",
            TagType::Udint => "UDINT",
            TagType::Ulint => "ULINT",
            TagType::Real => "REAL",
            TagType::Lreal => "LREAL",
            TagType::Stime => "STIME",
            TagType::Date => "DATE",
            TagType::TimeOfDay => "TIME_OF_DAY",
            TagType::DateAndTime => "DATE_AND_TIME",
            TagType::String => "STRING",
            TagType::Byte => "BYTE",
            TagType::Word => "WORD",
            TagType::Dword => "DWORD",
            TagType::Lword => "LWORD",
            TagType::String2 => "STRING2",
            TagType::Ftime => "FTIME",
            TagType::Ltime => "LTIME",
            TagType::Itime => "ITIME",
            TagType::Stringn => "STRINGN",
            TagType::ShortString => "SHORT_STRING",
            TagType::Time => "TIME",
            TagType::Epath => "EPATH",
            TagType::Engunit => "ENGUNIT",
            TagType::Stringi => "STRINGI",
        }
    }

    pub fn from_name(name: &str) -> Option<TagType> {
        let typ = match name {
            "BOOL" => TagType::Bool,
            "SINT" => TagType::Sint,
            "INT" => TagType::Int,
            "DINT" => TagType::Dint,
            "LINT" => TagType::Lint,
            "USINT" => TagType::Usint,
            "UINT" => TagType::Uint,
            "UDINT" => TagType::Udint,
            "ULINT" => TagType::Ulint,
            "REAL" => TagType::Real,
            "LREAL" => TagType::Lreal,
            "STIME" => TagType::Stime,
            "DATE" => TagType::Date,
            "TIME_OF_DAY" => TagType::TimeOfDay,
            "DATE_AND_TIME" => TagType::DateAndTime,
            "STRING" => TagType::String,
            "BYTE" => TagType::Byte,
            "WORD" => TagType::Word,
            "DWORD" => TagType::Dword,
            "LWORD" => TagType::Lword,
            "STRING2" => TagType::String2,
            "FTIME" => TagType::Ftime,
            "LTIME" => TagType::Ltime,
            "ITIME" => TagType::Itime,
            "STRINGN" => TagType::Stringn,
            "SHORT_STRING" => TagType::ShortString,
            "TIME" => TagType::Time,
            "EPATH" => TagType::Epath,
            "ENGUNIT" => TagType::Engunit,
            "STRINGI" => TagType::Stringi,
            _ => return None,
        };
        Some(typ)
    }

    /// wire size in bytes, None for the variable length types
    pub fn size(self) -> Option<usize> {
        match self {
            TagType::Bool | TagType::Sint | TagType::Usint | TagType::Byte => Some(1),
            TagType::Int | TagType::Uint | TagType::Word | TagType::Date | TagType::Itime => {
                Some(2)
            }
            TagType::Dint
            | TagType::Udint
            | TagType::Real
            | TagType::Dword
            | TagType::Stime
            | TagType::TimeOfDay
            | TagType::Ftime
            | TagType::Time => Some(4),
            TagType::Lint
            | TagType::Ulint
            | TagType::Lreal
            | TagType::Lword
            | TagType::DateAndTime
            | TagType::Ltime => Some(8),
            TagType::String
            | TagType::String2
            | TagType::Stringn
            | TagType::ShortString
            | TagType::Epath
            | TagType::Engunit
            | TagType::Stringi => None,
        }
    }

    /// decode one value of this type from the front of `bytes`
    pub fn unpack(self, bytes: &[u8]) -> Result<Value, Error> {
        let size = self.size().ok_or_else(|| Error::UnknownType(self.code()))?;
        if bytes.len() < size {
            return Err(Error::InvalidResponse {
                reason: format!("{} needs {} bytes got {}", self.name(), size, bytes.len()),
                bytes: bytes.to_vec(),
            });
        }
        let value = match self {
            TagType::Bool => Value::Bool(bytes[0] == BOOL_ONE),
            TagType::Sint => Value::Sint(bytes[0] as i8),
            TagType::Int => Value::Int(LittleEndian::read_i16(bytes)),
            TagType::Dint => Value::Dint(LittleEndian::read_i32(bytes)),
            TagType::Lint => Value::Lint(LittleEndian::read_i64(bytes)),
            TagType::Usint => Value::Usint(bytes[0]),
            TagType::Uint => Value::Uint(LittleEndian::read_u16(bytes)),
            TagType::Udint => Value::Udint(LittleEndian::read_u32(bytes)),
            TagType::Ulint => Value::Ulint(LittleEndian::read_u64(bytes)),
            TagType::Real => Value::Real(LittleEndian::read_f32(bytes)),
            TagType::Lreal => Value::Lreal(LittleEndian::read_f64(bytes)),
            TagType::Byte => Value::Byte(bytes[0]),
            TagType::Word => Value::Word(LittleEndian::read_u16(bytes)),
            TagType::Dword => Value::Dword(LittleEndian::read_u32(bytes)),
            TagType::Lword => Value::Lword(LittleEndian::read_u64(bytes)),
            _ => return Err(Error::UnknownType(self.code())),
        };
        Ok(value)
    }
}

/// a typed value as read from or written to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Sint(i8),
    Int(i16),
    Dint(i32),
    Lint(i64),
    Usint(u8),
    Uint(u16),
    Udint(u32),
    Ulint(u64),
    Real(f32),
    Lreal(f64),
    Byte(u8),
    Word(u16),
    Dword(u32),
    Lword(u64),
}

impl Value {
    pub fn tag_type(&self) -> TagType {
        match self {
            Value::Bool(_) => TagType::Bool,
            Value::Sint(_) => TagType::Sint,
            Value::Int(_) => TagType::Int,
            Value::Dint(_) => TagType::Dint,
            Value::Lint(_) => TagType::Lint,
            Value::Usint(_) => TagType::Usint,
            Value::Uint(_) => TagType::Uint,
            Value::Udint(_) => TagType::Udint,
            Value::Ulint(_) => TagType::Ulint,
            Value::Real(_) => TagType::Real,
            Value::Lreal(_) => TagType::Lreal,
            Value::Byte(_) => TagType::Byte,
            Value::Word(_) => TagType::Word,
            Value::Dword(_) => TagType::Dword,
            Value::Lword(_) => TagType::Lword,
        }
    }

    /// little endian wire bytes.
    /// BOOL packs to a single 0x00 or 0xFF byte.
    pub fn pack(&self) -> Vec<u8> {
        match *self {
            Value::Bool(b) => vec![if b { BOOL_ONE } else { 0x00 }],
            Value::Sint(v) => vec![v as u8],
            Value::Usint(v) | Value::Byte(v) => vec![v],
            Value::Int(v) => {
                let mut buf = vec![0u8; 2];
                LittleEndian::write_i16(&mut buf, v);
                buf
            }
            Value::Uint(v) | Value::Word(v) => {
                let mut buf = vec![0u8; 2];
                LittleEndian::write_u16(&mut buf, v);
                buf
            }
            Value::Dint(v) => {
                let mut buf = vec![0u8; 4];
                LittleEndian::write_i32(&mut buf, v);
                buf
            }
            Value::Udint(v) | Value::Dword(v) => {
                let mut buf = vec![0u8; 4];
                LittleEndian::write_u32(&mut buf, v);
                buf
            }
            Value::Lint(v) => {
                let mut buf = vec![0u8; 8];
                LittleEndian::write_i64(&mut buf, v);
                buf
            }
            Value::Ulint(v) | Value::Lword(v) => {
                let mut buf = vec![0u8; 8];
                LittleEndian::write_u64(&mut buf, v);
                buf
            }
            Value::Real(v) => {
                let mut buf = vec![0u8; 4];
                LittleEndian::write_f32(&mut buf, v);
                buf
            }
            Value::Lreal(v) => {
                let mut buf = vec![0u8; 8];
                LittleEndian::write_f64(&mut buf, v);
                buf
            }
        }
    }
}

#[test]
fn test_round_trip() {
    let values = vec![
        Value::Bool(true),
        Value::Bool(false),
        Value::Sint(-5),
        Value::Int(-12345),
        Value::Dint(-7_000_000),
        Value::Lint(-9_000_000_000),
        Value::Usint(200),
        Value::Uint(65000),
        Value::Udint(4_000_000_000),
        Value::Ulint(18_000_000_000_000_000_000),
        Value::Real(53.5),
        Value::Lreal(-0.125),
        Value::Byte(0xAB),
        Value::Word(0xABCD),
        Value::Dword(0xDEADBEEF),
        Value::Lword(0x0102_0304_0506_0708),
    ];
    for v in values {
        let bytes = v.pack();
        assert_eq!(bytes.len(), v.tag_type().size().unwrap());
        assert_eq!(v.tag_type().unpack(&bytes).unwrap(), v);
    }
}

#[test]
fn test_bool_wire_contract() {
    assert_eq!(Value::Bool(true).pack(), vec![0xFF]);
    assert_eq!(Value::Bool(false).pack(), vec![0x00]);
    // 0x01 is not a true BOOL on the wire
    assert_eq!(TagType::Bool.unpack(&[0x01]).unwrap(), Value::Bool(false));
    assert_eq!(TagType::Bool.unpack(&[0xFF]).unwrap(), Value::Bool(true));
}

#[test]
fn test_int_is_signed() {
    let bytes = Value::Int(-1).pack();
    assert_eq!(bytes, vec![0xFF, 0xFF]);
    assert_eq!(TagType::Int.unpack(&bytes).unwrap(), Value::Int(-1));
    // same bytes through the unsigned variant
    assert_eq!(TagType::Uint.unpack(&bytes).unwrap(), Value::Uint(65535));
}

#[test]
fn test_unknown_code() {
    assert!(TagType::from_code(0x00).is_none());
    assert!(TagType::from_code(0xC0).is_none());
    match TagType::String.unpack(&[0x00]) {
        Err(Error::UnknownType(code)) => assert_eq!(code, 0xD0),
        other => panic!("expected unknown type error, got {:?}", other),
    }
}

#[test]
fn test_short_value_buffer() {
    assert!(TagType::Dint.unpack(&[0x01, 0x02]).is_err());
}
