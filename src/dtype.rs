use std::io::{Read, Seek, Write};

use bevy_reflect::{Reflect, Struct};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use thiserror::Error;

/// Four-byte chunk tag. Stored in file order, so comparisons against byte
/// literals (`b"RIFF"`) are endian-independent.
pub type FourCC = [u8; 4];

pub fn fourcc_str(tag: &FourCC) -> String {
    tag.iter()
        .map(|&b| {
            if (0x20..0x7F).contains(&b) {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}

/// Upper bound on any single allocation requested by a chunk size field.
/// A size beyond this is treated as a corrupt file rather than attempted.
pub const MAX_CHUNK_ALLOC: u64 = 1 << 30;

#[derive(Debug, Error)]
pub enum SfError {
    /// Short read, truncated chunk, or any underlying I/O failure.
    #[error("bad file: {0}")]
    BadFile(String),
    #[error("bad file type: {0}")]
    BadFileType(String),
    #[error("bad sample: {0}")]
    BadSample(String),
    #[error("no usable instrument for bank {bank}, program {program}")]
    BadInstrument { bank: u16, program: u16 },
    #[error("refusing to allocate {0} bytes for a chunk")]
    Memory(u64),
    #[error("invalid argument: {0}")]
    Param(String),
    #[error("not ready: {0}")]
    NotReady(String),
    #[error("encoder: {0}")]
    Encoder(String),
}

impl From<std::io::Error> for SfError {
    fn from(e: std::io::Error) -> SfError {
        SfError::BadFile(e.to_string())
    }
}

/// Fixed-point 16.16 value, the engine's gain/rate representation.
pub type Fixed = i32;
pub const FIXED_1: Fixed = 1 << 16;

pub fn fixed_from_f64(v: f64) -> Fixed {
    (v * FIXED_1 as f64).round() as Fixed
}

pub fn fixed_to_f64(v: Fixed) -> f64 {
    v as f64 / FIXED_1 as f64
}

/// Marker for packed little-endian wire structs whose fields are declared in
/// file order. The blanket [`ReadWrite`] impl walks the fields reflectively
/// and performs the per-field endian conversion, which keeps the record
/// definitions purely declarative.
pub trait AutoReadWrite: Reflect + Struct + Default {}

pub trait ReadWrite {
    fn write_to_file<W: Write + Seek>(&self, writer: &mut W) -> Result<usize, SfError>;
    fn read_from_file<R: Read + Seek>(&mut self, reader: &mut R) -> Result<(), SfError>;
}

macro_rules! read_n_bytes {
    ($file:ident, $n:literal) => {{
        let mut buf: [u8; $n] = [0; $n];
        $file.read_exact(&mut buf).map(|_| buf)
    }};
}

impl<T: AutoReadWrite> ReadWrite for T {
    fn write_to_file<W: Write + Seek>(&self, writer: &mut W) -> Result<usize, SfError> {
        let mut bytes_written = 0;
        for field_i in 0..self.field_len() {
            let field = self
                .field_at(field_i)
                .ok_or_else(|| SfError::Param("failed to get field".into()))?;
            let type_info = field
                .get_represented_type_info()
                .ok_or_else(|| SfError::Param("failed to get type info of field".into()))?;
            match type_info {
                bevy_reflect::TypeInfo::Array(array_info) => {
                    let capacity = array_info.capacity();
                    if array_info.item_type_name() == "u8" {
                        if capacity == 4 {
                            writer.write_all(
                                field
                                    .as_any()
                                    .downcast_ref::<[u8; 4]>()
                                    .ok_or_else(|| SfError::Param("reflect mismatch".into()))?,
                            )?;
                            bytes_written += 4;
                        } else if capacity == 20 {
                            writer.write_all(
                                field
                                    .as_any()
                                    .downcast_ref::<[u8; 20]>()
                                    .ok_or_else(|| SfError::Param("reflect mismatch".into()))?,
                            )?;
                            bytes_written += 20;
                        } else {
                            panic!("Unsupported auto array length!");
                        }
                    } else {
                        panic!("Unsupported auto array type!");
                    }
                }
                bevy_reflect::TypeInfo::Value(value_info) => {
                    if value_info.type_name() == "u8" {
                        writer.write_u8(
                            *field
                                .as_any()
                                .downcast_ref::<u8>()
                                .ok_or_else(|| SfError::Param("reflect mismatch".into()))?,
                        )?;
                        bytes_written += 1;
                    } else if value_info.type_name() == "i8" {
                        writer.write_i8(
                            *field
                                .as_any()
                                .downcast_ref::<i8>()
                                .ok_or_else(|| SfError::Param("reflect mismatch".into()))?,
                        )?;
                        bytes_written += 1;
                    } else if value_info.type_name() == "u16" {
                        writer.write_u16::<LittleEndian>(
                            *field
                                .as_any()
                                .downcast_ref::<u16>()
                                .ok_or_else(|| SfError::Param("reflect mismatch".into()))?,
                        )?;
                        bytes_written += 2;
                    } else if value_info.type_name() == "i16" {
                        writer.write_i16::<LittleEndian>(
                            *field
                                .as_any()
                                .downcast_ref::<i16>()
                                .ok_or_else(|| SfError::Param("reflect mismatch".into()))?,
                        )?;
                        bytes_written += 2;
                    } else if value_info.type_name() == "u32" {
                        writer.write_u32::<LittleEndian>(
                            *field
                                .as_any()
                                .downcast_ref::<u32>()
                                .ok_or_else(|| SfError::Param("reflect mismatch".into()))?,
                        )?;
                        bytes_written += 4;
                    } else {
                        panic!("Unsupported auto value type!");
                    }
                }
                _ => panic!("Unsupported auto type!"),
            }
        }
        Ok(bytes_written)
    }
    fn read_from_file<R: Read + Seek>(&mut self, file: &mut R) -> Result<(), SfError> {
        for field_i in 0..self.field_len() {
            let field = self
                .field_at_mut(field_i)
                .ok_or_else(|| SfError::Param("failed to get field".into()))?;
            let type_info = field
                .get_represented_type_info()
                .ok_or_else(|| SfError::Param("failed to get type info of field".into()))?;
            match type_info {
                bevy_reflect::TypeInfo::Array(array_info) => {
                    let capacity = array_info.capacity();
                    if array_info.item_type_name() == "u8" {
                        if capacity == 4 {
                            *field
                                .as_any_mut()
                                .downcast_mut::<[u8; 4]>()
                                .ok_or_else(|| SfError::Param("reflect mismatch".into()))? =
                                read_n_bytes!(file, 4)?;
                        } else if capacity == 20 {
                            *field
                                .as_any_mut()
                                .downcast_mut::<[u8; 20]>()
                                .ok_or_else(|| SfError::Param("reflect mismatch".into()))? =
                                read_n_bytes!(file, 20)?;
                        } else {
                            panic!("Unsupported auto array length!");
                        }
                    } else {
                        panic!("Unsupported auto array type!");
                    }
                }
                bevy_reflect::TypeInfo::Value(value_info) => {
                    if value_info.type_name() == "u8" {
                        *field
                            .as_any_mut()
                            .downcast_mut::<u8>()
                            .ok_or_else(|| SfError::Param("reflect mismatch".into()))? =
                            file.read_u8()?;
                    } else if value_info.type_name() == "i8" {
                        *field
                            .as_any_mut()
                            .downcast_mut::<i8>()
                            .ok_or_else(|| SfError::Param("reflect mismatch".into()))? =
                            file.read_i8()?;
                    } else if value_info.type_name() == "u16" {
                        *field
                            .as_any_mut()
                            .downcast_mut::<u16>()
                            .ok_or_else(|| SfError::Param("reflect mismatch".into()))? =
                            file.read_u16::<LittleEndian>()?;
                    } else if value_info.type_name() == "i16" {
                        *field
                            .as_any_mut()
                            .downcast_mut::<i16>()
                            .ok_or_else(|| SfError::Param("reflect mismatch".into()))? =
                            file.read_i16::<LittleEndian>()?;
                    } else if value_info.type_name() == "u32" {
                        *field
                            .as_any_mut()
                            .downcast_mut::<u32>()
                            .ok_or_else(|| SfError::Param("reflect mismatch".into()))? =
                            file.read_u32::<LittleEndian>()?;
                    } else {
                        panic!("Unsupported auto value type!");
                    }
                }
                _ => panic!("Unsupported auto type!"),
            }
        }
        Ok(())
    }
}

/// A fixed-size wire record. `RECORD_SIZE` is the packed on-disk size, used
/// to derive the record count from a pdta sub-chunk's byte length.
pub trait WireRecord {
    const RECORD_SIZE: usize;
}

/// Flat array of wire records, read as `chunk_size / RECORD_SIZE` entries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordTable<T: ReadWrite + Default + WireRecord + Serialize> {
    #[serde(rename = "r")]
    pub records: Vec<T>,
}

impl<T: ReadWrite + Default + WireRecord + Serialize> RecordTable<T> {
    pub fn read_sized<R: Read + Seek>(reader: &mut R, byte_len: u32) -> Result<Self, SfError> {
        if byte_len as u64 > MAX_CHUNK_ALLOC {
            return Err(SfError::Memory(byte_len as u64));
        }
        let n = byte_len as usize / T::RECORD_SIZE;
        let mut records = Vec::with_capacity(n);
        for _ in 0..n {
            let mut record = T::default();
            record.read_from_file(reader)?;
            records.push(record);
        }
        // Skip any trailing bytes that do not form a whole record.
        let remainder = byte_len as usize % T::RECORD_SIZE;
        if remainder != 0 {
            reader.seek(std::io::SeekFrom::Current(remainder as i64))?;
        }
        Ok(RecordTable { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T: ReadWrite + Default + WireRecord + Serialize> ReadWrite for RecordTable<T> {
    fn write_to_file<W: Write + Seek>(&self, writer: &mut W) -> Result<usize, SfError> {
        let mut bytes_written = 0;
        for record in self.records.iter() {
            bytes_written += record.write_to_file(writer)?;
        }
        Ok(bytes_written)
    }
    fn read_from_file<R: Read + Seek>(&mut self, _reader: &mut R) -> Result<(), SfError> {
        Err(SfError::Param(
            "RecordTable must be read with read_sized".into(),
        ))
    }
}

/// Fixed 20-byte name field used by phdr/inst/shdr records.
pub fn record_name(raw: &[u8; 20]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

pub fn name_contains_ignore_case(name: &str, needle: &str) -> bool {
    name.to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}
