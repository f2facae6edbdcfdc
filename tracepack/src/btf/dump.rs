//! Generic pretty-printer over the debug-type table: renders an opaque byte
//! buffer as text directed by a type id. Layout is data-directed; scalars
//! dispatch over a small tagged variant instead of per-type code paths.

use std::fmt::Write as _;

use super::{EnumEntry, IntInfo, TypeId, TypeKind, TypeTable};
use crate::error::{Error, Result};

/// The scalar kinds the printer understands.
enum Scalar {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Bool(bool),
}

fn field(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    data.get(offset..offset + len).ok_or_else(|| {
        Error::TypeInfo(format!(
            "value buffer too short: need {len} bytes at offset {offset}, have {}",
            data.len()
        ))
    })
}

fn read_unsigned(bytes: &[u8]) -> Result<u64> {
    Ok(match bytes.len() {
        1 => bytes[0] as u64,
        2 => u16::from_ne_bytes([bytes[0], bytes[1]]) as u64,
        4 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
        8 => u64::from_ne_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
        n => return Err(Error::Unsupported(format!("{n}-byte integer"))),
    })
}

fn read_signed(bytes: &[u8]) -> Result<i64> {
    Ok(match bytes.len() {
        1 => bytes[0] as i8 as i64,
        2 => i16::from_ne_bytes([bytes[0], bytes[1]]) as i64,
        4 => i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        8 => i64::from_ne_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
        n => return Err(Error::Unsupported(format!("{n}-byte integer"))),
    })
}

fn read_scalar(info: &IntInfo, bytes: &[u8]) -> Result<Scalar> {
    if info.is_bool {
        return Ok(Scalar::Bool(read_unsigned(bytes)? != 0));
    }
    if info.signed {
        Ok(Scalar::Signed(read_signed(bytes)?))
    } else {
        Ok(Scalar::Unsigned(read_unsigned(bytes)?))
    }
}

fn write_scalar(out: &mut String, scalar: Scalar) {
    let _ = match scalar {
        Scalar::Signed(v) => write!(out, "{v}"),
        Scalar::Unsigned(v) => write!(out, "{v}"),
        Scalar::Float(v) => write!(out, "{v}"),
        Scalar::Bool(v) => write!(out, "{v}"),
    };
}

fn enum_label(entries: &[EnumEntry], value: i64, out: &mut String) {
    match entries.iter().find(|e| e.value == value) {
        Some(entry) => out.push_str(&entry.name),
        None => {
            let _ = write!(out, "{value}");
        }
    }
}

/// Render `data` as the type `id` describes. Returns the rendered text, or
/// an error the caller typically downgrades to a `<unknown>` placeholder.
pub fn format_value(table: &TypeTable, id: TypeId, data: &[u8]) -> Result<String> {
    let mut out = String::new();
    write_value(table, id, data, &mut out)?;
    Ok(out)
}

fn write_value(table: &TypeTable, id: TypeId, data: &[u8], out: &mut String) -> Result<()> {
    let resolved = table.skip_mods_and_typedefs(id)?;
    let rec = table.type_by_id(resolved)?;
    match &rec.kind {
        TypeKind::Void => {
            out.push_str("(void)");
        }
        TypeKind::Int(info) => {
            let size = info.bits.div_ceil(8) as usize;
            let scalar = read_scalar(info, field(data, 0, size)?)?;
            write_scalar(out, scalar);
        }
        TypeKind::Float { bytes } => {
            let raw = field(data, 0, *bytes as usize)?;
            let value = match *bytes {
                4 => f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
                8 => f64::from_ne_bytes([
                    raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
                ]),
                n => return Err(Error::Unsupported(format!("{n}-byte float"))),
            };
            write_scalar(out, Scalar::Float(value));
        }
        TypeKind::Pointer { .. } => {
            let raw = read_unsigned(field(data, 0, 8)?)?;
            let _ = write!(out, "0x{raw:x}");
        }
        TypeKind::Array { elem, len } => {
            let stride = table.resolve_size(*elem)?;
            out.push('[');
            for i in 0..*len as usize {
                if i > 0 {
                    out.push(',');
                }
                write_value(table, *elem, field(data, i * stride, stride)?, out)?;
            }
            out.push(']');
        }
        TypeKind::Struct { kflag, members, .. } | TypeKind::Union { kflag, members, .. } => {
            out.push('{');
            for (i, member) in members.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let (bit_off, bit_sz) = super::member_bits(*kflag, member.offset);
                if bit_sz != 0 || bit_off % 8 != 0 {
                    return Err(Error::Unsupported("bitfield member".to_string()));
                }
                let offset = (bit_off / 8) as usize;
                let size = table.resolve_size(member.type_id)?;
                write_value(table, member.type_id, field(data, offset, size)?, out)?;
            }
            out.push('}');
        }
        TypeKind::Enum { size, entries } => {
            let value = read_signed(field(data, 0, *size as usize)?)?;
            enum_label(entries, value, out);
        }
        TypeKind::Typedef { .. }
        | TypeKind::Const { .. }
        | TypeKind::Volatile { .. }
        | TypeKind::Restrict { .. } => unreachable!("modifiers resolved above"),
    }
    Ok(())
}
