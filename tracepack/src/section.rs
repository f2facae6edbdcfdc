//! Section patcher: writes each variable's current value into the object's
//! memory-mapped data sections between open and load, so globals and BSS
//! variables are seeded before the kernel verifies the program.

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::loader::LoadedObject;
use crate::meta::{SkeletonMeta, VariableMeta};

/// Patch every recognized data section of an opened object.
///
/// Sections whose slot has no mmap region are logged and skipped.
pub fn patch_sections(meta: &SkeletonMeta, obj: &mut dyn LoadedObject) -> Result<()> {
    for section in &meta.data_sections {
        let ident = section.name.trim_start_matches('.');
        let Some(buffer) = obj.mapped_section_mut(ident) else {
            warn!("section {} has no mmap region, skipping", section.name);
            continue;
        };
        for var in &section.variables {
            write_variable(buffer, var)?;
        }
    }
    Ok(())
}

fn write_variable(buffer: &mut [u8], var: &VariableMeta) -> Result<()> {
    let Some(value) = &var.value else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let end = var.offset.checked_add(var.size).filter(|&e| e <= buffer.len());
    let Some(end) = end else {
        return Err(Error::MalformedMeta(format!(
            "variable {} ({} bytes at {}) exceeds its {} byte section",
            var.name,
            var.size,
            var.offset,
            buffer.len()
        )));
    };
    let slot = &mut buffer[var.offset..end];
    debug!("load runtime arg {} = {}", var.name, value);

    if var.ty.starts_with("char[") {
        let text = value.as_str().ok_or_else(|| {
            Error::MalformedMeta(format!("variable {} expects a string value", var.name))
        })?;
        // leave room for the terminating NUL
        let n = text.len().min(slot.len().saturating_sub(1));
        slot[..n].copy_from_slice(&text.as_bytes()[..n]);
        for byte in &mut slot[n..] {
            *byte = 0;
        }
        return Ok(());
    }
    if var.ty == "bool" {
        let flag = value.as_bool().ok_or_else(|| {
            Error::MalformedMeta(format!("variable {} expects a boolean value", var.name))
        })?;
        slot[0] = flag as u8;
        return Ok(());
    }
    if var.ty == "float" || var.ty == "double" {
        let float = value.as_f64().ok_or_else(|| {
            Error::MalformedMeta(format!("variable {} expects a numeric value", var.name))
        })?;
        match slot.len() {
            4 => slot.copy_from_slice(&(float as f32).to_ne_bytes()),
            8 => slot.copy_from_slice(&float.to_ne_bytes()),
            n => warn!("variable {} has unexpected float size {n}", var.name),
        }
        return Ok(());
    }

    let raw: u64 = if let Some(unsigned) = value.as_u64() {
        unsigned
    } else if let Some(signed) = value.as_i64() {
        signed as u64
    } else {
        return Err(Error::MalformedMeta(format!(
            "variable {} expects an integer value, got {value}",
            var.name
        )));
    };
    match slot.len() {
        1 | 2 | 4 | 8 => {
            let bytes = raw.to_ne_bytes();
            slot.copy_from_slice(&bytes[..slot.len()]);
        }
        n => warn!("variable {} has unsupported size {n}, skipping", var.name),
    }
    Ok(())
}
