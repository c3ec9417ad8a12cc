//! Constant-pool rewriting for JVM class files.
//!
//! Every class name, descriptor and signature a class refers to is stored
//! as a `CONSTANT_Utf8` entry; the rest of the file addresses the pool by
//! index. Rewriting the Utf8 entries therefore relocates every reference
//! while the remainder of the class is copied byte for byte.
//!
//! Strings using the modified-UTF-8 encodings for NUL or supplementary
//! characters are not valid UTF-8 and are left untouched.

use thiserror::Error;

const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

const UTF8: u8 = 1;
const INTEGER: u8 = 3;
const FLOAT: u8 = 4;
const LONG: u8 = 5;
const DOUBLE: u8 = 6;
const CLASS: u8 = 7;
const STRING: u8 = 8;
const FIELD_REF: u8 = 9;
const METHOD_REF: u8 = 10;
const INTERFACE_METHOD_REF: u8 = 11;
const NAME_AND_TYPE: u8 = 12;
const METHOD_HANDLE: u8 = 15;
const METHOD_TYPE: u8 = 16;
const DYNAMIC: u8 = 17;
const INVOKE_DYNAMIC: u8 = 18;
const MODULE: u8 = 19;
const PACKAGE: u8 = 20;

/// Reasons a class file cannot be rewritten.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassFileError {
    /// The file does not start with `0xCAFEBABE`.
    #[error("not a class file")]
    BadMagic,
    /// The file ends inside the header or the constant pool.
    #[error("class file ends inside the constant pool")]
    Truncated,
    /// A constant pool entry carries a tag this reader does not know.
    #[error("unknown constant pool tag {tag} at entry {index}")]
    UnknownTag {
        /// The offending tag byte.
        tag: u8,
        /// Constant pool index of the entry.
        index: u32,
    },
    /// A rewritten string no longer fits a `u16` length.
    #[error("relocated constant at entry {index} exceeds 65535 bytes")]
    TooLong {
        /// Constant pool index of the entry.
        index: u32,
    },
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ClassFileError> {
        let end = self
            .position
            .checked_add(len)
            .ok_or(ClassFileError::Truncated)?;
        let taken = self
            .bytes
            .get(self.position..end)
            .ok_or(ClassFileError::Truncated)?;
        self.position = end;
        Ok(taken)
    }

    fn read_u8(&mut self) -> Result<u8, ClassFileError> {
        self.take(1)?
            .first()
            .copied()
            .ok_or(ClassFileError::Truncated)
    }

    fn read_u16(&mut self) -> Result<u16, ClassFileError> {
        match self.take(2)? {
            [high, low] => Ok((u16::from(*high) << 8) | u16::from(*low)),
            _ => Err(ClassFileError::Truncated),
        }
    }

    fn rest(&self) -> &'a [u8] {
        self.bytes.get(self.position..).unwrap_or_default()
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    for half in [value >> 8, value & 0xFF] {
        out.push(u8::try_from(half).unwrap_or(u8::MAX));
    }
}

/// Rewrite the `CONSTANT_Utf8` entries of a class file.
///
/// `remap` sees every string constant that decodes as UTF-8 and returns
/// the replacement, or `None` to keep the original.
///
/// # Errors
///
/// Returns a [`ClassFileError`] when the bytes are not a well-formed class
/// file up to the end of the constant pool, or a replacement is too long.
pub fn rewrite_constants<F>(bytes: &[u8], remap: F) -> Result<Vec<u8>, ClassFileError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut reader = Reader::new(bytes);
    if reader.take(MAGIC.len())? != MAGIC {
        return Err(ClassFileError::BadMagic);
    }
    let versions = reader.take(4)?;
    let count = reader.read_u16()?;

    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(versions);
    push_u16(&mut out, count);

    let mut index: u32 = 1;
    while index < u32::from(count) {
        let tag = reader.read_u8()?;
        out.push(tag);
        if tag == UTF8 {
            let len = reader.read_u16()?;
            let raw = reader.take(usize::from(len))?;
            write_utf8(&mut out, raw, index, &remap)?;
            index += 1;
            continue;
        }
        let width = match tag {
            CLASS | STRING | METHOD_TYPE | MODULE | PACKAGE => 2,
            METHOD_HANDLE => 3,
            INTEGER | FLOAT | FIELD_REF | METHOD_REF | INTERFACE_METHOD_REF | NAME_AND_TYPE
            | DYNAMIC | INVOKE_DYNAMIC => 4,
            LONG | DOUBLE => 8,
            other => return Err(ClassFileError::UnknownTag { tag: other, index }),
        };
        out.extend_from_slice(reader.take(width)?);
        // Eight-byte constants occupy two pool slots.
        index += if matches!(tag, LONG | DOUBLE) { 2 } else { 1 };
    }

    out.extend_from_slice(reader.rest());
    Ok(out)
}

fn write_utf8<F>(out: &mut Vec<u8>, raw: &[u8], index: u32, remap: &F) -> Result<(), ClassFileError>
where
    F: Fn(&str) -> Option<String>,
{
    let replaced = std::str::from_utf8(raw).ok().and_then(remap);
    let text = replaced.as_ref().map_or(raw, String::as_bytes);
    let len = u16::try_from(text.len()).map_err(|_| ClassFileError::TooLong { index })?;
    push_u16(out, len);
    out.extend_from_slice(text);
    Ok(())
}

/// Builds a minimal class file holding `strings` as Utf8 constants, a
/// `Class` entry pointing at the first one and a `Long` entry.
#[cfg(test)]
pub(super) fn sample_class(strings: &[&str]) -> Vec<u8> {
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&[0, 0, 0, 52]);
    let count = u16::try_from(strings.len() + 4).expect("small pool");
    push_u16(&mut bytes, count);
    for text in strings {
        bytes.push(UTF8);
        push_u16(&mut bytes, u16::try_from(text.len()).expect("short string"));
        bytes.extend_from_slice(text.as_bytes());
    }
    bytes.push(CLASS);
    push_u16(&mut bytes, 1);
    bytes.push(LONG);
    bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 7]);
    bytes.extend_from_slice(SAMPLE_TRAILER);
    bytes
}

/// Access flags, this/super class, and empty member tables.
#[cfg(test)]
const SAMPLE_TRAILER: &[u8] = &[0x00, 0x21, 0, 5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// Every Utf8 constant of `bytes`, in pool order.
#[cfg(test)]
pub(super) fn utf8_constants(bytes: &[u8]) -> Result<Vec<String>, ClassFileError> {
    let seen = std::cell::RefCell::new(Vec::new());
    rewrite_constants(bytes, |text| {
        seen.borrow_mut().push(text.to_owned());
        None
    })?;
    Ok(seen.into_inner())
}
