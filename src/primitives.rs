//! Building blocks shared by several machines: a single-value register,
//! a FIFO with per-queue fallbacks, and character-level I/O over byte streams.

use std::collections::VecDeque;
use std::collections::vec_deque;
use std::io::{self, BufReader, Bytes, Read, Write};

use crate::error::{Error, RuntimeFault};

/// A cell holding exactly one value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Register<T: Copy> {
    value: T,
}

impl<T: Copy> Register<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn get(&self) -> T {
        self.value
    }

    pub fn put(&mut self, value: T) {
        self.value = value;
    }
}

/// What a [`Fifo`] yields when read while empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// A fixed value.
    Constant(i64),
    /// The current value of the machine's register.
    Register,
    /// Refill the queue from the remaining input, then read again.
    DrainInput,
}

/// First-in first-out queue of integers.
///
/// The queue itself only stores values. Resolving a [`Fallback`] needs the
/// machine that owns the queue (its register, its input), so callers ask for
/// [`Fifo::on_get`] / [`Fifo::on_peek`] when `pop`/`front` come back empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fifo {
    items: VecDeque<i64>,
    on_get: Fallback,
    on_peek: Fallback,
}

impl Fifo {
    pub fn new(on_get: Fallback, on_peek: Fallback) -> Self {
        Self {
            items: VecDeque::new(),
            on_get,
            on_peek,
        }
    }

    /// Append `value` at the back.
    pub fn put(&mut self, value: i64) {
        self.items.push_back(value);
    }

    /// Remove and return the oldest value.
    pub fn pop(&mut self) -> Option<i64> {
        self.items.pop_front()
    }

    /// The oldest value, without removing it.
    pub fn front(&self) -> Option<i64> {
        self.items.front().copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, i64> {
        self.items.iter()
    }

    pub fn on_get(&self) -> Fallback {
        self.on_get
    }

    pub fn on_peek(&self) -> Fallback {
        self.on_peek
    }
}

impl Extend<i64> for Fifo {
    fn extend<I: IntoIterator<Item = i64>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

/// Buffered UTF-8 character source with push-back.
pub struct CharSource<R: Read> {
    bytes: Bytes<BufReader<R>>,
    pushed: VecDeque<char>,
}

impl<R: Read> CharSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            bytes: BufReader::new(reader).bytes(),
            pushed: VecDeque::new(),
        }
    }

    /// Next character, or `None` at end of input.
    pub fn next_char(&mut self) -> io::Result<Option<char>> {
        if let Some(c) = self.pushed.pop_front() {
            return Ok(Some(c));
        }

        let lead = match self.bytes.next() {
            Some(b) => b?,
            None => return Ok(None),
        };
        let width = match lead {
            0x00..=0x7F => return Ok(Some(lead as char)),
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return Err(invalid_utf8()),
        };

        let mut buf = [lead, 0, 0, 0];
        for slot in buf.iter_mut().take(width).skip(1) {
            *slot = match self.bytes.next() {
                Some(b) => b?,
                None => return Err(invalid_utf8()),
            };
        }
        std::str::from_utf8(&buf[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .map(Some)
            .ok_or_else(invalid_utf8)
    }

    /// Return `c` to the source; it is the next character read.
    pub fn push_back(&mut self, c: char) {
        self.pushed.push_front(c);
    }
}

fn invalid_utf8() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "input is not valid UTF-8")
}

/// Interpret `code` as a Unicode scalar value.
pub fn to_char(code: i128) -> Result<char, RuntimeFault> {
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .ok_or(RuntimeFault::InvalidCharacter(code))
}

/// Write `code` as one character.
pub fn emit_char<W: Write>(out: &mut W, code: i128) -> Result<(), Error> {
    let c = to_char(code)?;
    let mut buf = [0u8; 4];
    out.write_all(c.encode_utf8(&mut buf).as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_put_get() {
        let mut r = Register::new(0i64);
        r.put(42);
        assert_eq!(r.get(), 42);
    }

    #[test]
    fn test_fifo_order() {
        let mut f = Fifo::new(Fallback::Constant(0), Fallback::Constant(0));
        f.put(20);
        f.put(10);
        assert_eq!(f.front(), Some(20));
        assert_eq!(f.pop(), Some(20));
        assert_eq!(f.pop(), Some(10));
        assert_eq!(f.pop(), None);
        assert!(f.is_empty());
    }

    #[test]
    fn test_fifo_keeps_fallbacks() {
        let f = Fifo::new(Fallback::DrainInput, Fallback::Register);
        assert_eq!(f.on_get(), Fallback::DrainInput);
        assert_eq!(f.on_peek(), Fallback::Register);
    }

    #[test]
    fn test_fifo_extend() {
        let mut f = Fifo::new(Fallback::Constant(1), Fallback::Constant(1));
        f.extend([1, 2, 3]);
        assert_eq!(f.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(f.len(), 3);
    }

    #[test]
    fn test_char_source_ascii_and_eof() {
        let mut src = CharSource::new(&b"ab"[..]);
        assert_eq!(src.next_char().unwrap(), Some('a'));
        assert_eq!(src.next_char().unwrap(), Some('b'));
        assert_eq!(src.next_char().unwrap(), None);
    }

    #[test]
    fn test_char_source_multibyte() {
        let mut src = CharSource::new("é€🦀".as_bytes());
        assert_eq!(src.next_char().unwrap(), Some('é'));
        assert_eq!(src.next_char().unwrap(), Some('€'));
        assert_eq!(src.next_char().unwrap(), Some('🦀'));
        assert_eq!(src.next_char().unwrap(), None);
    }

    #[test]
    fn test_char_source_push_back() {
        let mut src = CharSource::new(&b"12x"[..]);
        assert_eq!(src.next_char().unwrap(), Some('1'));
        src.push_back('1');
        assert_eq!(src.next_char().unwrap(), Some('1'));
        assert_eq!(src.next_char().unwrap(), Some('2'));
    }

    #[test]
    fn test_char_source_rejects_truncated_sequence() {
        let mut src = CharSource::new(&[0xE2u8, 0x82][..]);
        let err = src.next_char().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_emit_char() {
        let mut out = Vec::new();
        emit_char(&mut out, 72).unwrap();
        emit_char(&mut out, 0x20AC).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "H€");
    }

    #[test]
    fn test_emit_char_rejects_invalid() {
        let mut out = Vec::new();
        assert!(matches!(
            emit_char(&mut out, -1),
            Err(Error::Fault(RuntimeFault::InvalidCharacter(-1)))
        ));
        assert!(matches!(
            emit_char(&mut out, 0xD800),
            Err(Error::Fault(RuntimeFault::InvalidCharacter(0xD800)))
        ));
        assert!(out.is_empty());
    }
}
