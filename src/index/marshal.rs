// src/index/marshal.rs

//! Ruby Marshal 4.8 codec
//!
//! Covers the subset RubyGems uses for its spec indexes: nil, booleans,
//! fixnums, strings (with or without encoding ivars), symbols and symbol
//! links, arrays, hashes, object links, user-marshalled objects such as
//! `Gem::Version`, and plain objects such as old `Gem::Platform` values.

use crate::error::{Error, Result};

const MAJOR: u8 = 4;
const MINOR: u8 = 8;

const TYPE_NIL: u8 = b'0';
const TYPE_TRUE: u8 = b'T';
const TYPE_FALSE: u8 = b'F';
const TYPE_FIXNUM: u8 = b'i';
const TYPE_STRING: u8 = b'"';
const TYPE_SYMBOL: u8 = b':';
const TYPE_SYMLINK: u8 = b';';
const TYPE_IVAR: u8 = b'I';
const TYPE_ARRAY: u8 = b'[';
const TYPE_HASH: u8 = b'{';
const TYPE_LINK: u8 = b'@';
const TYPE_USRMARSHAL: u8 = b'U';
const TYPE_OBJECT: u8 = b'o';

/// Encoding ivar Ruby attaches to UTF-8 strings
const UTF8_IVAR: &str = "E";

/// A decoded Marshal value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    String(Vec<u8>),
    Symbol(String),
    Array(Vec<Value>),
    Hash(Vec<(Value, Value)>),
    /// Object dumped through `marshal_dump`
    UserMarshal { class: String, data: Box<Value> },
    /// Plain object with instance variables
    Object {
        class: String,
        ivars: Vec<(String, Value)>,
    },
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into().into_bytes())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Serialize a value, header included
pub fn dump(value: &Value) -> Vec<u8> {
    let mut writer = Writer {
        out: vec![MAJOR, MINOR],
        symbols: Vec::new(),
    };
    writer.write_value(value);
    writer.out
}

/// Deserialize a value, header included
pub fn load(input: &[u8]) -> Result<Value> {
    let mut reader = Reader {
        input,
        pos: 0,
        symbols: Vec::new(),
        objects: Vec::new(),
    };
    let major = reader.byte()?;
    let minor = reader.byte()?;
    if major != MAJOR || minor > MINOR {
        return Err(Error::ParseError(format!(
            "Unsupported Marshal version {}.{}",
            major, minor
        )));
    }
    let value = reader.read_value()?;
    if reader.pos != input.len() {
        return Err(Error::ParseError(format!(
            "Trailing data after Marshal value ({} bytes)",
            input.len() - reader.pos
        )));
    }
    Ok(value)
}

struct Writer {
    out: Vec<u8>,
    symbols: Vec<String>,
}

impl Writer {
    fn write_value(&mut self, value: &Value) {
        match value {
            Value::Nil => self.out.push(TYPE_NIL),
            Value::Bool(true) => self.out.push(TYPE_TRUE),
            Value::Bool(false) => self.out.push(TYPE_FALSE),
            Value::Int(n) => {
                self.out.push(TYPE_FIXNUM);
                self.write_int(*n);
            }
            Value::String(bytes) => {
                // Ruby strings carry their encoding; binary data goes out bare
                if std::str::from_utf8(bytes).is_ok() {
                    self.out.push(TYPE_IVAR);
                    self.out.push(TYPE_STRING);
                    self.write_bytes(bytes);
                    self.write_int(1);
                    self.write_symbol(UTF8_IVAR);
                    self.out.push(TYPE_TRUE);
                } else {
                    self.out.push(TYPE_STRING);
                    self.write_bytes(bytes);
                }
            }
            Value::Symbol(name) => self.write_symbol(name),
            Value::Array(items) => {
                self.out.push(TYPE_ARRAY);
                self.write_len(items.len());
                for item in items {
                    self.write_value(item);
                }
            }
            Value::Hash(pairs) => {
                self.out.push(TYPE_HASH);
                self.write_len(pairs.len());
                for (key, value) in pairs {
                    self.write_value(key);
                    self.write_value(value);
                }
            }
            Value::UserMarshal { class, data } => {
                self.out.push(TYPE_USRMARSHAL);
                self.write_symbol(class);
                self.write_value(data);
            }
            Value::Object { class, ivars } => {
                self.out.push(TYPE_OBJECT);
                self.write_symbol(class);
                self.write_len(ivars.len());
                for (name, value) in ivars {
                    self.write_symbol(name);
                    self.write_value(value);
                }
            }
        }
    }

    fn write_symbol(&mut self, name: &str) {
        if let Some(index) = self.symbols.iter().position(|s| s == name) {
            self.out.push(TYPE_SYMLINK);
            self.write_len(index);
        } else {
            self.out.push(TYPE_SYMBOL);
            self.write_bytes(name.as_bytes());
            self.symbols.push(name.to_string());
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_len(bytes.len());
        self.out.extend_from_slice(bytes);
    }

    fn write_len(&mut self, len: usize) {
        self.write_int(len as i64);
    }

    /// Marshal's variable-length integer
    fn write_int(&mut self, n: i64) {
        match n {
            0 => self.out.push(0),
            1..=122 => self.out.push((n + 5) as u8),
            -123..=-1 => self.out.push((n - 5) as u8),
            _ => {
                let mut bytes = Vec::with_capacity(4);
                let mut rest = n;
                for _ in 0..4 {
                    bytes.push((rest & 0xff) as u8);
                    rest >>= 8;
                    if (n >= 0 && rest == 0) || (n < 0 && rest == -1) {
                        break;
                    }
                }
                let count = bytes.len() as i8;
                self.out.push(if n >= 0 { count as u8 } else { (-count) as u8 });
                self.out.extend_from_slice(&bytes);
            }
        }
    }
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    symbols: Vec<String>,
    /// Object table for `@` links; `None` while the object is still being read
    objects: Vec<Option<Value>>,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or_else(|| Error::ParseError("Unexpected end of Marshal data".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| Error::ParseError("Unexpected end of Marshal data".to_string()))?;
        let slice = &self.input[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_int(&mut self) -> Result<i64> {
        let c = self.byte()? as i8;
        Ok(match c {
            0 => 0,
            5..=127 => (c - 5) as i64,
            -128..=-5 => (c + 5) as i64,
            1..=4 => {
                let mut n: i64 = 0;
                for i in 0..c {
                    n |= (self.byte()? as i64) << (8 * i);
                }
                n
            }
            -4..=-1 => {
                let mut n: i64 = -1;
                for i in 0..(-c) {
                    n &= !(0xff << (8 * i));
                    n |= (self.byte()? as i64) << (8 * i);
                }
                n
            }
        })
    }

    fn read_len(&mut self) -> Result<usize> {
        let n = self.read_int()?;
        usize::try_from(n).map_err(|_| Error::ParseError(format!("Negative length {}", n)))
    }

    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_len()?;
        self.take(len)
    }

    fn read_symbol(&mut self) -> Result<String> {
        match self.byte()? {
            TYPE_SYMBOL => self.read_symbol_body(),
            TYPE_SYMLINK => self.read_symlink(),
            other => Err(Error::ParseError(format!(
                "Expected symbol, found type byte {:#04x}",
                other
            ))),
        }
    }

    fn read_symbol_body(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        let name = String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::ParseError("Symbol is not valid UTF-8".to_string()))?;
        self.symbols.push(name.clone());
        Ok(name)
    }

    fn read_symlink(&mut self) -> Result<String> {
        let index = self.read_len()?;
        self.symbols
            .get(index)
            .cloned()
            .ok_or_else(|| Error::ParseError(format!("Dangling symbol link {}", index)))
    }

    /// Reserve an object table slot before reading children
    fn reserve(&mut self) -> usize {
        self.objects.push(None);
        self.objects.len() - 1
    }

    fn fill(&mut self, slot: usize, value: Value) -> Value {
        self.objects[slot] = Some(value.clone());
        value
    }

    fn read_value(&mut self) -> Result<Value> {
        match self.byte()? {
            TYPE_NIL => Ok(Value::Nil),
            TYPE_TRUE => Ok(Value::Bool(true)),
            TYPE_FALSE => Ok(Value::Bool(false)),
            TYPE_FIXNUM => Ok(Value::Int(self.read_int()?)),
            TYPE_SYMBOL => Ok(Value::Symbol(self.read_symbol_body()?)),
            TYPE_SYMLINK => Ok(Value::Symbol(self.read_symlink()?)),
            TYPE_STRING => {
                let slot = self.reserve();
                let bytes = self.read_bytes()?.to_vec();
                Ok(self.fill(slot, Value::String(bytes)))
            }
            TYPE_IVAR => {
                let value = self.read_value()?;
                // Encoding and other ivars on strings carry nothing we index
                let count = self.read_len()?;
                for _ in 0..count {
                    self.read_symbol()?;
                    self.read_value()?;
                }
                Ok(value)
            }
            TYPE_ARRAY => {
                let slot = self.reserve();
                let len = self.read_len()?;
                let mut items = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    items.push(self.read_value()?);
                }
                Ok(self.fill(slot, Value::Array(items)))
            }
            TYPE_HASH => {
                let slot = self.reserve();
                let len = self.read_len()?;
                let mut pairs = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    let key = self.read_value()?;
                    let value = self.read_value()?;
                    pairs.push((key, value));
                }
                Ok(self.fill(slot, Value::Hash(pairs)))
            }
            TYPE_USRMARSHAL => {
                let class = self.read_symbol()?;
                let slot = self.reserve();
                let data = self.read_value()?;
                Ok(self.fill(
                    slot,
                    Value::UserMarshal {
                        class,
                        data: Box::new(data),
                    },
                ))
            }
            TYPE_OBJECT => {
                let class = self.read_symbol()?;
                let slot = self.reserve();
                let count = self.read_len()?;
                let mut ivars = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    let name = self.read_symbol()?;
                    let value = self.read_value()?;
                    ivars.push((name, value));
                }
                Ok(self.fill(slot, Value::Object { class, ivars }))
            }
            TYPE_LINK => {
                let index = self.read_len()?;
                match self.objects.get(index) {
                    Some(Some(value)) => Ok(value.clone()),
                    Some(None) => Err(Error::ParseError(format!(
                        "Cyclic object link {} is not supported",
                        index
                    ))),
                    None => Err(Error::ParseError(format!("Dangling object link {}", index))),
                }
            }
            other => Err(Error::ParseError(format!(
                "Unsupported Marshal type byte {:#04x}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(v: &str) -> Value {
        Value::UserMarshal {
            class: "Gem::Version".to_string(),
            data: Box::new(Value::Array(vec![Value::string(v)])),
        }
    }

    #[test]
    fn test_dump_matches_ruby() {
        // Marshal.dump([["foo", Gem::Version.new("1.0"), "ruby"]])
        let value = Value::Array(vec![Value::Array(vec![
            Value::string("foo"),
            version("1.0"),
            Value::string("ruby"),
        ])]);
        let expected: &[u8] = b"\x04\x08[\x06[\x08I\"\x08foo\x06:\x06ETU:\x11Gem::Version[\x06I\"\x081.0\x06;\x00TI\"\truby\x06;\x00T";
        assert_eq!(dump(&value), expected);
        assert_eq!(load(expected).unwrap(), value);
    }

    #[test]
    fn test_load_object_links() {
        // Ruby links repeated references to the same String object
        let bytes: &[u8] = b"\x04\x08[\x07I\"\truby\x06:\x06ET@\x06";
        let value = load(bytes).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::string("ruby"), Value::string("ruby")])
        );
    }

    #[test]
    fn test_fixnum_encoding() {
        for n in [0, 1, 122, 123, 255, 256, 65535, 65536, -1, -123, -124, -256, -257, 1 << 30, -(1 << 30)] {
            let bytes = dump(&Value::Int(n));
            assert_eq!(load(&bytes).unwrap(), Value::Int(n), "fixnum {}", n);
        }
        assert_eq!(dump(&Value::Int(0)), b"\x04\x08i\x00");
        assert_eq!(dump(&Value::Int(1)), b"\x04\x08i\x06");
        assert_eq!(dump(&Value::Int(-1)), b"\x04\x08i\xfa");
        assert_eq!(dump(&Value::Int(300)), b"\x04\x08i\x02\x2c\x01");
        assert_eq!(dump(&Value::Int(-300)), b"\x04\x08i\xfe\xd4\xfe");
    }

    #[test]
    fn test_load_plain_object() {
        // Gem::Platform objects in very old indexes
        let value = Value::Object {
            class: "Gem::Platform".to_string(),
            ivars: vec![
                ("@cpu".to_string(), Value::string("x86")),
                ("@os".to_string(), Value::string("mswin32")),
                ("@version".to_string(), Value::Nil),
            ],
        };
        assert_eq!(load(&dump(&value)).unwrap(), value);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(load(b"").is_err());
        assert!(load(b"\x03\x00[\x00").is_err());
        assert!(load(b"\x04\x08[\x07").is_err());
        assert!(load(b"\x04\x08@\x00").is_err());
        assert!(load(b"\x04\x080junk").is_err());
        assert!(load(b"\x04\x08f\x061").is_err());
    }

    #[test]
    fn test_binary_strings_stay_bare() {
        let value = Value::String(vec![0xff, 0xfe]);
        assert_eq!(dump(&value), b"\x04\x08\"\x07\xff\xfe");
        assert_eq!(load(&dump(&value)).unwrap(), value);
    }
}
